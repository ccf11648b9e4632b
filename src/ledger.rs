use serde::{Deserialize, Serialize};

use crate::model::{Amount, Session, SessionStatus};

/// Monetary state of a package. Only the ledger moves between these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowState {
    PendingPayment,
    HeldInEscrow,
    Released,
    Refunded,
    PartiallyRefunded,
    /// Payment never arrived; nothing was held.
    Voided,
}

impl EscrowState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, EscrowState::PendingPayment | EscrowState::HeldInEscrow)
    }

    pub fn label(self) -> &'static str {
        match self {
            EscrowState::PendingPayment => "pending_payment",
            EscrowState::HeldInEscrow => "held_in_escrow",
            EscrowState::Released => "released",
            EscrowState::Refunded => "refunded",
            EscrowState::PartiallyRefunded => "partially_refunded",
            EscrowState::Voided => "voided",
        }
    }
}

/// Result of applying a capture event to a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Captured,
    /// Same external payment delivered again; nothing changed.
    Duplicate,
}

/// Final split of a package's held funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub refunded: Amount,
    pub released: Amount,
    pub state: EscrowState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    AmountMismatch { expected: Amount, received: Amount },
    PaymentMismatch,
    Voided,
    NotHeld(EscrowState),
    SessionsOutstanding,
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::AmountMismatch { expected, received } => {
                write!(f, "captured amount {received} does not match amount due {expected}")
            }
            LedgerError::PaymentMismatch => {
                write!(f, "package already captured by a different payment")
            }
            LedgerError::Voided => write!(f, "package was voided before payment arrived"),
            LedgerError::NotHeld(state) => {
                write!(f, "ledger is {}, expected held_in_escrow", state.label())
            }
            LedgerError::SessionsOutstanding => {
                write!(f, "cannot settle while sessions are still outstanding")
            }
        }
    }
}

impl std::error::Error for LedgerError {}

/// Three-bucket escrow ledger embedded in each package record.
///
/// `held` is the captured amount and never changes after capture. Settlement
/// only reassigns it between `released` and `refunded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowLedger {
    pub state: EscrowState,
    pub total: Amount,
    pub held: Amount,
    pub released: Amount,
    pub refunded: Amount,
    pub payment_id: Option<String>,
}

impl EscrowLedger {
    pub fn new(total: Amount) -> Self {
        Self {
            state: EscrowState::PendingPayment,
            total,
            held: 0,
            released: 0,
            refunded: 0,
            payment_id: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Validate a capture without mutating. `amount = None` skips the amount check.
    pub fn check_capture(
        &self,
        payment_id: &str,
        amount: Option<Amount>,
    ) -> Result<CaptureOutcome, LedgerError> {
        match self.state {
            EscrowState::Voided => Err(LedgerError::Voided),
            EscrowState::PendingPayment => match amount {
                Some(received) if received != self.total => Err(LedgerError::AmountMismatch {
                    expected: self.total,
                    received,
                }),
                _ => Ok(CaptureOutcome::Captured),
            },
            _ if self.payment_id.as_deref() == Some(payment_id) => Ok(CaptureOutcome::Duplicate),
            _ => Err(LedgerError::PaymentMismatch),
        }
    }

    pub fn apply_capture(&mut self, payment_id: String, amount: Amount) {
        self.state = EscrowState::HeldInEscrow;
        self.held = amount;
        self.payment_id = Some(payment_id);
    }

    pub fn void(&mut self) {
        self.state = EscrowState::Voided;
    }

    /// Compute the final split once every session is terminal.
    ///
    /// Each session contributes its refund percent; the mean is applied once to
    /// the held amount, rounded half-up to a whole unit.
    pub fn settlement(&self, sessions: &[Session]) -> Result<Settlement, LedgerError> {
        if self.state != EscrowState::HeldInEscrow {
            return Err(LedgerError::NotHeld(self.state));
        }
        if sessions.is_empty() {
            return Err(LedgerError::SessionsOutstanding);
        }
        let mut percent_sum: u64 = 0;
        for s in sessions {
            match (s.status.is_terminal(), s.refund_percent) {
                (true, Some(p)) => percent_sum += u64::from(p.min(100)),
                _ => return Err(LedgerError::SessionsOutstanding),
            }
        }

        let refunded = refund_share(self.held, percent_sum, sessions.len() as u64);
        let released = self.held - refunded;
        let all_completed = sessions
            .iter()
            .all(|s| s.status == SessionStatus::Completed);

        let state = if all_completed && refunded == 0 {
            EscrowState::Released
        } else if refunded == self.held {
            EscrowState::Refunded
        } else {
            EscrowState::PartiallyRefunded
        };

        Ok(Settlement {
            refunded,
            released,
            state,
        })
    }

    pub fn apply_settlement(&mut self, settlement: &Settlement) {
        debug_assert_eq!(
            settlement.refunded + settlement.released,
            self.held,
            "settlement must conserve held funds"
        );
        self.refunded = settlement.refunded;
        self.released = settlement.released;
        self.state = settlement.state;
    }
}

/// `round_half_up(held * percent_sum / (100 * sessions))` in exact integer arithmetic.
pub fn refund_share(held: Amount, percent_sum: u64, sessions: u64) -> Amount {
    if sessions == 0 {
        return 0;
    }
    let numerator = u128::from(held) * u128::from(percent_sum);
    let denominator = 100u128 * u128::from(sessions);
    let rounded = (2 * numerator + denominator) / (2 * denominator);
    (rounded as Amount).min(held)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn session(status: SessionStatus, refund_percent: Option<u8>) -> Session {
        let mut s = Session::new(Ulid::new(), Ulid::new(), 0);
        s.status = status;
        s.refund_percent = refund_percent;
        s
    }

    fn held(total: Amount) -> EscrowLedger {
        let mut ledger = EscrowLedger::new(total);
        ledger.apply_capture("pay_1".into(), total);
        ledger
    }

    #[test]
    fn half_up_rounding() {
        assert_eq!(refund_share(1001, 50, 1), 501); // 500.5 rounds up
        assert_eq!(refund_share(1000, 80, 1), 800);
        assert_eq!(refund_share(999, 80, 1), 799); // 799.2
        assert_eq!(refund_share(1, 50, 1), 1);
        assert_eq!(refund_share(500, 0, 3), 0);
        assert_eq!(refund_share(500, 300, 3), 500);
    }

    #[test]
    fn rounding_applied_once_across_sessions() {
        // Three sessions at 50% each: per-session rounding would give 3 * round(16.67) = 51.
        assert_eq!(refund_share(100, 150, 3), 50);
    }

    #[test]
    fn capture_then_duplicate() {
        let mut ledger = EscrowLedger::new(1200);
        assert_eq!(
            ledger.check_capture("pay_1", Some(1200)),
            Ok(CaptureOutcome::Captured)
        );
        ledger.apply_capture("pay_1".into(), 1200);
        assert_eq!(
            ledger.check_capture("pay_1", Some(1200)),
            Ok(CaptureOutcome::Duplicate)
        );
        assert_eq!(
            ledger.check_capture("pay_2", None),
            Err(LedgerError::PaymentMismatch)
        );
        assert_eq!(ledger.held, 1200);
    }

    #[test]
    fn capture_amount_must_match() {
        let ledger = EscrowLedger::new(1200);
        assert_eq!(
            ledger.check_capture("pay_1", Some(1100)),
            Err(LedgerError::AmountMismatch {
                expected: 1200,
                received: 1100
            })
        );
    }

    #[test]
    fn voided_rejects_capture() {
        let mut ledger = EscrowLedger::new(1200);
        ledger.void();
        assert_eq!(ledger.check_capture("pay_1", None), Err(LedgerError::Voided));
    }

    #[test]
    fn all_completed_releases() {
        let ledger = held(1500);
        let sessions = vec![
            session(SessionStatus::Completed, Some(0)),
            session(SessionStatus::Completed, Some(0)),
        ];
        let s = ledger.settlement(&sessions).unwrap();
        assert_eq!(s.state, EscrowState::Released);
        assert_eq!(s.released, 1500);
        assert_eq!(s.refunded, 0);
    }

    #[test]
    fn requester_no_show_is_not_a_release() {
        let ledger = held(1500);
        let sessions = vec![session(SessionStatus::NoShow, Some(0))];
        let s = ledger.settlement(&sessions).unwrap();
        assert_eq!(s.state, EscrowState::PartiallyRefunded);
        assert_eq!(s.released, 1500);
    }

    #[test]
    fn provider_cancel_refunds_everything() {
        let ledger = held(1500);
        let sessions = vec![session(SessionStatus::Cancelled, Some(100))];
        let s = ledger.settlement(&sessions).unwrap();
        assert_eq!(s.state, EscrowState::Refunded);
        assert_eq!(s.refunded, 1500);
    }

    #[test]
    fn outstanding_sessions_block_settlement() {
        let ledger = held(1500);
        let sessions = vec![
            session(SessionStatus::Completed, Some(0)),
            session(SessionStatus::Confirmed, None),
        ];
        assert_eq!(
            ledger.settlement(&sessions),
            Err(LedgerError::SessionsOutstanding)
        );
    }

    #[test]
    fn settlement_requires_held_funds() {
        let ledger = EscrowLedger::new(1500);
        let sessions = vec![session(SessionStatus::Completed, Some(0))];
        assert_eq!(
            ledger.settlement(&sessions),
            Err(LedgerError::NotHeld(EscrowState::PendingPayment))
        );
    }

    #[test]
    fn conservation_across_tiers_and_sizes() {
        for total in [1, 99, 1000, 1001, 12_345] {
            for n in 1..=5usize {
                for pct in [0u8, 50, 80, 100] {
                    let mut ledger = held(total);
                    let sessions: Vec<Session> = (0..n)
                        .map(|_| session(SessionStatus::Cancelled, Some(pct)))
                        .collect();
                    let s = ledger.settlement(&sessions).unwrap();
                    ledger.apply_settlement(&s);
                    assert_eq!(ledger.released + ledger.refunded, ledger.held);
                    assert_eq!(ledger.held, total);
                }
            }
        }
    }
}
