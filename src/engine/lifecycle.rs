use crate::model::*;

/// The join window opens this long before the start.
pub const JOIN_OPENS_BEFORE_MS: Ms = 15 * MINUTE_MS;
/// ...and a confirmed session needs an outcome this long after it.
pub const EVALUATION_AFTER_MS: Ms = 60 * MINUTE_MS;

/// Read-side view of a session. Computed from status and timestamps, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingPayment,
    Scheduled,
    Joinable,
    PendingEvaluation,
    Completed,
    NoShow,
    Cancelled,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::AwaitingPayment => "awaiting_payment",
            SessionPhase::Scheduled => "scheduled",
            SessionPhase::Joinable => "joinable",
            SessionPhase::PendingEvaluation => "pending_evaluation",
            SessionPhase::Completed => "completed",
            SessionPhase::NoShow => "no_show",
            SessionPhase::Cancelled => "cancelled",
        }
    }
}

pub fn session_phase(status: SessionStatus, scheduled_at: Ms, now: Ms) -> SessionPhase {
    match status {
        SessionStatus::Pending => SessionPhase::AwaitingPayment,
        SessionStatus::Completed => SessionPhase::Completed,
        SessionStatus::NoShow => SessionPhase::NoShow,
        SessionStatus::Cancelled => SessionPhase::Cancelled,
        SessionStatus::Confirmed => {
            let until_start = scheduled_at - now;
            if until_start <= -EVALUATION_AFTER_MS {
                SessionPhase::PendingEvaluation
            } else if until_start <= JOIN_OPENS_BEFORE_MS {
                SessionPhase::Joinable
            } else {
                SessionPhase::Scheduled
            }
        }
    }
}
