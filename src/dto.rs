//! JSON shapes of the HTTP API. Field names are camelCase; instants are RFC 3339.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{CancelReceipt, OutcomeReceipt, PackageReceipt, SessionView, Slot, session_phase};
use crate::ledger::{CaptureOutcome, EscrowLedger, EscrowState};
use crate::model::*;

pub fn parse_instant(s: &str) -> Option<Ms> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

pub fn format_instant(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// `"HH:MM"` to minutes after midnight; `"24:00"` is allowed as an end.
pub fn parse_clock(s: &str) -> Option<u16> {
    let (h, m) = s.split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    let (h, m): (u16, u16) = (h.parse().ok()?, m.parse().ok()?);
    let minutes = h * 60 + m;
    (m < 60 && minutes <= 24 * 60).then_some(minutes)
}

pub fn format_clock(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

// ── Providers ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterProvider {
    pub id: Option<Ulid>,
    pub session_price: Amount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProvider {
    pub session_price: Amount,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDto {
    pub id: Ulid,
    pub session_price: Amount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleBody {
    pub start_time: String,
    pub end_time: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RuleDto {
    pub day_of_week: u8,
    pub start_time: String,
    pub end_time: String,
    pub active: bool,
    pub is_default: bool,
}

impl RuleDto {
    pub fn new(rule: AvailabilityRule, stored: bool) -> Self {
        Self {
            day_of_week: rule.day_of_week,
            start_time: format_clock(rule.start_minute),
            end_time: format_clock(rule.end_minute),
            active: rule.active,
            is_default: !stored,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlackoutBody {
    pub start_at: String,
    pub end_at: String,
}

#[derive(Debug, Deserialize)]
pub struct BlackoutRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlackoutDto {
    pub id: Ulid,
    pub start_at: String,
    pub end_at: String,
}

impl BlackoutDto {
    pub fn new(id: Ulid, span: Span) -> Self {
        Self {
            id,
            start_at: format_instant(span.start),
            end_at: format_instant(span.end),
        }
    }
}

// ── Slots ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotDto {
    pub time: String,
    pub starts_at: String,
    pub is_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<Slot> for SlotDto {
    fn from(slot: Slot) -> Self {
        Self {
            time: slot.time,
            starts_at: format_instant(slot.starts_at),
            is_available: slot.is_available,
            reason: slot.reason.map(|r| r.as_str().to_owned()),
        }
    }
}

// ── Packages ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePackage {
    pub requester_id: Ulid,
    pub provider_id: Ulid,
    pub slots: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSlotDto {
    pub id: Ulid,
    pub scheduled_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageCreatedDto {
    pub package_id: Ulid,
    pub sessions: Vec<SessionSlotDto>,
    pub amount_due: Amount,
    pub pay_by: String,
}

impl From<PackageReceipt> for PackageCreatedDto {
    fn from(r: PackageReceipt) -> Self {
        Self {
            package_id: r.package_id,
            sessions: r
                .sessions
                .into_iter()
                .map(|(id, at)| SessionSlotDto {
                    id,
                    scheduled_at: format_instant(at),
                })
                .collect(),
            amount_due: r.amount_due,
            pay_by: format_instant(r.pay_by),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowDto {
    pub state: EscrowState,
    pub total: Amount,
    pub held: Amount,
    pub released: Amount,
    pub refunded: Amount,
}

impl From<&EscrowLedger> for EscrowDto {
    fn from(l: &EscrowLedger) -> Self {
        Self {
            state: l.state,
            total: l.total,
            held: l.held,
            released: l.released,
            refunded: l.refunded,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDto {
    pub id: Ulid,
    pub package_id: Ulid,
    pub scheduled_at: String,
    pub duration_minutes: u32,
    pub status: SessionStatus,
    pub phase: String,
    pub reschedule_count: u8,
    pub meeting_ref: Option<String>,
    pub joined: bool,
    pub refund_percent: Option<u8>,
}

impl SessionDto {
    pub fn new(s: &Session, now: Ms) -> Self {
        Self {
            id: s.id,
            package_id: s.package_id,
            scheduled_at: format_instant(s.scheduled_at),
            duration_minutes: s.duration_minutes,
            status: s.status,
            phase: session_phase(s.status, s.scheduled_at, now).as_str().to_owned(),
            reschedule_count: s.reschedule_count,
            meeting_ref: s.meeting_ref.clone(),
            joined: s.joined,
            refund_percent: s.refund_percent,
        }
    }
}

impl From<SessionView> for SessionDto {
    fn from(view: SessionView) -> Self {
        let mut dto = Self::new(&view.session, 0);
        dto.phase = view.phase.as_str().to_owned();
        dto
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDto {
    pub id: Ulid,
    pub requester_id: Ulid,
    pub provider_id: Ulid,
    pub total_amount: Amount,
    pub escrow: EscrowDto,
    pub created_at: String,
    pub pay_by: String,
    pub sessions: Vec<SessionDto>,
}

impl PackageDto {
    pub fn new(pkg: &PackageState, now: Ms) -> Self {
        Self {
            id: pkg.id,
            requester_id: pkg.requester_id,
            provider_id: pkg.provider_id,
            total_amount: pkg.total_amount(),
            escrow: EscrowDto::from(&pkg.ledger),
            created_at: format_instant(pkg.created_at),
            pay_by: format_instant(pkg.pay_by),
            sessions: pkg.sessions.iter().map(|s| SessionDto::new(s, now)).collect(),
        }
    }
}

// ── Payment webhook ─────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureBody {
    pub package_id: Ulid,
    pub external_payment_id: String,
    pub amount: Option<Amount>,
    pub signature_valid: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureDto {
    pub status: String,
    pub escrow_state: EscrowState,
}

impl CaptureDto {
    pub fn new(outcome: CaptureOutcome, escrow_state: EscrowState) -> Self {
        let status = match outcome {
            CaptureOutcome::Captured => "captured",
            CaptureOutcome::Duplicate => "duplicate",
        };
        Self {
            status: status.to_owned(),
            escrow_state,
        }
    }
}

// ── Session actions ─────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleBody {
    pub new_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingBody {
    pub meeting_ref: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Completed,
    NoShow,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeBody {
    pub outcome: Option<OutcomeKind>,
    pub no_show_party: Option<Party>,
}

impl OutcomeBody {
    /// `None` lets the join signal decide. A bare no-show means the requester.
    pub fn outcome(&self) -> Option<Outcome> {
        match self.outcome? {
            OutcomeKind::Completed => Some(Outcome::Completed),
            OutcomeKind::NoShow => Some(Outcome::NoShow {
                party: self.no_show_party.unwrap_or(Party::Requester),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeDto {
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_show_party: Option<Party>,
    pub escrow_state: EscrowState,
    pub settled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_amount: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded_amount: Option<Amount>,
}

impl From<OutcomeReceipt> for OutcomeDto {
    fn from(r: OutcomeReceipt) -> Self {
        let (outcome, no_show_party) = match r.outcome {
            Outcome::Completed => ("completed", None),
            Outcome::NoShow { party } => ("no_show", Some(party)),
        };
        Self {
            outcome: outcome.to_owned(),
            no_show_party,
            escrow_state: r.escrow_state,
            settled: r.settlement.is_some(),
            released_amount: r.settlement.map(|s| s.released),
            refunded_amount: r.settlement.map(|s| s.refunded),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub actor: Party,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelDto {
    pub refund_percent: u8,
    pub refunded_amount: Amount,
    pub escrow_state: EscrowState,
    pub settled: bool,
}

impl From<CancelReceipt> for CancelDto {
    fn from(r: CancelReceipt) -> Self {
        Self {
            refund_percent: r.refund_percent,
            refunded_amount: r.refunded_amount,
            escrow_state: r.escrow_state,
            settled: r.settled,
        }
    }
}
