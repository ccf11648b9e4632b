use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::ledger::{EscrowLedger, Settlement};

/// Unix milliseconds. The only time type inside the engine.
pub type Ms = i64;

/// Money in whole currency units.
pub type Amount = u64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;

/// Every session is one slot long.
pub const SESSION_MINUTES: u32 = 60;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn hour_at(start: Ms) -> Self {
        Self::new(start, start + HOUR_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Who acted: cancelled, or failed to show up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Requester,
    Provider,
}

/// What occupies a stretch of a provider's calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalKind {
    /// Provider-declared blackout (vacation, sick day).
    Blackout,
    /// Session of an unpaid package; lapses at `expires_at`.
    Hold { package_id: Ulid, expires_at: Ms },
    /// Session of a paid package.
    Booking { package_id: Ulid },
}

/// A single interval on a provider calendar. Session intervals reuse the session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub id: Ulid,
    pub span: Span,
    pub kind: IntervalKind,
}

impl Interval {
    /// True when the interval keeps its hour from being booked again at `now`.
    pub fn occupies(&self, now: Ms) -> bool {
        match self.kind {
            IntervalKind::Hold { expires_at, .. } => expires_at > now,
            IntervalKind::Booking { .. } => true,
            IntervalKind::Blackout => false,
        }
    }

    pub fn package_id(&self) -> Option<Ulid> {
        match self.kind {
            IntervalKind::Hold { package_id, .. } | IntervalKind::Booking { package_id } => {
                Some(package_id)
            }
            IntervalKind::Blackout => None,
        }
    }
}

/// Weekly recurring rule. Minutes are measured from local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    /// 0 = Sunday … 6 = Saturday.
    pub day_of_week: u8,
    pub start_minute: u16,
    pub end_minute: u16,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderState {
    pub id: Ulid,
    pub session_price: Amount,
    /// Indexed by day of week; `None` means the system default applies.
    pub rules: [Option<AvailabilityRule>; 7],
    /// Blackouts and session intervals, sorted by `span.start`.
    pub intervals: Vec<Interval>,
}

impl ProviderState {
    pub fn new(id: Ulid, session_price: Amount) -> Self {
        Self {
            id,
            session_price,
            rules: [None; 7],
            intervals: Vec::new(),
        }
    }

    pub fn rule_for(&self, day_of_week: u8) -> Option<AvailabilityRule> {
        self.rules.get(day_of_week as usize).copied().flatten()
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    pub fn remove_interval(&mut self, id: Ulid) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    /// Intervals whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }

    pub fn blackout_count(&self) -> usize {
        self.intervals
            .iter()
            .filter(|i| i.kind == IntervalKind::Blackout)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::NoShow
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Completed,
    NoShow { party: Party },
}

impl Outcome {
    /// Share of this session's price returned to the requester.
    pub fn refund_percent(self) -> u8 {
        match self {
            Outcome::Completed => 0,
            Outcome::NoShow { party: Party::Provider } => 100,
            Outcome::NoShow { party: Party::Requester } => 0,
        }
    }

    pub fn status(self) -> SessionStatus {
        match self {
            Outcome::Completed => SessionStatus::Completed,
            Outcome::NoShow { .. } => SessionStatus::NoShow,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Ulid,
    pub package_id: Ulid,
    pub scheduled_at: Ms,
    pub duration_minutes: u32,
    pub status: SessionStatus,
    pub reschedule_count: u8,
    pub meeting_ref: Option<String>,
    pub joined: bool,
    /// Set once the session is terminal.
    pub refund_percent: Option<u8>,
}

impl Session {
    pub fn new(id: Ulid, package_id: Ulid, scheduled_at: Ms) -> Self {
        Self {
            id,
            package_id,
            scheduled_at,
            duration_minutes: SESSION_MINUTES,
            status: SessionStatus::Pending,
            reschedule_count: 0,
            meeting_ref: None,
            joined: false,
            refund_percent: None,
        }
    }

    pub fn span(&self) -> Span {
        Span::new(
            self.scheduled_at,
            self.scheduled_at + self.duration_minutes as Ms * MINUTE_MS,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageState {
    pub id: Ulid,
    pub requester_id: Ulid,
    pub provider_id: Ulid,
    pub sessions: Vec<Session>,
    pub ledger: EscrowLedger,
    pub created_at: Ms,
    /// Slots are held for an unpaid package until this instant.
    pub pay_by: Ms,
}

impl PackageState {
    pub fn session(&self, id: Ulid) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn session_mut(&mut self, id: Ulid) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn total_amount(&self) -> Amount {
        self.ledger.total
    }
}

/// Flat event types; this is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProviderRegistered {
        id: Ulid,
        session_price: Amount,
    },
    ProviderUpdated {
        id: Ulid,
        session_price: Amount,
    },
    RuleSet {
        provider_id: Ulid,
        rule: AvailabilityRule,
    },
    BlackoutAdded {
        id: Ulid,
        provider_id: Ulid,
        span: Span,
    },
    PackageCreated {
        id: Ulid,
        requester_id: Ulid,
        provider_id: Ulid,
        /// `(session_id, scheduled_at)`.
        sessions: Vec<(Ulid, Ms)>,
        total_amount: Amount,
        created_at: Ms,
        pay_by: Ms,
    },
    PaymentCaptured {
        package_id: Ulid,
        provider_id: Ulid,
        external_payment_id: String,
        amount: Amount,
    },
    PackageVoided {
        package_id: Ulid,
        provider_id: Ulid,
    },
    SessionRescheduled {
        session_id: Ulid,
        package_id: Ulid,
        provider_id: Ulid,
        scheduled_at: Ms,
    },
    MeetingAttached {
        session_id: Ulid,
        package_id: Ulid,
        provider_id: Ulid,
        meeting_ref: String,
    },
    JoinRecorded {
        session_id: Ulid,
        package_id: Ulid,
        provider_id: Ulid,
    },
    OutcomeRecorded {
        session_id: Ulid,
        package_id: Ulid,
        provider_id: Ulid,
        outcome: Outcome,
        /// Other open sessions closed with a full refund (provider no-show).
        closed_sessions: Vec<Ulid>,
        settlement: Option<Settlement>,
    },
    SessionCancelled {
        session_id: Ulid,
        package_id: Ulid,
        provider_id: Ulid,
        actor: Party,
        refund_percent: u8,
        settlement: Option<Settlement>,
    },
    /// Compaction record: full provider state.
    ProviderSnapshot(ProviderState),
    /// Compaction record: full package state.
    PackageSnapshot(PackageState),
}

impl Event {
    /// Provider whose calendar or packages this event concerns.
    pub fn provider_id(&self) -> Ulid {
        match self {
            Event::ProviderRegistered { id, .. } | Event::ProviderUpdated { id, .. } => *id,
            Event::RuleSet { provider_id, .. }
            | Event::BlackoutAdded { provider_id, .. }
            | Event::PackageCreated { provider_id, .. }
            | Event::PaymentCaptured { provider_id, .. }
            | Event::PackageVoided { provider_id, .. }
            | Event::SessionRescheduled { provider_id, .. }
            | Event::MeetingAttached { provider_id, .. }
            | Event::JoinRecorded { provider_id, .. }
            | Event::OutcomeRecorded { provider_id, .. }
            | Event::SessionCancelled { provider_id, .. } => *provider_id,
            Event::ProviderSnapshot(ps) => ps.id,
            Event::PackageSnapshot(pkg) => pkg.provider_id,
        }
    }

    /// Package this event mutates, if any.
    pub fn package_id(&self) -> Option<Ulid> {
        match self {
            Event::PackageCreated { id, .. } => Some(*id),
            Event::PaymentCaptured { package_id, .. }
            | Event::PackageVoided { package_id, .. }
            | Event::SessionRescheduled { package_id, .. }
            | Event::MeetingAttached { package_id, .. }
            | Event::JoinRecorded { package_id, .. }
            | Event::OutcomeRecorded { package_id, .. }
            | Event::SessionCancelled { package_id, .. } => Some(*package_id),
            Event::PackageSnapshot(pkg) => Some(pkg.id),
            _ => None,
        }
    }

    /// Short label for logs and the provider feed.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ProviderRegistered { .. } => "provider_registered",
            Event::ProviderUpdated { .. } => "provider_updated",
            Event::RuleSet { .. } => "rule_set",
            Event::BlackoutAdded { .. } => "blackout_added",
            Event::PackageCreated { .. } => "package_created",
            Event::PaymentCaptured { .. } => "payment_captured",
            Event::PackageVoided { .. } => "package_voided",
            Event::SessionRescheduled { .. } => "session_rescheduled",
            Event::MeetingAttached { .. } => "meeting_attached",
            Event::JoinRecorded { .. } => "join_recorded",
            Event::OutcomeRecorded { .. } => "outcome_recorded",
            Event::SessionCancelled { .. } => "session_cancelled",
            Event::ProviderSnapshot(_) => "provider_snapshot",
            Event::PackageSnapshot(_) => "package_snapshot",
        }
    }
}
