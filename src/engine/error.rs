use ulid::Ulid;

use crate::ledger::LedgerError;
use crate::model::Ms;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    RuleStoreUnavailable(Ulid),
    SlotNoLongerAvailable(Ms),
    InvalidSlot(Ms),
    InvalidRequest(&'static str),
    RescheduleLimitExceeded(Ulid),
    TooLateToReschedule(Ulid),
    InvalidOutcomeTransition(&'static str),
    InvalidTransition(&'static str),
    InvalidSignature,
    Payment(LedgerError),
    /// Ledger invariant would break. Indicates a logic defect, never user input.
    LedgerViolation(LedgerError),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::RuleStoreUnavailable(id) => {
                write!(f, "availability store unavailable for provider {id}")
            }
            EngineError::SlotNoLongerAvailable(at) => {
                write!(f, "slot at {at} is no longer available")
            }
            EngineError::InvalidSlot(at) => {
                write!(f, "{at} is not a slot on the provider's calendar")
            }
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::RescheduleLimitExceeded(id) => {
                write!(f, "session {id} has already been rescheduled once")
            }
            EngineError::TooLateToReschedule(id) => {
                write!(f, "session {id} is too close to its start to reschedule")
            }
            EngineError::InvalidOutcomeTransition(msg) => {
                write!(f, "invalid outcome transition: {msg}")
            }
            EngineError::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            EngineError::InvalidSignature => write!(f, "capture event signature not valid"),
            EngineError::Payment(e) => write!(f, "payment rejected: {e}"),
            EngineError::LedgerViolation(e) => write!(f, "ledger invariant violated: {e}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
