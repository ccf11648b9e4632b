use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_instant(at: Ms) -> Result<(), EngineError> {
    use crate::limits::*;
    if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&at) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_blackout(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    validate_instant(span.start)?;
    validate_instant(span.end)?;
    if span.duration_ms() > MAX_BLACKOUT_DURATION_MS {
        return Err(EngineError::LimitExceeded("blackout too wide"));
    }
    Ok(())
}

/// Storage-level double-booking guard. Caller must hold the provider write lock.
///
/// Any live hold or booking overlapping `span` is a conflict, except intervals
/// that belong to `own_package` (a package re-checking its own lapsed holds).
pub(crate) fn check_no_conflict(
    ps: &ProviderState,
    span: &Span,
    now: Ms,
    own_package: Option<Ulid>,
) -> Result<(), EngineError> {
    for interval in ps.overlapping(span) {
        if own_package.is_some() && interval.package_id() == own_package {
            continue;
        }
        if interval.occupies(now) {
            return Err(EngineError::SlotNoLongerAvailable(span.start));
        }
    }
    Ok(())
}
