use crate::model::{Amount, HOUR_MS, Ms};

pub const MAX_SESSIONS_PER_PACKAGE: usize = 20;
pub const MAX_BLACKOUTS_PER_PROVIDER: usize = 1_000;
pub const MAX_BLACKOUT_DURATION_MS: Ms = 366 * 24 * HOUR_MS;
pub const MAX_SESSION_PRICE: Amount = 10_000_000;
pub const MAX_MEETING_REF_LEN: usize = 512;
pub const MAX_PAYMENT_ID_LEN: usize = 256;

/// 2000-01-01T00:00:00Z.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
