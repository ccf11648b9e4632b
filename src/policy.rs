//! Cancellation refund tiers.

use crate::model::{HOUR_MS, Ms, Party};

/// Refund percent for a cancellation `lead_time_hours` before the session starts.
///
/// Provider cancellations always refund in full. Requester tiers are inclusive at
/// their lower bound: 48h → 100, 24h → 80, 0h → 50, already started → 0.
pub fn refund_percent(actor: Party, lead_time_hours: f64) -> u8 {
    match actor {
        Party::Provider => 100,
        Party::Requester => {
            if lead_time_hours >= 48.0 {
                100
            } else if lead_time_hours >= 24.0 {
                80
            } else if lead_time_hours >= 0.0 {
                50
            } else {
                0
            }
        }
    }
}

/// Hours between `now` and the session start; negative once it has started.
pub fn lead_time_hours(scheduled_at: Ms, now: Ms) -> f64 {
    (scheduled_at - now) as f64 / HOUR_MS as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requester_tiers_at_boundaries() {
        assert_eq!(refund_percent(Party::Requester, 48.0), 100);
        assert_eq!(refund_percent(Party::Requester, 47.9), 80);
        assert_eq!(refund_percent(Party::Requester, 24.0), 80);
        assert_eq!(refund_percent(Party::Requester, 23.9), 50);
        assert_eq!(refund_percent(Party::Requester, 0.0), 50);
        assert_eq!(refund_percent(Party::Requester, -0.1), 0);
        assert_eq!(refund_percent(Party::Requester, 500.0), 100);
    }

    #[test]
    fn provider_always_full() {
        for hours in [-10.0, -0.1, 0.0, 1.0, 30.0, 48.0, 1000.0] {
            assert_eq!(refund_percent(Party::Provider, hours), 100);
        }
    }

    #[test]
    fn lead_time_from_timestamps() {
        let start = 100 * HOUR_MS;
        assert_eq!(lead_time_hours(start, start - 48 * HOUR_MS), 48.0);
        assert_eq!(lead_time_hours(start, start), 0.0);
        assert!(lead_time_hours(start, start + 1) < 0.0);
        assert_eq!(
            refund_percent(Party::Requester, lead_time_hours(start, start - 30 * HOUR_MS)),
            80
        );
    }
}
