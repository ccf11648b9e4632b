use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

// ── Availability Algorithm ────────────────────────────────────────

/// Opening hours used when a provider never stored a rule for the day.
pub const DEFAULT_WEEKDAY_HOURS: (u16, u16) = (20 * 60, 22 * 60);
pub const DEFAULT_WEEKEND_HOURS: (u16, u16) = (12 * 60, 17 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotReason {
    Booked,
    Unavailable,
    Past,
}

impl SlotReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotReason::Booked => "booked",
            SlotReason::Unavailable => "unavailable",
            SlotReason::Past => "past",
        }
    }
}

/// One bookable hour on a calendar day. Derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Local wall-clock start, `HH:MM`.
    pub time: String,
    pub starts_at: Ms,
    pub is_available: bool,
    pub reason: Option<SlotReason>,
}

/// Everything the resolver needs to know about one provider-day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaySnapshot {
    pub rule: Option<AvailabilityRule>,
    pub blackouts: Vec<Span>,
    /// Non-cancelled sessions and unexpired payment holds.
    pub occupied: Vec<Span>,
}

impl DaySnapshot {
    pub fn from_provider(ps: &ProviderState, day_of_week: u8, window: &Span, now: Ms) -> Self {
        let mut snapshot = DaySnapshot {
            rule: ps.rule_for(day_of_week),
            ..Default::default()
        };
        for interval in ps.overlapping(window) {
            match interval.kind {
                IntervalKind::Blackout => snapshot.blackouts.push(interval.span),
                _ if interval.occupies(now) => snapshot.occupied.push(interval.span),
                _ => {} // lapsed hold
            }
        }
        snapshot
    }
}

/// Read side of the rule store. The resolver never writes through it.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn day_snapshot(
        &self,
        provider_id: Ulid,
        day_of_week: u8,
        window: Span,
        now: Ms,
    ) -> Result<DaySnapshot, EngineError>;
}

/// Resolves a provider's slots for a calendar date in a fixed local offset.
pub struct AvailabilityResolver<'a, S: ?Sized> {
    store: &'a S,
    offset: FixedOffset,
}

impl<'a, S: RuleStore + ?Sized> AvailabilityResolver<'a, S> {
    pub fn new(store: &'a S, offset: FixedOffset) -> Self {
        Self { store, offset }
    }

    /// Store failures propagate; there is no permissive or restrictive fallback.
    pub async fn resolve(
        &self,
        provider_id: Ulid,
        date: NaiveDate,
        now: Ms,
    ) -> Result<Vec<Slot>, EngineError> {
        let window = day_window(date, self.offset);
        let snapshot = self
            .store
            .day_snapshot(provider_id, day_of_week(date), window, now)
            .await?;
        Ok(resolve_slots(date, self.offset, &snapshot, now))
    }
}

/// 0 = Sunday … 6 = Saturday.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

pub fn default_rule(day_of_week: u8) -> AvailabilityRule {
    let (start, end) = if day_of_week == 0 || day_of_week == 6 {
        DEFAULT_WEEKEND_HOURS
    } else {
        DEFAULT_WEEKDAY_HOURS
    };
    AvailabilityRule {
        day_of_week,
        start_minute: start,
        end_minute: end,
        active: true,
    }
}

/// Opening minutes for a day. An inactive stored rule closes the day;
/// no stored rule means the system default.
pub fn effective_hours(stored: Option<AvailabilityRule>, day_of_week: u8) -> Option<(u16, u16)> {
    let rule = stored.unwrap_or_else(|| default_rule(day_of_week));
    rule.active.then_some((rule.start_minute, rule.end_minute))
}

/// Unix ms of a local wall-clock time.
pub fn local_to_ms(date: NaiveDate, minute_of_day: u32, offset: FixedOffset) -> Ms {
    let midnight = date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
    midnight + minute_of_day as Ms * MINUTE_MS - offset.local_minus_utc() as Ms * 1000
}

/// Local calendar date containing the instant.
pub fn local_date(at: Ms, offset: FixedOffset) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(at).map(|utc| utc.with_timezone(&offset).date_naive())
}

/// Local midnight to the next local midnight.
pub fn day_window(date: NaiveDate, offset: FixedOffset) -> Span {
    let start = local_to_ms(date, 0, offset);
    Span::new(start, start + 24 * HOUR_MS)
}

/// Generate the day's hourly slots and classify each one.
///
/// Precedence is fixed: past, then booked, then unavailable. A trailing partial
/// hour before the rule's end is dropped.
pub fn resolve_slots(
    date: NaiveDate,
    offset: FixedOffset,
    snapshot: &DaySnapshot,
    now: Ms,
) -> Vec<Slot> {
    let Some((open, close)) = effective_hours(snapshot.rule, day_of_week(date)) else {
        return Vec::new();
    };
    let (open, close) = (u32::from(open), u32::from(close));

    let mut slots = Vec::new();
    let mut minute = open;
    while minute + 60 <= close {
        let starts_at = local_to_ms(date, minute, offset);
        let hour = Span::hour_at(starts_at);

        let reason = if starts_at < now {
            Some(SlotReason::Past)
        } else if snapshot.occupied.iter().any(|s| s.overlaps(&hour)) {
            Some(SlotReason::Booked)
        } else if snapshot.blackouts.iter().any(|s| s.overlaps(&hour)) {
            Some(SlotReason::Unavailable)
        } else {
            None
        };

        slots.push(Slot {
            time: format!("{:02}:{:02}", minute / 60, minute % 60),
            starts_at,
            is_available: reason.is_none(),
            reason,
        });
        minute += 60;
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn times(slots: &[Slot]) -> Vec<&str> {
        slots.iter().map(|s| s.time.as_str()).collect()
    }

    fn rule(day_of_week: u8, start: u16, end: u16, active: bool) -> AvailabilityRule {
        AvailabilityRule {
            day_of_week,
            start_minute: start,
            end_minute: end,
            active,
        }
    }

    #[test]
    fn day_of_week_is_sunday_based() {
        assert_eq!(day_of_week(date(2026, 10, 18)), 0); // Sunday
        assert_eq!(day_of_week(date(2026, 10, 14)), 3); // Wednesday
        assert_eq!(day_of_week(date(2026, 10, 17)), 6); // Saturday
    }

    #[test]
    fn weekday_default_excludes_end_boundary() {
        let slots = resolve_slots(date(2026, 10, 14), utc(), &DaySnapshot::default(), 0);
        assert_eq!(times(&slots), vec!["20:00", "21:00"]);
        assert!(slots.iter().all(|s| s.is_available));
    }

    #[test]
    fn weekend_default() {
        let slots = resolve_slots(date(2026, 10, 17), utc(), &DaySnapshot::default(), 0);
        assert_eq!(
            times(&slots),
            vec!["12:00", "13:00", "14:00", "15:00", "16:00"]
        );
    }

    #[test]
    fn inactive_rule_closes_day() {
        let snapshot = DaySnapshot {
            rule: Some(rule(3, 9 * 60, 17 * 60, false)),
            ..Default::default()
        };
        assert!(resolve_slots(date(2026, 10, 14), utc(), &snapshot, 0).is_empty());
    }

    #[test]
    fn partial_trailing_hour_dropped() {
        let snapshot = DaySnapshot {
            rule: Some(rule(3, 9 * 60, 11 * 60 + 30, true)),
            ..Default::default()
        };
        let slots = resolve_slots(date(2026, 10, 14), utc(), &snapshot, 0);
        assert_eq!(times(&slots), vec!["09:00", "10:00"]);
    }

    #[test]
    fn past_outranks_booked() {
        let day = date(2026, 10, 14);
        let eight_pm = local_to_ms(day, 20 * 60, utc());
        let snapshot = DaySnapshot {
            occupied: vec![Span::hour_at(eight_pm)],
            ..Default::default()
        };
        let slots = resolve_slots(day, utc(), &snapshot, eight_pm + 30 * MINUTE_MS);
        assert_eq!(slots[0].reason, Some(SlotReason::Past));
        assert!(slots[1].is_available);
    }

    #[test]
    fn booked_outranks_unavailable() {
        let day = date(2026, 10, 14);
        let eight_pm = local_to_ms(day, 20 * 60, utc());
        let snapshot = DaySnapshot {
            occupied: vec![Span::hour_at(eight_pm)],
            blackouts: vec![Span::new(eight_pm, eight_pm + 2 * HOUR_MS)],
            ..Default::default()
        };
        let slots = resolve_slots(day, utc(), &snapshot, 0);
        assert_eq!(slots[0].reason, Some(SlotReason::Booked));
        assert_eq!(slots[1].reason, Some(SlotReason::Unavailable));
        assert!(!slots[1].is_available);
    }

    #[test]
    fn blackout_end_is_exclusive() {
        let day = date(2026, 10, 14);
        let eight_pm = local_to_ms(day, 20 * 60, utc());
        let snapshot = DaySnapshot {
            blackouts: vec![Span::new(eight_pm - HOUR_MS, eight_pm)],
            ..Default::default()
        };
        let slots = resolve_slots(day, utc(), &snapshot, 0);
        assert!(slots.iter().all(|s| s.is_available));
    }

    #[test]
    fn local_offset_shifts_instants_not_labels() {
        let ist = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
        let day = date(2026, 10, 14);
        let slots = resolve_slots(day, ist, &DaySnapshot::default(), 0);
        assert_eq!(times(&slots), vec!["20:00", "21:00"]);
        // 20:00 IST is 14:30 UTC.
        assert_eq!(
            slots[0].starts_at,
            local_to_ms(day, 14 * 60 + 30, utc())
        );
        assert_eq!(local_date(slots[0].starts_at, ist), Some(day));
    }

    #[test]
    fn snapshot_ignores_lapsed_holds() {
        let mut ps = ProviderState::new(Ulid::new(), 100);
        ps.insert_interval(Interval {
            id: Ulid::new(),
            span: Span::hour_at(20 * HOUR_MS),
            kind: IntervalKind::Hold {
                package_id: Ulid::new(),
                expires_at: 1_000,
            },
        });
        ps.insert_interval(Interval {
            id: Ulid::new(),
            span: Span::hour_at(21 * HOUR_MS),
            kind: IntervalKind::Booking {
                package_id: Ulid::new(),
            },
        });
        let window = Span::new(0, 24 * HOUR_MS);
        let live = DaySnapshot::from_provider(&ps, 3, &window, 0);
        assert_eq!(live.occupied.len(), 2);
        let later = DaySnapshot::from_provider(&ps, 3, &window, 1_000);
        assert_eq!(later.occupied, vec![Span::hour_at(21 * HOUR_MS)]);
    }

    struct DownStore;

    #[async_trait]
    impl RuleStore for DownStore {
        async fn day_snapshot(
            &self,
            provider_id: Ulid,
            _day_of_week: u8,
            _window: Span,
            _now: Ms,
        ) -> Result<DaySnapshot, EngineError> {
            Err(EngineError::RuleStoreUnavailable(provider_id))
        }
    }

    #[tokio::test]
    async fn store_failure_is_surfaced() {
        let resolver = AvailabilityResolver::new(&DownStore, utc());
        let result = resolver.resolve(Ulid::new(), date(2026, 10, 14), 0).await;
        assert!(matches!(result, Err(EngineError::RuleStoreUnavailable(_))));
    }
}
