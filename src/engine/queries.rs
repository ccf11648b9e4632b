use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::observability as obs;

use super::availability::{AvailabilityResolver, DaySnapshot, RuleStore, Slot, default_rule};
use super::lifecycle::{SessionPhase, session_phase};
use super::{Engine, EngineError};

/// A session with the package context a caller needs to act on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub session: Session,
    pub phase: SessionPhase,
    pub requester_id: Ulid,
    pub provider_id: Ulid,
}

#[async_trait]
impl RuleStore for Engine {
    async fn day_snapshot(
        &self,
        provider_id: Ulid,
        day_of_week: u8,
        window: Span,
        now: Ms,
    ) -> Result<DaySnapshot, EngineError> {
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let guard = tokio::time::timeout(self.settings.rule_read_timeout, ps.read())
            .await
            .map_err(|_| {
                tracing::warn!(provider = %provider_id, "calendar read timed out");
                EngineError::RuleStoreUnavailable(provider_id)
            })?;
        Ok(DaySnapshot::from_provider(&guard, day_of_week, &window, now))
    }
}

impl Engine {
    /// Hourly slots for a provider on a local calendar date.
    pub async fn slots(&self, provider_id: Ulid, date: NaiveDate, now: Ms) -> Result<Vec<Slot>, EngineError> {
        let started = Instant::now();
        let result = AvailabilityResolver::new(self, self.settings.utc_offset)
            .resolve(provider_id, date, now)
            .await;
        metrics::histogram!(obs::SLOT_RESOLVE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    pub async fn provider_snapshot(&self, id: Ulid) -> Result<ProviderState, EngineError> {
        let ps = self.get_provider(&id).ok_or(EngineError::NotFound(id))?;
        let guard = ps.read().await;
        Ok(guard.clone())
    }

    /// Rule in force for each weekday, Sunday first. The flag is true when the
    /// provider stored the rule, false when the default applies.
    pub async fn list_rules(&self, provider_id: Ulid) -> Result<Vec<(AvailabilityRule, bool)>, EngineError> {
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let guard = ps.read().await;
        Ok((0..7u8)
            .map(|dow| match guard.rule_for(dow) {
                Some(rule) => (rule, true),
                None => (default_rule(dow), false),
            })
            .collect())
    }

    /// Blackouts overlapping `range`, or all of them.
    pub async fn list_blackouts(
        &self,
        provider_id: Ulid,
        range: Option<Span>,
    ) -> Result<Vec<(Ulid, Span)>, EngineError> {
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let guard = ps.read().await;
        Ok(guard
            .intervals
            .iter()
            .filter(|i| i.kind == IntervalKind::Blackout)
            .filter(|i| range.is_none_or(|r| i.span.overlaps(&r)))
            .map(|i| (i.id, i.span))
            .collect())
    }

    pub async fn package_snapshot(&self, package_id: Ulid) -> Result<PackageState, EngineError> {
        let pkg = self
            .get_package(&package_id)
            .ok_or(EngineError::NotFound(package_id))?;
        let guard = pkg.read().await;
        Ok(guard.clone())
    }

    pub async fn session_view(&self, session_id: Ulid, now: Ms) -> Result<SessionView, EngineError> {
        let package_id = self.resolve_session(&session_id)?;
        let pkg = self
            .get_package(&package_id)
            .ok_or(EngineError::NotFound(package_id))?;
        let guard = pkg.read().await;
        let session = guard
            .session(session_id)
            .cloned()
            .ok_or(EngineError::NotFound(session_id))?;
        Ok(SessionView {
            phase: session_phase(session.status, session.scheduled_at, now),
            session,
            requester_id: guard.requester_id,
            provider_id: guard.provider_id,
        })
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }
}
