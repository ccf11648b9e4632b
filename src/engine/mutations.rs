use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, oneshot};
use ulid::Ulid;

use crate::ledger::{CaptureOutcome, EscrowState, Settlement, refund_share};
use crate::limits::*;
use crate::model::*;
use crate::observability as obs;
use crate::policy;

use super::availability::{DaySnapshot, day_of_week, day_window, local_date, resolve_slots};
use super::conflict::{check_no_conflict, validate_blackout, validate_instant};
use super::lifecycle::{SessionPhase, session_phase};
use super::{
    Engine, EngineError, SharedProvider, WalCommand, apply_to_provider, package_from_created,
};

/// What the requester must pay, and by when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReceipt {
    pub package_id: Ulid,
    /// `(session_id, scheduled_at)`, earliest first.
    pub sessions: Vec<(Ulid, Ms)>,
    pub amount_due: Amount,
    pub pay_by: Ms,
}

/// A payment processor's capture notification, already parsed.
#[derive(Debug, Clone)]
pub struct PaymentCapture {
    pub package_id: Ulid,
    pub external_payment_id: String,
    /// Absent when the processor does not report the captured amount.
    pub amount: Option<Amount>,
    pub signature_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeReceipt {
    pub outcome: Outcome,
    pub escrow_state: EscrowState,
    pub settlement: Option<Settlement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReceipt {
    pub refund_percent: u8,
    /// Settled refund if this cancellation closed the package, else this session's projected share.
    pub refunded_amount: Amount,
    pub escrow_state: EscrowState,
    pub settled: bool,
}

/// Sessions as they would look after `session_id` moves to `status`.
fn projected(sessions: &[Session], session_id: Ulid, status: SessionStatus, refund: u8) -> Vec<Session> {
    let mut out = sessions.to_vec();
    if let Some(s) = out.iter_mut().find(|s| s.id == session_id) {
        s.status = status;
        s.refund_percent = Some(refund);
    }
    out
}

impl Engine {
    // ── Providers ────────────────────────────────────────

    pub async fn register_provider(&self, id: Ulid, session_price: Amount) -> Result<(), EngineError> {
        validate_price(session_price)?;
        let _gate = self.gate().await;
        let _registering = self.registration.lock().await;
        if self.providers.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::ProviderRegistered { id, session_price };
        self.wal_append(&event).await?;
        self.providers
            .insert(id, Arc::new(RwLock::new(ProviderState::new(id, session_price))));
        self.notify.send(id, &event);
        tracing::info!(provider = %id, session_price, "provider registered");
        Ok(())
    }

    /// Price changes apply to packages created afterwards only.
    pub async fn update_provider(&self, id: Ulid, session_price: Amount) -> Result<(), EngineError> {
        validate_price(session_price)?;
        let _gate = self.gate().await;
        let mut guard = self.provider_write(&id).await?;
        let event = Event::ProviderUpdated { id, session_price };
        self.persist_and_apply(Some(&mut *guard), None, &event).await
    }

    /// Upsert the rule for one day of the week. Rules never touch existing sessions.
    pub async fn set_rule(&self, provider_id: Ulid, rule: AvailabilityRule) -> Result<(), EngineError> {
        if rule.day_of_week > 6 {
            return Err(EngineError::InvalidRequest("day of week must be 0..=6"));
        }
        if rule.start_minute >= rule.end_minute || rule.end_minute > 24 * 60 {
            return Err(EngineError::InvalidRequest(
                "rule needs start before end within one day",
            ));
        }
        let _gate = self.gate().await;
        let mut guard = self.provider_write(&provider_id).await?;
        let event = Event::RuleSet { provider_id, rule };
        self.persist_and_apply(Some(&mut *guard), None, &event).await
    }

    pub async fn add_blackout(&self, id: Ulid, provider_id: Ulid, span: Span) -> Result<(), EngineError> {
        if span.start >= span.end {
            return Err(EngineError::InvalidRequest("blackout must end after it starts"));
        }
        validate_blackout(&span)?;
        let _gate = self.gate().await;
        let mut guard = self.provider_write(&provider_id).await?;
        if guard.blackout_count() >= MAX_BLACKOUTS_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many blackouts on provider"));
        }
        if guard.intervals.iter().any(|i| i.id == id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::BlackoutAdded {
            id,
            provider_id,
            span,
        };
        self.persist_and_apply(Some(&mut *guard), None, &event).await
    }

    // ── Packages ─────────────────────────────────────────

    /// Reserve every requested slot under one provider lock, or none of them.
    ///
    /// Sessions start as payment holds that lapse at `pay_by`.
    pub async fn create_package(
        &self,
        requester_id: Ulid,
        provider_id: Ulid,
        starts: Vec<Ms>,
        now: Ms,
    ) -> Result<PackageReceipt, EngineError> {
        if starts.is_empty() {
            return Err(EngineError::InvalidRequest("a package needs at least one session"));
        }
        if starts.len() > MAX_SESSIONS_PER_PACKAGE {
            return Err(EngineError::LimitExceeded("too many sessions in package"));
        }
        if requester_id == provider_id {
            return Err(EngineError::InvalidRequest("requester cannot book themselves"));
        }
        let mut starts = starts;
        starts.sort_unstable();
        if starts.windows(2).any(|w| w[0] == w[1]) {
            return Err(EngineError::InvalidRequest("duplicate session start"));
        }
        for &at in &starts {
            validate_instant(at)?;
        }

        let _gate = self.gate().await;
        let mut guard = self.provider_write(&provider_id).await?;
        for &at in &starts {
            let checked = self
                .check_bookable(&guard, at, now, None)
                .and_then(|()| check_no_conflict(&guard, &Span::hour_at(at), now, None));
            if let Err(e) = checked {
                if matches!(e, EngineError::SlotNoLongerAvailable(_)) {
                    metrics::counter!(obs::SLOT_CONFLICTS_TOTAL).increment(1);
                }
                return Err(e);
            }
        }

        let amount_due = guard
            .session_price
            .checked_mul(starts.len() as Amount)
            .ok_or(EngineError::LimitExceeded("package total overflows"))?;
        let package_id = Ulid::new();
        let sessions: Vec<(Ulid, Ms)> = starts.iter().map(|&at| (Ulid::new(), at)).collect();
        let pay_by = now + self.settings.payment_window_ms;
        let event = Event::PackageCreated {
            id: package_id,
            requester_id,
            provider_id,
            sessions: sessions.clone(),
            total_amount: amount_due,
            created_at: now,
            pay_by,
        };

        self.wal_append(&event).await?;
        apply_to_provider(&mut guard, &event);
        if let Some(pkg) = package_from_created(&event) {
            let shared = Arc::new(RwLock::new(pkg));
            self.packages.insert(package_id, shared.clone());
            self.index_package(&*shared.read().await);
        }
        self.notify.send(provider_id, &event);
        drop(guard);

        metrics::counter!(obs::PACKAGES_CREATED_TOTAL).increment(1);
        tracing::info!(
            package = %package_id,
            provider = %provider_id,
            sessions = sessions.len(),
            amount_due,
            "package created, awaiting payment"
        );
        Ok(PackageReceipt {
            package_id,
            sessions,
            amount_due,
            pay_by,
        })
    }

    /// Apply a capture notification. Redelivery of the same payment is a no-op.
    pub async fn on_payment_captured(
        &self,
        capture: PaymentCapture,
        now: Ms,
    ) -> Result<CaptureOutcome, EngineError> {
        let PaymentCapture {
            package_id,
            external_payment_id,
            amount,
            signature_valid,
        } = capture;
        if !signature_valid {
            metrics::counter!(obs::PAYMENT_CAPTURES_TOTAL, "result" => "bad_signature").increment(1);
            tracing::warn!(package = %package_id, "rejected capture with invalid signature");
            return Err(EngineError::InvalidSignature);
        }
        if external_payment_id.is_empty() {
            return Err(EngineError::InvalidRequest("external payment id is required"));
        }
        if external_payment_id.len() > MAX_PAYMENT_ID_LEN {
            return Err(EngineError::LimitExceeded("external payment id too long"));
        }
        if let Some(seen_for) = self.captures.get(&external_payment_id).map(|e| *e.value()) {
            return self.duplicate_capture(seen_for, package_id, &external_payment_id);
        }

        let _gate = self.gate().await;
        let (mut provider, mut pkg) = self.lock_package_write(&package_id).await?;
        let outcome = pkg
            .ledger
            .check_capture(&external_payment_id, amount)
            .map_err(EngineError::Payment)?;
        if outcome == CaptureOutcome::Duplicate {
            metrics::counter!(obs::PAYMENT_CAPTURES_TOTAL, "result" => "duplicate").increment(1);
            return Ok(CaptureOutcome::Duplicate);
        }
        // Late payment: the holds lapsed, so someone else may have the hours now.
        if now >= pkg.pay_by {
            for s in &pkg.sessions {
                check_no_conflict(&provider, &s.span(), now, Some(package_id))?;
            }
        }

        match self.captures.entry(external_payment_id.clone()) {
            Entry::Occupied(e) => {
                let seen_for = *e.get();
                drop(e);
                return self.duplicate_capture(seen_for, package_id, &external_payment_id);
            }
            Entry::Vacant(v) => {
                v.insert(package_id);
            }
        }

        let event = Event::PaymentCaptured {
            package_id,
            provider_id: pkg.provider_id,
            external_payment_id: external_payment_id.clone(),
            amount: amount.unwrap_or(pkg.ledger.total),
        };
        if let Err(e) = self
            .persist_and_apply(Some(&mut *provider), Some(&mut *pkg), &event)
            .await
        {
            self.captures.remove(&external_payment_id);
            return Err(e);
        }

        metrics::counter!(obs::PAYMENT_CAPTURES_TOTAL, "result" => "captured").increment(1);
        tracing::info!(package = %package_id, held = pkg.ledger.held, "payment held in escrow");
        Ok(CaptureOutcome::Captured)
    }

    fn duplicate_capture(
        &self,
        seen_for: Ulid,
        package_id: Ulid,
        external_payment_id: &str,
    ) -> Result<CaptureOutcome, EngineError> {
        if seen_for == package_id {
            metrics::counter!(obs::PAYMENT_CAPTURES_TOTAL, "result" => "duplicate").increment(1);
            tracing::debug!(package = %package_id, "duplicate capture {external_payment_id}");
            Ok(CaptureOutcome::Duplicate)
        } else {
            tracing::warn!(
                package = %package_id,
                already_used_by = %seen_for,
                "payment id reused across packages"
            );
            Err(EngineError::Payment(crate::ledger::LedgerError::PaymentMismatch))
        }
    }

    // ── Sessions ─────────────────────────────────────────

    /// Move a confirmed session to another open slot. Allowed once, and not
    /// within fifteen minutes of the current start.
    pub async fn reschedule(
        &self,
        session_id: Ulid,
        new_start: Ms,
        now: Ms,
    ) -> Result<Session, EngineError> {
        validate_instant(new_start)?;
        let _gate = self.gate().await;
        let package_id = self.resolve_session(&session_id)?;
        let (mut provider, mut pkg) = self.lock_package_write(&package_id).await?;
        let session = pkg
            .session(session_id)
            .ok_or(EngineError::NotFound(session_id))?;

        if session.status != SessionStatus::Confirmed {
            return Err(EngineError::InvalidTransition(
                "only confirmed sessions can be rescheduled",
            ));
        }
        if session.reschedule_count >= 1 {
            return Err(EngineError::RescheduleLimitExceeded(session_id));
        }
        if session.scheduled_at - now <= 15 * MINUTE_MS {
            return Err(EngineError::TooLateToReschedule(session_id));
        }
        if new_start == session.scheduled_at {
            return Err(EngineError::InvalidRequest("session is already at that time"));
        }
        self.check_bookable(&provider, new_start, now, Some(session_id))?;

        let event = Event::SessionRescheduled {
            session_id,
            package_id,
            provider_id: pkg.provider_id,
            scheduled_at: new_start,
        };
        self.persist_and_apply(Some(&mut *provider), Some(&mut *pkg), &event)
            .await?;
        tracing::info!(session = %session_id, new_start, "session rescheduled");
        pkg.session(session_id)
            .cloned()
            .ok_or(EngineError::NotFound(session_id))
    }

    pub async fn attach_meeting(&self, session_id: Ulid, meeting_ref: String) -> Result<(), EngineError> {
        if meeting_ref.is_empty() {
            return Err(EngineError::InvalidRequest("meeting reference is empty"));
        }
        if meeting_ref.len() > MAX_MEETING_REF_LEN {
            return Err(EngineError::LimitExceeded("meeting reference too long"));
        }
        let _gate = self.gate().await;
        let mut pkg = self.package_write_for_session(&session_id).await?;
        let session = pkg
            .session(session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        if session.status != SessionStatus::Confirmed {
            return Err(EngineError::InvalidTransition(
                "meetings attach to confirmed sessions only",
            ));
        }
        if session.meeting_ref.as_deref() == Some(meeting_ref.as_str()) {
            return Ok(());
        }
        let event = Event::MeetingAttached {
            session_id,
            package_id: pkg.id,
            provider_id: pkg.provider_id,
            meeting_ref,
        };
        self.persist_and_apply(None, Some(&mut *pkg), &event).await
    }

    /// Record that the requester joined the session room. Idempotent.
    pub async fn record_join(&self, session_id: Ulid, now: Ms) -> Result<(), EngineError> {
        let _gate = self.gate().await;
        let mut pkg = self.package_write_for_session(&session_id).await?;
        let session = pkg
            .session(session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        if session.joined {
            return Ok(());
        }
        if session_phase(session.status, session.scheduled_at, now) != SessionPhase::Joinable {
            return Err(EngineError::InvalidTransition("join window is not open"));
        }
        let event = Event::JoinRecorded {
            session_id,
            package_id: pkg.id,
            provider_id: pkg.provider_id,
        };
        self.persist_and_apply(None, Some(&mut *pkg), &event).await
    }

    /// Finalize a confirmed session that has started.
    ///
    /// With no explicit outcome the join signal decides: joined means completed,
    /// otherwise the requester did not show. A provider no-show closes every
    /// other open session of the package at a full refund. The package settles
    /// once every session is terminal.
    pub async fn mark_outcome(
        &self,
        session_id: Ulid,
        outcome: Option<Outcome>,
        now: Ms,
    ) -> Result<OutcomeReceipt, EngineError> {
        let _gate = self.gate().await;
        let package_id = self.resolve_session(&session_id)?;
        let (mut provider, mut pkg) = self.lock_package_write(&package_id).await?;
        let session = pkg
            .session(session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        if session.status != SessionStatus::Confirmed {
            return Err(EngineError::InvalidOutcomeTransition(
                "session is not awaiting an outcome",
            ));
        }
        if now < session.scheduled_at {
            return Err(EngineError::InvalidOutcomeTransition("session has not started"));
        }
        let outcome = outcome.unwrap_or(if session.joined {
            Outcome::Completed
        } else {
            Outcome::NoShow {
                party: Party::Requester,
            }
        });

        let closed_sessions: Vec<Ulid> = match outcome {
            Outcome::NoShow {
                party: Party::Provider,
            } => pkg
                .sessions
                .iter()
                .filter(|s| s.id != session_id && !s.status.is_terminal())
                .map(|s| s.id)
                .collect(),
            _ => Vec::new(),
        };
        let mut after = projected(
            &pkg.sessions,
            session_id,
            outcome.status(),
            outcome.refund_percent(),
        );
        for s in after.iter_mut().filter(|s| closed_sessions.contains(&s.id)) {
            s.status = SessionStatus::Cancelled;
            s.refund_percent = Some(100);
        }
        let settlement = self.settle_if_final(&pkg, &after)?;
        let closed = closed_sessions.len();
        let event = Event::OutcomeRecorded {
            session_id,
            package_id,
            provider_id: pkg.provider_id,
            outcome,
            closed_sessions,
            settlement,
        };
        self.persist_and_apply(Some(&mut *provider), Some(&mut *pkg), &event)
            .await?;
        if closed > 0 {
            tracing::info!(
                package = %package_id,
                closed,
                "provider no-show closed remaining sessions with full refund"
            );
        }

        let label = match outcome {
            Outcome::Completed => "completed",
            Outcome::NoShow {
                party: Party::Requester,
            } => "requester_no_show",
            Outcome::NoShow {
                party: Party::Provider,
            } => "provider_no_show",
        };
        metrics::counter!(obs::SESSION_OUTCOMES_TOTAL, "outcome" => label).increment(1);
        self.record_settlement(&pkg, settlement);
        Ok(OutcomeReceipt {
            outcome,
            escrow_state: pkg.ledger.state,
            settlement,
        })
    }

    /// Cancel one session. An unpaid package is voided as a whole.
    pub async fn cancel(
        &self,
        session_id: Ulid,
        actor: Party,
        now: Ms,
    ) -> Result<CancelReceipt, EngineError> {
        let _gate = self.gate().await;
        let package_id = self.resolve_session(&session_id)?;
        let (mut provider, mut pkg) = self.lock_package_write(&package_id).await?;
        let session = pkg
            .session(session_id)
            .ok_or(EngineError::NotFound(session_id))?;
        if session.status.is_terminal() {
            return Err(EngineError::InvalidTransition("session is already finalized"));
        }
        let refund_percent =
            policy::refund_percent(actor, policy::lead_time_hours(session.scheduled_at, now));

        if pkg.ledger.state == EscrowState::PendingPayment {
            let event = Event::PackageVoided {
                package_id,
                provider_id: pkg.provider_id,
            };
            self.persist_and_apply(Some(&mut *provider), Some(&mut *pkg), &event)
                .await?;
            tracing::info!(package = %package_id, "unpaid package voided by cancellation");
            return Ok(CancelReceipt {
                refund_percent,
                refunded_amount: 0,
                escrow_state: EscrowState::Voided,
                settled: true,
            });
        }

        let after = projected(
            &pkg.sessions,
            session_id,
            SessionStatus::Cancelled,
            refund_percent,
        );
        let settlement = self.settle_if_final(&pkg, &after)?;
        let event = Event::SessionCancelled {
            session_id,
            package_id,
            provider_id: pkg.provider_id,
            actor,
            refund_percent,
            settlement,
        };
        self.persist_and_apply(Some(&mut *provider), Some(&mut *pkg), &event)
            .await?;

        let actor_label = match actor {
            Party::Requester => "requester",
            Party::Provider => "provider",
        };
        metrics::counter!(obs::SESSIONS_CANCELLED_TOTAL, "actor" => actor_label).increment(1);
        self.record_settlement(&pkg, settlement);
        tracing::info!(session = %session_id, refund_percent, "session cancelled by {actor_label}");

        let refunded_amount = match settlement {
            Some(s) => s.refunded,
            None => refund_share(
                pkg.ledger.held,
                u64::from(refund_percent),
                pkg.sessions.len() as u64,
            ),
        };
        Ok(CancelReceipt {
            refund_percent,
            refunded_amount,
            escrow_state: pkg.ledger.state,
            settled: settlement.is_some(),
        })
    }

    // ── Holds & compaction ───────────────────────────────

    /// Unpaid packages whose payment window has closed.
    pub fn collect_expired_holds(&self, now: Ms) -> Vec<Ulid> {
        self.packages
            .iter()
            .filter_map(|entry| {
                let pkg = entry.value().try_read().ok()?;
                (pkg.ledger.state == EscrowState::PendingPayment && pkg.pay_by <= now)
                    .then_some(pkg.id)
            })
            .collect()
    }

    /// Void an unpaid package whose window has closed. `Ok(false)` if it was
    /// paid or voided in the meantime.
    pub async fn void_expired_package(&self, package_id: Ulid, now: Ms) -> Result<bool, EngineError> {
        let _gate = self.gate().await;
        let (mut provider, mut pkg) = self.lock_package_write(&package_id).await?;
        if pkg.ledger.state != EscrowState::PendingPayment || pkg.pay_by > now {
            return Ok(false);
        }
        let event = Event::PackageVoided {
            package_id,
            provider_id: pkg.provider_id,
        };
        self.persist_and_apply(Some(&mut *provider), Some(&mut *pkg), &event)
            .await?;
        metrics::counter!(obs::HOLDS_EXPIRED_TOTAL).increment(1);
        Ok(true)
    }

    /// Rewrite the WAL as one snapshot per provider and package.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.commit_gate.write().await;

        let providers: Vec<SharedProvider> =
            self.providers.iter().map(|e| e.value().clone()).collect();
        let packages: Vec<_> = self.packages.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::with_capacity(providers.len() + packages.len());
        for ps in providers {
            events.push(Event::ProviderSnapshot(ps.read().await.clone()));
        }
        for pkg in packages {
            events.push(Event::PackageSnapshot(pkg.read().await.clone()));
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!("WAL compacted to {count} snapshot records");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    // ── Helpers ──────────────────────────────────────────

    async fn provider_write(&self, id: &Ulid) -> Result<OwnedRwLockWriteGuard<ProviderState>, EngineError> {
        let ps = self.get_provider(id).ok_or(EngineError::NotFound(*id))?;
        Ok(ps.write_owned().await)
    }

    /// Package lock alone, for changes that leave the provider calendar untouched.
    async fn package_write_for_session(
        &self,
        session_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<PackageState>, EngineError> {
        let package_id = self.resolve_session(session_id)?;
        let pkg = self
            .get_package(&package_id)
            .ok_or(EngineError::NotFound(package_id))?;
        Ok(pkg.write_owned().await)
    }

    /// The hour at `at` is a generated slot and currently free. `exclude` is a
    /// session whose own interval should not count against it.
    fn check_bookable(
        &self,
        ps: &ProviderState,
        at: Ms,
        now: Ms,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let offset = self.settings.utc_offset;
        let date = local_date(at, offset).ok_or(EngineError::InvalidSlot(at))?;
        let mut snapshot =
            DaySnapshot::from_provider(ps, day_of_week(date), &day_window(date, offset), now);
        if let Some(own) = exclude.and_then(|id| ps.intervals.iter().find(|i| i.id == id)) {
            snapshot.occupied.retain(|span| *span != own.span);
        }
        let slot = resolve_slots(date, offset, &snapshot, now)
            .into_iter()
            .find(|s| s.starts_at == at)
            .ok_or(EngineError::InvalidSlot(at))?;
        if slot.is_available {
            Ok(())
        } else {
            Err(EngineError::SlotNoLongerAvailable(at))
        }
    }

    fn settle_if_final(
        &self,
        pkg: &PackageState,
        after: &[Session],
    ) -> Result<Option<Settlement>, EngineError> {
        if !after.iter().all(|s| s.status.is_terminal()) {
            return Ok(None);
        }
        pkg.ledger
            .settlement(after)
            .map(Some)
            .map_err(EngineError::LedgerViolation)
    }

    fn record_settlement(&self, pkg: &PackageState, settlement: Option<Settlement>) {
        let Some(s) = settlement else { return };
        metrics::counter!(obs::ESCROW_SETTLEMENTS_TOTAL, "state" => s.state.label()).increment(1);
        tracing::info!(
            package = %pkg.id,
            released = s.released,
            refunded = s.refunded,
            "escrow settled as {}",
            s.state.label()
        );
    }
}

fn validate_price(price: Amount) -> Result<(), EngineError> {
    if price == 0 {
        return Err(EngineError::InvalidRequest("session price must be positive"));
    }
    if price > MAX_SESSION_PRICE {
        return Err(EngineError::LimitExceeded("session price too high"));
    }
    Ok(())
}
