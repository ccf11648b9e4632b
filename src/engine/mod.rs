mod availability;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;

pub use availability::{
    AvailabilityResolver, DaySnapshot, RuleStore, Slot, SlotReason, day_of_week, day_window,
    default_rule, effective_hours, local_date, local_to_ms, resolve_slots,
};
pub use conflict::now_ms;
pub use error::EngineError;
pub use lifecycle::{EVALUATION_AFTER_MS, JOIN_OPENS_BEFORE_MS, SessionPhase, session_phase};
pub use mutations::{CancelReceipt, OutcomeReceipt, PackageReceipt, PaymentCapture};
pub use queries::SessionView;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{FixedOffset, Offset, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard, mpsc, oneshot};
use ulid::Ulid;

use crate::ledger::EscrowLedger;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedProvider = Arc<RwLock<ProviderState>>;
pub type SharedPackage = Arc<RwLock<PackageState>>;

/// Tunables the engine needs at runtime; loaded from `Config`.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Local wall-clock offset for slot labels and day boundaries.
    pub utc_offset: FixedOffset,
    /// How long an unpaid package holds its slots.
    pub payment_window_ms: Ms,
    /// A provider read that cannot complete in this time is a store failure.
    pub rule_read_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            utc_offset: Utc.fix(),
            payment_window_ms: 15 * MINUTE_MS,
            rule_read_timeout: Duration::from_secs(2),
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
///
/// Blocks for the first append, drains whatever else is already queued, then
/// pays for a single fsync and answers every sender in the batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Non-append commands must observe every earlier append on disk.
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after an append error so half-written bytes never leak into
    // the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

pub struct Engine {
    pub(super) providers: DashMap<Ulid, SharedProvider>,
    pub(super) packages: DashMap<Ulid, SharedPackage>,
    /// Reverse lookup: session id → package id.
    pub(super) session_index: DashMap<Ulid, Ulid>,
    /// Reverse lookup: package id → provider id.
    pub(super) package_owner: DashMap<Ulid, Ulid>,
    /// Idempotency keys: external payment id → package id.
    pub(super) captures: DashMap<String, Ulid>,
    /// Mutations hold it shared; compaction holds it exclusively for a consistent cut.
    pub(super) commit_gate: RwLock<()>,
    /// Held from the existence check until the new provider is in the map.
    pub(super) registration: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub settings: EngineSettings,
}

/// Build the package record described by a `PackageCreated` event.
fn package_from_created(event: &Event) -> Option<PackageState> {
    let Event::PackageCreated {
        id,
        requester_id,
        provider_id,
        sessions,
        total_amount,
        created_at,
        pay_by,
    } = event
    else {
        return None;
    };
    Some(PackageState {
        id: *id,
        requester_id: *requester_id,
        provider_id: *provider_id,
        sessions: sessions
            .iter()
            .map(|&(sid, at)| Session::new(sid, *id, at))
            .collect(),
        ledger: EscrowLedger::new(*total_amount),
        created_at: *created_at,
        pay_by: *pay_by,
    })
}

fn session_span(at: Ms) -> Span {
    Span::new(at, at + SESSION_MINUTES as Ms * MINUTE_MS)
}

/// Apply an event to a provider calendar (caller holds the lock).
fn apply_to_provider(ps: &mut ProviderState, event: &Event) {
    match event {
        Event::ProviderUpdated { session_price, .. } => ps.session_price = *session_price,
        Event::RuleSet { rule, .. } => {
            if let Some(slot) = ps.rules.get_mut(rule.day_of_week as usize) {
                *slot = Some(*rule);
            }
        }
        Event::BlackoutAdded { id, span, .. } => ps.insert_interval(Interval {
            id: *id,
            span: *span,
            kind: IntervalKind::Blackout,
        }),
        Event::PackageCreated {
            id,
            sessions,
            pay_by,
            ..
        } => {
            for &(session_id, at) in sessions {
                ps.insert_interval(Interval {
                    id: session_id,
                    span: session_span(at),
                    kind: IntervalKind::Hold {
                        package_id: *id,
                        expires_at: *pay_by,
                    },
                });
            }
        }
        Event::PaymentCaptured { package_id, .. } => {
            for interval in ps.intervals.iter_mut() {
                if let IntervalKind::Hold { package_id: held_for, .. } = interval.kind
                    && held_for == *package_id
                {
                    interval.kind = IntervalKind::Booking {
                        package_id: *package_id,
                    };
                }
            }
        }
        Event::PackageVoided { package_id, .. } => {
            ps.intervals.retain(|i| i.package_id() != Some(*package_id));
        }
        Event::SessionRescheduled {
            session_id,
            package_id,
            scheduled_at,
            ..
        } => {
            ps.remove_interval(*session_id);
            ps.insert_interval(Interval {
                id: *session_id,
                span: session_span(*scheduled_at),
                kind: IntervalKind::Booking {
                    package_id: *package_id,
                },
            });
        }
        Event::SessionCancelled { session_id, .. } => {
            ps.remove_interval(*session_id);
        }
        Event::OutcomeRecorded {
            closed_sessions, ..
        } => {
            for id in closed_sessions {
                ps.remove_interval(*id);
            }
        }
        // Registration and snapshots are handled at the map level; the rest
        // only touch the package.
        Event::ProviderRegistered { .. }
        | Event::ProviderSnapshot(_)
        | Event::PackageSnapshot(_)
        | Event::MeetingAttached { .. }
        | Event::JoinRecorded { .. } => {}
    }
}

/// Apply an event to a package record (caller holds the lock).
fn apply_to_package(pkg: &mut PackageState, event: &Event) {
    match event {
        Event::PaymentCaptured {
            external_payment_id,
            amount,
            ..
        } => {
            pkg.ledger.apply_capture(external_payment_id.clone(), *amount);
            for s in pkg.sessions.iter_mut() {
                if s.status == SessionStatus::Pending {
                    s.status = SessionStatus::Confirmed;
                }
            }
        }
        Event::PackageVoided { .. } => {
            pkg.ledger.void();
            for s in pkg.sessions.iter_mut() {
                if !s.status.is_terminal() {
                    s.status = SessionStatus::Cancelled;
                }
            }
        }
        Event::SessionRescheduled {
            session_id,
            scheduled_at,
            ..
        } => {
            if let Some(s) = pkg.session_mut(*session_id) {
                s.scheduled_at = *scheduled_at;
                s.reschedule_count += 1;
            }
        }
        Event::MeetingAttached {
            session_id,
            meeting_ref,
            ..
        } => {
            if let Some(s) = pkg.session_mut(*session_id) {
                s.meeting_ref = Some(meeting_ref.clone());
            }
        }
        Event::JoinRecorded { session_id, .. } => {
            if let Some(s) = pkg.session_mut(*session_id) {
                s.joined = true;
            }
        }
        Event::OutcomeRecorded {
            session_id,
            outcome,
            closed_sessions,
            settlement,
            ..
        } => {
            if let Some(s) = pkg.session_mut(*session_id) {
                s.status = outcome.status();
                s.refund_percent = Some(outcome.refund_percent());
            }
            for id in closed_sessions {
                if let Some(s) = pkg.session_mut(*id) {
                    s.status = SessionStatus::Cancelled;
                    s.refund_percent = Some(100);
                }
            }
            if let Some(settlement) = settlement {
                pkg.ledger.apply_settlement(settlement);
            }
        }
        Event::SessionCancelled {
            session_id,
            refund_percent,
            settlement,
            ..
        } => {
            if let Some(s) = pkg.session_mut(*session_id) {
                s.status = SessionStatus::Cancelled;
                s.refund_percent = Some(*refund_percent);
            }
            if let Some(settlement) = settlement {
                pkg.ledger.apply_settlement(settlement);
            }
        }
        Event::ProviderRegistered { .. }
        | Event::ProviderUpdated { .. }
        | Event::RuleSet { .. }
        | Event::BlackoutAdded { .. }
        | Event::PackageCreated { .. }
        | Event::ProviderSnapshot(_)
        | Event::PackageSnapshot(_) => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, settings: EngineSettings) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        // Replay into plain maps first; nothing else can observe them yet.
        let mut providers: HashMap<Ulid, ProviderState> = HashMap::new();
        let mut packages: HashMap<Ulid, PackageState> = HashMap::new();
        for event in &events {
            match event {
                Event::ProviderRegistered { id, session_price } => {
                    providers.insert(*id, ProviderState::new(*id, *session_price));
                    continue;
                }
                Event::ProviderSnapshot(ps) => {
                    providers.insert(ps.id, ps.clone());
                    continue;
                }
                Event::PackageSnapshot(pkg) => {
                    packages.insert(pkg.id, pkg.clone());
                    continue;
                }
                Event::PackageCreated { .. } => {
                    if let Some(pkg) = package_from_created(event) {
                        packages.insert(pkg.id, pkg);
                    }
                }
                _ => {}
            }
            if let Some(ps) = providers.get_mut(&event.provider_id()) {
                apply_to_provider(ps, event);
            }
            if !matches!(event, Event::PackageCreated { .. })
                && let Some(pid) = event.package_id()
                && let Some(pkg) = packages.get_mut(&pid)
            {
                apply_to_package(pkg, event);
            }
        }

        let engine = Self {
            providers: DashMap::new(),
            packages: DashMap::new(),
            session_index: DashMap::new(),
            package_owner: DashMap::new(),
            captures: DashMap::new(),
            commit_gate: RwLock::new(()),
            registration: Mutex::new(()),
            wal_tx,
            notify,
            settings,
        };
        for (id, ps) in providers {
            engine.providers.insert(id, Arc::new(RwLock::new(ps)));
        }
        for (id, pkg) in packages {
            engine.index_package(&pkg);
            engine.packages.insert(id, Arc::new(RwLock::new(pkg)));
        }
        if !events.is_empty() {
            tracing::info!(
                "replayed {} events: {} providers, {} packages",
                events.len(),
                engine.providers.len(),
                engine.packages.len()
            );
        }

        Ok(engine)
    }

    fn index_package(&self, pkg: &PackageState) {
        self.package_owner.insert(pkg.id, pkg.provider_id);
        for s in &pkg.sessions {
            self.session_index.insert(s.id, pkg.id);
        }
        if let Some(payment_id) = &pkg.ledger.payment_id {
            self.captures.insert(payment_id.clone(), pkg.id);
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Shared side of the commit gate; held by every mutation from first lock to commit.
    pub(super) async fn gate(&self) -> RwLockReadGuard<'_, ()> {
        self.commit_gate.read().await
    }

    pub fn get_provider(&self, id: &Ulid) -> Option<SharedProvider> {
        self.providers.get(id).map(|e| e.value().clone())
    }

    pub fn get_package(&self, id: &Ulid) -> Option<SharedPackage> {
        self.packages.get(id).map(|e| e.value().clone())
    }

    pub fn package_for_session(&self, session_id: &Ulid) -> Option<Ulid> {
        self.session_index.get(session_id).map(|e| *e.value())
    }

    /// WAL-append, then apply to whichever records the caller has locked, then notify.
    pub(super) async fn persist_and_apply(
        &self,
        provider: Option<&mut ProviderState>,
        package: Option<&mut PackageState>,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        if let Some(ps) = provider {
            apply_to_provider(ps, event);
        }
        if let Some(pkg) = package {
            apply_to_package(pkg, event);
        }
        self.notify.send(event.provider_id(), event);
        Ok(())
    }

    /// Lookup package → provider, then lock provider before package.
    pub(super) async fn lock_package_write(
        &self,
        package_id: &Ulid,
    ) -> Result<
        (
            OwnedRwLockWriteGuard<ProviderState>,
            OwnedRwLockWriteGuard<PackageState>,
        ),
        EngineError,
    > {
        let provider_id = self
            .package_owner
            .get(package_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*package_id))?;
        let provider = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let package = self
            .get_package(package_id)
            .ok_or(EngineError::NotFound(*package_id))?;
        let provider_guard = provider.write_owned().await;
        let package_guard = package.write_owned().await;
        Ok((provider_guard, package_guard))
    }

    pub(super) fn resolve_session(&self, session_id: &Ulid) -> Result<Ulid, EngineError> {
        self.package_for_session(session_id)
            .ok_or(EngineError::NotFound(*session_id))
    }
}
