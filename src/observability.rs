use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "slotwise_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "slotwise_http_request_duration_seconds";

/// Histogram: time to resolve one provider-day of slots.
pub const SLOT_RESOLVE_DURATION_SECONDS: &str = "slotwise_slot_resolve_duration_seconds";

// ── Booking flow ────────────────────────────────────────────────

/// Counter: packages created (slots held, awaiting payment).
pub const PACKAGES_CREATED_TOTAL: &str = "slotwise_packages_created_total";

/// Counter: package creations that lost a slot race.
pub const SLOT_CONFLICTS_TOTAL: &str = "slotwise_slot_conflicts_total";

/// Counter: capture notifications. Labels: result.
pub const PAYMENT_CAPTURES_TOTAL: &str = "slotwise_payment_captures_total";

/// Counter: unpaid packages voided after the payment window.
pub const HOLDS_EXPIRED_TOTAL: &str = "slotwise_holds_expired_total";

/// Counter: cancellations. Labels: actor.
pub const SESSIONS_CANCELLED_TOTAL: &str = "slotwise_sessions_cancelled_total";

/// Counter: recorded outcomes. Labels: outcome.
pub const SESSION_OUTCOMES_TOTAL: &str = "slotwise_session_outcomes_total";

/// Counter: packages settled. Labels: state.
pub const ESCROW_SETTLEMENTS_TOTAL: &str = "slotwise_escrow_settlements_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: open provider feed streams.
pub const FEEDS_ACTIVE: &str = "slotwise_feeds_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotwise_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotwise_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Axum middleware recording request count and latency per matched route.
pub async fn track_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let started = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();
    metrics::counter!(HTTP_REQUESTS_TOTAL, "route" => route.clone(), "status" => status)
        .increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}
