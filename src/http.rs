use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use chrono::NaiveDate;
use futures::Stream;
use serde_json::json;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use ulid::Ulid;

use crate::dto::*;
use crate::engine::{Engine, EngineError, PaymentCapture, now_ms};
use crate::ledger::LedgerError;
use crate::model::{AvailabilityRule, Event, Ms, Span};
use crate::observability as obs;

/// Shared handler state. The clock is injectable so tests can pin `now`.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    clock: Arc<dyn Fn() -> Ms + Send + Sync>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self::with_clock(engine, now_ms)
    }

    pub fn with_clock(engine: Arc<Engine>, clock: impl Fn() -> Ms + Send + Sync + 'static) -> Self {
        Self {
            engine,
            clock: Arc::new(clock),
        }
    }

    fn now(&self) -> Ms {
        (self.clock)()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/providers", post(register_provider))
        .route("/providers/:id", patch(update_provider))
        .route("/providers/:id/rules", get(list_rules))
        .route("/providers/:id/rules/:day", put(put_rule))
        .route(
            "/providers/:id/blackouts",
            post(add_blackout).get(list_blackouts),
        )
        .route("/providers/:id/slots", get(slots))
        .route("/providers/:id/feed", get(provider_feed))
        .route("/packages", post(create_package))
        .route("/packages/:id", get(get_package))
        .route("/payment-captured", post(payment_captured))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/reschedule", post(reschedule))
        .route("/sessions/:id/meeting", post(attach_meeting))
        .route("/sessions/:id/join", post(record_join))
        .route("/sessions/:id/outcome", post(mark_outcome))
        .route("/sessions/:id/cancel", post(cancel))
        .layer(axum::middleware::from_fn(obs::track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Errors ───────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    BadRequest(&'static str),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl ApiError {
    /// Status, stable machine code, and a message the caller can act on.
    fn parts(&self) -> (StatusCode, &'static str, String) {
        let e = match self {
            ApiError::BadRequest(msg) => {
                return (StatusCode::BAD_REQUEST, "invalid_request", (*msg).to_owned());
            }
            ApiError::Engine(e) => e,
        };
        match e {
            EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", e.to_string()),
            EngineError::AlreadyExists(_) => {
                (StatusCode::CONFLICT, "already_exists", e.to_string())
            }
            EngineError::RuleStoreUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "rule_store_unavailable",
                "availability could not be loaded, retry shortly".to_owned(),
            ),
            EngineError::SlotNoLongerAvailable(_) => (
                StatusCode::CONFLICT,
                "slot_no_longer_available",
                "that slot was just taken, pick another slot".to_owned(),
            ),
            EngineError::InvalidSlot(_) => (StatusCode::BAD_REQUEST, "invalid_slot", e.to_string()),
            EngineError::InvalidRequest(_) => {
                (StatusCode::BAD_REQUEST, "invalid_request", e.to_string())
            }
            EngineError::RescheduleLimitExceeded(_) => (
                StatusCode::CONFLICT,
                "reschedule_limit_exceeded",
                "this session was already rescheduled once, contact support".to_owned(),
            ),
            EngineError::TooLateToReschedule(_) => (
                StatusCode::CONFLICT,
                "too_late_to_reschedule",
                "the session starts too soon to move it, contact support".to_owned(),
            ),
            EngineError::InvalidOutcomeTransition(_) => (
                StatusCode::CONFLICT,
                "invalid_outcome_transition",
                e.to_string(),
            ),
            EngineError::InvalidTransition(_) => {
                (StatusCode::CONFLICT, "invalid_transition", e.to_string())
            }
            EngineError::InvalidSignature => {
                (StatusCode::UNAUTHORIZED, "invalid_signature", e.to_string())
            }
            EngineError::Payment(LedgerError::AmountMismatch { .. }) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "amount_mismatch",
                e.to_string(),
            ),
            EngineError::Payment(LedgerError::Voided) => {
                (StatusCode::CONFLICT, "package_voided", e.to_string())
            }
            EngineError::Payment(LedgerError::PaymentMismatch) => {
                (StatusCode::CONFLICT, "payment_mismatch", e.to_string())
            }
            EngineError::Payment(_) => (StatusCode::CONFLICT, "payment_rejected", e.to_string()),
            EngineError::LimitExceeded(_) => {
                (StatusCode::BAD_REQUEST, "limit_exceeded", e.to_string())
            }
            EngineError::LedgerViolation(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ledger_violation",
                e.to_string(),
            ),
            EngineError::WalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                e.to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, "{message}");
        } else {
            tracing::debug!(code, "{message}");
        }
        (
            status,
            Json(json!({ "error": { "code": code, "message": message } })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn instant(s: &str, what: &'static str) -> ApiResult<Ms> {
    parse_instant(s).ok_or(ApiError::BadRequest(what))
}

// ── Handlers ─────────────────────────────────────────────

async fn healthz(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "providers": app.engine.provider_count(),
        "packages": app.engine.package_count(),
    }))
}

async fn register_provider(
    State(app): State<AppState>,
    Json(body): Json<RegisterProvider>,
) -> ApiResult<(StatusCode, Json<ProviderDto>)> {
    let id = body.id.unwrap_or_else(Ulid::new);
    app.engine.register_provider(id, body.session_price).await?;
    Ok((
        StatusCode::CREATED,
        Json(ProviderDto {
            id,
            session_price: body.session_price,
        }),
    ))
}

async fn update_provider(
    State(app): State<AppState>,
    Path(id): Path<Ulid>,
    Json(body): Json<UpdateProvider>,
) -> ApiResult<Json<ProviderDto>> {
    app.engine.update_provider(id, body.session_price).await?;
    Ok(Json(ProviderDto {
        id,
        session_price: body.session_price,
    }))
}

async fn list_rules(State(app): State<AppState>, Path(id): Path<Ulid>) -> ApiResult<Json<Vec<RuleDto>>> {
    let rules = app.engine.list_rules(id).await?;
    Ok(Json(
        rules
            .into_iter()
            .map(|(rule, stored)| RuleDto::new(rule, stored))
            .collect(),
    ))
}

async fn put_rule(
    State(app): State<AppState>,
    Path((id, day)): Path<(Ulid, u8)>,
    Json(body): Json<RuleBody>,
) -> ApiResult<Json<RuleDto>> {
    let rule = AvailabilityRule {
        day_of_week: day,
        start_minute: parse_clock(&body.start_time)
            .ok_or(ApiError::BadRequest("startTime must be HH:MM"))?,
        end_minute: parse_clock(&body.end_time).ok_or(ApiError::BadRequest("endTime must be HH:MM"))?,
        active: body.active,
    };
    app.engine.set_rule(id, rule).await?;
    Ok(Json(RuleDto::new(rule, true)))
}

async fn add_blackout(
    State(app): State<AppState>,
    Path(provider_id): Path<Ulid>,
    Json(body): Json<BlackoutBody>,
) -> ApiResult<(StatusCode, Json<BlackoutDto>)> {
    let span = Span {
        start: instant(&body.start_at, "startAt must be RFC 3339")?,
        end: instant(&body.end_at, "endAt must be RFC 3339")?,
    };
    let id = Ulid::new();
    app.engine.add_blackout(id, provider_id, span).await?;
    Ok((StatusCode::CREATED, Json(BlackoutDto::new(id, span))))
}

async fn list_blackouts(
    State(app): State<AppState>,
    Path(provider_id): Path<Ulid>,
    Query(range): Query<BlackoutRange>,
) -> ApiResult<Json<Vec<BlackoutDto>>> {
    let range = match (range.from.as_deref(), range.to.as_deref()) {
        (None, None) => None,
        (from, to) => {
            let start = from.map_or(Ok(Ms::MIN), |s| instant(s, "from must be RFC 3339"))?;
            let end = to.map_or(Ok(Ms::MAX), |s| instant(s, "to must be RFC 3339"))?;
            if start >= end {
                return Err(ApiError::BadRequest("from must be before to"));
            }
            Some(Span { start, end })
        }
    };
    let blackouts = app.engine.list_blackouts(provider_id, range).await?;
    Ok(Json(
        blackouts
            .into_iter()
            .map(|(id, span)| BlackoutDto::new(id, span))
            .collect(),
    ))
}

async fn slots(
    State(app): State<AppState>,
    Path(provider_id): Path<Ulid>,
    Query(query): Query<SlotsQuery>,
) -> ApiResult<Json<Vec<SlotDto>>> {
    let date = NaiveDate::parse_from_str(&query.date, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest("date must be YYYY-MM-DD"))?;
    let slots = app.engine.slots(provider_id, date, app.now()).await?;
    Ok(Json(slots.into_iter().map(SlotDto::from).collect()))
}

/// Receiver wrapper that keeps the open-feeds gauge honest when the client goes away.
struct Feed(broadcast::Receiver<Event>);

impl Drop for Feed {
    fn drop(&mut self) {
        metrics::gauge!(obs::FEEDS_ACTIVE).decrement(1.0);
    }
}

fn feed_event(event: &Event) -> SseEvent {
    let payload = json!({
        "kind": event.kind(),
        "providerId": event.provider_id(),
        "packageId": event.package_id(),
    });
    SseEvent::default()
        .event(event.kind())
        .data(payload.to_string())
}

async fn provider_feed(
    State(app): State<AppState>,
    Path(provider_id): Path<Ulid>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    if app.engine.get_provider(&provider_id).is_none() {
        return Err(EngineError::NotFound(provider_id).into());
    }
    metrics::gauge!(obs::FEEDS_ACTIVE).increment(1.0);
    let feed = Feed(app.engine.notify.subscribe(provider_id));
    let stream = futures::stream::unfold(feed, |mut feed| async move {
        loop {
            match feed.0.recv().await {
                Ok(event) => return Some((Ok(feed_event(&event)), feed)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("provider feed lagged, {skipped} events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn create_package(
    State(app): State<AppState>,
    Json(body): Json<CreatePackage>,
) -> ApiResult<(StatusCode, Json<PackageCreatedDto>)> {
    let starts = body
        .slots
        .iter()
        .map(|s| instant(s, "slots must be RFC 3339 timestamps"))
        .collect::<ApiResult<Vec<Ms>>>()?;
    let receipt = app
        .engine
        .create_package(body.requester_id, body.provider_id, starts, app.now())
        .await?;
    Ok((StatusCode::CREATED, Json(receipt.into())))
}

async fn get_package(State(app): State<AppState>, Path(id): Path<Ulid>) -> ApiResult<Json<PackageDto>> {
    let pkg = app.engine.package_snapshot(id).await?;
    Ok(Json(PackageDto::new(&pkg, app.now())))
}

async fn payment_captured(
    State(app): State<AppState>,
    Json(body): Json<CaptureBody>,
) -> ApiResult<Json<CaptureDto>> {
    let capture = PaymentCapture {
        package_id: body.package_id,
        external_payment_id: body.external_payment_id,
        amount: body.amount,
        signature_valid: body.signature_valid,
    };
    let outcome = app.engine.on_payment_captured(capture, app.now()).await?;
    let pkg = app.engine.package_snapshot(body.package_id).await?;
    Ok(Json(CaptureDto::new(outcome, pkg.ledger.state)))
}

async fn get_session(State(app): State<AppState>, Path(id): Path<Ulid>) -> ApiResult<Json<SessionDto>> {
    let view = app.engine.session_view(id, app.now()).await?;
    Ok(Json(view.into()))
}

async fn reschedule(
    State(app): State<AppState>,
    Path(id): Path<Ulid>,
    Json(body): Json<RescheduleBody>,
) -> ApiResult<Json<SessionDto>> {
    let new_start = instant(&body.new_time, "newTime must be RFC 3339")?;
    let now = app.now();
    let session = app.engine.reschedule(id, new_start, now).await?;
    Ok(Json(SessionDto::new(&session, now)))
}

async fn attach_meeting(
    State(app): State<AppState>,
    Path(id): Path<Ulid>,
    Json(body): Json<MeetingBody>,
) -> ApiResult<StatusCode> {
    app.engine.attach_meeting(id, body.meeting_ref).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn record_join(State(app): State<AppState>, Path(id): Path<Ulid>) -> ApiResult<StatusCode> {
    app.engine.record_join(id, app.now()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_outcome(
    State(app): State<AppState>,
    Path(id): Path<Ulid>,
    Json(body): Json<OutcomeBody>,
) -> ApiResult<Json<OutcomeDto>> {
    let receipt = app.engine.mark_outcome(id, body.outcome(), app.now()).await?;
    Ok(Json(receipt.into()))
}

async fn cancel(
    State(app): State<AppState>,
    Path(id): Path<Ulid>,
    Json(body): Json<CancelBody>,
) -> ApiResult<Json<CancelDto>> {
    let receipt = app.engine.cancel(id, body.actor, app.now()).await?;
    Ok(Json(receipt.into()))
}
