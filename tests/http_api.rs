use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use slotwise::dto::parse_instant;
use slotwise::engine::{Engine, EngineSettings};
use slotwise::http::{AppState, router};
use slotwise::notify::NotifyHub;

struct TestApp {
    router: Router,
    clock: Arc<AtomicI64>,
}

impl TestApp {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join("slotwise_test_http");
        tokio_test::assert_ok!(std::fs::create_dir_all(&dir));
        let path: PathBuf = dir.join(name);
        let _ = std::fs::remove_file(&path);

        let engine = Arc::new(tokio_test::assert_ok!(Engine::new(
            path,
            Arc::new(NotifyHub::new()),
            EngineSettings::default(),
        )));
        // Wednesday morning, before the default 20:00-22:00 slots.
        let clock = Arc::new(AtomicI64::new(ts("2026-10-14T08:00:00Z")));
        let reading = clock.clone();
        let state = AppState::with_clock(engine, move || reading.load(Ordering::SeqCst));
        Self {
            router: router(state),
            clock,
        }
    }

    fn set_now(&self, rfc3339: &str) {
        self.clock.store(ts(rfc3339), Ordering::SeqCst);
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        };
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn provider(&self, price: u64) -> String {
        let (status, body) = self
            .send("POST", "/providers", Some(json!({ "sessionPrice": price })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_owned()
    }

    async fn package(&self, provider: &str, slots: &[&str]) -> Value {
        let (status, body) = self
            .send(
                "POST",
                "/packages",
                Some(json!({
                    "requesterId": ulid::Ulid::new().to_string(),
                    "providerId": provider,
                    "slots": slots,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    async fn pay(&self, package_id: &str, payment_id: &str) -> (StatusCode, Value) {
        self.send(
            "POST",
            "/payment-captured",
            Some(json!({
                "packageId": package_id,
                "externalPaymentId": payment_id,
                "signatureValid": true,
            })),
        )
        .await
    }
}

fn ts(rfc3339: &str) -> i64 {
    parse_instant(rfc3339).unwrap()
}

#[tokio::test]
async fn health_reports_counts() {
    let app = TestApp::new("health.wal");
    app.provider(1000).await;
    let (status, body) = app.send("GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["providers"], 1);
}

#[tokio::test]
async fn booking_flow_over_http() {
    let app = TestApp::new("flow.wal");
    let provider = app.provider(1500).await;

    let (status, slots) = app
        .send("GET", &format!("/providers/{provider}/slots?date=2026-10-14"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(slots[0]["time"], "20:00");
    assert_eq!(slots[0]["isAvailable"], true);
    assert!(slots[0].get("reason").is_none());
    let chosen = slots[0]["startsAt"].as_str().unwrap().to_owned();
    assert_eq!(chosen, "2026-10-14T20:00:00Z");

    let created = app.package(&provider, &[&chosen]).await;
    assert_eq!(created["amountDue"], 1500);
    assert_eq!(created["payBy"], "2026-10-14T08:15:00Z");
    let package_id = created["packageId"].as_str().unwrap().to_owned();
    let session_id = created["sessions"][0]["id"].as_str().unwrap().to_owned();

    let (status, body) = app.pay(&package_id, "pay_flow").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "captured");
    assert_eq!(body["escrowState"], "held_in_escrow");
    let (status, body) = app.pay(&package_id, "pay_flow").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");

    let (status, _) = app
        .send(
            "POST",
            &format!("/sessions/{session_id}/meeting"),
            Some(json!({ "meetingRef": "room-9" })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    app.set_now("2026-10-14T20:02:00Z");
    let (status, _) = app
        .send("POST", &format!("/sessions/{session_id}/join"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    app.set_now("2026-10-14T21:05:00Z");
    let (status, session) = app
        .send("GET", &format!("/sessions/{session_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["phase"], "pending_evaluation");
    assert_eq!(session["meetingRef"], "room-9");

    let (status, outcome) = app
        .send(
            "POST",
            &format!("/sessions/{session_id}/outcome"),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "completed");
    assert_eq!(outcome["escrowState"], "released");
    assert_eq!(outcome["releasedAmount"], 1500);

    let (_, package) = app.send("GET", &format!("/packages/{package_id}"), None).await;
    assert_eq!(package["escrow"]["state"], "released");
    assert_eq!(package["escrow"]["held"], 1500);
    assert_eq!(package["sessions"][0]["status"], "completed");
}

#[tokio::test]
async fn taken_slot_is_a_conflict() {
    let app = TestApp::new("conflict.wal");
    let provider = app.provider(1000).await;
    app.package(&provider, &["2026-10-14T20:00:00Z"]).await;

    let (status, body) = app
        .send(
            "POST",
            "/packages",
            Some(json!({
                "requesterId": ulid::Ulid::new().to_string(),
                "providerId": provider,
                "slots": ["2026-10-14T20:00:00Z"],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "slot_no_longer_available");
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("pick another slot")
    );

    let (_, slots) = app
        .send("GET", &format!("/providers/{provider}/slots?date=2026-10-14"), None)
        .await;
    assert_eq!(slots[0]["reason"], "booked");
}

#[tokio::test]
async fn request_errors_map_to_status_codes() {
    let app = TestApp::new("errors.wal");
    let provider = app.provider(1000).await;

    let (status, body) = app
        .send("GET", &format!("/providers/{provider}/slots?date=14-10-2026"), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");

    let unknown = ulid::Ulid::new();
    let (status, body) = app
        .send("GET", &format!("/providers/{unknown}/slots?date=2026-10-14"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, body) = app
        .send(
            "POST",
            "/packages",
            Some(json!({
                "requesterId": ulid::Ulid::new().to_string(),
                "providerId": provider,
                "slots": ["2026-10-14T20:30:00Z"],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_slot");

    let created = app.package(&provider, &["2026-10-14T21:00:00Z"]).await;
    let (status, body) = app
        .send(
            "POST",
            "/payment-captured",
            Some(json!({
                "packageId": created["packageId"],
                "externalPaymentId": "pay_x",
                "signatureValid": false,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "invalid_signature");

    let (status, body) = app
        .send(
            "POST",
            "/payment-captured",
            Some(json!({
                "packageId": created["packageId"],
                "externalPaymentId": "pay_x",
                "amount": 1,
                "signatureValid": true,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "amount_mismatch");
}

#[tokio::test]
async fn requester_cancellation_36h_ahead_refunds_80_percent() {
    let app = TestApp::new("cancel.wal");
    let provider = app.provider(1000).await;
    // Thursday 20:00 is 36 hours after the clock.
    let created = app.package(&provider, &["2026-10-15T20:00:00Z"]).await;
    let package_id = created["packageId"].as_str().unwrap();
    let session_id = created["sessions"][0]["id"].as_str().unwrap();
    app.pay(package_id, "pay_cancel").await;

    let (status, body) = app
        .send(
            "POST",
            &format!("/sessions/{session_id}/cancel"),
            Some(json!({ "actor": "requester" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["refundPercent"], 80);
    assert_eq!(body["refundedAmount"], 800);
    assert_eq!(body["escrowState"], "partially_refunded");
    assert_eq!(body["settled"], true);
}

#[tokio::test]
async fn second_reschedule_needs_support() {
    let app = TestApp::new("reschedule.wal");
    let provider = app.provider(1000).await;
    let created = app.package(&provider, &["2026-10-14T20:00:00Z"]).await;
    let package_id = created["packageId"].as_str().unwrap();
    let session_id = created["sessions"][0]["id"].as_str().unwrap();
    app.pay(package_id, "pay_move").await;

    let uri = format!("/sessions/{session_id}/reschedule");
    let (status, body) = app
        .send("POST", &uri, Some(json!({ "newTime": "2026-10-15T21:00:00Z" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scheduledAt"], "2026-10-15T21:00:00Z");
    assert_eq!(body["rescheduleCount"], 1);

    let (status, body) = app
        .send("POST", &uri, Some(json!({ "newTime": "2026-10-15T20:00:00Z" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "reschedule_limit_exceeded");
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("contact support")
    );
}

#[tokio::test]
async fn rules_and_blackouts_shape_the_grid() {
    let app = TestApp::new("rules.wal");
    let provider = app.provider(1000).await;

    let (status, rule) = app
        .send(
            "PUT",
            &format!("/providers/{provider}/rules/3"),
            Some(json!({ "startTime": "09:00", "endTime": "12:30" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rule["isDefault"], false);

    let (status, blackout) = app
        .send(
            "POST",
            &format!("/providers/{provider}/blackouts"),
            Some(json!({
                "startAt": "2026-10-14T10:15:00Z",
                "endAt": "2026-10-14T10:45:00Z",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(blackout["id"].is_string());

    let (_, slots) = app
        .send("GET", &format!("/providers/{provider}/slots?date=2026-10-14"), None)
        .await;
    let summary: Vec<(String, Value)> = slots
        .as_array()
        .unwrap()
        .iter()
        .map(|s| (s["time"].as_str().unwrap().to_owned(), s["reason"].clone()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("09:00".to_owned(), Value::Null),
            ("10:00".to_owned(), json!("unavailable")),
            ("11:00".to_owned(), Value::Null),
        ]
    );

    let (_, rules) = app
        .send("GET", &format!("/providers/{provider}/rules"), None)
        .await;
    assert_eq!(rules.as_array().unwrap().len(), 7);
    assert_eq!(rules[3]["startTime"], "09:00");
    assert_eq!(rules[0]["isDefault"], true);

    let (_, listed) = app
        .send(
            "GET",
            &format!("/providers/{provider}/blackouts?from=2026-10-14T00:00:00Z"),
            None,
        )
        .await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}
