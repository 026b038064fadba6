//! HTTP API tests over the in-memory engine.
//!
//! Run with: `cargo test -p matchpoint-web --test api_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Duration;
use matchpoint_core::Engine;
use matchpoint_core::inventory::InventoryUnit;
use matchpoint_core::types::UserId;
use matchpoint_testing::{ManualClock, TestHarness, fixtures, test_engine, test_epoch};
use matchpoint_web::{AppState, build_router};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

struct Api {
    router: Router,
    engine: Arc<Engine>,
    clock: ManualClock,
    operator: UserId,
}

impl Api {
    fn new() -> Self {
        let TestHarness { engine, clock, .. } = test_engine();
        let engine = Arc::new(engine);
        let operator = UserId::new();
        Self {
            router: build_router(AppState::new(engine.clone()).with_operators([operator])),
            engine,
            clock,
            operator,
        }
    }

    async fn unit(&self, unit: InventoryUnit) -> InventoryUnit {
        self.engine.ledger().register(unit).await.unwrap()
    }

    async fn send(&self, method: &str, uri: &str, user: Option<UserId>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("X-User-Id", user.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("JSON body")
        };
        (status, value)
    }

    async fn book(&self, user: UserId, unit: &InventoryUnit, quantity: u32) -> Value {
        let (status, body) = self
            .send(
                "POST",
                "/bookings",
                Some(user),
                Some(json!({
                    "unit_id": unit.id,
                    "unit_type": unit.unit_type(),
                    "quantity": quantity,
                    "unit_price": fixtures::UNIT_PRICE,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"].clone()
    }
}

fn card() -> Value {
    json!({
        "method": "card",
        "number": "4242424242424242",
        "exp_month": 12,
        "exp_year": 2030,
        "cvc": "123"
    })
}

#[tokio::test]
async fn test_health_needs_no_identity() {
    let api = Api::new();
    let (status, body) = api.send("GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_identity_is_unauthorized() {
    let api = Api::new();
    let (status, body) = api.send("GET", "/bookings", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "MATCH_UNAUTHORIZED");
}

#[tokio::test]
async fn test_book_pay_cancel_flow() {
    let api = Api::new();
    let unit = api.unit(fixtures::time_slot(4)).await;
    let user = UserId::new();

    let receipt = api.book(user, &unit, 2).await;
    assert_eq!(receipt["booking"]["status"], "pending");
    assert_eq!(receipt["payment"]["status"], "pending");
    assert_eq!(receipt["booking"]["total"], 10_000);
    let booking_id = receipt["booking"]["id"].as_str().unwrap().to_string();

    let (status, body) = api
        .send("POST", &format!("/bookings/{booking_id}/pay"), Some(user), Some(card()))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "captured");
    let payment_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = api.send("GET", "/bookings", Some(user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["status"], "paid");

    api.clock.advance(Duration::hours(23));
    let (status, body) = api
        .send("POST", &format!("/bookings/{booking_id}/cancel"), Some(user), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["booking"]["status"], "refunded");
    assert_eq!(body["data"]["refund_fraction"], 8_000);
    assert_eq!(body["data"]["refunded_amount"], 8_000);

    let (status, body) = api
        .send("GET", &format!("/payments/{payment_id}"), Some(user), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "refunded");
    assert_eq!(api.engine.ledger().availability(unit.id).await.unwrap(), 4);
}

#[tokio::test]
async fn test_late_cancel_is_rejected_with_refund_code() {
    let api = Api::new();
    let unit = api.unit(fixtures::time_slot(4)).await;
    let user = UserId::new();
    let receipt = api.book(user, &unit, 1).await;
    let booking_id = receipt["booking"]["id"].as_str().unwrap().to_string();
    let (status, _) = api
        .send("POST", &format!("/bookings/{booking_id}/pay"), Some(user), Some(card()))
        .await;
    assert_eq!(status, StatusCode::OK);

    api.clock.advance(Duration::hours(25));
    let (status, body) = api
        .send("POST", &format!("/bookings/{booking_id}/cancel"), Some(user), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "MATCH_REFUND_NOT_ALLOWED");

    let (_, body) = api
        .send("GET", &format!("/bookings/{booking_id}"), Some(user), None)
        .await;
    assert_eq!(body["data"]["status"], "paid");
}

#[tokio::test]
async fn test_other_users_booking_is_forbidden() {
    let api = Api::new();
    let unit = api.unit(fixtures::day_use(10)).await;
    let owner = UserId::new();
    let receipt = api.book(owner, &unit, 1).await;
    let booking_id = receipt["booking"]["id"].as_str().unwrap().to_string();

    let (status, body) = api
        .send("GET", &format!("/bookings/{booking_id}"), Some(UserId::new()), None)
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "MATCH_FORBIDDEN");
}

#[tokio::test]
async fn test_overbooking_is_a_conflict() {
    let api = Api::new();
    let unit = api.unit(fixtures::day_use(2)).await;
    let user = UserId::new();
    api.book(user, &unit, 2).await;

    let (status, body) = api
        .send(
            "POST",
            "/bookings",
            Some(user),
            Some(json!({
                "unit_id": unit.id,
                "unit_type": unit.unit_type(),
                "quantity": 1,
                "unit_price": fixtures::UNIT_PRICE,
            })),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "MATCH_CONFLICT");
}

#[tokio::test]
async fn test_unknown_booking_is_not_found() {
    let api = Api::new();
    let (status, body) = api
        .send(
            "GET",
            &format!("/bookings/{}", uuid::Uuid::new_v4()),
            Some(UserId::new()),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "MATCH_NOT_FOUND");
}

#[tokio::test]
async fn test_settle_batch_is_idempotent() {
    let api = Api::new();
    let unit = api.unit(fixtures::time_slot(4)).await;
    let user = UserId::new();
    let receipt = api.book(user, &unit, 2).await;
    let booking_id = receipt["booking"]["id"].as_str().unwrap().to_string();
    let (status, body) = api
        .send("POST", &format!("/bookings/{booking_id}/pay"), Some(user), Some(card()))
        .await;
    assert_eq!(status, StatusCode::OK);
    let payment_id = body["data"]["id"].as_str().unwrap().to_string();

    let window = json!({
        "from": test_epoch() - Duration::hours(1),
        "to": test_epoch() + Duration::hours(1),
    });
    let (status, body) = api
        .send("POST", "/settlements/batch", Some(api.operator), Some(window.clone()))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["settled"], 1);
    assert_eq!(body["data"]["settlements"][0]["settled"], true);
    assert_eq!(body["data"]["settlements"][0]["payment_id"], payment_id);

    let (status, body) = api
        .send("POST", "/settlements/batch", Some(api.operator), Some(window))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["settled"], 0);
}

#[tokio::test]
async fn test_settle_batch_requires_operator() {
    let api = Api::new();
    let unit = api.unit(fixtures::time_slot(4)).await;
    let user = UserId::new();
    let receipt = api.book(user, &unit, 1).await;
    let booking_id = receipt["booking"]["id"].as_str().unwrap().to_string();
    let (status, body) = api
        .send("POST", &format!("/bookings/{booking_id}/pay"), Some(user), Some(card()))
        .await;
    assert_eq!(status, StatusCode::OK);
    let payment_id = body["data"]["id"].as_str().unwrap().parse().unwrap();

    let window = json!({
        "from": test_epoch() - Duration::hours(1),
        "to": test_epoch() + Duration::hours(1),
    });
    let (status, body) = api
        .send("POST", "/settlements/batch", Some(user), Some(window.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "MATCH_FORBIDDEN");

    let (status, _) = api.send("POST", "/settlements/batch", None, Some(window)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let settlement = api.engine.settlements().for_payment(payment_id).await.unwrap();
    assert!(!settlement.settled);
}

#[tokio::test]
async fn test_inverted_batch_window_is_a_validation_error() {
    let api = Api::new();
    let window = json!({
        "from": test_epoch(),
        "to": test_epoch() - Duration::hours(1),
    });

    let (status, body) = api
        .send("POST", "/settlements/batch", Some(api.operator), Some(window))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "MATCH_VALIDATION_ERROR");
}
