//! Router configuration.

use crate::handlers::{bookings, health::health_check, payments, settlements};
use crate::middleware::request_id_layer;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the complete router.
///
/// Every route except `/health` requires the `X-User-Id` header.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/bookings",
            post(bookings::create_booking).get(bookings::list_bookings),
        )
        .route("/bookings/:id", get(bookings::get_booking))
        .route("/bookings/:id/pay", post(bookings::pay_booking))
        .route("/bookings/:id/cancel", post(bookings::cancel_booking))
        .route("/bookings/:id/check-in", post(bookings::check_in))
        .route("/bookings/:id/check-out", post(bookings::check_out))
        .route("/payments/:id", get(payments::get_payment))
        .route("/settlements/batch", post(settlements::settle_batch))
        .layer(TraceLayer::new_for_http())
        .layer(request_id_layer())
        .with_state(state)
}
