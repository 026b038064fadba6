//! Booking endpoints.
//!
//! - `POST /bookings` - reserve places and open the payment intent
//! - `GET /bookings` - the caller's bookings, newest first
//! - `GET /bookings/:id` - one booking
//! - `POST /bookings/:id/pay` - capture the booking's payment
//! - `POST /bookings/:id/cancel` - cancel, refunding per the unit's policy
//! - `POST /bookings/:id/check-in` and `/check-out`

#![allow(clippy::missing_errors_doc)] // Handlers return AppError

use super::{ApiResponse, ok};
use crate::error::AppError;
use crate::extractors::{IdempotencyKey, UserIdentity};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use matchpoint_core::booking::{Booking, NewBooking};
use matchpoint_core::inventory::UnitType;
use matchpoint_core::payment::{Payment, PaymentDetails};
use matchpoint_core::types::{BookingId, Money, UnitId};
use matchpoint_core::{BookingReceipt, CancelOutcome};
use serde::Deserialize;

/// Body of `POST /bookings`.
#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    /// Unit to book
    pub unit_id: UnitId,
    /// Product tag; must match the unit
    pub unit_type: UnitType,
    /// Places
    pub quantity: u32,
    /// Price per place, in minor units
    pub unit_price: Money,
}

/// Reserve places and open the payment intent.
pub async fn create_booking(
    UserIdentity(user_id): UserIdentity,
    State(state): State<AppState>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<ApiResponse<BookingReceipt>>), AppError> {
    let receipt = state
        .engine
        .book(NewBooking {
            user_id,
            unit_id: request.unit_id,
            unit_type: request.unit_type,
            quantity: request.quantity,
            unit_price: request.unit_price,
        })
        .await?;

    Ok((StatusCode::CREATED, ok(receipt)))
}

/// The caller's bookings.
pub async fn list_bookings(
    UserIdentity(user_id): UserIdentity,
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Booking>>>, AppError> {
    let bookings = state.engine.bookings().list_for_user(user_id).await?;
    Ok(ok(bookings))
}

/// One of the caller's bookings.
pub async fn get_booking(
    UserIdentity(user_id): UserIdentity,
    State(state): State<AppState>,
    Path(booking_id): Path<BookingId>,
) -> Result<Json<ApiResponse<Booking>>, AppError> {
    Ok(ok(state.engine.booking(user_id, booking_id).await?))
}

/// Capture the booking's payment.
///
/// The body is the payment credentials, tagged by `method`:
///
/// ```json
/// { "method": "card", "number": "4242424242424242", "exp_month": 12, "exp_year": 2030, "cvc": "123" }
/// { "method": "pix", "key": "buyer@example.com" }
/// ```
pub async fn pay_booking(
    UserIdentity(user_id): UserIdentity,
    IdempotencyKey(key): IdempotencyKey,
    State(state): State<AppState>,
    Path(booking_id): Path<BookingId>,
    Json(details): Json<PaymentDetails>,
) -> Result<Json<ApiResponse<Payment>>, AppError> {
    let payment = state
        .engine
        .pay_booking(user_id, booking_id, details, key)
        .await?;
    Ok(ok(payment))
}

/// Cancel the booking.
pub async fn cancel_booking(
    UserIdentity(user_id): UserIdentity,
    State(state): State<AppState>,
    Path(booking_id): Path<BookingId>,
) -> Result<Json<ApiResponse<CancelOutcome>>, AppError> {
    Ok(ok(state.engine.cancel(user_id, booking_id).await?))
}

/// Record arrival.
pub async fn check_in(
    UserIdentity(user_id): UserIdentity,
    State(state): State<AppState>,
    Path(booking_id): Path<BookingId>,
) -> Result<Json<ApiResponse<Booking>>, AppError> {
    Ok(ok(state.engine.check_in(user_id, booking_id).await?))
}

/// Record departure.
pub async fn check_out(
    UserIdentity(user_id): UserIdentity,
    State(state): State<AppState>,
    Path(booking_id): Path<BookingId>,
) -> Result<Json<ApiResponse<Booking>>, AppError> {
    Ok(ok(state.engine.check_out(user_id, booking_id).await?))
}
