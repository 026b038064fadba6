//! Payment endpoints.

#![allow(clippy::missing_errors_doc)] // Handlers return AppError

use super::{ApiResponse, ok};
use crate::error::AppError;
use crate::extractors::UserIdentity;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use matchpoint_core::payment::Payment;
use matchpoint_core::types::PaymentId;

/// `GET /payments/:id`: one of the caller's payments. Card numbers are never stored; only
/// the method and last four digits are returned.
pub async fn get_payment(
    UserIdentity(user_id): UserIdentity,
    State(state): State<AppState>,
    Path(payment_id): Path<PaymentId>,
) -> Result<Json<ApiResponse<Payment>>, AppError> {
    Ok(ok(state.engine.payment(user_id, payment_id).await?))
}
