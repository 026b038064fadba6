//! HTTP request handlers, organized by resource.

pub mod bookings;
pub mod health;
pub mod payments;
pub mod settlements;

use axum::Json;
use serde::Serialize;

/// Success envelope: `{ "success": true, "data": ... }`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// Always `true`
    pub success: bool,
    /// Response payload
    pub data: T,
}

/// Wraps `data` in the success envelope.
#[must_use]
pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}
