//! Health check endpoint for load balancers and monitoring.

use super::{ApiResponse, ok};
use axum::Json;
use serde::Serialize;

/// Liveness payload.
#[derive(Debug, Serialize)]
pub struct Health {
    /// Always `"ok"` while the process serves requests
    pub status: &'static str,
}

/// `GET /health`
///
/// Does not check the database; it only reports that the process is serving.
#[allow(clippy::unused_async)]
pub async fn health_check() -> Json<ApiResponse<Health>> {
    ok(Health { status: "ok" })
}
