//! Settlement endpoints.

#![allow(clippy::missing_errors_doc)] // Handlers return AppError

use super::{ApiResponse, ok};
use crate::error::AppError;
use crate::extractors::OperatorIdentity;
use crate::state::AppState;
use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use matchpoint_core::settlement::Settlement;
use serde::{Deserialize, Serialize};

/// Body of `POST /settlements/batch`.
#[derive(Debug, Deserialize)]
pub struct SettleBatchRequest {
    /// Start of the capture window, inclusive
    pub from: DateTime<Utc>,
    /// End of the capture window, inclusive
    pub to: DateTime<Utc>,
}

/// Result of a batch.
#[derive(Debug, Serialize)]
pub struct SettleBatchResponse {
    /// Number of settlements marked settled by this call
    pub settled: usize,
    /// Those settlements
    pub settlements: Vec<Settlement>,
}

/// `POST /settlements/batch`: settle every unsettled record whose payment was captured in
/// the window. Running it again over the same window settles nothing new. Operators only.
pub async fn settle_batch(
    OperatorIdentity(user_id): OperatorIdentity,
    State(state): State<AppState>,
    Json(request): Json<SettleBatchRequest>,
) -> Result<Json<ApiResponse<SettleBatchResponse>>, AppError> {
    let settlements = state
        .engine
        .settlements()
        .settle_batch(request.from, request.to)
        .await?;

    tracing::info!(
        requested_by = %user_id,
        from = %request.from,
        to = %request.to,
        settled = settlements.len(),
        "Settlement batch run"
    );

    Ok(ok(SettleBatchResponse {
        settled: settlements.len(),
        settlements,
    }))
}
