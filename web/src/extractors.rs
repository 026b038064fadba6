//! Custom Axum extractors.
//!
//! - [`UserIdentity`]: the buyer, from the `X-User-Id` header set by the auth gateway
//! - [`OperatorIdentity`]: a user on the configured operator list
//! - [`IdempotencyKey`]: optional `Idempotency-Key` header forwarded to the provider

use crate::error::AppError;
use crate::state::AppState;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use matchpoint_core::types::UserId;

/// Header carrying the authenticated user.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Header carrying the client's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Authenticated buyer.
///
/// The header is trusted; it is set by the gateway in front of this service. A missing or
/// malformed value is rejected with `MATCH_UNAUTHORIZED`.
#[derive(Debug, Clone, Copy)]
pub struct UserIdentity(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for UserIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::unauthorized("missing user identity"))?;

        value
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<UserId>().ok())
            .map(Self)
            .ok_or_else(|| AppError::unauthorized("malformed user identity"))
    }
}

/// Authenticated operator.
///
/// Same header as [`UserIdentity`]; users not on the operator list are rejected with
/// `MATCH_FORBIDDEN`.
#[derive(Debug, Clone, Copy)]
pub struct OperatorIdentity(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for OperatorIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let UserIdentity(user_id) = UserIdentity::from_request_parts(parts, state).await?;
        if !state.is_operator(user_id) {
            tracing::warn!(user_id = %user_id, "Operator endpoint refused");
            return Err(AppError::forbidden("operator access required"));
        }
        Ok(Self(user_id))
    }
}

/// Client-supplied idempotency key, if any.
#[derive(Debug, Clone, Default)]
pub struct IdempotencyKey(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(IDEMPOTENCY_KEY_HEADER) else {
            return Ok(Self(None));
        };

        let key = value
            .to_str()
            .map_err(|_| AppError::validation("Idempotency-Key must be visible ASCII"))?
            .trim();
        if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(AppError::validation(format!(
                "Idempotency-Key must be 1 to {MAX_IDEMPOTENCY_KEY_LEN} characters"
            )));
        }
        Ok(Self(Some(key.to_string())))
    }
}
