//! HTTP surface for the Matchpoint reservation engine.
//!
//! Handlers are thin: they extract the caller's identity and the request, call the
//! [`matchpoint_core::Engine`] and map its errors through [`AppError`]. Responses use the
//! envelope `{ "success": true, "data": ... }`; failures use
//! `{ "success": false, "error": { "code", "message" } }`.
//!
//! # Example
//!
//! ```ignore
//! use matchpoint_web::{AppState, build_router};
//!
//! let app = build_router(AppState::new(engine));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError};
pub use error::AppError;
pub use extractors::{
    IDEMPOTENCY_KEY_HEADER, IdempotencyKey, OperatorIdentity, USER_ID_HEADER, UserIdentity,
};
pub use middleware::{REQUEST_ID_HEADER, RequestId, request_id_layer};
pub use routes::build_router;
pub use state::AppState;
