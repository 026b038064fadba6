//! Application state for Axum handlers.

use matchpoint_core::Engine;
use matchpoint_core::types::UserId;
use std::collections::HashSet;
use std::sync::Arc;

/// State shared across all HTTP handlers.
///
/// Cloned per request; the engine and the operator list sit behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The reservation engine
    pub engine: Arc<Engine>,
    operators: Arc<HashSet<UserId>>,
}

impl AppState {
    /// Create a new application state with no operators.
    #[must_use]
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            operators: Arc::new(HashSet::new()),
        }
    }

    /// Users allowed to run operator endpoints such as settlement batches.
    #[must_use]
    pub fn with_operators(mut self, operators: impl IntoIterator<Item = UserId>) -> Self {
        self.operators = Arc::new(operators.into_iter().collect());
        self
    }

    /// Whether `user_id` may run operator endpoints.
    #[must_use]
    pub fn is_operator(&self, user_id: UserId) -> bool {
        self.operators.contains(&user_id)
    }
}
