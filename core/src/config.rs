//! Engine configuration.

use crate::payment::RetryPolicy;
use crate::settlement::SplitPolicy;

/// Tunables for [`crate::Engine`].
///
/// Refund rules are not configured here: each inventory unit carries its own, defaulting to
/// [`crate::refund::RefundRule::TIME_SLOT`] or [`crate::refund::RefundRule::DAY_USE`].
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Revenue split
    pub split: SplitPolicy,
    /// Retry and timeout policy for provider calls
    pub provider_policy: RetryPolicy,
    /// Compare-and-swap attempts before a contended reservation gives up
    pub reservation_attempts: u32,
    /// ISO currency code sent to the provider
    pub currency: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            split: SplitPolicy::default(),
            provider_policy: RetryPolicy::default(),
            reservation_attempts: 2,
            currency: "brl".to_string(),
        }
    }
}
