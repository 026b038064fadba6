//! # Matchpoint Testing
//!
//! Test doubles and fixtures for the Matchpoint engine.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - [`InMemoryStore`]: every storage trait over a single lock, with fault injection
//! - [`MockPaymentProvider`]: scripted provider that deduplicates by idempotency key
//! - [`RecordingNotifier`]: captures notifications
//! - [`LogCapture`]: collects log output for assertions on logged fields
//! - [`fixtures`]: ready-made units, requests and credentials
//!
//! ## Example
//!
//! ```ignore
//! use matchpoint_testing::{test_engine, fixtures};
//!
//! #[tokio::test]
//! async fn test_booking_flow() {
//!     let harness = test_engine();
//!     let unit = harness.engine.ledger().register(fixtures::time_slot(4)).await.unwrap();
//!     let receipt = harness.engine.book(fixtures::booking_request(&unit, 2)).await.unwrap();
//!     assert_eq!(harness.engine.ledger().availability(unit.id).await.unwrap(), 2);
//! }
//! ```

use chrono::{DateTime, Utc};
use matchpoint_core::environment::Clock;

pub mod fixtures;
pub mod log_capture;
pub mod notifier_mocks;
pub mod provider_mocks;
pub mod store_mocks;

pub use log_capture::LogCapture;
pub use notifier_mocks::RecordingNotifier;
pub use provider_mocks::MockPaymentProvider;
pub use store_mocks::InMemoryStore;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use matchpoint_testing::mocks::FixedClock;
    /// use matchpoint_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hand one clone to the engine and advance
    /// another.
    ///
    /// ```
    /// use matchpoint_testing::mocks::ManualClock;
    /// use matchpoint_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = ManualClock::new(Utc::now());
    /// let start = clock.now();
    /// clock.advance(Duration::hours(25));
    /// assert_eq!(clock.now() - start, Duration::hours(25));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward (or backward, for a negative duration)
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.write().unwrap();
            *time += by;
        }

        /// Jump to `time`
        #[allow(clippy::unwrap_used)]
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap() = time;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// 2025-01-01 00:00:00 UTC
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is hardcoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }
}

pub use mocks::{FixedClock, ManualClock, test_clock, test_epoch};

/// An engine wired to in-memory doubles, plus handles to inspect them.
pub struct TestHarness {
    /// The engine under test
    pub engine: matchpoint_core::Engine,
    /// Its storage
    pub store: std::sync::Arc<InMemoryStore>,
    /// Its payment provider
    pub provider: std::sync::Arc<MockPaymentProvider>,
    /// Its notifier
    pub notifier: std::sync::Arc<RecordingNotifier>,
    /// Its clock
    pub clock: ManualClock,
}

/// Builds an engine over fresh doubles with a fast retry policy.
#[must_use]
pub fn test_engine() -> TestHarness {
    use matchpoint_core::payment::RetryPolicy;
    use std::sync::Arc;
    use std::time::Duration;

    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(MockPaymentProvider::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let clock = ManualClock::new(test_epoch());

    let config = matchpoint_core::EngineConfig {
        provider_policy: RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .attempt_timeout(Duration::from_millis(200))
            .build(),
        ..matchpoint_core::EngineConfig::default()
    };

    let engine = matchpoint_core::Engine::builder(store.clone(), provider.clone())
        .clock(Arc::new(clock.clone()))
        .notifier(notifier.clone())
        .config(config)
        .build();

    TestHarness {
        engine,
        store,
        provider,
        notifier,
        clock,
    }
}

/// Installs a test-friendly `tracing` subscriber. Safe to call more than once.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
