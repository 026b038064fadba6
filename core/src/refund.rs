//! Refund policy evaluation.
//!
//! A unit carries a [`RefundRule`]: cancellations strictly inside the window after the booking
//! was created receive the configured fraction, anything later receives nothing. Evaluation is
//! a pure function of its inputs; it never reads a clock or touches storage.

use crate::types::BasisPoints;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Cancellation window and refund fraction attached to an inventory unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRule {
    /// Hours after booking creation during which a cancellation is refundable.
    pub cancel_window_hours: u32,
    /// Fraction of the total refunded inside the window.
    pub refund_fraction: BasisPoints,
}

impl RefundRule {
    /// Default rule for court time slots: 80 % within 24 hours.
    pub const TIME_SLOT: Self = Self {
        cancel_window_hours: 24,
        refund_fraction: BasisPoints::from_raw(8_000),
    };

    /// Default rule for day-use events: 70 % within 48 hours.
    pub const DAY_USE: Self = Self {
        cancel_window_hours: 48,
        refund_fraction: BasisPoints::from_raw(7_000),
    };

    /// Evaluates this rule for a booking created at `created_at`.
    #[must_use]
    pub fn evaluate(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> BasisPoints {
        evaluate(created_at, now, self.cancel_window_hours, self.refund_fraction)
    }
}

/// Returns the refund fraction owed for a cancellation at `now`.
///
/// The full fraction applies when less than `cancel_window_hours` have elapsed since
/// `created_at`; the comparison is strict, so cancelling at exactly the window boundary yields
/// zero. A `now` earlier than `created_at` (clock skew) counts as inside the window.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use matchpoint_core::refund::evaluate;
/// use matchpoint_core::types::BasisPoints;
///
/// let created = Utc::now();
/// let eighty = BasisPoints::new(8_000).unwrap_or_default();
/// assert_eq!(evaluate(created, created + Duration::hours(23), 24, eighty), eighty);
/// assert_eq!(evaluate(created, created + Duration::hours(25), 24, eighty), BasisPoints::ZERO);
/// ```
#[must_use]
pub fn evaluate(
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    cancel_window_hours: u32,
    full_refund_fraction: BasisPoints,
) -> BasisPoints {
    let elapsed = now.signed_duration_since(created_at);
    if elapsed < Duration::hours(i64::from(cancel_window_hours)) {
        full_refund_fraction
    } else {
        BasisPoints::ZERO
    }
}
