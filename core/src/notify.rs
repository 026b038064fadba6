//! Notification hook.
//!
//! The engine tells the outside world about completed operations through [`Notifier`].
//! Delivery is best effort: a failing notifier is logged and never undoes the operation.

use crate::types::{BasisPoints, BookingId, Money, PaymentId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Something the buyer should hear about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Places reserved, payment pending
    BookingCreated {
        /// Booking
        booking_id: BookingId,
        /// Buyer
        user_id: UserId,
        /// Amount due
        total: Money,
    },
    /// Payment captured and booking paid
    PaymentCaptured {
        /// Payment
        payment_id: PaymentId,
        /// Booking
        booking_id: Option<BookingId>,
        /// Buyer
        user_id: UserId,
        /// Amount charged
        amount: Money,
    },
    /// Money returned
    PaymentRefunded {
        /// Payment
        payment_id: PaymentId,
        /// Buyer
        user_id: UserId,
        /// Amount returned
        amount: Money,
    },
    /// Booking cancelled
    BookingCancelled {
        /// Booking
        booking_id: BookingId,
        /// Buyer
        user_id: UserId,
        /// Refund fraction applied
        refund_fraction: BasisPoints,
    },
}

impl DomainEvent {
    /// Short event name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::BookingCreated { .. } => "booking_created",
            Self::PaymentCaptured { .. } => "payment_captured",
            Self::PaymentRefunded { .. } => "payment_refunded",
            Self::BookingCancelled { .. } => "booking_cancelled",
        }
    }
}

/// Delivery failure.
#[derive(Error, Debug)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// Delivers domain events to buyers.
pub trait Notifier: Send + Sync {
    /// Delivers one event.
    ///
    /// # Errors
    ///
    /// [`NotifyError`] if delivery failed; the engine only logs it.
    fn notify(&self, event: &DomainEvent) -> Result<(), NotifyError>;
}

/// Notifier that writes events to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &DomainEvent) -> Result<(), NotifyError> {
        tracing::info!(event = event.name(), payload = ?event, "Notification");
        Ok(())
    }
}

pub(crate) fn dispatch(notifier: &dyn Notifier, event: &DomainEvent) {
    if let Err(err) = notifier.notify(event) {
        tracing::warn!(event = event.name(), error = %err, "Notification delivery failed");
        metrics::counter!("matchpoint_notifications_failed_total").increment(1);
    }
}
