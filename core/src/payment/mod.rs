//! Payment gateway adapter.
//!
//! Owns payment intents and their capture and refund through the external provider.
//!
//! # Capture Protocol
//!
//! 1. The payment must be `pending`; anything else is a conflict and the provider is not
//!    called.
//! 2. The charge is submitted with the caller's idempotency key (or `capture-{payment_id}`),
//!    retried on transient errors with the same key.
//! 3. On success the captured payment and the paid booking are committed together. If that
//!    commit does not happen the buyer has been charged without a local record; the adapter
//!    reports [`Error::CaptureInconsistent`] and logs to the `reconciliation` target.
//!
//! A decline marks the payment `failed`. A transient failure leaves it `pending` so the same
//! capture can be retried.

pub mod http;
pub mod provider;
pub mod retry;

pub use provider::{
    Charge, ChargeRequest, PaymentDetails, PaymentMethod, PaymentProvider, ProviderError,
    ProviderFuture, RefundReceipt, RefundRequest,
};
pub use retry::RetryPolicy;

use crate::booking::{Booking, BookingMachine, BookingStatus};
use crate::environment::Clock;
use crate::error::{Error, Result};
use crate::store::PaymentStore;
use crate::types::{BasisPoints, BookingId, Money, PaymentId, UserId};
use chrono::{DateTime, Utc};
use retry::call_with_retry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Intent recorded, nothing charged
    Pending,
    /// Charged
    Captured,
    /// Money returned, or intent voided
    Refunded,
    /// Charge declined
    Failed,
}

impl PaymentStatus {
    /// Stable lowercase name, as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Captured => "captured",
            Self::Refunded => "refunded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment for one booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment identifier
    pub id: PaymentId,
    /// Booking being paid
    pub booking_id: Option<BookingId>,
    /// Payer
    pub user_id: UserId,
    /// Amount; equals the booking total at creation
    pub amount: Money,
    /// Lifecycle state
    pub status: PaymentStatus,
    /// Provider's charge identifier, set on capture
    pub provider_ref: Option<String>,
    /// Method used at capture
    pub method: Option<PaymentMethod>,
    /// Last four card digits, for receipts
    pub card_last_four: Option<String>,
    /// Amount returned by the refund
    pub refunded_amount: Option<Money>,
    /// Last provider diagnostic for a failed payment
    pub failure_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification
    pub updated_at: DateTime<Utc>,
    /// Capture time; settlement batches select on this
    pub captured_at: Option<DateTime<Utc>>,
    /// Refund time
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// A new pending intent.
    #[must_use]
    pub fn pending(
        booking_id: BookingId,
        user_id: UserId,
        amount: Money,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            booking_id: Some(booking_id),
            user_id,
            amount,
            status: PaymentStatus::Pending,
            provider_ref: None,
            method: None,
            card_last_four: None,
            refunded_amount: None,
            failure_reason: None,
            created_at: at,
            updated_at: at,
            captured_at: None,
            refunded_at: None,
        }
    }
}

/// Result of a refund.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefundOutcome {
    /// The refunded payment
    pub payment: Payment,
    /// Amount returned to the buyer; zero when an uncaptured intent was voided
    pub amount: Money,
}

/// Adapter between the engine and the payment provider.
pub struct PaymentGateway {
    store: Arc<dyn PaymentStore>,
    bookings: Arc<BookingMachine>,
    provider: Arc<dyn PaymentProvider>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    currency: String,
}

impl PaymentGateway {
    /// Creates the adapter.
    #[must_use]
    pub fn new(
        store: Arc<dyn PaymentStore>,
        bookings: Arc<BookingMachine>,
        provider: Arc<dyn PaymentProvider>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bookings,
            provider,
            clock,
            policy,
            currency: currency.into(),
        }
    }

    /// Records a pending payment intent for a booking.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the booking does not exist
    /// - [`Error::Forbidden`] if `user_id` does not own it
    /// - [`Error::Validation`] if `total` differs from the booking total
    /// - [`Error::Conflict`] if the booking is not pending or already has an active payment
    pub async fn create_intent(
        &self,
        user_id: UserId,
        booking_id: BookingId,
        total: Money,
    ) -> Result<Payment> {
        let booking = self.bookings.get(booking_id).await?;
        if booking.user_id != user_id {
            return Err(Error::Forbidden(format!(
                "booking {booking_id} belongs to another user"
            )));
        }
        if booking.status != BookingStatus::Pending {
            return Err(Error::Conflict(format!(
                "booking {booking_id} is {}, not pending",
                booking.status
            )));
        }
        if total != booking.total {
            return Err(Error::Validation(format!(
                "payment total {total} does not match booking total {}",
                booking.total
            )));
        }

        let payment = Payment::pending(booking_id, user_id, total, self.clock.now());
        if !self.store.insert_payment(&payment).await? {
            return Err(Error::Conflict(format!(
                "booking {booking_id} already has an active payment"
            )));
        }

        tracing::info!(
            payment_id = %payment.id,
            booking_id = %booking_id,
            amount = %total,
            "Payment intent created"
        );
        Ok(payment)
    }

    /// Loads a payment.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if it does not exist.
    pub async fn get(&self, payment_id: PaymentId) -> Result<Payment> {
        self.store
            .load_payment(payment_id)
            .await?
            .ok_or_else(|| Error::not_found("payment", payment_id))
    }

    /// The booking's payment that has not failed.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if there is none.
    pub async fn active_for_booking(&self, booking_id: BookingId) -> Result<Payment> {
        self.store
            .active_payment_for_booking(booking_id)
            .await?
            .ok_or_else(|| Error::not_found("payment for booking", booking_id))
    }

    /// Captures a pending payment and marks its booking paid.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if the credentials are malformed
    /// - [`Error::Conflict`] if the payment is not pending
    /// - [`Error::PaymentFailed`] if the provider declines or cannot be reached
    /// - [`Error::CaptureInconsistent`] if the buyer was charged but nothing was committed
    pub async fn capture(
        &self,
        payment_id: PaymentId,
        details: PaymentDetails,
        idempotency_key: Option<String>,
    ) -> Result<Payment> {
        details.validate().map_err(Error::Validation)?;

        let payment = self.get(payment_id).await?;
        if payment.status != PaymentStatus::Pending {
            return Err(Error::Conflict(format!(
                "payment {payment_id} already processed ({})",
                payment.status
            )));
        }

        let booking = match payment.booking_id {
            Some(booking_id) => Some(self.bookings.get(booking_id).await?),
            None => None,
        };
        if let Some(booking) = &booking {
            if booking.status != BookingStatus::Pending {
                return Err(Error::Conflict(format!(
                    "booking {} is {}, not pending",
                    booking.id, booking.status
                )));
            }
        }

        let request = ChargeRequest {
            payment_id,
            amount: payment.amount,
            currency: self.currency.clone(),
            details,
            idempotency_key: idempotency_key.unwrap_or_else(|| format!("capture-{payment_id}")),
        };

        let charge = match call_with_retry(&self.policy, "charge", || self.provider.charge(&request)).await
        {
            Ok(charge) => charge,
            Err(err) => return Err(self.record_failure(payment, err).await),
        };

        let now = self.clock.now();
        let mut captured = payment.clone();
        captured.status = PaymentStatus::Captured;
        captured.provider_ref = Some(charge.provider_ref.clone());
        captured.method = Some(request.details.method());
        captured.card_last_four = request.details.last_four();
        captured.captured_at = Some(now);
        captured.updated_at = now;

        let paid: Option<Booking> = match &booking {
            Some(booking) => match booking.paid(payment_id, now) {
                Ok(paid) => Some(paid),
                Err(_) => return Err(self.inconsistent(&captured, &charge.provider_ref, "booking not pending")),
            },
            None => None,
        };

        match self.store.commit_capture(&captured, paid.as_ref()).await {
            Ok(true) => {
                tracing::info!(
                    payment_id = %payment_id,
                    booking_id = ?captured.booking_id,
                    provider_ref = %charge.provider_ref,
                    amount = %captured.amount,
                    "Payment captured"
                );
                metrics::counter!("matchpoint_payments_captured_total", "method" => request.details.method().as_str())
                    .increment(1);
                metrics::counter!("matchpoint_payment_revenue_cents_total").increment(captured.amount.cents());
                Ok(captured)
            }
            Ok(false) => {
                // A concurrent capture with the same key may have committed the same charge.
                if let Ok(current) = self.get(payment_id).await {
                    if current.status == PaymentStatus::Captured
                        && current.provider_ref.as_deref() == Some(charge.provider_ref.as_str())
                    {
                        return Err(Error::Conflict(format!(
                            "payment {payment_id} already processed (captured)"
                        )));
                    }
                }
                Err(self.inconsistent(&captured, &charge.provider_ref, "state changed before commit"))
            }
            Err(err) => Err(self.inconsistent(&captured, &charge.provider_ref, &err.to_string())),
        }
    }

    /// Refunds `fraction` of a payment.
    ///
    /// A captured payment is refunded through the provider; a pending intent is voided
    /// locally with nothing returned.
    ///
    /// # Errors
    ///
    /// - [`Error::Conflict`] if the payment is already refunded or failed
    /// - [`Error::PaymentFailed`] if the provider refuses the refund
    pub async fn refund(&self, payment_id: PaymentId, fraction: BasisPoints) -> Result<RefundOutcome> {
        let payment = self.get(payment_id).await?;

        let amount = match (payment.status, payment.provider_ref.as_deref()) {
            (PaymentStatus::Captured, Some(provider_ref)) => {
                let amount = payment.amount.rounded_portion(fraction);
                if !amount.is_zero() {
                    let request = RefundRequest {
                        payment_id,
                        provider_ref: provider_ref.to_string(),
                        amount,
                        idempotency_key: format!("refund-{payment_id}"),
                    };
                    if let Err(err) =
                        call_with_retry(&self.policy, "refund", || self.provider.refund(&request)).await
                    {
                        tracing::warn!(
                            payment_id = %payment_id,
                            provider_ref = %provider_ref,
                            error = %err,
                            "Refund rejected by provider"
                        );
                        return Err(Error::PaymentFailed {
                            payment_id,
                            provider_ref: Some(provider_ref.to_string()),
                            retryable: err.is_retryable(),
                            diagnostic: err.to_string(),
                        });
                    }
                }
                amount
            }
            (PaymentStatus::Pending | PaymentStatus::Captured, _) => Money::ZERO,
            (PaymentStatus::Refunded, _) => {
                return Err(Error::Conflict(format!("payment {payment_id} already refunded")));
            }
            (PaymentStatus::Failed, _) => {
                return Err(Error::Conflict(format!(
                    "payment {payment_id} failed; nothing to refund"
                )));
            }
        };

        let now = self.clock.now();
        let mut refunded = payment.clone();
        refunded.status = PaymentStatus::Refunded;
        refunded.refunded_amount = Some(amount);
        refunded.refunded_at = Some(now);
        refunded.updated_at = now;

        if !self.store.replace_payment(&refunded, payment.status).await? {
            return Err(Error::Conflict(format!("payment {payment_id} changed concurrently")));
        }

        tracing::info!(
            payment_id = %payment_id,
            amount = %amount,
            fraction = %fraction,
            "Payment refunded"
        );
        metrics::counter!("matchpoint_payments_refunded_total").increment(1);
        metrics::counter!("matchpoint_refunds_cents_total").increment(amount.cents());

        Ok(RefundOutcome {
            payment: refunded,
            amount,
        })
    }

    async fn record_failure(&self, payment: Payment, err: ProviderError) -> Error {
        let retryable = err.is_retryable();
        tracing::warn!(
            payment_id = %payment.id,
            booking_id = ?payment.booking_id,
            provider_ref = payment.provider_ref.as_deref().unwrap_or("none"),
            retryable,
            error = %err,
            "Payment capture failed"
        );
        metrics::counter!("matchpoint_payments_failed_total", "retryable" => if retryable { "true" } else { "false" })
            .increment(1);

        if !retryable {
            let mut failed = payment.clone();
            failed.status = PaymentStatus::Failed;
            failed.failure_reason = Some(err.to_string());
            failed.updated_at = self.clock.now();
            match self.store.replace_payment(&failed, PaymentStatus::Pending).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(payment_id = %payment.id, "Payment changed before failure was recorded");
                }
                Err(store_err) => {
                    tracing::error!(payment_id = %payment.id, error = %store_err, "Failed to record payment failure");
                }
            }
        }

        Error::PaymentFailed {
            payment_id: payment.id,
            provider_ref: payment.provider_ref,
            diagnostic: err.to_string(),
            retryable,
        }
    }

    fn inconsistent(&self, captured: &Payment, provider_ref: &str, cause: &str) -> Error {
        tracing::error!(
            target: "reconciliation",
            payment_id = %captured.id,
            booking_id = ?captured.booking_id,
            user_id = %captured.user_id,
            provider_ref,
            amount = %captured.amount,
            currency = %self.currency,
            cause,
            "Charge succeeded at provider but was not committed"
        );
        metrics::counter!("matchpoint_capture_inconsistencies_total").increment(1);
        Error::CaptureInconsistent {
            payment_id: captured.id,
            booking_id: captured.booking_id,
            provider_ref: provider_ref.to_string(),
        }
    }
}
