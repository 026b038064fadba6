//! Engine facade.
//!
//! Wires the ledger, booking machine, payment gateway and settlement engine to one storage
//! backend and exposes the buyer-facing operations with ownership checks and notifications.
//!
//! # Example
//!
//! ```ignore
//! let engine = Engine::builder(store, provider)
//!     .clock(clock)
//!     .notifier(notifier)
//!     .config(EngineConfig::default())
//!     .build();
//!
//! let receipt = engine.book(request).await?;
//! engine.capture(user_id, receipt.payment.id, details, Some(key)).await?;
//! ```

use crate::booking::{Booking, BookingMachine, BookingStatus, NewBooking};
use crate::config::EngineConfig;
use crate::environment::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::inventory::InventoryLedger;
use crate::notify::{DomainEvent, Notifier, TracingNotifier, dispatch};
use crate::payment::{Payment, PaymentDetails, PaymentGateway, PaymentProvider, PaymentStatus};
use crate::settlement::SettlementEngine;
use crate::store::{BookingStore, InventoryStore, PaymentStore, Repository, SettlementStore};
use crate::types::{BasisPoints, BookingId, Money, PaymentId, UserId};
use serde::Serialize;
use std::sync::Arc;

/// A booking together with its payment intent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BookingReceipt {
    /// The pending booking
    pub booking: Booking,
    /// Its pending payment
    pub payment: Payment,
}

/// Result of a buyer cancellation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    /// Booking in its terminal state
    pub booking: Booking,
    /// Fraction of the total owed back
    pub refund_fraction: BasisPoints,
    /// Amount actually returned through the provider
    pub refunded_amount: Money,
}

/// The reservation and settlement engine.
pub struct Engine {
    ledger: Arc<InventoryLedger>,
    bookings: Arc<BookingMachine>,
    payments: PaymentGateway,
    settlements: SettlementEngine,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

/// Builder for [`Engine`].
pub struct EngineBuilder<S> {
    store: Arc<S>,
    provider: Arc<dyn PaymentProvider>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl<S: Repository + 'static> EngineBuilder<S> {
    /// Sets the clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the notifier.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> Engine {
        let inventory: Arc<dyn InventoryStore> = self.store.clone();
        let booking_store: Arc<dyn BookingStore> = self.store.clone();
        let payment_store: Arc<dyn PaymentStore> = self.store.clone();
        let settlement_store: Arc<dyn SettlementStore> = self.store;

        let ledger = Arc::new(InventoryLedger::new(
            inventory,
            self.clock.clone(),
            self.config.reservation_attempts,
        ));
        let bookings = Arc::new(BookingMachine::new(
            booking_store,
            ledger.clone(),
            self.clock.clone(),
        ));
        let payments = PaymentGateway::new(
            payment_store.clone(),
            bookings.clone(),
            self.provider,
            self.clock.clone(),
            self.config.provider_policy,
            self.config.currency,
        );
        let settlements = SettlementEngine::new(
            payment_store,
            settlement_store,
            self.config.split,
            self.clock.clone(),
        );

        Engine {
            ledger,
            bookings,
            payments,
            settlements,
            notifier: self.notifier,
            clock: self.clock,
        }
    }
}

impl Engine {
    /// Starts building an engine over `store` and `provider`.
    #[must_use]
    pub fn builder<S: Repository + 'static>(
        store: Arc<S>,
        provider: Arc<dyn PaymentProvider>,
    ) -> EngineBuilder<S> {
        EngineBuilder {
            store,
            provider,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(TracingNotifier),
            config: EngineConfig::default(),
        }
    }

    /// The inventory ledger.
    #[must_use]
    pub fn ledger(&self) -> &InventoryLedger {
        &self.ledger
    }

    /// The booking state machine.
    #[must_use]
    pub fn bookings(&self) -> &BookingMachine {
        &self.bookings
    }

    /// The payment gateway adapter.
    #[must_use]
    pub const fn payments(&self) -> &PaymentGateway {
        &self.payments
    }

    /// The settlement engine.
    #[must_use]
    pub const fn settlements(&self) -> &SettlementEngine {
        &self.settlements
    }

    /// Reserves places, records a pending booking and its payment intent.
    ///
    /// If the intent cannot be recorded the booking is abandoned and its places released.
    ///
    /// # Errors
    ///
    /// Any error of [`BookingMachine::create`] or [`PaymentGateway::create_intent`].
    pub async fn book(&self, request: NewBooking) -> Result<BookingReceipt> {
        let booking = self.bookings.create(request).await?;

        let payment = match self
            .payments
            .create_intent(booking.user_id, booking.id, booking.total)
            .await
        {
            Ok(payment) => payment,
            Err(err) => {
                tracing::error!(booking_id = %booking.id, error = %err, "Payment intent failed, abandoning booking");
                if let Err(abandon_err) = self.bookings.abandon(booking.id).await {
                    tracing::error!(booking_id = %booking.id, error = %abandon_err, "Failed to abandon booking");
                }
                return Err(err);
            }
        };

        dispatch(
            self.notifier.as_ref(),
            &DomainEvent::BookingCreated {
                booking_id: booking.id,
                user_id: booking.user_id,
                total: booking.total,
            },
        );

        Ok(BookingReceipt { booking, payment })
    }

    /// A booking owned by `user_id`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if it does not exist
    /// - [`Error::Forbidden`] if another user owns it
    pub async fn booking(&self, user_id: UserId, booking_id: BookingId) -> Result<Booking> {
        let booking = self.bookings.get(booking_id).await?;
        ensure_owner(booking.user_id, user_id, "booking", booking_id)?;
        Ok(booking)
    }

    /// A payment owned by `user_id`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if it does not exist
    /// - [`Error::Forbidden`] if another user owns it
    pub async fn payment(&self, user_id: UserId, payment_id: PaymentId) -> Result<Payment> {
        let payment = self.payments.get(payment_id).await?;
        ensure_owner(payment.user_id, user_id, "payment", payment_id)?;
        Ok(payment)
    }

    /// Captures a payment owned by `user_id` and records its pending settlement.
    ///
    /// # Errors
    ///
    /// [`Error::Forbidden`] for another user's payment, otherwise see
    /// [`PaymentGateway::capture`].
    pub async fn capture(
        &self,
        user_id: UserId,
        payment_id: PaymentId,
        details: PaymentDetails,
        idempotency_key: Option<String>,
    ) -> Result<Payment> {
        self.payment(user_id, payment_id).await?;
        let payment = self.payments.capture(payment_id, details, idempotency_key).await?;

        // The capture stands even if the settlement row cannot be written; a later
        // settle_payment call records it.
        if let Err(err) = self.settlements.settle_payment(payment.id, false).await {
            tracing::error!(
                target: "reconciliation",
                payment_id = %payment.id,
                booking_id = ?payment.booking_id,
                error = %err,
                "Payment captured but its settlement was not recorded"
            );
        }

        dispatch(
            self.notifier.as_ref(),
            &DomainEvent::PaymentCaptured {
                payment_id: payment.id,
                booking_id: payment.booking_id,
                user_id: payment.user_id,
                amount: payment.amount,
            },
        );
        Ok(payment)
    }

    /// Captures the active payment of a booking owned by `user_id`.
    ///
    /// # Errors
    ///
    /// See [`Self::capture`].
    pub async fn pay_booking(
        &self,
        user_id: UserId,
        booking_id: BookingId,
        details: PaymentDetails,
        idempotency_key: Option<String>,
    ) -> Result<Payment> {
        let booking = self.booking(user_id, booking_id).await?;
        if booking.status != BookingStatus::Pending {
            return Err(Error::Conflict(format!(
                "booking {booking_id} is {}, not pending",
                booking.status
            )));
        }
        let payment = self.payments.active_for_booking(booking_id).await?;
        self.capture(user_id, payment.id, details, idempotency_key).await
    }

    /// Cancels a booking owned by `user_id` under its unit's refund rule.
    ///
    /// A paid booking is refunded through the provider first and ends `refunded`; if the
    /// provider refuses, the booking stays paid. A pending booking ends `cancelled` and its
    /// payment intent is voided.
    ///
    /// # Errors
    ///
    /// - [`Error::Forbidden`] for another user's booking
    /// - [`Error::RefundNotAllowed`] once the window has elapsed; nothing changes
    /// - [`Error::Validation`] if already cancelled
    /// - [`Error::PaymentFailed`] if the provider refuses the refund
    pub async fn cancel(&self, user_id: UserId, booking_id: BookingId) -> Result<CancelOutcome> {
        let booking = self.booking(user_id, booking_id).await?;
        let now = self.clock.now();
        let fraction = self.bookings.quote_cancellation(&booking, now).await?;

        let outcome = match booking.status {
            BookingStatus::Paid => self.cancel_paid(&booking, fraction, now).await?,
            _ => self.cancel_pending(&booking, now).await?,
        };

        dispatch(
            self.notifier.as_ref(),
            &DomainEvent::BookingCancelled {
                booking_id,
                user_id,
                refund_fraction: outcome.refund_fraction,
            },
        );
        Ok(outcome)
    }

    async fn cancel_paid(
        &self,
        booking: &Booking,
        fraction: BasisPoints,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<CancelOutcome> {
        let refunded_amount = match booking.payment_id {
            Some(payment_id) => {
                let payment = self.payments.get(payment_id).await?;
                if payment.status == PaymentStatus::Refunded {
                    // An earlier attempt refunded but did not finish the cancellation.
                    payment.refunded_amount.unwrap_or(Money::ZERO)
                } else {
                    let refund = self.payments.refund(payment_id, fraction).await?;
                    dispatch(
                        self.notifier.as_ref(),
                        &DomainEvent::PaymentRefunded {
                            payment_id,
                            user_id: booking.user_id,
                            amount: refund.amount,
                        },
                    );
                    refund.amount
                }
            }
            None => Money::ZERO,
        };

        let cancellation = self
            .bookings
            .cancel_at(booking.id, now, BookingStatus::Refunded)
            .await?;

        Ok(CancelOutcome {
            booking: cancellation.booking,
            refund_fraction: cancellation.refund_fraction,
            refunded_amount,
        })
    }

    async fn cancel_pending(
        &self,
        booking: &Booking,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<CancelOutcome> {
        let cancellation = self
            .bookings
            .cancel_at(booking.id, now, BookingStatus::Cancelled)
            .await?;

        match self.payments.active_for_booking(booking.id).await {
            Ok(payment) if payment.status == PaymentStatus::Pending => {
                if let Err(err) = self.payments.refund(payment.id, cancellation.refund_fraction).await {
                    tracing::warn!(
                        booking_id = %booking.id,
                        payment_id = %payment.id,
                        error = %err,
                        "Failed to void payment intent of cancelled booking"
                    );
                }
            }
            Ok(_) | Err(Error::NotFound { .. }) => {}
            Err(err) => {
                tracing::warn!(booking_id = %booking.id, error = %err, "Failed to look up payment intent");
            }
        }

        Ok(CancelOutcome {
            booking: cancellation.booking,
            refund_fraction: cancellation.refund_fraction,
            refunded_amount: Money::ZERO,
        })
    }

    /// Records arrival for a booking owned by `user_id`.
    ///
    /// # Errors
    ///
    /// [`Error::Forbidden`] for another user's booking, otherwise see
    /// [`BookingMachine::check_in`].
    pub async fn check_in(&self, user_id: UserId, booking_id: BookingId) -> Result<Booking> {
        self.booking(user_id, booking_id).await?;
        self.bookings.check_in(booking_id).await
    }

    /// Records departure for a booking owned by `user_id`.
    ///
    /// # Errors
    ///
    /// [`Error::Forbidden`] for another user's booking, otherwise see
    /// [`BookingMachine::check_out`].
    pub async fn check_out(&self, user_id: UserId, booking_id: BookingId) -> Result<Booking> {
        self.booking(user_id, booking_id).await?;
        self.bookings.check_out(booking_id).await
    }
}

fn ensure_owner(
    owner: UserId,
    caller: UserId,
    entity: &str,
    id: impl std::fmt::Display,
) -> Result<()> {
    if owner == caller {
        Ok(())
    } else {
        Err(Error::Forbidden(format!("{entity} {id} belongs to another user")))
    }
}
