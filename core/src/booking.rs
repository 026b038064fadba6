//! Booking lifecycle.
//!
//! ```text
//! pending ──► paid ──► refunded
//!    │          │
//!    │          ├────► cancelled
//!    │          └────► no_show
//!    └────► cancelled
//! ```
//!
//! `cancelled`, `refunded` and `no_show` are terminal. Every status write is conditional on
//! the status that was read, so of two concurrent cancellations exactly one succeeds and the
//! reserved places are released exactly once.

use crate::environment::Clock;
use crate::error::{Error, Result};
use crate::inventory::{InventoryLedger, UnitType};
use crate::store::BookingStore;
use crate::types::{BasisPoints, BookingId, Money, PaymentId, UnitId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Places reserved, awaiting payment
    Pending,
    /// Payment captured
    Paid,
    /// Cancelled by the buyer or by compensation
    Cancelled,
    /// Cancelled after payment with money returned
    Refunded,
    /// Buyer did not attend
    NoShow,
}

impl BookingStatus {
    /// Whether the booking can no longer change state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Refunded | Self::NoShow)
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Paid | Self::Cancelled)
                | (Self::Paid, Self::Cancelled | Self::Refunded | Self::NoShow)
        )
    }

    /// Stable lowercase name, as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::NoShow => "no_show",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A buyer's reservation of places on one unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking identifier
    pub id: BookingId,
    /// Owner
    pub user_id: UserId,
    /// Reserved unit
    pub unit_id: UnitId,
    /// Product tag of the unit
    pub unit_type: UnitType,
    /// Places reserved
    pub quantity: u32,
    /// Price of one place
    pub unit_price: Money,
    /// `unit_price * quantity`
    pub total: Money,
    /// Payment that settled the booking
    pub payment_id: Option<PaymentId>,
    /// Lifecycle state
    pub status: BookingStatus,
    /// Arrival at the venue
    pub check_in_at: Option<DateTime<Utc>>,
    /// Departure from the venue
    pub check_out_at: Option<DateTime<Utc>>,
    /// Creation time; the refund window is measured from here
    pub created_at: DateTime<Utc>,
    /// Last modification
    pub updated_at: DateTime<Utc>,
    /// Soft-deletion timestamp
    pub deleted_at: Option<DateTime<Utc>>,
    /// Revision, bumped on every stored change; writes are conditional on it
    pub version: u32,
}

impl Booking {
    /// Moves to `next`, stamping `updated_at`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] if the lifecycle forbids it.
    pub fn transition(&mut self, next: BookingStatus, at: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }

    /// The paid version of this booking, as persisted by a payment capture.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTransition`] unless the booking is pending.
    pub fn paid(&self, payment_id: PaymentId, at: DateTime<Utc>) -> Result<Self> {
        let mut paid = self.clone();
        paid.transition(BookingStatus::Paid, at)?;
        paid.payment_id = Some(payment_id);
        paid.version = self.version.wrapping_add(1);
        Ok(paid)
    }

    /// Checks `total == unit_price * quantity`.
    #[must_use]
    pub fn total_is_consistent(&self) -> bool {
        self.unit_price.checked_mul(self.quantity) == Some(self.total)
    }
}

/// Input for [`BookingMachine::create`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    /// Buyer
    pub user_id: UserId,
    /// Unit to reserve
    pub unit_id: UnitId,
    /// Product tag the buyer believes the unit has
    pub unit_type: UnitType,
    /// Places requested
    pub quantity: u32,
    /// Price of one place
    pub unit_price: Money,
}

/// Result of a successful cancellation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cancellation {
    /// The booking in its terminal state
    pub booking: Booking,
    /// Fraction of the total owed back to the buyer
    pub refund_fraction: BasisPoints,
}

/// Drives bookings through their lifecycle.
pub struct BookingMachine {
    store: Arc<dyn BookingStore>,
    ledger: Arc<InventoryLedger>,
    clock: Arc<dyn Clock>,
}

impl BookingMachine {
    /// Creates the machine.
    #[must_use]
    pub fn new(
        store: Arc<dyn BookingStore>,
        ledger: Arc<InventoryLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
        }
    }

    /// Reserves places and records a pending booking.
    ///
    /// If the booking cannot be recorded the reservation is released again.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] on zero quantity, overflow, or a product tag that does not match
    ///   the unit
    /// - any error of [`InventoryLedger::reserve`]
    pub async fn create(&self, request: NewBooking) -> Result<Booking> {
        if request.quantity == 0 {
            return Err(Error::Validation("quantity must be at least 1".to_string()));
        }
        let total = request
            .unit_price
            .checked_mul(request.quantity)
            .ok_or_else(|| Error::Validation("booking total overflows".to_string()))?;

        let unit = self.ledger.unit(request.unit_id).await?;
        if unit.unit_type() != request.unit_type {
            return Err(Error::Validation(format!(
                "unit {} is a {}, not a {}",
                unit.id,
                unit.unit_type(),
                request.unit_type
            )));
        }

        self.ledger.reserve(request.unit_id, request.quantity).await?;

        let now = self.clock.now();
        let booking = Booking {
            id: BookingId::new(),
            user_id: request.user_id,
            unit_id: request.unit_id,
            unit_type: request.unit_type,
            quantity: request.quantity,
            unit_price: request.unit_price,
            total,
            payment_id: None,
            status: BookingStatus::Pending,
            check_in_at: None,
            check_out_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            version: 1,
        };

        if let Err(err) = self.store.insert_booking(&booking).await {
            tracing::error!(
                unit_id = %booking.unit_id,
                quantity = booking.quantity,
                error = %err,
                "Failed to record booking, releasing reservation"
            );
            if let Err(release_err) = self.ledger.release(booking.unit_id, booking.quantity).await {
                tracing::error!(
                    unit_id = %booking.unit_id,
                    error = %release_err,
                    "Compensating release failed"
                );
            }
            return Err(err.into());
        }

        tracing::info!(
            booking_id = %booking.id,
            user_id = %booking.user_id,
            unit_id = %booking.unit_id,
            quantity = booking.quantity,
            total = %booking.total,
            "Booking created"
        );
        metrics::counter!("matchpoint_bookings_created_total", "unit_type" => booking.unit_type.as_str())
            .increment(1);

        Ok(booking)
    }

    /// Loads a booking.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if it does not exist.
    pub async fn get(&self, booking_id: BookingId) -> Result<Booking> {
        self.store
            .load_booking(booking_id)
            .await?
            .ok_or_else(|| Error::not_found("booking", booking_id))
    }

    /// Bookings owned by a user, newest first.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] if the backend fails.
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Booking>> {
        Ok(self.store.bookings_for_user(user_id).await?)
    }

    /// Moves a pending booking to paid.
    ///
    /// Payment capture persists the same change atomically with the payment through
    /// [`Booking::paid`]; this entry point exists for payments settled outside the gateway.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the booking does not exist
    /// - [`Error::InvalidTransition`] unless the booking is pending
    pub async fn mark_paid(&self, booking_id: BookingId, payment_id: PaymentId) -> Result<Booking> {
        let booking = self.get(booking_id).await?;
        let mut paid = booking.paid(payment_id, self.clock.now())?;
        self.commit(&mut paid, &booking).await?;
        tracing::info!(booking_id = %booking_id, payment_id = %payment_id, "Booking marked paid");
        Ok(paid)
    }

    /// The refund fraction a cancellation at `now` would receive.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if the booking is already cancelled or refunded
    /// - [`Error::InvalidTransition`] if it is otherwise terminal
    /// - [`Error::RefundNotAllowed`] if the window has elapsed
    pub async fn quote_cancellation(
        &self,
        booking: &Booking,
        now: DateTime<Utc>,
    ) -> Result<BasisPoints> {
        match booking.status {
            BookingStatus::Cancelled | BookingStatus::Refunded => {
                return Err(Error::Validation("booking already cancelled".to_string()));
            }
            BookingStatus::NoShow => {
                return Err(Error::InvalidTransition {
                    from: booking.status,
                    to: BookingStatus::Cancelled,
                });
            }
            BookingStatus::Pending | BookingStatus::Paid => {}
        }

        let rule = self.ledger.unit(booking.unit_id).await?.refund_rule;
        let fraction = rule.evaluate(booking.created_at, now);
        if fraction.is_zero() {
            tracing::info!(
                booking_id = %booking.id,
                window_hours = rule.cancel_window_hours,
                "Cancellation refused: window expired"
            );
            return Err(Error::RefundNotAllowed {
                window_hours: rule.cancel_window_hours,
            });
        }
        Ok(fraction)
    }

    /// Cancels a booking under its unit's refund rule and releases its places.
    ///
    /// # Errors
    ///
    /// See [`Self::quote_cancellation`]. A cancellation that loses a race with another
    /// cancellation reports [`Error::Validation`].
    pub async fn cancel(&self, booking_id: BookingId) -> Result<Cancellation> {
        self.cancel_at(booking_id, self.clock.now(), BookingStatus::Cancelled)
            .await
    }

    /// Cancels into `terminal` (`Cancelled` or `Refunded`) as of `now`.
    pub(crate) async fn cancel_at(
        &self,
        booking_id: BookingId,
        now: DateTime<Utc>,
        terminal: BookingStatus,
    ) -> Result<Cancellation> {
        let booking = self.get(booking_id).await?;
        let refund_fraction = self.quote_cancellation(&booking, now).await?;

        let mut next = booking.clone();
        next.transition(terminal, now)?;
        self.commit(&mut next, &booking).await?;

        if let Err(err) = self.ledger.release(booking.unit_id, booking.quantity).await {
            tracing::error!(
                target: "reconciliation",
                booking_id = %booking_id,
                unit_id = %booking.unit_id,
                quantity = booking.quantity,
                error = %err,
                "Booking cancelled but its places were not released"
            );
            return Err(err);
        }

        tracing::info!(
            booking_id = %booking_id,
            status = %terminal,
            refund_fraction = %refund_fraction,
            "Booking cancelled"
        );
        metrics::counter!("matchpoint_bookings_cancelled_total", "status" => terminal.as_str())
            .increment(1);

        Ok(Cancellation {
            booking: next,
            refund_fraction,
        })
    }

    /// Cancels a pending booking without applying the refund rule. Used when the payment intent
    /// for a freshly created booking cannot be recorded.
    pub(crate) async fn abandon(&self, booking_id: BookingId) -> Result<Booking> {
        let booking = self.get(booking_id).await?;
        let mut next = booking.clone();
        next.transition(BookingStatus::Cancelled, self.clock.now())?;
        self.commit(&mut next, &booking).await?;
        self.ledger.release(booking.unit_id, booking.quantity).await?;
        tracing::warn!(booking_id = %booking_id, "Booking abandoned");
        Ok(next)
    }

    /// Records arrival at the venue.
    ///
    /// # Errors
    ///
    /// [`Error::Conflict`] unless the booking is paid and not yet checked in.
    pub async fn check_in(&self, booking_id: BookingId) -> Result<Booking> {
        let booking = self.get(booking_id).await?;
        if booking.status != BookingStatus::Paid {
            return Err(Error::Conflict(format!(
                "check-in requires a paid booking, booking is {}",
                booking.status
            )));
        }
        if booking.check_in_at.is_some() {
            return Err(Error::Conflict("booking already checked in".to_string()));
        }

        let now = self.clock.now();
        let mut next = booking.clone();
        next.check_in_at = Some(now);
        next.updated_at = now;
        self.commit(&mut next, &booking).await?;

        tracing::info!(booking_id = %booking_id, "Checked in");
        Ok(next)
    }

    /// Records departure from the venue.
    ///
    /// # Errors
    ///
    /// [`Error::Conflict`] unless the booking is checked in and not yet checked out.
    pub async fn check_out(&self, booking_id: BookingId) -> Result<Booking> {
        let booking = self.get(booking_id).await?;
        if booking.check_in_at.is_none() {
            return Err(Error::Conflict("booking is not checked in".to_string()));
        }
        if booking.check_out_at.is_some() {
            return Err(Error::Conflict("booking already checked out".to_string()));
        }

        let now = self.clock.now();
        let mut next = booking.clone();
        next.check_out_at = Some(now);
        next.updated_at = now;
        self.commit(&mut next, &booking).await?;

        tracing::info!(booking_id = %booking_id, "Checked out");
        Ok(next)
    }

    /// Marks a paid booking whose buyer never arrived. Places are not released.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTransition`] unless the booking is paid
    /// - [`Error::Conflict`] if the buyer already checked in
    pub async fn mark_no_show(&self, booking_id: BookingId) -> Result<Booking> {
        let booking = self.get(booking_id).await?;
        if booking.check_in_at.is_some() {
            return Err(Error::Conflict("booking already checked in".to_string()));
        }
        let mut next = booking.clone();
        next.transition(BookingStatus::NoShow, self.clock.now())?;
        self.commit(&mut next, &booking).await?;

        tracing::info!(booking_id = %booking_id, "Booking marked no-show");
        Ok(next)
    }

    /// Soft-deletes a terminal booking.
    ///
    /// # Errors
    ///
    /// [`Error::Conflict`] if the booking is still active.
    pub async fn soft_delete(&self, booking_id: BookingId) -> Result<Booking> {
        let booking = self.get(booking_id).await?;
        if !booking.status.is_terminal() {
            return Err(Error::Conflict(format!(
                "cannot delete a {} booking",
                booking.status
            )));
        }
        if booking.deleted_at.is_some() {
            return Ok(booking);
        }
        let now = self.clock.now();
        let mut next = booking.clone();
        next.deleted_at = Some(now);
        next.updated_at = now;
        self.commit(&mut next, &booking).await?;
        Ok(next)
    }

    /// Stores `next` if the booking is still at `read`'s version.
    async fn commit(&self, next: &mut Booking, read: &Booking) -> Result<()> {
        next.version = read.version.wrapping_add(1);
        if self.store.replace_booking(next, read.version).await? {
            return Ok(());
        }

        let expected = read.status;
        let current = self.get(next.id).await?;
        tracing::debug!(
            booking_id = %next.id,
            expected = %expected,
            actual = %current.status,
            read_version = read.version,
            stored_version = current.version,
            "Booking changed concurrently"
        );
        match current.status {
            BookingStatus::Cancelled | BookingStatus::Refunded
                if matches!(next.status, BookingStatus::Cancelled | BookingStatus::Refunded) =>
            {
                Err(Error::Validation("booking already cancelled".to_string()))
            }
            status if status != expected => Err(Error::InvalidTransition {
                from: status,
                to: next.status,
            }),
            _ => Err(Error::Conflict("booking changed concurrently".to_string())),
        }
    }
}
