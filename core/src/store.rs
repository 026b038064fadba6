//! Storage abstractions for the engine.
//!
//! The engine never assumes a particular database. Each aggregate has a small storage trait
//! whose mutating operations are *conditional*: they apply only when the stored record still
//! matches what the caller read, and report `false` otherwise. That is the single primitive
//! the optimistic-concurrency design relies on, and every backend must implement it
//! atomically (a guarded `UPDATE ... WHERE`, a versioned row, or a lock held for the
//! duration of the comparison).
//!
//! # Implementations
//!
//! - `PgStore` (in `matchpoint-postgres`): production storage
//! - `InMemoryStore` (in `matchpoint-testing`): fast, deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return [`StoreFuture`] instead of using `async fn` so the traits can be used as
//! `Arc<dyn Trait>` by the services that share one storage handle.

use crate::booking::Booking;
use crate::inventory::{InventoryUnit, UnitState};
use crate::payment::{Payment, PaymentStatus};
use crate::settlement::Settlement;
use crate::types::{BookingId, PaymentId, SettlementId, UnitId, UserId};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by storage operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur in a storage backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database driver error.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored value could not be decoded into a domain type.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The backend is unreachable or shutting down.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Inventory unit persistence.
pub trait InventoryStore: Send + Sync {
    /// Insert a new unit. Returns `false` if a unit with the same id exists.
    fn insert_unit(&self, unit: &InventoryUnit) -> StoreFuture<'_, bool>;

    /// Load a unit, including soft-deleted ones.
    fn load_unit(&self, id: UnitId) -> StoreFuture<'_, Option<InventoryUnit>>;

    /// Replace `(available, status)` only if the stored pair equals `expected`.
    ///
    /// This is the compare-and-swap every capacity change goes through.
    fn swap_unit_state(
        &self,
        id: UnitId,
        expected: UnitState,
        next: UnitState,
    ) -> StoreFuture<'_, bool>;

    /// Stamp `deleted_at` and close the unit. Returns `false` if the unit does not exist.
    fn retire_unit(&self, id: UnitId, at: DateTime<Utc>) -> StoreFuture<'_, bool>;
}

/// Booking persistence.
pub trait BookingStore: Send + Sync {
    /// Insert a new booking.
    fn insert_booking(&self, booking: &Booking) -> StoreFuture<'_, ()>;

    /// Load a booking by id.
    fn load_booking(&self, id: BookingId) -> StoreFuture<'_, Option<Booking>>;

    /// All bookings owned by a user, newest first.
    fn bookings_for_user(&self, user_id: UserId) -> StoreFuture<'_, Vec<Booking>>;

    /// Overwrite the stored booking only if its stored version is still `expected_version`.
    ///
    /// `booking.version` is the new revision. A writer holding a stale snapshot gets `false`
    /// even when the status did not change.
    fn replace_booking(&self, booking: &Booking, expected_version: u32) -> StoreFuture<'_, bool>;
}

/// Payment persistence.
pub trait PaymentStore: Send + Sync {
    /// Insert a payment intent. Returns `false` when the booking already has a payment that
    /// is not `failed`.
    fn insert_payment(&self, payment: &Payment) -> StoreFuture<'_, bool>;

    /// Load a payment by id.
    fn load_payment(&self, id: PaymentId) -> StoreFuture<'_, Option<Payment>>;

    /// The booking's payment that is not `failed`, if any.
    fn active_payment_for_booking(&self, booking_id: BookingId)
    -> StoreFuture<'_, Option<Payment>>;

    /// Overwrite the stored payment only if its stored status is still `expected`.
    fn replace_payment(
        &self,
        payment: &Payment,
        expected: PaymentStatus,
    ) -> StoreFuture<'_, bool>;

    /// Atomically persist a captured payment together with its paid booking.
    ///
    /// Applies both writes only if the stored payment is `pending` and the stored booking
    /// (when given) is `pending` at the revision just before `booking.version`; otherwise
    /// applies neither and returns `false`.
    fn commit_capture(&self, payment: &Payment, booking: Option<&Booking>)
    -> StoreFuture<'_, bool>;

    /// Payments currently `captured` whose capture time lies in `[from, to]`.
    fn captured_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<Payment>>;
}

/// Settlement persistence.
pub trait SettlementStore: Send + Sync {
    /// Insert a settlement. Returns `false` if the payment already has one.
    fn insert_settlement(&self, settlement: &Settlement) -> StoreFuture<'_, bool>;

    /// The settlement recorded for a payment.
    fn settlement_for_payment(&self, payment_id: PaymentId)
    -> StoreFuture<'_, Option<Settlement>>;

    /// Flip `settled` from false to true. Returns `false` if it was already settled or
    /// does not exist.
    fn mark_settled(&self, id: SettlementId, at: DateTime<Utc>) -> StoreFuture<'_, bool>;
}

/// A backend that stores every aggregate. Blanket-implemented.
pub trait Repository: InventoryStore + BookingStore + PaymentStore + SettlementStore {}

impl<T> Repository for T where T: InventoryStore + BookingStore + PaymentStore + SettlementStore {}
