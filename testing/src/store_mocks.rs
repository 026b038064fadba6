//! In-memory storage for fast, deterministic tests.
//!
//! All aggregates live behind one lock, so every conditional write (and the two-record
//! capture commit) is trivially atomic. Faults can be injected to exercise compensation and
//! reconciliation paths.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test panicked

use chrono::{DateTime, Utc};
use matchpoint_core::booking::{Booking, BookingStatus};
use matchpoint_core::inventory::{InventoryUnit, UnitState, UnitStatus};
use matchpoint_core::payment::{Payment, PaymentStatus};
use matchpoint_core::settlement::Settlement;
use matchpoint_core::store::{
    BookingStore, InventoryStore, PaymentStore, SettlementStore, StoreError, StoreFuture,
};
use matchpoint_core::types::{BookingId, PaymentId, SettlementId, UnitId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct Tables {
    units: HashMap<UnitId, InventoryUnit>,
    bookings: HashMap<BookingId, Booking>,
    payments: HashMap<PaymentId, Payment>,
    settlements: HashMap<SettlementId, Settlement>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_booking_insert: AtomicBool,
    fail_next_capture_commit: AtomicBool,
    fail_next_unit_swap: AtomicBool,
    unit_swaps: AtomicUsize,
}

/// In-memory implementation of every storage trait.
///
/// # Example
///
/// ```
/// use matchpoint_testing::{InMemoryStore, fixtures};
/// use matchpoint_core::store::InventoryStore;
///
/// # async fn example() {
/// let store = InMemoryStore::new();
/// let unit = fixtures::time_slot(4);
/// assert!(store.insert_unit(&unit).await.unwrap_or(false));
/// assert_eq!(store.unit_count(), 1);
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    faults: Arc<Faults>,
}

impl InMemoryStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored units
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.tables.read().unwrap().units.len()
    }

    /// Number of stored bookings
    #[must_use]
    pub fn booking_count(&self) -> usize {
        self.tables.read().unwrap().bookings.len()
    }

    /// Number of stored payments
    #[must_use]
    pub fn payment_count(&self) -> usize {
        self.tables.read().unwrap().payments.len()
    }

    /// Successful availability swaps so far
    #[must_use]
    pub fn unit_swaps(&self) -> usize {
        self.faults.unit_swaps.load(Ordering::SeqCst)
    }

    /// Make the next booking insert fail with a database error
    pub fn fail_next_booking_insert(&self) {
        self.faults
            .fail_next_booking_insert
            .store(true, Ordering::SeqCst);
    }

    /// Make the next availability swap fail with a database error
    pub fn fail_next_unit_swap(&self) {
        self.faults.fail_next_unit_swap.store(true, Ordering::SeqCst);
    }

    /// Make the next capture commit fail with a database error
    pub fn fail_next_capture_commit(&self) {
        self.faults
            .fail_next_capture_commit
            .store(true, Ordering::SeqCst);
    }

    fn take_fault(flag: &AtomicBool) -> bool {
        flag.swap(false, Ordering::SeqCst)
    }
}

impl InventoryStore for InMemoryStore {
    fn insert_unit(&self, unit: &InventoryUnit) -> StoreFuture<'_, bool> {
        let unit = unit.clone();
        Box::pin(async move {
            let mut tables = self.tables.write().unwrap();
            if tables.units.contains_key(&unit.id) {
                return Ok(false);
            }
            tables.units.insert(unit.id, unit);
            Ok(true)
        })
    }

    fn load_unit(&self, id: UnitId) -> StoreFuture<'_, Option<InventoryUnit>> {
        Box::pin(async move { Ok(self.tables.read().unwrap().units.get(&id).cloned()) })
    }

    fn swap_unit_state(
        &self,
        id: UnitId,
        expected: UnitState,
        next: UnitState,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            if Self::take_fault(&self.faults.fail_next_unit_swap) {
                return Err(StoreError::Unavailable("injected swap failure".to_string()));
            }
            let mut tables = self.tables.write().unwrap();
            let Some(unit) = tables.units.get_mut(&id) else {
                return Ok(false);
            };
            if unit.state() != expected {
                return Ok(false);
            }
            unit.available = next.available;
            unit.status = next.status;
            self.faults.unit_swaps.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
    }

    fn retire_unit(&self, id: UnitId, at: DateTime<Utc>) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut tables = self.tables.write().unwrap();
            let Some(unit) = tables.units.get_mut(&id) else {
                return Ok(false);
            };
            unit.deleted_at = Some(at);
            unit.status = UnitStatus::Closed;
            Ok(true)
        })
    }
}

impl BookingStore for InMemoryStore {
    fn insert_booking(&self, booking: &Booking) -> StoreFuture<'_, ()> {
        let booking = booking.clone();
        Box::pin(async move {
            if Self::take_fault(&self.faults.fail_next_booking_insert) {
                return Err(StoreError::Database("injected booking insert failure".to_string()));
            }
            self.tables
                .write()
                .unwrap()
                .bookings
                .insert(booking.id, booking);
            Ok(())
        })
    }

    fn load_booking(&self, id: BookingId) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move { Ok(self.tables.read().unwrap().bookings.get(&id).cloned()) })
    }

    fn bookings_for_user(&self, user_id: UserId) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            let tables = self.tables.read().unwrap();
            let mut bookings: Vec<Booking> = tables
                .bookings
                .values()
                .filter(|b| b.user_id == user_id && b.deleted_at.is_none())
                .cloned()
                .collect();
            bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(bookings)
        })
    }

    fn replace_booking(&self, booking: &Booking, expected_version: u32) -> StoreFuture<'_, bool> {
        let booking = booking.clone();
        Box::pin(async move {
            let mut tables = self.tables.write().unwrap();
            match tables.bookings.get_mut(&booking.id) {
                Some(stored) if stored.version == expected_version => {
                    *stored = booking;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }
}

impl PaymentStore for InMemoryStore {
    fn insert_payment(&self, payment: &Payment) -> StoreFuture<'_, bool> {
        let payment = payment.clone();
        Box::pin(async move {
            let mut tables = self.tables.write().unwrap();
            let taken = payment.booking_id.is_some()
                && tables.payments.values().any(|p| {
                    p.booking_id == payment.booking_id && p.status != PaymentStatus::Failed
                });
            if taken || tables.payments.contains_key(&payment.id) {
                return Ok(false);
            }
            tables.payments.insert(payment.id, payment);
            Ok(true)
        })
    }

    fn load_payment(&self, id: PaymentId) -> StoreFuture<'_, Option<Payment>> {
        Box::pin(async move { Ok(self.tables.read().unwrap().payments.get(&id).cloned()) })
    }

    fn active_payment_for_booking(
        &self,
        booking_id: BookingId,
    ) -> StoreFuture<'_, Option<Payment>> {
        Box::pin(async move {
            Ok(self
                .tables
                .read()
                .unwrap()
                .payments
                .values()
                .find(|p| p.booking_id == Some(booking_id) && p.status != PaymentStatus::Failed)
                .cloned())
        })
    }

    fn replace_payment(
        &self,
        payment: &Payment,
        expected: PaymentStatus,
    ) -> StoreFuture<'_, bool> {
        let payment = payment.clone();
        Box::pin(async move {
            let mut tables = self.tables.write().unwrap();
            match tables.payments.get_mut(&payment.id) {
                Some(stored) if stored.status == expected => {
                    *stored = payment;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn commit_capture(
        &self,
        payment: &Payment,
        booking: Option<&Booking>,
    ) -> StoreFuture<'_, bool> {
        let payment = payment.clone();
        let booking = booking.cloned();
        Box::pin(async move {
            if Self::take_fault(&self.faults.fail_next_capture_commit) {
                return Err(StoreError::Unavailable("injected commit failure".to_string()));
            }
            let mut tables = self.tables.write().unwrap();

            let payment_pending = tables
                .payments
                .get(&payment.id)
                .is_some_and(|p| p.status == PaymentStatus::Pending);
            let booking_pending = booking.as_ref().is_none_or(|b| {
                tables
                    .bookings
                    .get(&b.id)
                    .is_some_and(|stored| {
                        stored.status == BookingStatus::Pending
                            && stored.version.wrapping_add(1) == b.version
                    })
            });
            if !payment_pending || !booking_pending {
                return Ok(false);
            }

            tables.payments.insert(payment.id, payment);
            if let Some(booking) = booking {
                tables.bookings.insert(booking.id, booking);
            }
            Ok(true)
        })
    }

    fn captured_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<Payment>> {
        Box::pin(async move {
            let tables = self.tables.read().unwrap();
            let mut payments: Vec<Payment> = tables
                .payments
                .values()
                .filter(|p| {
                    p.status == PaymentStatus::Captured
                        && p.captured_at.is_some_and(|at| at >= from && at <= to)
                })
                .cloned()
                .collect();
            payments.sort_by_key(|p| p.captured_at);
            Ok(payments)
        })
    }
}

impl SettlementStore for InMemoryStore {
    fn insert_settlement(&self, settlement: &Settlement) -> StoreFuture<'_, bool> {
        let settlement = settlement.clone();
        Box::pin(async move {
            let mut tables = self.tables.write().unwrap();
            if tables
                .settlements
                .values()
                .any(|s| s.payment_id == settlement.payment_id)
            {
                return Ok(false);
            }
            tables.settlements.insert(settlement.id, settlement);
            Ok(true)
        })
    }

    fn settlement_for_payment(
        &self,
        payment_id: PaymentId,
    ) -> StoreFuture<'_, Option<Settlement>> {
        Box::pin(async move {
            Ok(self
                .tables
                .read()
                .unwrap()
                .settlements
                .values()
                .find(|s| s.payment_id == payment_id)
                .cloned())
        })
    }

    fn mark_settled(&self, id: SettlementId, at: DateTime<Utc>) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut tables = self.tables.write().unwrap();
            match tables.settlements.get_mut(&id) {
                Some(settlement) if !settlement.settled => {
                    settlement.settled = true;
                    settlement.settled_at = Some(at);
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }
}
