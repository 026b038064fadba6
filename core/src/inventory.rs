//! Inventory ledger: capacity of time slots and day-use events.
//!
//! Every change to a unit's availability is a compare-and-swap against the `(available,
//! status)` pair that was read, so two buyers racing for the last place can never both win.
//! The ledger is the only writer of availability; the catalog may only open, cancel, close or
//! retire a unit, and those writes go through the same compare-and-swap.

use crate::environment::Clock;
use crate::error::{Error, Result};
use crate::refund::RefundRule;
use crate::store::InventoryStore;
use crate::types::UnitId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// What is being sold, with the data specific to each product.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnitKind {
    /// A court booked for a fixed time range.
    TimeSlot {
        /// Start of the slot
        starts_at: DateTime<Utc>,
        /// End of the slot
        ends_at: DateTime<Utc>,
    },
    /// A venue pass for one day.
    DayUseEvent {
        /// Display name of the event
        name: String,
        /// Day the pass is valid for
        date: NaiveDate,
    },
}

impl UnitKind {
    /// The product tag for this kind.
    #[must_use]
    pub const fn unit_type(&self) -> UnitType {
        match self {
            Self::TimeSlot { .. } => UnitType::TimeSlot,
            Self::DayUseEvent { .. } => UnitType::DayUse,
        }
    }
}

/// Product tag recorded on bookings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    /// Court time slot
    TimeSlot,
    /// Day-use event
    DayUse,
}

impl UnitType {
    /// Refund rule applied when the catalog does not configure one.
    #[must_use]
    pub const fn default_rule(self) -> RefundRule {
        match self {
            Self::TimeSlot => RefundRule::TIME_SLOT,
            Self::DayUse => RefundRule::DAY_USE,
        }
    }

    /// Stable lowercase name, as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TimeSlot => "time_slot",
            Self::DayUse => "day_use",
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sellability of a unit.
///
/// `Open` and `Full` are derived from availability; `Cancelled` and `Closed` are set by the
/// catalog and are never overwritten by capacity changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Has availability
    Open,
    /// Sold out
    Full,
    /// Cancelled by the venue
    Cancelled,
    /// Closed for sale
    Closed,
}

impl UnitStatus {
    /// Status after availability becomes `available`.
    #[must_use]
    pub const fn with_availability(self, available: u32) -> Self {
        match self {
            Self::Open | Self::Full => {
                if available == 0 {
                    Self::Full
                } else {
                    Self::Open
                }
            }
            other => other,
        }
    }

    /// Whether reservations may be taken.
    #[must_use]
    pub const fn is_sellable(self) -> bool {
        matches!(self, Self::Open | Self::Full)
    }

    /// Stable lowercase name, as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Full => "full",
            Self::Cancelled => "cancelled",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mutable part of a unit, swapped atomically by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnitState {
    /// Remaining places
    pub available: u32,
    /// Sellability
    pub status: UnitStatus,
}

/// A sellable unit of capacity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryUnit {
    /// Unit identifier
    pub id: UnitId,
    /// Product and its schedule
    pub kind: UnitKind,
    /// Total places
    pub capacity: u32,
    /// Remaining places; always `<= capacity`
    pub available: u32,
    /// Refund terms for bookings of this unit
    pub refund_rule: RefundRule,
    /// Sellability
    pub status: UnitStatus,
    /// When the unit was registered
    pub created_at: DateTime<Utc>,
    /// Soft-deletion timestamp
    pub deleted_at: Option<DateTime<Utc>>,
}

impl InventoryUnit {
    /// A fresh, fully available unit using the default refund rule for its kind.
    #[must_use]
    pub fn new(kind: UnitKind, capacity: u32, created_at: DateTime<Utc>) -> Self {
        let refund_rule = kind.unit_type().default_rule();
        Self {
            id: UnitId::new(),
            kind,
            capacity,
            available: capacity,
            refund_rule,
            status: UnitStatus::Open.with_availability(capacity),
            created_at,
            deleted_at: None,
        }
    }

    /// Replaces the refund rule.
    #[must_use]
    pub const fn with_refund_rule(mut self, rule: RefundRule) -> Self {
        self.refund_rule = rule;
        self
    }

    /// Product tag.
    #[must_use]
    pub const fn unit_type(&self) -> UnitType {
        self.kind.unit_type()
    }

    /// Places currently reserved.
    #[must_use]
    pub const fn reserved(&self) -> u32 {
        self.capacity.saturating_sub(self.available)
    }

    /// Current `(available, status)` pair.
    #[must_use]
    pub const fn state(&self) -> UnitState {
        UnitState {
            available: self.available,
            status: self.status,
        }
    }
}

/// A granted reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reservation {
    /// Unit the places were taken from
    pub unit_id: UnitId,
    /// Places taken
    pub quantity: u32,
    /// Availability right after the reservation
    pub available_after: u32,
}

/// Owns availability of every unit.
pub struct InventoryLedger {
    store: Arc<dyn InventoryStore>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl InventoryLedger {
    /// Creates a ledger that retries a contended reservation up to `max_attempts` times.
    #[must_use]
    pub fn new(store: Arc<dyn InventoryStore>, clock: Arc<dyn Clock>, max_attempts: u32) -> Self {
        Self {
            store,
            clock,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Registers a unit from the catalog.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] on zero capacity or availability above capacity
    /// - [`Error::Conflict`] if the id is taken
    pub async fn register(&self, mut unit: InventoryUnit) -> Result<InventoryUnit> {
        if unit.capacity == 0 {
            return Err(Error::Validation("capacity must be positive".to_string()));
        }
        if unit.available > unit.capacity {
            return Err(Error::Validation(format!(
                "available {} exceeds capacity {}",
                unit.available, unit.capacity
            )));
        }
        unit.status = unit.status.with_availability(unit.available);

        if !self.store.insert_unit(&unit).await? {
            return Err(Error::Conflict(format!("unit {} already exists", unit.id)));
        }

        tracing::info!(
            unit_id = %unit.id,
            unit_type = %unit.unit_type(),
            capacity = unit.capacity,
            "Inventory unit registered"
        );
        Ok(unit)
    }

    /// Loads a unit.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the unit does not exist.
    pub async fn unit(&self, unit_id: UnitId) -> Result<InventoryUnit> {
        self.store
            .load_unit(unit_id)
            .await?
            .ok_or_else(|| Error::not_found("unit", unit_id))
    }

    /// Remaining places on a unit.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the unit does not exist.
    pub async fn availability(&self, unit_id: UnitId) -> Result<u32> {
        Ok(self.unit(unit_id).await?.available)
    }

    /// Atomically takes `quantity` places from a unit.
    ///
    /// Lost compare-and-swap races are retried a bounded number of times; when they are
    /// exhausted the caller gets [`Error::OutOfCapacity`] rather than waiting.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if `quantity` is zero
    /// - [`Error::NotFound`] if the unit does not exist
    /// - [`Error::UnitUnavailable`] if the catalog cancelled, closed or retired the unit
    /// - [`Error::OutOfCapacity`] if fewer than `quantity` places remain
    pub async fn reserve(&self, unit_id: UnitId, quantity: u32) -> Result<Reservation> {
        if quantity == 0 {
            return Err(Error::Validation("quantity must be at least 1".to_string()));
        }

        let mut last_seen = 0;
        for attempt in 1..=self.max_attempts {
            let unit = self.unit(unit_id).await?;
            if unit.deleted_at.is_some() || !unit.status.is_sellable() {
                return Err(Error::UnitUnavailable {
                    unit_id,
                    status: unit.status,
                });
            }

            last_seen = unit.available;
            if unit.available < quantity {
                tracing::debug!(
                    unit_id = %unit_id,
                    requested = quantity,
                    available = unit.available,
                    "Reservation refused: out of capacity"
                );
                metrics::counter!("matchpoint_reservations_total", "outcome" => "out_of_capacity")
                    .increment(1);
                return Err(Error::OutOfCapacity {
                    unit_id,
                    requested: quantity,
                    available: unit.available,
                });
            }

            let expected = unit.state();
            let available = unit.available - quantity;
            let next = UnitState {
                available,
                status: unit.status.with_availability(available),
            };

            if self.store.swap_unit_state(unit_id, expected, next).await? {
                tracing::debug!(
                    unit_id = %unit_id,
                    quantity,
                    available_after = available,
                    attempt,
                    "Reservation granted"
                );
                metrics::counter!("matchpoint_reservations_total", "outcome" => "granted")
                    .increment(1);
                return Ok(Reservation {
                    unit_id,
                    quantity,
                    available_after: available,
                });
            }

            tracing::debug!(unit_id = %unit_id, attempt, "Availability changed concurrently");
        }

        metrics::counter!("matchpoint_reservations_total", "outcome" => "contended").increment(1);
        Err(Error::OutOfCapacity {
            unit_id,
            requested: quantity,
            available: last_seen,
        })
    }

    /// Returns `quantity` places to a unit, never exceeding its capacity.
    ///
    /// Release is compensation and does not give up on contention: every lost race means
    /// another writer made progress, so the loop terminates.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the unit does not exist
    /// - [`Error::Storage`] if the backend fails
    pub async fn release(&self, unit_id: UnitId, quantity: u32) -> Result<u32> {
        loop {
            let unit = self.unit(unit_id).await?;
            let available = unit.available.saturating_add(quantity).min(unit.capacity);
            if available == unit.available {
                return Ok(available);
            }
            let next = UnitState {
                available,
                status: unit.status.with_availability(available),
            };
            if self.store.swap_unit_state(unit_id, unit.state(), next).await? {
                tracing::debug!(unit_id = %unit_id, quantity, available_after = available, "Places released");
                metrics::counter!("matchpoint_releases_total").increment(1);
                return Ok(available);
            }
        }
    }

    /// Sets the catalog status of a unit.
    ///
    /// `Open` re-derives `Full` from availability. `Full` itself cannot be set directly.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] when asked to set `Full`
    /// - [`Error::NotFound`] if the unit does not exist
    pub async fn set_status(&self, unit_id: UnitId, status: UnitStatus) -> Result<InventoryUnit> {
        if status == UnitStatus::Full {
            return Err(Error::Validation(
                "full is derived from availability and cannot be set".to_string(),
            ));
        }

        loop {
            let mut unit = self.unit(unit_id).await?;
            let next_status = match status {
                UnitStatus::Open | UnitStatus::Full => UnitStatus::Open.with_availability(unit.available),
                other => other,
            };
            let next = UnitState {
                available: unit.available,
                status: next_status,
            };
            if self.store.swap_unit_state(unit_id, unit.state(), next).await? {
                tracing::info!(unit_id = %unit_id, from = %unit.status, to = %next_status, "Unit status changed");
                unit.status = next_status;
                return Ok(unit);
            }
        }
    }

    /// Soft-deletes a unit. Existing bookings keep referring to it.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the unit does not exist.
    pub async fn retire(&self, unit_id: UnitId) -> Result<()> {
        let at = self.clock.now();
        if !self.store.retire_unit(unit_id, at).await? {
            return Err(Error::not_found("unit", unit_id));
        }
        tracing::info!(unit_id = %unit_id, "Unit retired");
        Ok(())
    }
}
