//! Ready-made domain values.

use crate::mocks::test_epoch;
use chrono::{Duration, NaiveDate};
use matchpoint_core::booking::NewBooking;
use matchpoint_core::inventory::{InventoryUnit, UnitKind};
use matchpoint_core::payment::PaymentDetails;
use matchpoint_core::types::{Money, UserId};
use proptest::prelude::*;

/// Price of one place in the fixtures: 50.00
pub const UNIT_PRICE: Money = Money::from_cents(5_000);

/// A court time slot with `capacity` places, starting a week after the test epoch.
#[must_use]
pub fn time_slot(capacity: u32) -> InventoryUnit {
    let starts_at = test_epoch() + Duration::days(7);
    InventoryUnit::new(
        UnitKind::TimeSlot {
            starts_at,
            ends_at: starts_at + Duration::hours(1),
        },
        capacity,
        test_epoch(),
    )
}

/// A day-use event with `capacity` places.
#[must_use]
pub fn day_use(capacity: u32) -> InventoryUnit {
    InventoryUnit::new(
        UnitKind::DayUseEvent {
            name: "Beach tennis open day".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap_or_default(),
        },
        capacity,
        test_epoch(),
    )
}

/// A booking request from a fresh user for `quantity` places on `unit`.
#[must_use]
pub fn booking_request(unit: &InventoryUnit, quantity: u32) -> NewBooking {
    booking_request_for(UserId::new(), unit, quantity)
}

/// A booking request from `user_id`.
#[must_use]
pub fn booking_request_for(user_id: UserId, unit: &InventoryUnit, quantity: u32) -> NewBooking {
    NewBooking {
        user_id,
        unit_id: unit.id,
        unit_type: unit.unit_type(),
        quantity,
        unit_price: UNIT_PRICE,
    }
}

/// Valid test card credentials.
#[must_use]
pub fn card() -> PaymentDetails {
    PaymentDetails::Card {
        number: "4242 4242 4242 4242".to_string(),
        exp_month: 12,
        exp_year: 2030,
        cvc: "123".to_string(),
    }
}

/// Valid Pix credentials.
#[must_use]
pub fn pix() -> PaymentDetails {
    PaymentDetails::Pix {
        key: "buyer@example.com".to_string(),
    }
}

/// Strategy for amounts up to 1 000 000.00.
pub fn money() -> impl Strategy<Value = Money> {
    (0u64..=100_000_000).prop_map(Money::from_cents)
}
