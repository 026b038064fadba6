//! Shared value objects: identifiers, money and basis-point fractions.
//!
//! Money is always an integer amount of minor units (centavos) of a single currency.
//! Fractions are integer basis points so that refund and split arithmetic is exact and
//! reproducible on every platform.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Creates a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

entity_id!(
    /// Identity of an authenticated buyer, supplied by the identity service
    UserId
);
entity_id!(
    /// Identity of a sellable inventory unit (time slot or day-use event)
    UnitId
);
entity_id!(
    /// Identity of a booking
    BookingId
);
entity_id!(
    /// Identity of a payment
    PaymentId
);
entity_id!(
    /// Identity of a settlement record
    SettlementId
);

// ============================================================================
// Money
// ============================================================================

/// An amount in minor units of the platform currency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero minor units.
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units (cents)
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Multiplies by a quantity, returning `None` on overflow.
    #[must_use]
    pub const fn checked_mul(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Adds two amounts, returning `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Subtracts, returning `None` if the result would be negative.
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Applies a basis-point fraction, rounding down to the nearest minor unit.
    #[must_use]
    pub fn portion(self, fraction: BasisPoints) -> Self {
        let scaled = u128::from(self.0) * u128::from(fraction.get()) / u128::from(BasisPoints::SCALE);
        // scaled <= self.0 because fraction <= SCALE
        Self(u64::try_from(scaled).unwrap_or(self.0))
    }

    /// Applies a basis-point fraction, rounding half a minor unit up.
    ///
    /// Refunds use this: 70 % of 0.05 is 0.04.
    #[must_use]
    pub fn rounded_portion(self, fraction: BasisPoints) -> Self {
        let scale = u128::from(BasisPoints::SCALE);
        let scaled = (u128::from(self.0) * u128::from(fraction.get()) + scale / 2) / scale;
        Self(u64::try_from(scaled).unwrap_or(self.0))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Basis points
// ============================================================================

/// A fraction in `[0, 1]` expressed in basis points (1/10 000).
///
/// `BasisPoints::new(8_000)` is 80 %.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct BasisPoints(u16);

impl BasisPoints {
    /// One whole (100 %).
    pub const SCALE: u16 = 10_000;

    /// 0 %.
    pub const ZERO: Self = Self(0);

    /// 100 %.
    pub const ONE: Self = Self(Self::SCALE);

    /// Creates a fraction, returning `None` when above 100 %.
    #[must_use]
    pub const fn new(bps: u16) -> Option<Self> {
        if bps > Self::SCALE { None } else { Some(Self(bps)) }
    }

    /// Creates a fraction from a value known to be in range; clamps anything above 100 %.
    #[must_use]
    pub const fn from_raw(bps: u16) -> Self {
        if bps > Self::SCALE { Self::ONE } else { Self(bps) }
    }

    /// Raw basis points.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Checks if the fraction is zero
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// The fraction as a decimal, for presentation only.
    #[must_use]
    pub fn as_decimal(self) -> f64 {
        f64::from(self.0) / f64::from(Self::SCALE)
    }
}

impl TryFrom<u16> for BasisPoints {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("{value} basis points exceeds 10000"))
    }
}

impl From<BasisPoints> for u16 {
    fn from(value: BasisPoints) -> Self {
        value.0
    }
}

impl fmt::Display for BasisPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_cents(12_345).to_string(), "123.45");
        assert_eq!(Money::from_cents(7).to_string(), "0.07");
    }

    #[test]
    fn test_money_portion_rounds_down() {
        let total = Money::from_cents(999);
        let eighty = BasisPoints::new(8_000).unwrap();
        assert_eq!(total.portion(eighty), Money::from_cents(799));
        assert_eq!(total.portion(BasisPoints::ONE), total);
        assert_eq!(total.portion(BasisPoints::ZERO), Money::ZERO);
    }

    #[test]
    fn test_money_rounded_portion_rounds_half_up() {
        let seventy = BasisPoints::new(7_000).unwrap();
        assert_eq!(Money::from_cents(5).rounded_portion(seventy), Money::from_cents(4));
        assert_eq!(Money::from_cents(4).rounded_portion(seventy), Money::from_cents(3));
        assert_eq!(
            Money::from_cents(999).rounded_portion(BasisPoints::new(8_000).unwrap()),
            Money::from_cents(799)
        );
        assert_eq!(Money::from_cents(u64::MAX).rounded_portion(BasisPoints::ONE), Money::from_cents(u64::MAX));
    }

    #[test]
    fn test_money_checked_mul_overflow() {
        assert_eq!(Money::from_cents(u64::MAX).checked_mul(2), None);
        assert_eq!(Money::from_cents(5_000).checked_mul(3), Some(Money::from_cents(15_000)));
    }

    #[test]
    fn test_basis_points_bounds() {
        assert!(BasisPoints::new(10_000).is_some());
        assert!(BasisPoints::new(10_001).is_none());
        assert!(serde_json::from_str::<BasisPoints>("12000").is_err());
        assert_eq!(BasisPoints::new(7_000).map(BasisPoints::as_decimal), Some(0.7));
    }

    #[test]
    fn test_ids_round_trip_through_strings() {
        let id = BookingId::new();
        let parsed: BookingId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
