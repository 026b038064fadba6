//! Revenue split and settlement batches.
//!
//! A captured payment is split into a platform fee, a supplier share and an optional
//! instructor share. All shares are rounded down to whole minor units and the supplier receives
//! whatever remains, so the three always add up to the payment total exactly.

use crate::environment::Clock;
use crate::error::{Error, Result};
use crate::payment::PaymentStatus;
use crate::store::{PaymentStore, SettlementStore};
use crate::types::{BasisPoints, Money, PaymentId, SettlementId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Revenue-split fractions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPolicy {
    platform_fee: BasisPoints,
    supplier_share: BasisPoints,
    instructor_share: BasisPoints,
}

impl Default for SplitPolicy {
    fn default() -> Self {
        Self {
            platform_fee: BasisPoints::from_raw(1_500),
            supplier_share: BasisPoints::from_raw(6_500),
            instructor_share: BasisPoints::from_raw(2_000),
        }
    }
}

impl SplitPolicy {
    /// Creates a policy whose fractions must add up to 100 %.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if they do not.
    pub fn new(
        platform_fee: BasisPoints,
        supplier_share: BasisPoints,
        instructor_share: BasisPoints,
    ) -> Result<Self> {
        let sum = u32::from(platform_fee.get())
            + u32::from(supplier_share.get())
            + u32::from(instructor_share.get());
        if sum != u32::from(BasisPoints::SCALE) {
            return Err(Error::Validation(format!(
                "split fractions must add up to 100%, got {platform_fee} + {supplier_share} + {instructor_share}"
            )));
        }
        Ok(Self {
            platform_fee,
            supplier_share,
            instructor_share,
        })
    }

    /// Platform fee fraction.
    #[must_use]
    pub const fn platform_fee(&self) -> BasisPoints {
        self.platform_fee
    }

    /// Supplier share fraction (before absorbing remainders).
    #[must_use]
    pub const fn supplier_share(&self) -> BasisPoints {
        self.supplier_share
    }

    /// Instructor share fraction.
    #[must_use]
    pub const fn instructor_share(&self) -> BasisPoints {
        self.instructor_share
    }

    /// Splits `total`.
    ///
    /// Without an instructor the instructor share goes to the supplier.
    #[must_use]
    pub fn split(&self, total: Money, has_instructor: bool) -> Distribution {
        let platform_fee = total.portion(self.platform_fee);
        let instructor_share = if has_instructor {
            total.portion(self.instructor_share)
        } else {
            Money::ZERO
        };
        // platform + instructor <= total because their fractions sum to at most 100 %
        let supplier_share = total
            .checked_sub(platform_fee)
            .and_then(|rest| rest.checked_sub(instructor_share))
            .unwrap_or(Money::ZERO);

        Distribution {
            platform_fee,
            supplier_share,
            instructor_share,
        }
    }
}

/// A payment total divided among the parties.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    /// Platform's fee
    pub platform_fee: Money,
    /// Venue's share
    pub supplier_share: Money,
    /// Instructor's share; zero when there is none
    pub instructor_share: Money,
}

impl Distribution {
    /// Sum of the shares, `None` on overflow.
    #[must_use]
    pub fn total(&self) -> Option<Money> {
        self.platform_fee
            .checked_add(self.supplier_share)
            .and_then(|sum| sum.checked_add(self.instructor_share))
    }
}

/// The recorded split of one captured payment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Settlement identifier
    pub id: SettlementId,
    /// Payment being settled
    pub payment_id: PaymentId,
    /// Shares
    #[serde(flatten)]
    pub distribution: Distribution,
    /// Whether the shares were paid out
    pub settled: bool,
    /// When it was paid out
    pub settled_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Records settlements and settles them in batches.
pub struct SettlementEngine {
    payments: Arc<dyn PaymentStore>,
    settlements: Arc<dyn SettlementStore>,
    policy: SplitPolicy,
    clock: Arc<dyn Clock>,
}

impl SettlementEngine {
    /// Creates the engine.
    #[must_use]
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        settlements: Arc<dyn SettlementStore>,
        policy: SplitPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            payments,
            settlements,
            policy,
            clock,
        }
    }

    /// Splits `total` under the configured policy.
    #[must_use]
    pub fn split(&self, total: Money, has_instructor: bool) -> Distribution {
        self.policy.split(total, has_instructor)
    }

    /// Records the settlement of a captured payment.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the payment does not exist
    /// - [`Error::Conflict`] if it is not captured or already has a settlement
    /// - [`Error::Validation`] if the shares do not add up to the payment amount
    pub async fn create_settlement(
        &self,
        payment_id: PaymentId,
        distribution: Distribution,
    ) -> Result<Settlement> {
        let payment = self
            .payments
            .load_payment(payment_id)
            .await?
            .ok_or_else(|| Error::not_found("payment", payment_id))?;

        if payment.status != PaymentStatus::Captured {
            return Err(Error::Conflict(format!(
                "payment {payment_id} is {}, only captured payments are settled",
                payment.status
            )));
        }
        if distribution.total() != Some(payment.amount) {
            return Err(Error::Validation(format!(
                "shares do not add up to payment amount {}",
                payment.amount
            )));
        }

        let settlement = Settlement {
            id: SettlementId::new(),
            payment_id,
            distribution,
            settled: false,
            settled_at: None,
            created_at: self.clock.now(),
        };
        if !self.settlements.insert_settlement(&settlement).await? {
            return Err(Error::Conflict(format!(
                "payment {payment_id} already has a settlement"
            )));
        }

        tracing::info!(
            settlement_id = %settlement.id,
            payment_id = %payment_id,
            platform_fee = %distribution.platform_fee,
            supplier_share = %distribution.supplier_share,
            instructor_share = %distribution.instructor_share,
            "Settlement recorded"
        );
        Ok(settlement)
    }

    /// Splits a captured payment and records the settlement in one step.
    ///
    /// Returns the recorded settlement unchanged if the payment already has one.
    ///
    /// # Errors
    ///
    /// See [`Self::create_settlement`].
    pub async fn settle_payment(&self, payment_id: PaymentId, has_instructor: bool) -> Result<Settlement> {
        if let Some(existing) = self.settlements.settlement_for_payment(payment_id).await? {
            return Ok(existing);
        }
        let payment = self
            .payments
            .load_payment(payment_id)
            .await?
            .ok_or_else(|| Error::not_found("payment", payment_id))?;
        let distribution = self.split(payment.amount, has_instructor);
        self.create_settlement(payment_id, distribution).await
    }

    /// The settlement of a payment.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if none was recorded.
    pub async fn for_payment(&self, payment_id: PaymentId) -> Result<Settlement> {
        self.settlements
            .settlement_for_payment(payment_id)
            .await?
            .ok_or_else(|| Error::not_found("settlement for payment", payment_id))
    }

    /// Marks every unsettled settlement of payments captured in `[from, to]` as settled.
    ///
    /// Returns only the settlements this call changed, so running the same batch twice
    /// returns nothing the second time. Captured payments without a settlement are skipped.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if `from` is after `to`.
    pub async fn settle_batch(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Settlement>> {
        if from > to {
            return Err(Error::Validation(format!(
                "batch window start {from} is after its end {to}"
            )));
        }

        let payments = self.payments.captured_between(from, to).await?;
        let now = self.clock.now();
        let mut settled = Vec::new();
        let mut missing = 0_usize;

        for payment in payments {
            let Some(mut settlement) = self.settlements.settlement_for_payment(payment.id).await? else {
                missing += 1;
                continue;
            };
            if settlement.settled {
                continue;
            }
            if self.settlements.mark_settled(settlement.id, now).await? {
                settlement.settled = true;
                settlement.settled_at = Some(now);
                settled.push(settlement);
            }
        }

        tracing::info!(
            %from,
            %to,
            settled = settled.len(),
            without_settlement = missing,
            "Settlement batch completed"
        );
        metrics::counter!("matchpoint_settlements_settled_total").increment(u64::try_from(settled.len()).unwrap_or(u64::MAX));

        Ok(settled)
    }
}
