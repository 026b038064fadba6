//! Scripted payment provider.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use matchpoint_core::payment::{
    Charge, ChargeRequest, PaymentProvider, ProviderError, ProviderFuture, RefundReceipt,
    RefundRequest,
};
use matchpoint_core::types::Money;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A refund the provider accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRefund {
    /// Charge refunded
    pub provider_ref: String,
    /// Amount returned
    pub amount: Money,
}

/// Payment provider double.
///
/// Charges are deduplicated by idempotency key the way a real processor does: repeating a
/// key returns the original charge without charging again. Failures are scripted per call.
#[derive(Debug, Default)]
pub struct MockPaymentProvider {
    charges: Mutex<HashMap<String, Charge>>,
    refunds: Mutex<HashMap<String, RecordedRefund>>,
    charge_failures: Mutex<VecDeque<ProviderError>>,
    refund_failures: Mutex<VecDeque<ProviderError>>,
    charge_delay: Mutex<Option<Duration>>,
    charge_calls: AtomicUsize,
    refund_calls: AtomicUsize,
    sequence: AtomicUsize,
}

impl MockPaymentProvider {
    /// A provider that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next charge call with `error`. Calls queue up.
    pub fn fail_next_charge(&self, error: ProviderError) {
        self.charge_failures.lock().unwrap().push_back(error);
    }

    /// Fail the next refund call with `error`. Calls queue up.
    pub fn fail_next_refund(&self, error: ProviderError) {
        self.refund_failures.lock().unwrap().push_back(error);
    }

    /// Delay every charge by `delay` before answering.
    pub fn set_charge_delay(&self, delay: Duration) {
        *self.charge_delay.lock().unwrap() = Some(delay);
    }

    /// Charge calls received, including retries and duplicates.
    #[must_use]
    pub fn charge_calls(&self) -> usize {
        self.charge_calls.load(Ordering::SeqCst)
    }

    /// Distinct charges made.
    #[must_use]
    pub fn charges_made(&self) -> usize {
        self.charges.lock().unwrap().len()
    }

    /// Refund calls received.
    #[must_use]
    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }

    /// Distinct refunds made.
    #[must_use]
    pub fn refunds(&self) -> Vec<RecordedRefund> {
        self.refunds.lock().unwrap().values().cloned().collect()
    }

    fn next_ref(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl PaymentProvider for MockPaymentProvider {
    fn charge<'a>(&'a self, request: &'a ChargeRequest) -> ProviderFuture<'a, Charge> {
        Box::pin(async move {
            self.charge_calls.fetch_add(1, Ordering::SeqCst);

            let delay = *self.charge_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let failure = self.charge_failures.lock().unwrap().pop_front();
            if let Some(error) = failure {
                return Err(error);
            }

            let mut charges = self.charges.lock().unwrap();
            if let Some(existing) = charges.get(&request.idempotency_key) {
                return Ok(existing.clone());
            }
            let charge = Charge {
                provider_ref: self.next_ref("ch"),
            };
            charges.insert(request.idempotency_key.clone(), charge.clone());
            Ok(charge)
        })
    }

    fn refund<'a>(&'a self, request: &'a RefundRequest) -> ProviderFuture<'a, RefundReceipt> {
        Box::pin(async move {
            self.refund_calls.fetch_add(1, Ordering::SeqCst);

            let failure = self.refund_failures.lock().unwrap().pop_front();
            if let Some(error) = failure {
                return Err(error);
            }

            let mut refunds = self.refunds.lock().unwrap();
            refunds
                .entry(request.idempotency_key.clone())
                .or_insert_with(|| RecordedRefund {
                    provider_ref: request.provider_ref.clone(),
                    amount: request.amount,
                });
            Ok(RefundReceipt {
                refund_ref: self.next_ref("re"),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchpoint_core::payment::PaymentDetails;
    use matchpoint_core::types::PaymentId;

    fn request(key: &str) -> ChargeRequest {
        ChargeRequest {
            payment_id: PaymentId::new(),
            amount: Money::from_cents(1_000),
            currency: "brl".to_string(),
            details: PaymentDetails::Pix {
                key: "buyer@example.com".to_string(),
            },
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_same_key_charges_once() {
        let provider = MockPaymentProvider::new();
        let first = provider.charge(&request("k1")).await.unwrap();
        let second = provider.charge(&request("k1")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.charge_calls(), 2);
        assert_eq!(provider.charges_made(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failure_is_consumed() {
        let provider = MockPaymentProvider::new();
        provider.fail_next_charge(ProviderError::Timeout);

        assert!(provider.charge(&request("k2")).await.is_err());
        assert!(provider.charge(&request("k2")).await.is_ok());
    }
}
