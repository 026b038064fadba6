//! Payment provider abstraction.
//!
//! The engine talks to exactly one external processor through [`PaymentProvider`]. Production
//! uses [`super::http::HttpPaymentProvider`]; tests use `MockPaymentProvider` from
//! `matchpoint-testing`.

use crate::types::{Money, PaymentId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by provider calls.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Errors reported by a payment provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The payment method was declined.
    #[error("Payment declined: {reason}")]
    Declined {
        /// Provider diagnostic
        reason: String,
    },

    /// The provider answered with an error status.
    #[error("Provider returned {status}: {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        body: String,
    },

    /// No answer within the attempt timeout.
    #[error("Provider call timed out")]
    Timeout,

    /// Network failure before a response was received.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    /// Whether repeating the call with the same idempotency key may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::Declined { .. } => false,
        }
    }
}

/// How the buyer pays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Credit or debit card
    Card,
    /// Brazilian instant payment
    Pix,
}

impl PaymentMethod {
    /// Stable lowercase name, as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Pix => "pix",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment credentials supplied at capture time. Never persisted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentDetails {
    /// Card credentials
    Card {
        /// Card number
        number: String,
        /// Expiry month (1-12)
        exp_month: u8,
        /// Expiry year (four digits)
        exp_year: u16,
        /// Security code
        cvc: String,
    },
    /// Pix key
    Pix {
        /// Payer's Pix key
        key: String,
    },
}

impl PaymentDetails {
    /// Method of these credentials.
    #[must_use]
    pub const fn method(&self) -> PaymentMethod {
        match self {
            Self::Card { .. } => PaymentMethod::Card,
            Self::Pix { .. } => PaymentMethod::Pix,
        }
    }

    /// Last four digits of the card number, if a card.
    #[must_use]
    pub fn last_four(&self) -> Option<String> {
        match self {
            Self::Card { number, .. } => {
                let digits: Vec<char> = number.chars().filter(char::is_ascii_digit).collect();
                let start = digits.len().saturating_sub(4);
                Some(digits[start..].iter().collect())
            }
            Self::Pix { .. } => None,
        }
    }

    /// Rejects credentials that cannot possibly be charged.
    ///
    /// # Errors
    ///
    /// A human-readable reason.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Card {
                number,
                exp_month,
                cvc,
                ..
            } => {
                let digits = number.chars().filter(char::is_ascii_digit).count();
                if !(12..=19).contains(&digits) {
                    return Err("card number must have 12 to 19 digits".to_string());
                }
                if !(1..=12).contains(exp_month) {
                    return Err("expiry month must be between 1 and 12".to_string());
                }
                if !(3..=4).contains(&cvc.len()) || !cvc.chars().all(|c| c.is_ascii_digit()) {
                    return Err("cvc must have 3 or 4 digits".to_string());
                }
                Ok(())
            }
            Self::Pix { key } if key.trim().is_empty() => Err("pix key is required".to_string()),
            Self::Pix { .. } => Ok(()),
        }
    }
}

impl fmt::Debug for PaymentDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Card { .. } => f
                .debug_struct("Card")
                .field("last_four", &self.last_four())
                .finish_non_exhaustive(),
            Self::Pix { .. } => f.debug_struct("Pix").finish_non_exhaustive(),
        }
    }
}

/// A charge to submit to the provider.
#[derive(Clone, Debug)]
pub struct ChargeRequest {
    /// Local payment the charge belongs to
    pub payment_id: PaymentId,
    /// Amount to charge
    pub amount: Money,
    /// ISO currency code
    pub currency: String,
    /// Credentials
    pub details: PaymentDetails,
    /// Key the provider uses to deduplicate repeated submissions
    pub idempotency_key: String,
}

/// A successful charge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    /// Provider's charge identifier
    pub provider_ref: String,
}

/// A refund to submit to the provider.
#[derive(Clone, Debug)]
pub struct RefundRequest {
    /// Local payment being refunded
    pub payment_id: PaymentId,
    /// Provider's charge identifier
    pub provider_ref: String,
    /// Amount to return
    pub amount: Money,
    /// Key the provider uses to deduplicate repeated submissions
    pub idempotency_key: String,
}

/// A successful refund.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    /// Provider's refund identifier
    pub refund_ref: String,
}

/// An external payment processor.
pub trait PaymentProvider: Send + Sync {
    /// Charges the buyer. Repeating a request with the same idempotency key must not charge
    /// twice.
    fn charge<'a>(&'a self, request: &'a ChargeRequest) -> ProviderFuture<'a, Charge>;

    /// Returns money for an earlier charge.
    fn refund<'a>(&'a self, request: &'a RefundRequest) -> ProviderFuture<'a, RefundReceipt>;
}
