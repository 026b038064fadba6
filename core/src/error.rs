//! Engine error type and its mapping onto the caller-facing taxonomy.
//!
//! Every failure the engine can report is a variant of [`Error`]. Callers that need to
//! translate failures for a transport (HTTP status codes, gRPC codes, ...) should match on
//! [`Error::kind`] rather than on individual variants.

use crate::booking::BookingStatus;
use crate::inventory::UnitStatus;
use crate::store::StoreError;
use crate::types::{BookingId, PaymentId, UnitId};
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by engine operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing input.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The caller has no identity.
    #[error("Unauthorized")]
    Unauthorized,

    /// The caller's identity does not own the resource.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Unknown entity.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind (`"booking"`, `"payment"`, ...)
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// The unit cannot satisfy the requested quantity. Expected under contention.
    #[error("Out of capacity on unit {unit_id}: requested {requested}, available {available}")]
    OutOfCapacity {
        /// Unit that sold out
        unit_id: UnitId,
        /// Requested quantity
        requested: u32,
        /// Availability observed at the last attempt
        available: u32,
    },

    /// The unit exists but is not sellable (cancelled, closed or deleted by the catalog).
    #[error("Unit {unit_id} is not open for booking ({status})")]
    UnitUnavailable {
        /// Unit identifier
        unit_id: UnitId,
        /// Catalog status of the unit
        status: UnitStatus,
    },

    /// Booking lifecycle transition not permitted from the current state.
    #[error("Invalid booking transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: BookingStatus,
        /// Requested status
        to: BookingStatus,
    },

    /// Any other state conflict (payment already processed, settlement exists, ...).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The payment provider rejected the operation or could not be reached in time.
    #[error("Payment {payment_id} failed: {diagnostic}")]
    PaymentFailed {
        /// Payment being processed
        payment_id: PaymentId,
        /// Provider reference, when the provider assigned one
        provider_ref: Option<String>,
        /// Provider diagnostic
        diagnostic: String,
        /// Whether retrying the same logical operation may succeed
        retryable: bool,
    },

    /// The cancellation window has elapsed.
    #[error("Refund not allowed: cancellation window of {window_hours}h has expired")]
    RefundNotAllowed {
        /// Window configured on the unit
        window_hours: u32,
    },

    /// The provider charged the buyer but the local commit did not happen.
    ///
    /// Requires reconciliation; always logged at error level.
    #[error(
        "Capture of payment {payment_id} succeeded at the provider ({provider_ref}) but could not be committed"
    )]
    CaptureInconsistent {
        /// Payment that was charged
        payment_id: PaymentId,
        /// Booking the payment belongs to
        booking_id: Option<BookingId>,
        /// Provider charge reference
        provider_ref: String,
    },

    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Caller-facing classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 400-class input problem
    Validation,
    /// Missing identity
    Unauthorized,
    /// Identity lacks access
    Forbidden,
    /// Unknown entity
    NotFound,
    /// Capacity exhausted, payment already processed, invalid transition
    Conflict,
    /// Provider rejected or timed out
    PaymentFailed,
    /// Cancellation window expired
    RefundNotAllowed,
    /// Unclassified failure; details must not reach the end caller
    Internal,
}

impl Error {
    /// Shorthand for [`Error::NotFound`].
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::OutOfCapacity { .. }
            | Self::UnitUnavailable { .. }
            | Self::InvalidTransition { .. }
            | Self::Conflict(_) => ErrorKind::Conflict,
            Self::PaymentFailed { .. } => ErrorKind::PaymentFailed,
            Self::RefundNotAllowed { .. } => ErrorKind::RefundNotAllowed,
            Self::CaptureInconsistent { .. } | Self::Storage(_) => ErrorKind::Internal,
        }
    }
}
