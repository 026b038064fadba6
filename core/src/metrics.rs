//! Engine metrics.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `matchpoint_reservations_total{outcome}` - Reservation attempts by outcome
//!   (granted, out_of_capacity, contended)
//! - `matchpoint_releases_total` - Capacity releases
//! - `matchpoint_bookings_created_total{unit_type}` - Bookings created
//! - `matchpoint_bookings_cancelled_total{status}` - Bookings cancelled or refunded
//! - `matchpoint_payments_captured_total{method}` - Successful captures
//! - `matchpoint_payments_failed_total{retryable}` - Failed captures
//! - `matchpoint_payments_refunded_total` - Refunds and voided intents
//! - `matchpoint_payment_revenue_cents_total` - Captured amount in minor units
//! - `matchpoint_refunds_cents_total` - Refunded amount in minor units
//! - `matchpoint_capture_inconsistencies_total` - Charges without a local commit
//! - `matchpoint_provider_errors_total{operation}` - Provider calls that gave up
//! - `matchpoint_settlements_settled_total` - Settlements marked settled
//! - `matchpoint_notifications_failed_total` - Notification deliveries that failed
//! - `matchpoint_store_write_conflicts_total{table}` - Conditional writes that lost a race
//!
//! ## Histograms
//! - `matchpoint_provider_call_duration_seconds{operation}` - Provider call latency

use metrics::{describe_counter, describe_histogram};

/// Registers descriptions for every engine metric.
///
/// Call once at startup, after installing a recorder.
pub fn register_metrics() {
    describe_counter!(
        "matchpoint_reservations_total",
        "Reservation attempts by outcome (granted, out_of_capacity, contended)"
    );
    describe_counter!("matchpoint_releases_total", "Capacity releases");
    describe_counter!(
        "matchpoint_bookings_created_total",
        "Bookings created by unit type"
    );
    describe_counter!(
        "matchpoint_bookings_cancelled_total",
        "Bookings cancelled, by terminal status"
    );

    describe_counter!(
        "matchpoint_payments_captured_total",
        "Payments captured by method"
    );
    describe_counter!(
        "matchpoint_payments_failed_total",
        "Payment captures that failed"
    );
    describe_counter!(
        "matchpoint_payments_refunded_total",
        "Payments refunded or voided"
    );
    describe_counter!(
        "matchpoint_payment_revenue_cents_total",
        "Captured amount in minor units"
    );
    describe_counter!(
        "matchpoint_refunds_cents_total",
        "Refunded amount in minor units"
    );
    describe_counter!(
        "matchpoint_capture_inconsistencies_total",
        "Charges that succeeded at the provider without a local commit"
    );
    describe_counter!(
        "matchpoint_provider_errors_total",
        "Provider calls that failed after retries"
    );
    describe_histogram!(
        "matchpoint_provider_call_duration_seconds",
        "Latency of a single provider call"
    );

    describe_counter!(
        "matchpoint_settlements_settled_total",
        "Settlements marked settled by batches"
    );
    describe_counter!(
        "matchpoint_notifications_failed_total",
        "Notification deliveries that failed"
    );
    describe_counter!(
        "matchpoint_store_write_conflicts_total",
        "Conditional storage writes rejected because the row changed"
    );

    tracing::info!("Engine metrics registered");
}
