//! Payment gateway adapter tests.
//!
//! Run with: `cargo test -p matchpoint-core --test payment_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use matchpoint_core::booking::BookingStatus;
use matchpoint_core::payment::{PaymentMethod, PaymentStatus, ProviderError};
use matchpoint_core::types::{BasisPoints, Money, UserId};
use matchpoint_core::{BookingReceipt, Error, ErrorKind};
use matchpoint_testing::{LogCapture, TestHarness, fixtures, test_engine};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

async fn booked(h: &TestHarness, quantity: u32) -> BookingReceipt {
    let unit = h.engine.ledger().register(fixtures::time_slot(4)).await.unwrap();
    h.engine
        .book(fixtures::booking_request(&unit, quantity))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_capture_marks_payment_and_booking() {
    let h = test_engine();
    let receipt = booked(&h, 2).await;

    let payment = h
        .engine
        .payments()
        .capture(receipt.payment.id, fixtures::card(), Some("key-1".to_string()))
        .await
        .unwrap();

    assert_eq!(payment.status, PaymentStatus::Captured);
    assert_eq!(payment.method, Some(PaymentMethod::Card));
    assert_eq!(payment.card_last_four.as_deref(), Some("4242"));
    assert!(payment.provider_ref.is_some());
    assert!(payment.captured_at.is_some());

    let booking = h.engine.bookings().get(receipt.booking.id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Paid);
    assert_eq!(booking.payment_id, Some(payment.id));
}

#[tokio::test]
async fn test_second_capture_is_conflict_without_second_charge() {
    let h = test_engine();
    let receipt = booked(&h, 1).await;

    h.engine
        .payments()
        .capture(receipt.payment.id, fixtures::pix(), Some("key-2".to_string()))
        .await
        .unwrap();
    let err = h
        .engine
        .payments()
        .capture(receipt.payment.id, fixtures::pix(), Some("key-2".to_string()))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.provider.charges_made(), 1);
    assert_eq!(h.provider.charge_calls(), 1);
}

/// Two captures racing with the same idempotency key charge the buyer once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_captures_charge_once() {
    let h = test_engine();
    let receipt = booked(&h, 1).await;
    let provider = h.provider.clone();
    let engine = Arc::new(h.engine);

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            let payment_id = receipt.payment.id;
            tokio::spawn(async move {
                engine
                    .payments()
                    .capture(payment_id, fixtures::card(), Some("same-key".to_string()))
                    .await
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("Task panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.kind() == ErrorKind::Conflict)
    );
    assert_eq!(provider.charges_made(), 1);
}

#[tokio::test]
async fn test_decline_marks_payment_failed() {
    let h = test_engine();
    let receipt = booked(&h, 1).await;
    h.provider.fail_next_charge(ProviderError::Declined {
        reason: "insufficient funds".to_string(),
    });

    let err = h
        .engine
        .payments()
        .capture(receipt.payment.id, fixtures::card(), None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::PaymentFailed {
            retryable: false,
            ..
        }
    ));
    let payment = h.engine.payments().get(receipt.payment.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.failure_reason.as_deref(), Some("Payment declined: insufficient funds"));
    let booking = h.engine.bookings().get(receipt.booking.id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
}

#[tokio::test]
async fn test_capture_failure_log_names_provider_reference() {
    let h = test_engine();
    let receipt = booked(&h, 1).await;
    h.provider.fail_next_charge(ProviderError::Declined {
        reason: "card expired".to_string(),
    });
    let (logs, _guard) = LogCapture::install();

    let _ = h
        .engine
        .payments()
        .capture(receipt.payment.id, fixtures::card(), None)
        .await
        .unwrap_err();

    let lines = logs.lines_with("Payment capture failed");
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(&format!("payment_id={}", receipt.payment.id)));
    assert!(lines[0].contains("provider_ref=\"none\""));
}

#[tokio::test]
async fn test_transient_errors_are_retried_with_same_key() {
    let h = test_engine();
    let receipt = booked(&h, 1).await;
    h.provider
        .fail_next_charge(ProviderError::Transport("connection reset".to_string()));
    h.provider.fail_next_charge(ProviderError::Rejected {
        status: 503,
        body: "busy".to_string(),
    });

    let payment = h
        .engine
        .payments()
        .capture(receipt.payment.id, fixtures::card(), None)
        .await
        .unwrap();

    assert_eq!(payment.status, PaymentStatus::Captured);
    assert_eq!(h.provider.charge_calls(), 3);
    assert_eq!(h.provider.charges_made(), 1);
}

#[tokio::test]
async fn test_exhausted_retries_leave_payment_pending() {
    let h = test_engine();
    let receipt = booked(&h, 1).await;
    for _ in 0..3 {
        h.provider.fail_next_charge(ProviderError::Timeout);
    }

    let err = h
        .engine
        .payments()
        .capture(receipt.payment.id, fixtures::card(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PaymentFailed { retryable: true, .. }));
    let payment = h.engine.payments().get(receipt.payment.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);

    // The buyer retries; this time the provider answers.
    let payment = h
        .engine
        .payments()
        .capture(receipt.payment.id, fixtures::card(), None)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Captured);
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let h = test_engine();
    let receipt = booked(&h, 1).await;
    h.provider.set_charge_delay(Duration::from_secs(2));

    let err = h
        .engine
        .payments()
        .capture(receipt.payment.id, fixtures::card(), None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::PaymentFailed {
            retryable: true,
            ref diagnostic,
            ..
        } if diagnostic.contains("timed out")
    ));
}

#[tokio::test]
async fn test_commit_failure_after_charge_is_inconsistent() {
    let h = test_engine();
    let receipt = booked(&h, 1).await;
    h.store.fail_next_capture_commit();

    let err = h
        .engine
        .payments()
        .capture(receipt.payment.id, fixtures::card(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::CaptureInconsistent { .. }));
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(h.provider.charges_made(), 1);
}

#[tokio::test]
async fn test_capture_of_cancelled_booking_is_refused() {
    let h = test_engine();
    let receipt = booked(&h, 1).await;
    h.engine.bookings().cancel(receipt.booking.id).await.unwrap();

    let err = h
        .engine
        .payments()
        .capture(receipt.payment.id, fixtures::card(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.provider.charge_calls(), 0);
}

#[tokio::test]
async fn test_malformed_card_is_rejected_before_provider() {
    let h = test_engine();
    let receipt = booked(&h, 1).await;
    let details = matchpoint_core::payment::PaymentDetails::Card {
        number: "1234".to_string(),
        exp_month: 13,
        exp_year: 2030,
        cvc: "1".to_string(),
    };

    let err = h
        .engine
        .payments()
        .capture(receipt.payment.id, details, None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(h.provider.charge_calls(), 0);
}

#[tokio::test]
async fn test_create_intent_rules() {
    let h = test_engine();
    let unit = h.engine.ledger().register(fixtures::time_slot(4)).await.unwrap();
    let booking = h
        .engine
        .bookings()
        .create(fixtures::booking_request(&unit, 2))
        .await
        .unwrap();
    let payments = h.engine.payments();

    assert!(matches!(
        payments
            .create_intent(UserId::new(), booking.id, booking.total)
            .await,
        Err(Error::Forbidden(_))
    ));
    assert!(matches!(
        payments
            .create_intent(booking.user_id, booking.id, Money::from_cents(1))
            .await,
        Err(Error::Validation(_))
    ));

    payments
        .create_intent(booking.user_id, booking.id, booking.total)
        .await
        .unwrap();
    assert!(matches!(
        payments
            .create_intent(booking.user_id, booking.id, booking.total)
            .await,
        Err(Error::Conflict(_))
    ));
}

#[tokio::test]
async fn test_refund_of_captured_payment_goes_through_provider() {
    let h = test_engine();
    let receipt = booked(&h, 2).await;
    let payment = h
        .engine
        .payments()
        .capture(receipt.payment.id, fixtures::card(), None)
        .await
        .unwrap();

    let refund = h
        .engine
        .payments()
        .refund(payment.id, BasisPoints::new(8_000).unwrap())
        .await
        .unwrap();

    assert_eq!(refund.amount, Money::from_cents(8_000));
    assert_eq!(refund.payment.status, PaymentStatus::Refunded);
    let refunds = h.provider.refunds();
    assert_eq!(refunds.len(), 1);
    assert_eq!(Some(refunds[0].provider_ref.clone()), payment.provider_ref);

    assert!(matches!(
        h.engine
            .payments()
            .refund(payment.id, BasisPoints::ONE)
            .await,
        Err(Error::Conflict(_))
    ));
}

#[tokio::test]
async fn test_refund_of_pending_intent_is_local() {
    let h = test_engine();
    let receipt = booked(&h, 1).await;

    let refund = h
        .engine
        .payments()
        .refund(receipt.payment.id, BasisPoints::new(8_000).unwrap())
        .await
        .unwrap();

    assert_eq!(refund.amount, Money::ZERO);
    assert_eq!(h.provider.refund_calls(), 0);
}

#[tokio::test]
async fn test_provider_refusing_refund_leaves_payment_captured() {
    let h = test_engine();
    let receipt = booked(&h, 1).await;
    h.engine
        .payments()
        .capture(receipt.payment.id, fixtures::card(), None)
        .await
        .unwrap();
    h.provider.fail_next_refund(ProviderError::Rejected {
        status: 400,
        body: "charge already disputed".to_string(),
    });

    let err = h
        .engine
        .payments()
        .refund(receipt.payment.id, BasisPoints::ONE)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PaymentFailed);
    let payment = h.engine.payments().get(receipt.payment.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Captured);
}

proptest! {
    #[test]
    fn prop_refund_amount_is_nearest_cent(total in fixtures::money(), bps in 0u16..=BasisPoints::SCALE) {
        let fraction = BasisPoints::new(bps).unwrap();
        let refund = total.rounded_portion(fraction);
        prop_assert!(refund <= total);

        let exact = u128::from(total.cents()) * u128::from(bps);
        let granted = u128::from(refund.cents()) * u128::from(BasisPoints::SCALE);
        // Within half a cent of the exact amount, ties going up.
        let scale = u128::from(BasisPoints::SCALE);
        prop_assert!(granted.abs_diff(exact) * 2 <= scale);
        if granted < exact {
            prop_assert!((exact - granted) * 2 < scale);
        }
    }
}
