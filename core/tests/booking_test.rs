//! Booking state machine tests.
//!
//! Run with: `cargo test -p matchpoint-core --test booking_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use chrono::Duration;
use matchpoint_core::Error;
use matchpoint_core::booking::BookingStatus;
use matchpoint_core::inventory::UnitType;
use matchpoint_core::store::BookingStore;
use matchpoint_core::types::{BasisPoints, Money, PaymentId};
use matchpoint_testing::{fixtures, test_engine};
use std::sync::Arc;

#[tokio::test]
async fn test_create_reserves_and_computes_total() {
    let h = test_engine();
    let unit = h.engine.ledger().register(fixtures::time_slot(4)).await.unwrap();

    let booking = h
        .engine
        .bookings()
        .create(fixtures::booking_request(&unit, 3))
        .await
        .unwrap();

    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.total, Money::from_cents(15_000));
    assert!(booking.total_is_consistent());
    assert_eq!(h.engine.ledger().availability(unit.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_create_rejects_mismatched_unit_type() {
    let h = test_engine();
    let unit = h.engine.ledger().register(fixtures::time_slot(4)).await.unwrap();
    let mut request = fixtures::booking_request(&unit, 1);
    request.unit_type = UnitType::DayUse;

    let err = h.engine.bookings().create(request).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(h.engine.ledger().availability(unit.id).await.unwrap(), 4);
}

#[tokio::test]
async fn test_failed_insert_releases_reservation() {
    let h = test_engine();
    let unit = h.engine.ledger().register(fixtures::time_slot(4)).await.unwrap();
    h.store.fail_next_booking_insert();

    let err = h
        .engine
        .bookings()
        .create(fixtures::booking_request(&unit, 2))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Storage(_)));
    assert_eq!(h.engine.ledger().availability(unit.id).await.unwrap(), 4);
    assert_eq!(h.store.booking_count(), 0);
}

#[tokio::test]
async fn test_sold_out_unit_creates_no_booking() {
    let h = test_engine();
    let unit = h.engine.ledger().register(fixtures::day_use(1)).await.unwrap();

    h.engine
        .bookings()
        .create(fixtures::booking_request(&unit, 1))
        .await
        .unwrap();
    let err = h
        .engine
        .bookings()
        .create(fixtures::booking_request(&unit, 1))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::OutOfCapacity { .. }));
    assert_eq!(h.store.booking_count(), 1);
}

#[tokio::test]
async fn test_cancel_inside_window_refunds_and_releases() {
    let h = test_engine();
    let unit = h.engine.ledger().register(fixtures::time_slot(4)).await.unwrap();
    let booking = h
        .engine
        .bookings()
        .create(fixtures::booking_request(&unit, 2))
        .await
        .unwrap();

    h.clock.advance(Duration::hours(23));
    let cancellation = h.engine.bookings().cancel(booking.id).await.unwrap();

    assert_eq!(cancellation.booking.status, BookingStatus::Cancelled);
    assert_eq!(cancellation.refund_fraction, BasisPoints::new(8_000).unwrap());
    assert_eq!(h.engine.ledger().availability(unit.id).await.unwrap(), 4);
}

#[tokio::test]
async fn test_cancel_after_window_is_refused_and_changes_nothing() {
    let h = test_engine();
    let unit = h.engine.ledger().register(fixtures::time_slot(4)).await.unwrap();
    let booking = h
        .engine
        .bookings()
        .create(fixtures::booking_request(&unit, 2))
        .await
        .unwrap();

    h.clock.advance(Duration::hours(25));
    let err = h.engine.bookings().cancel(booking.id).await.unwrap_err();

    assert!(matches!(err, Error::RefundNotAllowed { window_hours: 24 }));
    let stored = h.engine.bookings().get(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Pending);
    assert_eq!(h.engine.ledger().availability(unit.id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_day_use_window_is_48_hours() {
    let h = test_engine();
    let unit = h.engine.ledger().register(fixtures::day_use(10)).await.unwrap();
    let booking = h
        .engine
        .bookings()
        .create(fixtures::booking_request(&unit, 1))
        .await
        .unwrap();

    h.clock.advance(Duration::hours(47));
    let cancellation = h.engine.bookings().cancel(booking.id).await.unwrap();
    assert_eq!(cancellation.refund_fraction, BasisPoints::new(7_000).unwrap());
}

#[tokio::test]
async fn test_second_cancel_is_rejected() {
    let h = test_engine();
    let unit = h.engine.ledger().register(fixtures::time_slot(4)).await.unwrap();
    let booking = h
        .engine
        .bookings()
        .create(fixtures::booking_request(&unit, 1))
        .await
        .unwrap();

    h.engine.bookings().cancel(booking.id).await.unwrap();
    let err = h.engine.bookings().cancel(booking.id).await.unwrap_err();

    assert!(matches!(err, Error::Validation(ref msg) if msg.contains("already cancelled")));
    assert_eq!(h.engine.ledger().availability(unit.id).await.unwrap(), 4);
}

/// Two concurrent cancellations: one succeeds, one is rejected, capacity released once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cancellations_release_once() {
    let h = test_engine();
    let engine = Arc::new(h.engine);
    let unit = engine.ledger().register(fixtures::time_slot(4)).await.unwrap();
    let booking = engine
        .bookings()
        .create(fixtures::booking_request(&unit, 2))
        .await
        .unwrap();
    // Another booking keeps one place taken so a double release would be visible.
    engine
        .bookings()
        .create(fixtures::booking_request(&unit, 1))
        .await
        .unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            let booking_id = booking.id;
            tokio::spawn(async move { engine.bookings().cancel(booking_id).await })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("Task panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(r, Err(Error::Validation(_)))));
    assert_eq!(engine.ledger().availability(unit.id).await.unwrap(), 3);
}

#[tokio::test]
async fn test_mark_paid_only_from_pending() {
    let h = test_engine();
    let unit = h.engine.ledger().register(fixtures::time_slot(4)).await.unwrap();
    let booking = h
        .engine
        .bookings()
        .create(fixtures::booking_request(&unit, 1))
        .await
        .unwrap();

    let paid = h
        .engine
        .bookings()
        .mark_paid(booking.id, PaymentId::new())
        .await
        .unwrap();
    assert_eq!(paid.status, BookingStatus::Paid);

    let err = h
        .engine
        .bookings()
        .mark_paid(booking.id, PaymentId::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: BookingStatus::Paid,
            to: BookingStatus::Paid
        }
    ));
}

#[tokio::test]
async fn test_check_in_requires_paid_booking() {
    let h = test_engine();
    let unit = h.engine.ledger().register(fixtures::time_slot(4)).await.unwrap();
    let booking = h
        .engine
        .bookings()
        .create(fixtures::booking_request(&unit, 1))
        .await
        .unwrap();

    assert!(matches!(
        h.engine.bookings().check_in(booking.id).await,
        Err(Error::Conflict(_))
    ));
    assert!(matches!(
        h.engine.bookings().check_out(booking.id).await,
        Err(Error::Conflict(_))
    ));

    h.engine
        .bookings()
        .mark_paid(booking.id, PaymentId::new())
        .await
        .unwrap();
    let checked_in = h.engine.bookings().check_in(booking.id).await.unwrap();
    assert!(checked_in.check_in_at.is_some());
    assert!(matches!(
        h.engine.bookings().check_in(booking.id).await,
        Err(Error::Conflict(_))
    ));

    h.clock.advance(Duration::hours(2));
    let checked_out = h.engine.bookings().check_out(booking.id).await.unwrap();
    assert_eq!(
        checked_out.check_out_at.unwrap() - checked_out.check_in_at.unwrap(),
        Duration::hours(2)
    );
}

#[tokio::test]
async fn test_no_show_keeps_places_and_is_terminal() {
    let h = test_engine();
    let unit = h.engine.ledger().register(fixtures::time_slot(4)).await.unwrap();
    let booking = h
        .engine
        .bookings()
        .create(fixtures::booking_request(&unit, 2))
        .await
        .unwrap();
    h.engine
        .bookings()
        .mark_paid(booking.id, PaymentId::new())
        .await
        .unwrap();

    let no_show = h.engine.bookings().mark_no_show(booking.id).await.unwrap();
    assert_eq!(no_show.status, BookingStatus::NoShow);
    assert_eq!(h.engine.ledger().availability(unit.id).await.unwrap(), 2);

    assert!(matches!(
        h.engine.bookings().cancel(booking.id).await,
        Err(Error::InvalidTransition {
            from: BookingStatus::NoShow,
            ..
        })
    ));
}

#[tokio::test]
async fn test_soft_delete_hides_terminal_bookings() {
    let h = test_engine();
    let unit = h.engine.ledger().register(fixtures::time_slot(4)).await.unwrap();
    let request = fixtures::booking_request(&unit, 1);
    let user_id = request.user_id;
    let active = h.engine.bookings().create(request.clone()).await.unwrap();
    let cancelled = h.engine.bookings().create(request).await.unwrap();
    h.engine.bookings().cancel(cancelled.id).await.unwrap();

    assert!(matches!(
        h.engine.bookings().soft_delete(active.id).await,
        Err(Error::Conflict(_))
    ));
    let deleted = h.engine.bookings().soft_delete(cancelled.id).await.unwrap();
    assert!(deleted.deleted_at.is_some());

    let listed = h.engine.bookings().list_for_user(user_id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, active.id);
}

/// A writer holding a snapshot taken before another write must lose, even when the status
/// it expects is unchanged.
#[tokio::test]
async fn test_stale_snapshot_write_is_rejected() {
    let h = test_engine();
    let unit = h.engine.ledger().register(fixtures::time_slot(4)).await.unwrap();
    let booking = h
        .engine
        .bookings()
        .create(fixtures::booking_request(&unit, 1))
        .await
        .unwrap();
    h.engine
        .bookings()
        .mark_paid(booking.id, PaymentId::new())
        .await
        .unwrap();

    let snapshot = h.store.load_booking(booking.id).await.unwrap().unwrap();
    let checked_in = h.engine.bookings().check_in(booking.id).await.unwrap();
    assert_eq!(checked_in.version, snapshot.version + 1);

    let mut no_show = snapshot.clone();
    no_show.status = BookingStatus::NoShow;
    no_show.version = snapshot.version + 1;
    assert!(!h.store.replace_booking(&no_show, snapshot.version).await.unwrap());

    let stored = h.store.load_booking(booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Paid);
    assert!(stored.check_in_at.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_check_ins_record_one_arrival() {
    let h = test_engine();
    let engine = Arc::new(h.engine);
    let unit = engine.ledger().register(fixtures::time_slot(4)).await.unwrap();
    let booking = engine
        .bookings()
        .create(fixtures::booking_request(&unit, 1))
        .await
        .unwrap();
    engine
        .bookings()
        .mark_paid(booking.id, PaymentId::new())
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let booking_id = booking.id;
            tokio::spawn(async move { engine.bookings().check_in(booking_id).await })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("Task panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().all(|r| r.is_ok() || matches!(r, Err(Error::Conflict(_)))));
}

#[tokio::test]
async fn test_no_show_after_check_in_is_refused() {
    let h = test_engine();
    let unit = h.engine.ledger().register(fixtures::time_slot(4)).await.unwrap();
    let booking = h
        .engine
        .bookings()
        .create(fixtures::booking_request(&unit, 1))
        .await
        .unwrap();
    h.engine
        .bookings()
        .mark_paid(booking.id, PaymentId::new())
        .await
        .unwrap();
    h.engine.bookings().check_in(booking.id).await.unwrap();

    assert!(matches!(
        h.engine.bookings().mark_no_show(booking.id).await,
        Err(Error::Conflict(_))
    ));
    let stored = h.engine.bookings().get(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Paid);
}

#[tokio::test]
async fn test_failed_release_after_cancel_is_surfaced() {
    let h = test_engine();
    let unit = h.engine.ledger().register(fixtures::time_slot(4)).await.unwrap();
    let booking = h
        .engine
        .bookings()
        .create(fixtures::booking_request(&unit, 2))
        .await
        .unwrap();
    h.store.fail_next_unit_swap();

    let err = h.engine.bookings().cancel(booking.id).await.unwrap_err();

    assert!(matches!(err, Error::Storage(_)));
    let stored = h.engine.bookings().get(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Cancelled);
    assert_eq!(h.engine.ledger().availability(unit.id).await.unwrap(), 2);
}
