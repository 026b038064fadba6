//! `PostgreSQL` storage for the Matchpoint reservation engine.
//!
//! [`PgStore`] implements every storage trait from `matchpoint-core` on one connection
//! pool. Conditional writes are guarded `UPDATE ... WHERE` statements whose affected-row
//! count decides the outcome, and the capture commit runs both of its updates in one
//! transaction.
//!
//! # Example
//!
//! ```ignore
//! use matchpoint_postgres::PgStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PgStore::connect("postgres://localhost/matchpoint", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;

use chrono::{DateTime, Utc};
use matchpoint_core::booking::Booking;
use matchpoint_core::inventory::{InventoryUnit, UnitState, UnitStatus};
use matchpoint_core::payment::{Payment, PaymentStatus};
use matchpoint_core::settlement::Settlement;
use matchpoint_core::store::{
    BookingStore, InventoryStore, PaymentStore, SettlementStore, StoreError, StoreFuture,
};
use matchpoint_core::types::{BookingId, PaymentId, SettlementId, UnitId, UserId};
use rows::{cents, count};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;

const UNIT_COLUMNS: &str = "id, kind, capacity, available, cancel_window_hours, \
                            refund_fraction_bps, status, created_at, deleted_at";

const BOOKING_COLUMNS: &str = "id, user_id, unit_id, unit_type, quantity, unit_price, total, \
                               payment_id, status, check_in_at, check_out_at, created_at, \
                               updated_at, deleted_at, version";

const PAYMENT_COLUMNS: &str = "id, booking_id, user_id, amount, status, provider_ref, method, \
                               card_last_four, refunded_amount, failure_reason, created_at, \
                               updated_at, captured_at, refunded_at";

const SETTLEMENT_COLUMNS: &str = "id, payment_id, platform_fee, supplier_share, \
                                  instructor_share, settled, settled_at, created_at";

fn db_error(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(error.to_string())
        },
        other => StoreError::Database(other.to_string()),
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

fn lost_race(table: &'static str, rows_affected: u64) -> bool {
    if rows_affected == 0 {
        tracing::debug!(table, "Conditional write rejected, row changed");
        metrics::counter!("matchpoint_store_write_conflicts_total", "table" => table).increment(1);
        true
    } else {
        false
    }
}

/// `PostgreSQL` implementation of every engine storage trait.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wraps an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` with at most `max_connections` pooled connections.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Applies the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trips a trivial query, for health checks.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the database does not answer.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

// ============================================================================
// Inventory
// ============================================================================

impl InventoryStore for PgStore {
    fn insert_unit(&self, unit: &InventoryUnit) -> StoreFuture<'_, bool> {
        let unit = unit.clone();
        Box::pin(async move {
            let result = sqlx::query(
                r"
                INSERT INTO units (
                    id, kind, unit_type, capacity, available, cancel_window_hours,
                    refund_fraction_bps, status, created_at, deleted_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO NOTHING
                ",
            )
            .bind(*unit.id.as_uuid())
            .bind(Json(&unit.kind))
            .bind(unit.unit_type().as_str())
            .bind(count(unit.capacity)?)
            .bind(count(unit.available)?)
            .bind(count(unit.refund_rule.cancel_window_hours)?)
            .bind(i32::from(unit.refund_rule.refund_fraction.get()))
            .bind(unit.status.as_str())
            .bind(unit.created_at)
            .bind(unit.deleted_at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            Ok(result.rows_affected() == 1)
        })
    }

    fn load_unit(&self, id: UnitId) -> StoreFuture<'_, Option<InventoryUnit>> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {UNIT_COLUMNS} FROM units WHERE id = $1"))
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

            row.as_ref().map(rows::unit_from_row).transpose()
        })
    }

    fn swap_unit_state(
        &self,
        id: UnitId,
        expected: UnitState,
        next: UnitState,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE units
                SET available = $1, status = $2
                WHERE id = $3 AND available = $4 AND status = $5
                ",
            )
            .bind(count(next.available)?)
            .bind(next.status.as_str())
            .bind(*id.as_uuid())
            .bind(count(expected.available)?)
            .bind(expected.status.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            Ok(!lost_race("units", result.rows_affected()))
        })
    }

    fn retire_unit(&self, id: UnitId, at: DateTime<Utc>) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query("UPDATE units SET deleted_at = $2, status = $3 WHERE id = $1")
                .bind(*id.as_uuid())
                .bind(at)
                .bind(UnitStatus::Closed.as_str())
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

            Ok(result.rows_affected() > 0)
        })
    }
}

// ============================================================================
// Bookings
// ============================================================================

const UPDATE_BOOKING: &str = r"
    UPDATE bookings
    SET payment_id = $2, status = $3, check_in_at = $4, check_out_at = $5,
        updated_at = $6, deleted_at = $7, version = $8
    WHERE id = $1 AND version = $9
";

const CAPTURE_BOOKING: &str = r"
    UPDATE bookings
    SET payment_id = $2, status = $3, check_in_at = $4, check_out_at = $5,
        updated_at = $6, deleted_at = $7, version = $8
    WHERE id = $1 AND version = $9 AND status = 'pending'
";

/// Binds a booking write conditional on the stored revision.
fn update_booking<'q>(
    sql: &'q str,
    booking: &Booking,
    expected_version: u32,
) -> Result<sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>, StoreError> {
    Ok(sqlx::query(sql)
        .bind(*booking.id.as_uuid())
        .bind(booking.payment_id.map(|id| *id.as_uuid()))
        .bind(booking.status.as_str())
        .bind(booking.check_in_at)
        .bind(booking.check_out_at)
        .bind(booking.updated_at)
        .bind(booking.deleted_at)
        .bind(count(booking.version)?)
        .bind(count(expected_version)?))
}

impl BookingStore for PgStore {
    fn insert_booking(&self, booking: &Booking) -> StoreFuture<'_, ()> {
        let booking = booking.clone();
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO bookings (
                    id, user_id, unit_id, unit_type, quantity, unit_price, total, payment_id,
                    status, check_in_at, check_out_at, created_at, updated_at, deleted_at,
                    version
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                ",
            )
            .bind(*booking.id.as_uuid())
            .bind(*booking.user_id.as_uuid())
            .bind(*booking.unit_id.as_uuid())
            .bind(booking.unit_type.as_str())
            .bind(count(booking.quantity)?)
            .bind(cents(booking.unit_price)?)
            .bind(cents(booking.total)?)
            .bind(booking.payment_id.map(|id| *id.as_uuid()))
            .bind(booking.status.as_str())
            .bind(booking.check_in_at)
            .bind(booking.check_out_at)
            .bind(booking.created_at)
            .bind(booking.updated_at)
            .bind(booking.deleted_at)
            .bind(count(booking.version)?)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            Ok(())
        })
    }

    fn load_booking(&self, id: BookingId) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"
            ))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            row.as_ref().map(rows::booking_from_row).transpose()
        })
    }

    fn bookings_for_user(&self, user_id: UserId) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings \
                 WHERE user_id = $1 AND deleted_at IS NULL \
                 ORDER BY created_at DESC"
            ))
            .bind(*user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.iter().map(rows::booking_from_row).collect()
        })
    }

    fn replace_booking(&self, booking: &Booking, expected_version: u32) -> StoreFuture<'_, bool> {
        let booking = booking.clone();
        Box::pin(async move {
            let result = update_booking(UPDATE_BOOKING, &booking, expected_version)?
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

            Ok(!lost_race("bookings", result.rows_affected()))
        })
    }
}

// ============================================================================
// Payments
// ============================================================================

const UPDATE_PAYMENT: &str = r"
    UPDATE payments
    SET status = $2, provider_ref = $3, method = $4, card_last_four = $5,
        refunded_amount = $6, failure_reason = $7, updated_at = $8, captured_at = $9,
        refunded_at = $10
    WHERE id = $1 AND status = $11
";

fn update_payment<'q>(
    payment: &'q Payment,
    expected: PaymentStatus,
) -> Result<sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>, StoreError> {
    Ok(sqlx::query(UPDATE_PAYMENT)
        .bind(*payment.id.as_uuid())
        .bind(payment.status.as_str())
        .bind(payment.provider_ref.as_deref())
        .bind(payment.method.map(|m| m.as_str()))
        .bind(payment.card_last_four.as_deref())
        .bind(payment.refunded_amount.map(cents).transpose()?)
        .bind(payment.failure_reason.as_deref())
        .bind(payment.updated_at)
        .bind(payment.captured_at)
        .bind(payment.refunded_at)
        .bind(expected.as_str()))
}

impl PaymentStore for PgStore {
    fn insert_payment(&self, payment: &Payment) -> StoreFuture<'_, bool> {
        let payment = payment.clone();
        Box::pin(async move {
            let result = sqlx::query(
                r"
                INSERT INTO payments (
                    id, booking_id, user_id, amount, status, provider_ref, method,
                    card_last_four, refunded_amount, failure_reason, created_at, updated_at,
                    captured_at, refunded_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ",
            )
            .bind(*payment.id.as_uuid())
            .bind(payment.booking_id.map(|id| *id.as_uuid()))
            .bind(*payment.user_id.as_uuid())
            .bind(cents(payment.amount)?)
            .bind(payment.status.as_str())
            .bind(payment.provider_ref.as_deref())
            .bind(payment.method.map(|m| m.as_str()))
            .bind(payment.card_last_four.as_deref())
            .bind(payment.refunded_amount.map(cents).transpose()?)
            .bind(payment.failure_reason.as_deref())
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .bind(payment.captured_at)
            .bind(payment.refunded_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(true),
                Err(e) if is_unique_violation(&e) => {
                    lost_race("payments", 0);
                    Ok(false)
                },
                Err(e) => Err(db_error(e)),
            }
        })
    }

    fn load_payment(&self, id: PaymentId) -> StoreFuture<'_, Option<Payment>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
            ))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            row.as_ref().map(rows::payment_from_row).transpose()
        })
    }

    fn active_payment_for_booking(
        &self,
        booking_id: BookingId,
    ) -> StoreFuture<'_, Option<Payment>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments \
                 WHERE booking_id = $1 AND status <> $2"
            ))
            .bind(*booking_id.as_uuid())
            .bind(PaymentStatus::Failed.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            row.as_ref().map(rows::payment_from_row).transpose()
        })
    }

    fn replace_payment(
        &self,
        payment: &Payment,
        expected: PaymentStatus,
    ) -> StoreFuture<'_, bool> {
        let payment = payment.clone();
        Box::pin(async move {
            let result = update_payment(&payment, expected)?
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

            Ok(!lost_race("payments", result.rows_affected()))
        })
    }

    fn commit_capture(
        &self,
        payment: &Payment,
        booking: Option<&Booking>,
    ) -> StoreFuture<'_, bool> {
        let payment = payment.clone();
        let booking = booking.cloned();
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db_error)?;

            let result = update_payment(&payment, PaymentStatus::Pending)?
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
            if lost_race("payments", result.rows_affected()) {
                tx.rollback().await.map_err(db_error)?;
                return Ok(false);
            }

            if let Some(booking) = booking {
                let result = update_booking(
                    CAPTURE_BOOKING,
                    &booking,
                    booking.version.wrapping_sub(1),
                )?
                .execute(&mut *tx)
                    .await
                    .map_err(db_error)?;
                if lost_race("bookings", result.rows_affected()) {
                    tx.rollback().await.map_err(db_error)?;
                    return Ok(false);
                }
            }

            tx.commit().await.map_err(db_error)?;
            Ok(true)
        })
    }

    fn captured_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<Payment>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments \
                 WHERE status = $1 AND captured_at >= $2 AND captured_at <= $3 \
                 ORDER BY captured_at ASC"
            ))
            .bind(PaymentStatus::Captured.as_str())
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.iter().map(rows::payment_from_row).collect()
        })
    }
}

// ============================================================================
// Settlements
// ============================================================================

impl SettlementStore for PgStore {
    fn insert_settlement(&self, settlement: &Settlement) -> StoreFuture<'_, bool> {
        let settlement = settlement.clone();
        Box::pin(async move {
            let result = sqlx::query(
                r"
                INSERT INTO settlements (
                    id, payment_id, platform_fee, supplier_share, instructor_share,
                    settled, settled_at, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT DO NOTHING
                ",
            )
            .bind(*settlement.id.as_uuid())
            .bind(*settlement.payment_id.as_uuid())
            .bind(cents(settlement.distribution.platform_fee)?)
            .bind(cents(settlement.distribution.supplier_share)?)
            .bind(cents(settlement.distribution.instructor_share)?)
            .bind(settlement.settled)
            .bind(settlement.settled_at)
            .bind(settlement.created_at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            Ok(!lost_race("settlements", result.rows_affected()))
        })
    }

    fn settlement_for_payment(
        &self,
        payment_id: PaymentId,
    ) -> StoreFuture<'_, Option<Settlement>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE payment_id = $1"
            ))
            .bind(*payment_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            row.as_ref().map(rows::settlement_from_row).transpose()
        })
    }

    fn mark_settled(&self, id: SettlementId, at: DateTime<Utc>) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE settlements SET settled = TRUE, settled_at = $2 \
                 WHERE id = $1 AND settled = FALSE",
            )
            .bind(*id.as_uuid())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            Ok(!lost_race("settlements", result.rows_affected()))
        })
    }
}
