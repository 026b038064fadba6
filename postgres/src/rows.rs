//! Conversions between table rows and domain records.
//!
//! Counts are stored as `INTEGER`, money as `BIGINT` minor units and enum labels as the
//! same lowercase strings the domain serializes to.

use chrono::{DateTime, Utc};
use matchpoint_core::booking::Booking;
use matchpoint_core::inventory::{InventoryUnit, UnitKind};
use matchpoint_core::payment::Payment;
use matchpoint_core::refund::RefundRule;
use matchpoint_core::settlement::{Distribution, Settlement};
use matchpoint_core::store::StoreError;
use matchpoint_core::types::{
    BasisPoints, BookingId, Money, PaymentId, SettlementId, UnitId, UserId,
};
use serde::de::DeserializeOwned;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Decode, Postgres, Row, Type};
use uuid::Uuid;

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Serialization(format!("column {name}: {e}")))
}

fn label<T: DeserializeOwned>(name: &str, value: String) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::String(value))
        .map_err(|e| StoreError::Serialization(format!("column {name}: {e}")))
}

fn label_column<T: DeserializeOwned>(row: &PgRow, name: &str) -> Result<T, StoreError> {
    label(name, column::<String>(row, name)?)
}

fn count_column(row: &PgRow, name: &str) -> Result<u32, StoreError> {
    let value: i32 = column(row, name)?;
    u32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("column {name}: negative count {value}")))
}

fn money_column(row: &PgRow, name: &str) -> Result<Money, StoreError> {
    let value: i64 = column(row, name)?;
    money_from(name, value)
}

fn money_from(name: &str, value: i64) -> Result<Money, StoreError> {
    u64::try_from(value)
        .map(Money::from_cents)
        .map_err(|_| StoreError::Serialization(format!("column {name}: negative amount {value}")))
}

/// A domain count as a column value.
pub(crate) fn count(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Serialization(format!("count {value} too large")))
}

/// A money amount as a column value.
pub(crate) fn cents(value: Money) -> Result<i64, StoreError> {
    i64::try_from(value.cents())
        .map_err(|_| StoreError::Serialization(format!("amount {} too large", value.cents())))
}

pub(crate) fn unit_from_row(row: &PgRow) -> Result<InventoryUnit, StoreError> {
    let Json(kind): Json<UnitKind> = column(row, "kind")?;
    let bps: i32 = column(row, "refund_fraction_bps")?;
    let refund_fraction = u16::try_from(bps)
        .ok()
        .and_then(BasisPoints::new)
        .ok_or_else(|| StoreError::Serialization(format!("refund fraction {bps} out of range")))?;

    Ok(InventoryUnit {
        id: UnitId::from_uuid(column(row, "id")?),
        kind,
        capacity: count_column(row, "capacity")?,
        available: count_column(row, "available")?,
        refund_rule: RefundRule {
            cancel_window_hours: count_column(row, "cancel_window_hours")?,
            refund_fraction,
        },
        status: label_column(row, "status")?,
        created_at: column(row, "created_at")?,
        deleted_at: column(row, "deleted_at")?,
    })
}

pub(crate) fn booking_from_row(row: &PgRow) -> Result<Booking, StoreError> {
    Ok(Booking {
        id: BookingId::from_uuid(column(row, "id")?),
        user_id: UserId::from_uuid(column(row, "user_id")?),
        unit_id: UnitId::from_uuid(column(row, "unit_id")?),
        unit_type: label_column(row, "unit_type")?,
        quantity: count_column(row, "quantity")?,
        unit_price: money_column(row, "unit_price")?,
        total: money_column(row, "total")?,
        payment_id: column::<Option<Uuid>>(row, "payment_id")?.map(PaymentId::from_uuid),
        status: label_column(row, "status")?,
        check_in_at: column(row, "check_in_at")?,
        check_out_at: column(row, "check_out_at")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
        deleted_at: column(row, "deleted_at")?,
        version: count_column(row, "version")?,
    })
}

pub(crate) fn payment_from_row(row: &PgRow) -> Result<Payment, StoreError> {
    let method = column::<Option<String>>(row, "method")?
        .map(|value| label("method", value))
        .transpose()?;
    let refunded_amount = column::<Option<i64>>(row, "refunded_amount")?
        .map(|value| money_from("refunded_amount", value))
        .transpose()?;

    Ok(Payment {
        id: PaymentId::from_uuid(column(row, "id")?),
        booking_id: column::<Option<Uuid>>(row, "booking_id")?.map(BookingId::from_uuid),
        user_id: UserId::from_uuid(column(row, "user_id")?),
        amount: money_column(row, "amount")?,
        status: label_column(row, "status")?,
        provider_ref: column(row, "provider_ref")?,
        method,
        card_last_four: column(row, "card_last_four")?,
        refunded_amount,
        failure_reason: column(row, "failure_reason")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
        captured_at: column(row, "captured_at")?,
        refunded_at: column(row, "refunded_at")?,
    })
}

pub(crate) fn settlement_from_row(row: &PgRow) -> Result<Settlement, StoreError> {
    let settled_at: Option<DateTime<Utc>> = column(row, "settled_at")?;
    Ok(Settlement {
        id: SettlementId::from_uuid(column(row, "id")?),
        payment_id: PaymentId::from_uuid(column(row, "payment_id")?),
        distribution: Distribution {
            platform_fee: money_column(row, "platform_fee")?,
            supplier_share: money_column(row, "supplier_share")?,
            instructor_share: money_column(row, "instructor_share")?,
        },
        settled: column(row, "settled")?,
        settled_at,
        created_at: column(row, "created_at")?,
    })
}
