use chrono::{DateTime, Utc};
use log::*;
use sqlx::{sqlite::SqliteRow, FromRow, Row, SqliteConnection};
use topup_common::Cents;

use super::parse_column;
use crate::db_types::{NewPaymentRecord, PaymentRecord, PaymentReference, StateTransition};

impl FromRow<'_, SqliteRow> for PaymentRecord {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            reference: PaymentReference(row.try_get("reference")?),
            idempotency_key: row.try_get("idempotency_key")?,
            user_id: row.try_get("user_id")?,
            amount: Cents::from(row.try_get::<i64, _>("amount")?),
            credit_amount: Cents::from(row.try_get::<i64, _>("credit_amount")?),
            state: parse_column(row, "state")?,
            credited: row.try_get("credited")?,
            lock_version: row.try_get("lock_version")?,
            // Loaded separately from payment_state_transitions
            state_transitions: Vec::new(),
            processing_started_at: row.try_get("processing_started_at")?,
            processing_completed_at: row.try_get("processing_completed_at")?,
            error_message: row.try_get("error_message")?,
            authorization_url: row.try_get("authorization_url")?,
            access_code: row.try_get("access_code")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl FromRow<'_, SqliteRow> for StateTransition {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self { from: parse_column(row, "from_state")?, to: parse_column(row, "to_state")?, at: row.try_get("at")? })
    }
}

/// Inserts a new `pending` payment. Fails with a unique violation if the reference or idempotency key is taken.
pub async fn insert_payment(
    payment: NewPaymentRecord,
    conn: &mut SqliteConnection,
) -> Result<PaymentRecord, sqlx::Error> {
    let record: PaymentRecord = sqlx::query_as(
        r#"
        INSERT INTO payments (reference, idempotency_key, user_id, amount, credit_amount, state, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, 'pending', $6, $6)
        RETURNING *;
        "#,
    )
    .bind(payment.reference.as_str())
    .bind(payment.idempotency_key)
    .bind(payment.user_id)
    .bind(payment.amount.value())
    .bind(payment.credit_amount.value())
    .bind(payment.created_at)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Payment {} saved with id {}", record.reference, record.id);
    Ok(record)
}

pub async fn fetch_transitions(
    reference: &PaymentReference,
    conn: &mut SqliteConnection,
) -> Result<Vec<StateTransition>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payment_state_transitions WHERE reference = $1 ORDER BY id ASC")
        .bind(reference.as_str())
        .fetch_all(conn)
        .await
}

async fn with_transitions(
    record: Option<PaymentRecord>,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentRecord>, sqlx::Error> {
    match record {
        Some(mut record) => {
            record.state_transitions = fetch_transitions(&record.reference, conn).await?;
            Ok(Some(record))
        },
        None => Ok(None),
    }
}

pub async fn fetch_by_reference(
    reference: &PaymentReference,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentRecord>, sqlx::Error> {
    let record = sqlx::query_as("SELECT * FROM payments WHERE reference = $1")
        .bind(reference.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    with_transitions(record, conn).await
}

pub async fn fetch_by_idempotency_key(
    key: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentRecord>, sqlx::Error> {
    let record =
        sqlx::query_as("SELECT * FROM payments WHERE idempotency_key = $1").bind(key).fetch_optional(&mut *conn).await?;
    with_transitions(record, conn).await
}

/// Writes the mutable lifecycle fields of `record`, but only if the stored `lock_version` still equals
/// `expected_version`. The version is bumped on success. Returns `None` when the version check fails or the payment
/// does not exist.
pub async fn update_if_version(
    record: &PaymentRecord,
    expected_version: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentRecord>, sqlx::Error> {
    let updated: Option<PaymentRecord> = sqlx::query_as(
        r#"
        UPDATE payments SET
            state = $1,
            credited = $2,
            processing_started_at = $3,
            processing_completed_at = $4,
            error_message = $5,
            updated_at = $6,
            lock_version = lock_version + 1
        WHERE reference = $7 AND lock_version = $8
        RETURNING *;
        "#,
    )
    .bind(record.state.to_string())
    .bind(record.credited)
    .bind(record.processing_started_at)
    .bind(record.processing_completed_at)
    .bind(record.error_message.as_deref())
    .bind(record.updated_at)
    .bind(record.reference.as_str())
    .bind(expected_version)
    .fetch_optional(conn)
    .await?;
    if updated.is_none() {
        debug!("🗃️ Version check failed for payment {} (expected v{expected_version})", record.reference);
    }
    Ok(updated)
}

pub async fn insert_transition(
    reference: &PaymentReference,
    transition: &StateTransition,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO payment_state_transitions (reference, from_state, to_state, at) VALUES ($1, $2, $3, $4)")
        .bind(reference.as_str())
        .bind(transition.from.to_string())
        .bind(transition.to.to_string())
        .bind(transition.at)
        .execute(conn)
        .await?;
    trace!("🗃️ Payment {reference}: {} -> {}", transition.from, transition.to);
    Ok(())
}

pub async fn set_gateway_details(
    reference: &PaymentReference,
    authorization_url: &str,
    access_code: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE payments SET authorization_url = $1, access_code = $2, updated_at = $3 WHERE reference = $4",
    )
    .bind(authorization_url)
    .bind(access_code)
    .bind(now)
    .bind(reference.as_str())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}
