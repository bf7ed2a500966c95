use chrono::{DateTime, Utc};
use log::*;
use sqlx::{sqlite::SqliteRow, FromRow, Row, SqliteConnection};
use topup_common::Cents;

use super::parse_column;
use crate::db_types::{ChargeRecord, ChargeStatus, NewCharge};

impl FromRow<'_, SqliteRow> for ChargeRecord {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            cost: Cents::from(row.try_get::<i64, _>("cost")?),
            status: parse_column(row, "status")?,
            description: row.try_get("description")?,
            fulfillment_marker: row.try_get("fulfillment_marker")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

pub async fn insert_charge(charge: NewCharge, conn: &mut SqliteConnection) -> Result<ChargeRecord, sqlx::Error> {
    let record: ChargeRecord = sqlx::query_as(
        r#"
        INSERT INTO charges (user_id, cost, status, description, created_at, updated_at)
        VALUES ($1, $2, 'pending', $3, $4, $4)
        RETURNING *;
        "#,
    )
    .bind(charge.user_id)
    .bind(charge.cost.value())
    .bind(charge.description)
    .bind(charge.created_at)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Charge #{} opened for user {} ({})", record.id, record.user_id, record.cost);
    Ok(record)
}

pub async fn fetch_charge(id: i64, conn: &mut SqliteConnection) -> Result<Option<ChargeRecord>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM charges WHERE id = $1").bind(id).fetch_optional(conn).await
}

/// Write-locks the charge row for the rest of the transaction. See [`super::user_accounts::lock_account`].
pub async fn lock_charge(
    id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<ChargeRecord>, sqlx::Error> {
    sqlx::query_as("UPDATE charges SET updated_at = $1 WHERE id = $2 RETURNING *")
        .bind(now)
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn update_status(
    id: i64,
    status: ChargeStatus,
    fulfillment_marker: Option<&str>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<ChargeRecord, sqlx::Error> {
    sqlx::query_as(
        r#"
        UPDATE charges SET status = $1, fulfillment_marker = COALESCE($2, fulfillment_marker), updated_at = $3
        WHERE id = $4
        RETURNING *;
        "#,
    )
    .bind(status.to_string())
    .bind(fulfillment_marker)
    .bind(now)
    .bind(id)
    .fetch_one(conn)
    .await
}

/// Charges created at or after `since` in any status that could need a refund, oldest first.
pub async fn fetch_refund_candidates(
    since: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<ChargeRecord>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT * FROM charges
        WHERE status IN ('failed', 'cancelled', 'timeout', 'pending') AND created_at >= $1
        ORDER BY created_at ASC, id ASC;
        "#,
    )
    .bind(since)
    .fetch_all(conn)
    .await
}
