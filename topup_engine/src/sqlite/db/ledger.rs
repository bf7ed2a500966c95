use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, FromRow, Row, SqliteConnection};
use topup_common::Cents;

use super::parse_column;
use crate::db_types::{LedgerTransaction, LedgerTransactionType};

impl FromRow<'_, SqliteRow> for LedgerTransaction {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            amount: Cents::from(row.try_get::<i64, _>("amount")?),
            tx_type: parse_column(row, "tx_type")?,
            reference: row.try_get("reference")?,
            balance_after: Cents::from(row.try_get::<i64, _>("balance_after")?),
            created_at: row.try_get("created_at")?,
        })
    }
}

pub struct NewLedgerEntry<'a> {
    pub user_id: i64,
    pub amount: Cents,
    pub tx_type: LedgerTransactionType,
    pub reference: &'a str,
    pub balance_after: Cents,
    pub created_at: DateTime<Utc>,
}

/// Appends an entry to the ledger. The unique constraint on `reference` rejects a second entry for the same payment
/// or charge.
pub async fn insert_entry(
    entry: NewLedgerEntry<'_>,
    conn: &mut SqliteConnection,
) -> Result<LedgerTransaction, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO ledger_transactions (user_id, amount, tx_type, reference, balance_after, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *;
        "#,
    )
    .bind(entry.user_id)
    .bind(entry.amount.value())
    .bind(entry.tx_type.to_string())
    .bind(entry.reference)
    .bind(entry.balance_after.value())
    .bind(entry.created_at)
    .fetch_one(conn)
    .await
}

pub async fn fetch_by_reference(
    reference: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<LedgerTransaction>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM ledger_transactions WHERE reference = $1")
        .bind(reference)
        .fetch_optional(conn)
        .await
}

pub async fn fetch_for_user(user_id: i64, conn: &mut SqliteConnection) -> Result<Vec<LedgerTransaction>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM ledger_transactions WHERE user_id = $1 ORDER BY id ASC")
        .bind(user_id)
        .fetch_all(conn)
        .await
}
