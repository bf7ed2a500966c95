use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, FromRow, Row, SqliteConnection};

use super::parse_column;
use crate::db_types::{DeadLetter, NewDeadLetter};

impl FromRow<'_, SqliteRow> for DeadLetter {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            reference: row.try_get("reference")?,
            event: row.try_get("event")?,
            payload: row.try_get("payload")?,
            error_message: row.try_get("error_message")?,
            attempts: row.try_get("attempts")?,
            status: parse_column(row, "status")?,
            created_at: row.try_get("created_at")?,
            replayed_at: row.try_get("replayed_at")?,
        })
    }
}

pub async fn insert(
    letter: NewDeadLetter,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<DeadLetter, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO dead_letters (reference, event, payload, error_message, attempts, status, created_at)
        VALUES ($1, $2, $3, $4, $5, 'pending', $6)
        RETURNING *;
        "#,
    )
    .bind(letter.reference)
    .bind(letter.event)
    .bind(letter.payload)
    .bind(letter.error_message)
    .bind(letter.attempts)
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn fetch(id: i64, conn: &mut SqliteConnection) -> Result<Option<DeadLetter>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM dead_letters WHERE id = $1").bind(id).fetch_optional(conn).await
}

pub async fn fetch_pending(limit: i64, conn: &mut SqliteConnection) -> Result<Vec<DeadLetter>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM dead_letters WHERE status = 'pending' ORDER BY id ASC LIMIT $1")
        .bind(limit)
        .fetch_all(conn)
        .await
}

pub async fn mark_replayed(
    id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<DeadLetter>, sqlx::Error> {
    sqlx::query_as(
        r#"UPDATE dead_letters SET status = 'replayed', replayed_at = $1, attempts = attempts + 1
        WHERE id = $2 RETURNING *"#,
    )
    .bind(now)
    .bind(id)
    .fetch_optional(conn)
    .await
}

pub async fn record_failure(
    id: i64,
    error_message: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<DeadLetter>, sqlx::Error> {
    sqlx::query_as("UPDATE dead_letters SET attempts = attempts + 1, error_message = $1 WHERE id = $2 RETURNING *")
        .bind(error_message)
        .bind(id)
        .fetch_optional(conn)
        .await
}
