//! # SQLite queries
//!
//! Low-level SQLite interactions, written as free functions that take a `&mut SqliteConnection`. Callers pass a pooled
//! connection for one-off reads, or `&mut tx` to compose several calls into one atomic transaction.
//!
//! Write transactions must begin with a write to the row they are about to read (see
//! [`user_accounts::lock_account`]). That statement takes SQLite's database write lock, so every subsequent read in
//! the transaction sees data that no other writer can change before commit.
use std::{env, str::FromStr, time::Duration};

use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Error as SqlxError,
    Row,
    SqlitePool,
};

pub mod charges;
pub mod dead_letters;
pub mod ledger;
pub mod payments;
pub mod user_accounts;

const SQLITE_DB_URL: &str = "sqlite://data/topup_store.db";

pub fn db_url() -> String {
    let result = env::var("TOPUP_DATABASE_URL").unwrap_or_else(|_| {
        info!("🗃️ TOPUP_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("🗃️ Using database URL: {result}");
    result
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true).busy_timeout(Duration::from_secs(10));
    SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await
}

pub fn is_unique_violation(e: &SqlxError) -> bool {
    matches!(e, SqlxError::Database(db) if db.is_unique_violation())
}

/// Reads a TEXT column into one of the string-backed status enums.
pub(crate) fn parse_column<T>(row: &SqliteRow, column: &str) -> Result<T, SqlxError>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value: String = row.try_get(column)?;
    value.parse::<T>().map_err(|e| SqlxError::ColumnDecode { index: column.to_string(), source: Box::new(e) })
}
