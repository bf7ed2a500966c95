use chrono::{DateTime, Utc};
use log::trace;
use sqlx::{sqlite::SqliteRow, FromRow, Row, SqliteConnection};
use topup_common::Cents;

use crate::db_types::UserAccount;

impl FromRow<'_, SqliteRow> for UserAccount {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            balance: Cents::from(row.try_get::<i64, _>("balance")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

pub async fn create_account(now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<UserAccount, sqlx::Error> {
    let account: UserAccount =
        sqlx::query_as("INSERT INTO user_accounts (balance, created_at, updated_at) VALUES (0, $1, $1) RETURNING *")
            .bind(now)
            .fetch_one(conn)
            .await?;
    trace!("🗃️ Created user account #{}", account.id);
    Ok(account)
}

pub async fn fetch_account(id: i64, conn: &mut SqliteConnection) -> Result<Option<UserAccount>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM user_accounts WHERE id = $1").bind(id).fetch_optional(conn).await
}

/// Touches the account row and returns it. As the first statement of a transaction this takes the write lock, giving
/// `SELECT ... FOR UPDATE` semantics for everything that follows. Returns `None` if the account does not exist.
pub async fn lock_account(
    id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<UserAccount>, sqlx::Error> {
    sqlx::query_as("UPDATE user_accounts SET updated_at = $1 WHERE id = $2 RETURNING *")
        .bind(now)
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn set_balance(
    id: i64,
    balance: Cents,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<UserAccount, sqlx::Error> {
    sqlx::query_as("UPDATE user_accounts SET balance = $1, updated_at = $2 WHERE id = $3 RETURNING *")
        .bind(balance.value())
        .bind(now)
        .bind(id)
        .fetch_one(conn)
        .await
}
