//! SQLite storage backend.
//!
//! [`SqliteDatabase`] implements [`LedgerStore`](crate::traits::LedgerStore),
//! [`ChargeManagement`](crate::traits::ChargeManagement) and [`DeadLetterChannel`](crate::traits::DeadLetterChannel)
//! over a single connection pool. The queries themselves live in [`db`].
mod sqlite_impl;

pub mod db;
pub use sqlite_impl::SqliteDatabase;
