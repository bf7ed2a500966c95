//! # Top-up engine public API
//!
//! The `engine_api` module exposes the programmatic API of the engine. Each API object is generic over the backend
//! traits it needs, so deployments can mix backends (for example, SQLite storage with a Redis lock service).
//!
//! * [`credit_api`] is the Credit Operator: the locked, transactional balance credit.
//! * [`webhook_api`] authenticates gateway webhooks and drives the credit with retries and dead-lettering.
//! * [`reconciliation_api`] refunds paid-for services that were never delivered.
//! * [`initiation_api`] starts top-ups with the payment gateway.
//! * [`charge_api`] debits users for paid services.
//! * [`idempotency`] answers whether a payment has been seen, is in flight, or is done.
//!
//! # API usage
//!
//! ```rust,ignore
//! use topup_engine::{CreditApi, MemoryLockService, SqliteDatabase, WebhookApi};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! let credit_api = CreditApi::new(db, MemoryLockService::new(), producers.clone());
//! let webhooks = WebhookApi::new(credit_api, secret, producers);
//! let outcome = webhooks.process_webhook(&body, signature).await?;
//! ```
pub mod charge_api;
pub mod credit_api;
pub mod errors;
pub mod idempotency;
pub mod initiation_api;
pub mod reconciliation_api;
pub mod webhook_api;
pub mod webhook_objects;
