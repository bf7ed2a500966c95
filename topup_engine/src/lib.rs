//! Top-up Engine
//!
//! The top-up engine credits user balances for payments confirmed by an external payment gateway, and guarantees that
//! each successful payment is credited **exactly once**, even when the gateway delivers duplicate webhooks, a worker
//! crashes mid-credit, or several workers race on the same payment. It also reconciles the inverse failure: charges
//! for services that were paid for but never delivered are found and refunded.
//!
//! The library is divided into these sections:
//! 1. Storage ([`mod@sqlite`]). SQLite is the supported backend. Use the public API rather than the storage traits
//!    directly. The data types stored in the database are defined in [`mod@db_types`] and are public.
//! 2. Collaborator contracts ([`mod@traits`]): the storage port, the lock service, the dead-letter channel and the
//!    gateway client. Lock service implementations live in [`mod@lock`].
//! 3. The public API ([`mod@engine_api`]): crediting, the webhook pipeline, reconciliation, top-up initiation and
//!    charges.
//!
//! The engine emits events when payments are credited, dead-lettered or refunded. See [`mod@events`] to hook into them.
pub mod db_types;
pub mod engine_api;
pub mod events;
pub mod helpers;
pub mod lock;
pub mod state_machine;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use engine_api::{
    charge_api::ChargeApi,
    credit_api::{CreditApi, CreditSettings},
    errors::CreditError,
    idempotency::{IdempotencyGuard, IdempotencyLookup, IdempotencyStatus},
    initiation_api::{InitiationApi, TopupInitiation},
    reconciliation_api::{ReconcileReport, ReconciliationApi},
    webhook_api::{ReplayReport, WebhookApi},
    webhook_objects::{GatewayWebhook, WebhookOutcome},
};
pub use lock::MemoryLockService;
#[cfg(feature = "redis")]
pub use lock::RedisLockService;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{
    ChargeManagement,
    DeadLetterChannel,
    GatewayClient,
    LedgerError,
    LedgerStore,
    LockService,
};
