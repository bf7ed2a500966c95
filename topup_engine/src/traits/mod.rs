//! # Collaborator contracts
//!
//! The engine talks to every external system through one of the traits in this module. Backends (SQLite, Redis, a
//! REST gateway client, in-memory test doubles) implement them, and the public API types in [`crate::engine_api`] are
//! generic over them.
//!
//! * [`LedgerStore`] is the storage port for payment records, balances and the ledger. It owns the atomic credit
//!   transaction.
//! * [`ChargeManagement`] manages charge records (paid, possibly-unfulfilled units of service).
//! * [`DeadLetterChannel`] is the durable sink for webhook events that exhausted their retries.
//! * [`LockService`] is the distributed mutual-exclusion primitive, with TTL-based auto-release.
//! * [`GatewayClient`] is the outbound payment gateway client.
mod charge_management;
mod data_objects;
mod dead_letter_channel;
mod gateway_client;
mod ledger_store;
mod lock_service;

pub use charge_management::ChargeManagement;
pub use data_objects::{CreditOutcome, CreditReceipt, CreditRequest, CreditSource, InsertPaymentResult};
pub use dead_letter_channel::DeadLetterChannel;
pub use gateway_client::{
    GatewayClient,
    GatewayError,
    GatewayPaymentStatus,
    InitializePaymentRequest,
    InitializedPayment,
    VerifiedPayment,
};
pub use ledger_store::{LedgerError, LedgerStore};
pub use lock_service::{LockError, LockService, LockToken};
