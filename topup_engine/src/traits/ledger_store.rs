use thiserror::Error;

use crate::{
    db_types::{LedgerTransaction, NewPaymentRecord, PaymentRecord, PaymentReference, StateTransition, UserAccount},
    state_machine::IllegalTransition,
    traits::data_objects::{CreditOutcome, CreditRequest, InsertPaymentResult},
};

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("User account {0} does not exist")]
    UserNotFound(i64),
    #[error("Payment {0} does not exist")]
    PaymentNotFound(String),
    #[error("Charge {0} does not exist")]
    ChargeNotFound(i64),
    #[error("Dead letter {0} does not exist")]
    DeadLetterNotFound(i64),
    #[error("Payment {0} was modified concurrently. Reload and try again.")]
    StaleRecord(String),
    #[error("{0}")]
    IllegalTransition(#[from] IllegalTransition),
    #[error("Account {user_id} has insufficient funds. Balance: {balance}, required: {required}")]
    InsufficientFunds { user_id: i64, balance: String, required: String },
    #[error("Charge {0} has been refunded or delivered and can no longer be closed")]
    ChargeFinalized(i64),
    #[error("Charge {id} cannot be refunded while it is {status}")]
    ChargeNotRefundable { id: i64, status: String },
    #[error("Ledger inconsistency: {0}")]
    Inconsistent(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::DatabaseError(e.to_string())
    }
}

impl LedgerError {
    /// Errors that may succeed if the operation is simply tried again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DatabaseError(_) | Self::StaleRecord(_))
    }
}

/// The storage port for payments, balances and the ledger.
///
/// Every method that writes is atomic. The one method that mutates balances, [`LedgerStore::apply_credit`], must take
/// a write lock on the user row before reading anything it depends on, so that a concurrent credit, debit or admin
/// adjustment for the same user cannot interleave with it.
#[allow(async_fn_in_trait)]
pub trait LedgerStore: Clone {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Creates an empty account with a zero balance.
    async fn create_user_account(&self) -> Result<UserAccount, LedgerError>;

    async fn fetch_user_account(&self, user_id: i64) -> Result<Option<UserAccount>, LedgerError>;

    /// Stores a new payment record in `pending` state.
    ///
    /// The unique constraints on `reference` and `idempotency_key` are the storage-level de-duplication backstop. If
    /// either is violated, the existing record is returned as [`InsertPaymentResult::AlreadyExists`].
    async fn insert_payment(&self, payment: NewPaymentRecord) -> Result<InsertPaymentResult, LedgerError>;

    /// Records the redirect URL and access code the gateway issued for this payment.
    async fn set_gateway_details(
        &self,
        reference: &PaymentReference,
        authorization_url: &str,
        access_code: &str,
    ) -> Result<(), LedgerError>;

    async fn fetch_payment_by_reference(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<PaymentRecord>, LedgerError>;

    async fn fetch_payment_by_idempotency_key(&self, key: &str) -> Result<Option<PaymentRecord>, LedgerError>;

    /// Persists a state transition that was computed by [`PaymentRecord::transitioned`].
    ///
    /// The write only succeeds if the stored `lock_version` still equals `expected_version`; otherwise
    /// [`LedgerError::StaleRecord`] is returned and nothing is written. Returns the stored record with its new
    /// `lock_version`.
    async fn save_transition(
        &self,
        record: &PaymentRecord,
        transition: &StateTransition,
        expected_version: i64,
    ) -> Result<PaymentRecord, LedgerError>;

    /// The crediting critical section. In one atomic transaction:
    /// 1. write-lock the user row,
    /// 2. re-check whether this credit has already been applied (returning the original receipt if so),
    /// 3. add the amount to the balance and write the ledger transaction,
    /// 4. for payments, set `credited` and move the record to `completed`; for charge refunds, flip the charge to
    ///    `refunded`.
    ///
    /// Any failure rolls the whole transaction back.
    async fn apply_credit(&self, request: &CreditRequest) -> Result<CreditOutcome, LedgerError>;

    async fn fetch_ledger_transaction(&self, reference: &str) -> Result<Option<LedgerTransaction>, LedgerError>;

    /// All ledger transactions for the user, in creation order.
    async fn fetch_ledger_for_user(&self, user_id: i64) -> Result<Vec<LedgerTransaction>, LedgerError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), LedgerError> {
        Ok(())
    }
}
