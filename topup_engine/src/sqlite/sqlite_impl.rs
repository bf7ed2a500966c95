//! `SqliteDatabase` is the SQLite implementation of the engine's storage traits.
//!
//! Every method that writes runs in its own transaction. Transactions that read-then-write begin by touching the row
//! they depend on, so the SQLite write lock is held from the first statement (see [`crate::sqlite::db`]).
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use sqlx::{migrate, SqliteConnection, SqlitePool};

use super::db::{
    charges,
    db_url,
    dead_letters,
    is_unique_violation,
    ledger,
    ledger::NewLedgerEntry,
    new_pool,
    payments,
    user_accounts,
};
use crate::{
    db_types::{
        ChargeRecord,
        ChargeStatus,
        DeadLetter,
        LedgerTransaction,
        LedgerTransactionType,
        NewCharge,
        NewDeadLetter,
        NewPaymentRecord,
        PaymentRecord,
        PaymentReference,
        PaymentState,
        StateTransition,
        UserAccount,
    },
    traits::{
        ChargeManagement,
        CreditOutcome,
        CreditReceipt,
        CreditRequest,
        CreditSource,
        DeadLetterChannel,
        InsertPaymentResult,
        LedgerError,
        LedgerStore,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SqliteDatabase ({})", self.url)
    }
}

impl SqliteDatabase {
    /// Connects to the database given by `TOPUP_DATABASE_URL`.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Brings the schema up to date. Safe to call on every start.
    pub async fn run_migrations(&self) -> Result<(), LedgerError> {
        migrate!("./src/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::DatabaseError(format!("Migration failed: {e}")))?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_existing_payment(
        &self,
        payment: &NewPaymentRecord,
        conn: &mut SqliteConnection,
    ) -> Result<PaymentRecord, LedgerError> {
        if let Some(key) = &payment.idempotency_key {
            if let Some(existing) = payments::fetch_by_idempotency_key(key, conn).await? {
                return Ok(existing);
            }
        }
        payments::fetch_by_reference(&payment.reference, conn).await?.ok_or_else(|| {
            LedgerError::Inconsistent(format!("Payment {} violated a unique key but was not found", payment.reference))
        })
    }
}

/// Checks that an existing ledger entry is the credit that `request` describes.
fn receipt_for_existing(entry: LedgerTransaction, request: &CreditRequest) -> Result<CreditReceipt, LedgerError> {
    if entry.user_id != request.user_id || entry.amount != request.amount {
        error!(
            "🚨️ Ledger entry {} was recorded for user {} ({}) but a credit of {} to user {} was requested",
            entry.reference, entry.user_id, entry.amount, request.amount, request.user_id
        );
        return Err(LedgerError::Inconsistent(format!(
            "Ledger entry {} does not match the requested credit",
            entry.reference
        )));
    }
    Ok(receipt_from_entry(entry))
}

fn receipt_from_entry(entry: LedgerTransaction) -> CreditReceipt {
    CreditReceipt {
        reference: entry.reference,
        user_id: entry.user_id,
        amount: entry.amount,
        new_balance: entry.balance_after,
        credited_at: entry.created_at,
    }
}

/// Moves the payment to `completed` and sets `credited`, inside the caller's transaction.
async fn complete_payment(
    reference: &PaymentReference,
    request: &CreditRequest,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), LedgerError> {
    let record = payments::fetch_by_reference(reference, conn)
        .await?
        .ok_or_else(|| LedgerError::PaymentNotFound(reference.to_string()))?;
    if record.user_id != request.user_id || record.credit_amount != request.amount {
        error!(
            "🚨️ Payment {reference} belongs to user {} for {}, but a credit of {} to user {} was requested",
            record.user_id, record.credit_amount, request.amount, request.user_id
        );
        return Err(LedgerError::Inconsistent(format!("Payment {reference} does not match the requested credit")));
    }
    if record.credited {
        error!("🚨️ Payment {reference} is marked as credited but has no ledger entry");
        return Err(LedgerError::Inconsistent(format!("Payment {reference} is credited without a ledger entry")));
    }
    let (completed, transition) = record.transitioned(PaymentState::Completed, now, None)?;
    payments::update_if_version(&completed, record.lock_version, conn)
        .await?
        .ok_or_else(|| LedgerError::StaleRecord(reference.to_string()))?;
    payments::insert_transition(reference, &transition, conn).await?;
    Ok(())
}

/// Flips an unfulfilled charge to `refunded`, inside the caller's transaction.
async fn refund_charge(
    charge_id: i64,
    request: &CreditRequest,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), LedgerError> {
    let charge = charges::fetch_charge(charge_id, conn).await?.ok_or(LedgerError::ChargeNotFound(charge_id))?;
    if charge.user_id != request.user_id || charge.cost != request.amount {
        error!(
            "🚨️ Charge #{charge_id} cost user {} {}, but a refund of {} to user {} was requested",
            charge.user_id, charge.cost, request.amount, request.user_id
        );
        return Err(LedgerError::Inconsistent(format!("Charge {charge_id} does not match the requested refund")));
    }
    match charge.status {
        ChargeStatus::Completed | ChargeStatus::Refunded => {
            Err(LedgerError::ChargeNotRefundable { id: charge_id, status: charge.status.to_string() })
        },
        _ => {
            charges::update_status(charge_id, ChargeStatus::Refunded, None, now, conn).await?;
            Ok(())
        },
    }
}

impl LedgerStore for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn create_user_account(&self) -> Result<UserAccount, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let account = user_accounts::create_account(Utc::now(), &mut conn).await?;
        Ok(account)
    }

    async fn fetch_user_account(&self, user_id: i64) -> Result<Option<UserAccount>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let account = user_accounts::fetch_account(user_id, &mut conn).await?;
        Ok(account)
    }

    async fn insert_payment(&self, payment: NewPaymentRecord) -> Result<InsertPaymentResult, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        match payments::insert_payment(payment.clone(), &mut conn).await {
            Ok(record) => Ok(InsertPaymentResult::Inserted(record)),
            Err(e) if is_unique_violation(&e) => {
                debug!("🗃️ Payment {} already exists. Returning the existing record.", payment.reference);
                let existing = self.fetch_existing_payment(&payment, &mut conn).await?;
                Ok(InsertPaymentResult::AlreadyExists(existing))
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn set_gateway_details(
        &self,
        reference: &PaymentReference,
        authorization_url: &str,
        access_code: &str,
    ) -> Result<(), LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let updated =
            payments::set_gateway_details(reference, authorization_url, access_code, Utc::now(), &mut conn).await?;
        if updated {
            Ok(())
        } else {
            Err(LedgerError::PaymentNotFound(reference.to_string()))
        }
    }

    async fn fetch_payment_by_reference(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<PaymentRecord>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let record = payments::fetch_by_reference(reference, &mut conn).await?;
        Ok(record)
    }

    async fn fetch_payment_by_idempotency_key(&self, key: &str) -> Result<Option<PaymentRecord>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let record = payments::fetch_by_idempotency_key(key, &mut conn).await?;
        Ok(record)
    }

    async fn save_transition(
        &self,
        record: &PaymentRecord,
        transition: &StateTransition,
        expected_version: i64,
    ) -> Result<PaymentRecord, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let updated = payments::update_if_version(record, expected_version, &mut tx).await?;
        if updated.is_none() {
            return match payments::fetch_by_reference(&record.reference, &mut tx).await? {
                Some(_) => Err(LedgerError::StaleRecord(record.reference.to_string())),
                None => Err(LedgerError::PaymentNotFound(record.reference.to_string())),
            };
        }
        payments::insert_transition(&record.reference, transition, &mut tx).await?;
        let saved = payments::fetch_by_reference(&record.reference, &mut tx)
            .await?
            .ok_or_else(|| LedgerError::PaymentNotFound(record.reference.to_string()))?;
        tx.commit().await?;
        Ok(saved)
    }

    async fn apply_credit(&self, request: &CreditRequest) -> Result<CreditOutcome, LedgerError> {
        let now = Utc::now();
        let reference = request.source.ledger_reference();
        let mut tx = self.pool.begin().await?;
        let account = user_accounts::lock_account(request.user_id, now, &mut tx)
            .await?
            .ok_or(LedgerError::UserNotFound(request.user_id))?;
        if let Some(existing) = ledger::fetch_by_reference(&reference, &mut tx).await? {
            // Dropping the transaction rolls back the row touch
            let receipt = receipt_for_existing(existing, request)?;
            debug!("🗃️ {reference} was already credited. Balance after credit was {}", receipt.new_balance);
            return Ok(CreditOutcome::AlreadyCredited(receipt));
        }
        match &request.source {
            CreditSource::Payment { reference } => complete_payment(reference, request, now, &mut tx).await?,
            CreditSource::ChargeRefund { charge_id } => refund_charge(*charge_id, request, now, &mut tx).await?,
        }
        let new_balance = account.balance + request.amount;
        user_accounts::set_balance(request.user_id, new_balance, now, &mut tx).await?;
        let entry = NewLedgerEntry {
            user_id: request.user_id,
            amount: request.amount,
            tx_type: request.source.transaction_type(),
            reference: &reference,
            balance_after: new_balance,
            created_at: now,
        };
        let entry = ledger::insert_entry(entry, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Credited {} to user {} for {reference}. New balance: {new_balance}", request.amount, request.user_id);
        Ok(CreditOutcome::Credited(receipt_from_entry(entry)))
    }

    async fn fetch_ledger_transaction(&self, reference: &str) -> Result<Option<LedgerTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let entry = ledger::fetch_by_reference(reference, &mut conn).await?;
        Ok(entry)
    }

    async fn fetch_ledger_for_user(&self, user_id: i64) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let entries = ledger::fetch_for_user(user_id, &mut conn).await?;
        Ok(entries)
    }

    async fn close(&mut self) -> Result<(), LedgerError> {
        self.pool.close().await;
        Ok(())
    }
}

impl ChargeManagement for SqliteDatabase {
    async fn open_charge(&self, charge: NewCharge) -> Result<(ChargeRecord, LedgerTransaction), LedgerError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let account = user_accounts::lock_account(charge.user_id, now, &mut tx)
            .await?
            .ok_or(LedgerError::UserNotFound(charge.user_id))?;
        if account.balance < charge.cost {
            return Err(LedgerError::InsufficientFunds {
                user_id: account.id,
                balance: account.balance.to_string(),
                required: charge.cost.to_string(),
            });
        }
        let record = charges::insert_charge(charge, &mut tx).await?;
        let new_balance = account.balance - record.cost;
        user_accounts::set_balance(account.id, new_balance, now, &mut tx).await?;
        let reference = record.debit_reference();
        let entry = NewLedgerEntry {
            user_id: account.id,
            amount: -record.cost,
            tx_type: LedgerTransactionType::Debit,
            reference: &reference,
            balance_after: new_balance,
            created_at: now,
        };
        let entry = ledger::insert_entry(entry, &mut tx).await?;
        tx.commit().await?;
        Ok((record, entry))
    }

    async fn fetch_charge(&self, id: i64) -> Result<Option<ChargeRecord>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let charge = charges::fetch_charge(id, &mut conn).await?;
        Ok(charge)
    }

    async fn update_charge_status(
        &self,
        id: i64,
        status: ChargeStatus,
        fulfillment_marker: Option<String>,
    ) -> Result<ChargeRecord, LedgerError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let charge = charges::lock_charge(id, now, &mut tx).await?.ok_or(LedgerError::ChargeNotFound(id))?;
        // A delivered charge may not become refundable
        let delivered = charge.status == ChargeStatus::Completed && status.is_unfulfilled();
        if charge.status == ChargeStatus::Refunded || delivered {
            return Err(LedgerError::ChargeFinalized(id));
        }
        let updated = charges::update_status(id, status, fulfillment_marker.as_deref(), now, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Charge #{id}: {} -> {}", charge.status, updated.status);
        Ok(updated)
    }

    async fn fetch_refund_candidates(&self, since: DateTime<Utc>) -> Result<Vec<ChargeRecord>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let candidates = charges::fetch_refund_candidates(since, &mut conn).await?;
        Ok(candidates)
    }

    async fn mark_charge_refunded(&self, id: i64) -> Result<ChargeRecord, LedgerError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let charge = charges::lock_charge(id, now, &mut tx).await?.ok_or(LedgerError::ChargeNotFound(id))?;
        if ledger::fetch_by_reference(&charge.refund_reference(), &mut tx).await?.is_none() {
            return Err(LedgerError::Inconsistent(format!("Charge {id} has no refund in the ledger")));
        }
        let updated = charges::update_status(id, ChargeStatus::Refunded, None, now, &mut tx).await?;
        tx.commit().await?;
        Ok(updated)
    }
}

impl DeadLetterChannel for SqliteDatabase {
    async fn enqueue(&self, letter: NewDeadLetter) -> Result<DeadLetter, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let letter = dead_letters::insert(letter, Utc::now(), &mut conn).await?;
        warn!("🗃️ Dead letter #{} stored for {:?}", letter.id, letter.reference);
        Ok(letter)
    }

    async fn fetch_pending_dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let letters = dead_letters::fetch_pending(limit, &mut conn).await?;
        Ok(letters)
    }

    async fn fetch_dead_letter(&self, id: i64) -> Result<Option<DeadLetter>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let letter = dead_letters::fetch(id, &mut conn).await?;
        Ok(letter)
    }

    async fn mark_dead_letter_replayed(&self, id: i64) -> Result<DeadLetter, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        dead_letters::mark_replayed(id, Utc::now(), &mut conn).await?.ok_or(LedgerError::DeadLetterNotFound(id))
    }

    async fn record_failed_replay(&self, id: i64, error_message: &str) -> Result<DeadLetter, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        dead_letters::record_failure(id, error_message, &mut conn).await?.ok_or(LedgerError::DeadLetterNotFound(id))
    }
}
