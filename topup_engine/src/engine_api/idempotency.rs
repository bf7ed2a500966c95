//! The Idempotency Guard.
//!
//! Answers "has this operation already happened?" for a payment reference or a client idempotency key. The guard is
//! read-only. Reservation happens by inserting the [`PaymentRecord`], and the unique constraints on `reference` and
//! `idempotency_key` are the backstop when two callers race past the check.
use log::*;

use crate::{
    db_types::{PaymentRecord, PaymentReference, PaymentState},
    engine_api::errors::CreditError,
    traits::{CreditReceipt, LedgerStore},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyStatus {
    /// No record exists.
    NotFound,
    /// A worker is crediting this payment right now, or crashed while doing so. Use
    /// [`PaymentRecord::is_stale_in_flight`] to tell the two apart.
    InFlight(PaymentRecord),
    /// The payment has been credited. The receipt is the originally recorded result.
    Completed(CreditReceipt),
    /// The record exists in `pending` or `failed` state. It may be processed.
    Open(PaymentRecord),
}

#[derive(Debug, Clone, Copy)]
pub enum IdempotencyLookup<'a> {
    Reference(&'a PaymentReference),
    Key(&'a str),
}

#[derive(Clone)]
pub struct IdempotencyGuard<B> {
    db: B,
}

impl<B> IdempotencyGuard<B>
where B: LedgerStore
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    pub async fn check_or_reserve(&self, lookup: IdempotencyLookup<'_>) -> Result<IdempotencyStatus, CreditError> {
        let record = match lookup {
            IdempotencyLookup::Reference(reference) => self.db.fetch_payment_by_reference(reference).await?,
            IdempotencyLookup::Key(key) => self.db.fetch_payment_by_idempotency_key(key).await?,
        };
        let Some(record) = record else {
            trace!("💳️ {lookup:?} has not been seen before");
            return Ok(IdempotencyStatus::NotFound);
        };
        if record.credited || record.state == PaymentState::Completed {
            let entry = self.db.fetch_ledger_transaction(record.reference.as_str()).await?.ok_or_else(|| {
                error!("🚨️ Payment {} is marked as credited but has no ledger entry", record.reference);
                CreditError::ConsistencyViolation(format!("Payment {} has no ledger entry", record.reference))
            })?;
            return Ok(IdempotencyStatus::Completed(CreditReceipt {
                reference: entry.reference,
                user_id: entry.user_id,
                amount: entry.amount,
                new_balance: entry.balance_after,
                credited_at: entry.created_at,
            }));
        }
        match record.state {
            PaymentState::Processing => Ok(IdempotencyStatus::InFlight(record)),
            PaymentState::Pending | PaymentState::Failed => Ok(IdempotencyStatus::Open(record)),
            PaymentState::Completed | PaymentState::Refunded => {
                error!("🚨️ Payment {} is {} but was never credited", record.reference, record.state);
                Err(CreditError::ConsistencyViolation(format!(
                    "Payment {} is {} but was never credited",
                    record.reference, record.state
                )))
            },
        }
    }
}
