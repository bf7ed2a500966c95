//! The Credit Operator.
//!
//! [`CreditApi::credit`] is the only way balances go up. Each call:
//! 1. takes the distributed lock for the credit's source (wait 5s, TTL 10s by default),
//! 2. re-checks under the lock whether the credit already happened,
//! 3. moves a payment to `processing` and commits, so the in-flight state is visible to everyone else,
//! 4. hands over to [`LedgerStore::apply_credit`], which row-locks the user and applies the mutation atomically,
//! 5. releases the lock, on every path.
use std::{fmt::Debug, time::Duration};

use chrono::Utc;
use log::*;

use crate::{
    db_types::{PaymentRecord, PaymentReference, PaymentState},
    engine_api::errors::CreditError,
    events::{EventProducers, PaymentCreditedEvent},
    traits::{CreditOutcome, CreditRequest, CreditSource, LedgerError, LedgerStore, LockService},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditSettings {
    pub lock_ttl: Duration,
    pub lock_wait: Duration,
}

impl Default for CreditSettings {
    fn default() -> Self {
        Self { lock_ttl: Duration::from_secs(10), lock_wait: Duration::from_secs(5) }
    }
}

#[derive(Clone)]
pub struct CreditApi<B, L> {
    db: B,
    locks: L,
    producers: EventProducers,
    settings: CreditSettings,
}

impl<B, L> Debug for CreditApi<B, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CreditApi ({:?})", self.settings)
    }
}

impl<B, L> CreditApi<B, L> {
    pub fn new(db: B, locks: L, producers: EventProducers) -> Self {
        Self { db, locks, producers, settings: CreditSettings::default() }
    }

    pub fn with_settings(mut self, settings: CreditSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &CreditSettings {
        &self.settings
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B, L> CreditApi<B, L>
where
    B: LedgerStore,
    L: LockService,
{
    /// Credits `request.amount` to `request.user_id`, at most once per credit source.
    ///
    /// Returns [`CreditOutcome::AlreadyCredited`] with the original receipt when the source has been credited before.
    /// Fails with [`CreditError::LockUnavailable`] if the lock cannot be taken within the configured wait.
    pub async fn credit(&self, request: CreditRequest) -> Result<CreditOutcome, CreditError> {
        if !request.amount.is_positive() {
            return Err(CreditError::Validation(format!("Credit amount must be positive, got {}", request.amount)));
        }
        let key = request.source.lock_key();
        let token = self
            .locks
            .acquire(&key, self.settings.lock_ttl, self.settings.lock_wait)
            .await?
            .ok_or_else(|| CreditError::LockUnavailable(key.clone()))?;
        trace!("💳️ Lock {key} acquired");
        let result = self.credit_under_lock(&request).await;
        match self.locks.release(&key, &token).await {
            Ok(true) => trace!("💳️ Lock {key} released"),
            Ok(false) => warn!("💳️ Lock {key} expired before it was released. Consider raising the lock TTL."),
            Err(e) => warn!("💳️ Could not release lock {key}: {e}. It will expire on its own."),
        }
        let outcome = result?;
        match &outcome {
            CreditOutcome::Credited(receipt) => {
                info!("💳️ {} credited to user {} for {}", receipt.amount, receipt.user_id, receipt.reference);
                if matches!(request.source, CreditSource::Payment { .. }) {
                    self.producers.publish_payment_credited(PaymentCreditedEvent::new(receipt.clone())).await;
                }
            },
            CreditOutcome::AlreadyCredited(receipt) => {
                debug!("💳️ {} was already credited. Returning the original receipt.", receipt.reference);
            },
        }
        Ok(outcome)
    }

    /// Credits a payment by reference, for the user and amount stored on its record.
    pub async fn credit_payment(&self, reference: &PaymentReference) -> Result<CreditOutcome, CreditError> {
        let record = self
            .db
            .fetch_payment_by_reference(reference)
            .await?
            .ok_or_else(|| CreditError::PaymentRecordNotFound(reference.to_string()))?;
        self.credit(CreditRequest::for_payment(&record)).await
    }

    async fn credit_under_lock(&self, request: &CreditRequest) -> Result<CreditOutcome, CreditError> {
        if let CreditSource::Payment { reference } = &request.source {
            let record = self
                .db
                .fetch_payment_by_reference(reference)
                .await?
                .ok_or_else(|| CreditError::PaymentRecordNotFound(reference.to_string()))?;
            // Credited records go straight to the store, which answers with the original receipt
            if !record.credited {
                check_request_matches(&record, request)?;
                self.start_processing(record).await?;
            }
        }
        let outcome = self.db.apply_credit(request).await?;
        Ok(outcome)
    }

    /// Moves the payment to `processing` and commits. A record that is already `processing` was left behind by a
    /// holder whose lock expired, and is resumed as is.
    async fn start_processing(&self, record: PaymentRecord) -> Result<PaymentRecord, CreditError> {
        if record.state == PaymentState::Processing {
            warn!("💳️ Payment {} was left in processing by an earlier worker. Resuming it.", record.reference);
            return Ok(record);
        }
        let (next, transition) =
            record.transitioned(PaymentState::Processing, Utc::now(), None).map_err(LedgerError::from)?;
        let saved = self.db.save_transition(&next, &transition, record.lock_version).await?;
        trace!("💳️ Payment {} is now processing (v{})", saved.reference, saved.lock_version);
        Ok(saved)
    }
}

fn check_request_matches(record: &PaymentRecord, request: &CreditRequest) -> Result<(), CreditError> {
    if record.user_id == request.user_id && record.credit_amount == request.amount {
        return Ok(());
    }
    error!(
        "🚨️ Credit request for {} ({} to user {}) does not match the payment record ({} to user {})",
        record.reference, request.amount, request.user_id, record.credit_amount, record.user_id
    );
    Err(CreditError::ConsistencyViolation(format!("Credit request does not match payment {}", record.reference)))
}

/// Moves a payment to `failed` with `message`, retrying a few times if the record is modified concurrently.
///
/// Credited payments are left alone, as are payments that are already `failed`. Returns the record as it was left.
pub async fn mark_payment_failed<B: LedgerStore>(
    db: &B,
    reference: &PaymentReference,
    message: &str,
) -> Result<PaymentRecord, CreditError> {
    const MAX_ATTEMPTS: usize = 3;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let record = db
            .fetch_payment_by_reference(reference)
            .await?
            .ok_or_else(|| CreditError::PaymentRecordNotFound(reference.to_string()))?;
        if record.credited || record.state == PaymentState::Failed {
            debug!("💳️ Payment {reference} is {}. Not marking it as failed.", record.state);
            return Ok(record);
        }
        let (next, transition) = record
            .transitioned(PaymentState::Failed, Utc::now(), Some(message.to_string()))
            .map_err(LedgerError::from)?;
        match db.save_transition(&next, &transition, record.lock_version).await {
            Ok(saved) => {
                info!("💳️ Payment {reference} marked as failed: {message}");
                return Ok(saved);
            },
            Err(LedgerError::StaleRecord(_)) if attempt < MAX_ATTEMPTS => {
                debug!("💳️ Payment {reference} changed while marking it failed. Reloading.");
            },
            Err(e) => return Err(e.into()),
        }
    }
}
