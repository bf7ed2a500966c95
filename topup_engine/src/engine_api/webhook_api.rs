//! The webhook retry pipeline.
//!
//! Inbound gateway notifications are authenticated, de-duplicated through the [`IdempotencyGuard`], and credited
//! through the [`CreditApi`] with bounded, jittered exponential backoff. Events that still fail after the last retry
//! are parked in the dead-letter channel, the payment is marked `failed`, and operators are alerted with a
//! [`PaymentDeadLetteredEvent`].
use std::fmt::Debug;

use chrono::Utc;
use log::*;
use serde::{Deserialize, Serialize};
use topup_common::{Cents, Secret};

use crate::{
    db_types::{NewDeadLetter, PaymentRecord, PaymentReference},
    engine_api::{
        credit_api::{mark_payment_failed, CreditApi},
        errors::CreditError,
        idempotency::{IdempotencyGuard, IdempotencyLookup, IdempotencyStatus},
        webhook_objects::{GatewayWebhook, WebhookData, WebhookEventKind, WebhookOutcome},
    },
    events::{EventProducers, PaymentDeadLetteredEvent},
    helpers::{verify_signature, RetryPolicy},
    traits::{
        CreditOutcome,
        CreditRequest,
        DeadLetterChannel,
        GatewayClient,
        GatewayPaymentStatus,
        LedgerStore,
        LockService,
    },
};

/// What the gateway told us about a payment, to be checked against our own record.
#[derive(Debug, Clone, Copy, Default)]
struct ReportedPayment {
    user_id: Option<i64>,
    amount: Option<Cents>,
    credit_amount: Option<Cents>,
}

/// Whether an event that exhausts its retries is dead-lettered, or the last error is returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnExhaustion {
    DeadLetter,
    ReturnError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub examined: usize,
    pub replayed: usize,
    pub failed: usize,
    pub results: Vec<ReplayResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayResult {
    pub dead_letter_id: i64,
    pub outcome: Option<WebhookOutcome>,
    pub error: Option<String>,
}

pub struct WebhookApi<B, L> {
    credit_api: CreditApi<B, L>,
    guard: IdempotencyGuard<B>,
    secret: Secret<String>,
    retry: RetryPolicy,
    producers: EventProducers,
}

impl<B, L> Debug for WebhookApi<B, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WebhookApi ({:?})", self.retry)
    }
}

impl<B: Clone + LedgerStore, L> WebhookApi<B, L> {
    pub fn new(credit_api: CreditApi<B, L>, secret: Secret<String>, producers: EventProducers) -> Self {
        let guard = IdempotencyGuard::new(credit_api.db().clone());
        Self { credit_api, guard, secret, retry: RetryPolicy::default(), producers }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl<B, L> WebhookApi<B, L>
where
    B: LedgerStore + DeadLetterChannel,
    L: LockService,
{
    /// Handles one webhook delivery. `body` must be the raw request body, exactly as received.
    ///
    /// * A missing or wrong signature fails with [`CreditError::InvalidSignature`], before anything is parsed.
    /// * A body that is not a valid event, or a payment event without a reference, fails with
    ///   [`CreditError::Validation`].
    /// * Transient failures are retried. Exhausting the retries is not an error: the event is dead-lettered and
    ///   [`WebhookOutcome::DeadLettered`] is returned.
    pub async fn process_webhook(&self, body: &[u8], signature: Option<&str>) -> Result<WebhookOutcome, CreditError> {
        verify_signature(self.secret.reveal(), body, signature).map_err(|e| {
            warn!("📨️ Rejecting webhook: {e}");
            CreditError::InvalidSignature(e)
        })?;
        let webhook: GatewayWebhook = serde_json::from_slice(body).map_err(|e| {
            warn!("📨️ Webhook body is not a valid gateway event: {e}");
            CreditError::Validation(format!("Malformed webhook payload: {e}"))
        })?;
        let raw = String::from_utf8_lossy(body);
        self.handle_event(&webhook, &raw, OnExhaustion::DeadLetter).await
    }

    /// Re-processes up to `limit` pending dead letters. Their signatures were verified when they first arrived.
    pub async fn replay_dead_letters(&self, limit: i64) -> Result<ReplayReport, CreditError> {
        let db = self.credit_api.db();
        let letters = db.fetch_pending_dead_letters(limit).await?;
        let mut report = ReplayReport { examined: letters.len(), ..Default::default() };
        for letter in letters {
            info!("📨️ Replaying dead letter #{} ({:?})", letter.id, letter.reference);
            let result = match serde_json::from_str::<GatewayWebhook>(&letter.payload) {
                Ok(webhook) => self.handle_event(&webhook, &letter.payload, OnExhaustion::ReturnError).await,
                Err(e) => Err(CreditError::Validation(format!("Stored payload is not a valid gateway event: {e}"))),
            };
            match result {
                Ok(WebhookOutcome::Processing { reference }) => {
                    let message = format!("Payment {reference} is still being processed");
                    db.record_failed_replay(letter.id, &message).await?;
                    report.failed += 1;
                    let result = ReplayResult { dead_letter_id: letter.id, outcome: None, error: Some(message) };
                    report.results.push(result);
                },
                Ok(outcome) => {
                    db.mark_dead_letter_replayed(letter.id).await?;
                    report.replayed += 1;
                    let result = ReplayResult { dead_letter_id: letter.id, outcome: Some(outcome), error: None };
                    report.results.push(result);
                },
                Err(e) => {
                    warn!("📨️ Dead letter #{} failed again: {e}", letter.id);
                    db.record_failed_replay(letter.id, &e.to_string()).await?;
                    report.failed += 1;
                    report.results.push(ReplayResult {
                        dead_letter_id: letter.id,
                        outcome: None,
                        error: Some(e.to_string()),
                    });
                },
            }
        }
        info!("📨️ Dead letter replay complete. {} replayed, {} still failing", report.replayed, report.failed);
        Ok(report)
    }

    /// Handles the user's return from the gateway's payment page. The redirect carries no signature, so the payment
    /// status is fetched from the gateway itself before anything is credited.
    pub async fn process_callback<G: GatewayClient>(
        &self,
        gateway: &G,
        reference: &PaymentReference,
    ) -> Result<WebhookOutcome, CreditError> {
        let verified = gateway.verify_payment(reference).await?;
        debug!("📨️ Gateway reports payment {reference} as {:?}", verified.status);
        match verified.status {
            GatewayPaymentStatus::Success => {
                let reported = ReportedPayment { amount: Some(verified.amount), ..Default::default() };
                // Stored in webhook form so that a dead-lettered callback can be replayed like any other event
                let webhook = GatewayWebhook {
                    event: "charge.success".into(),
                    data: WebhookData {
                        reference: Some(reference.to_string()),
                        amount: Some(verified.amount.value()),
                        ..Default::default()
                    },
                };
                let raw = serde_json::to_string(&webhook)
                    .map_err(|e| CreditError::Validation(format!("Could not serialize callback event: {e}")))?;
                self.handle_success(reference, reported, &webhook.event, &raw, OnExhaustion::DeadLetter).await
            },
            GatewayPaymentStatus::Failed | GatewayPaymentStatus::Abandoned => {
                let reason = format!("Gateway verification returned {:?}", verified.status);
                self.handle_failure(reference, &reason).await
            },
            GatewayPaymentStatus::Pending => {
                Ok(WebhookOutcome::Ignored { reason: format!("Payment {reference} is still pending at the gateway") })
            },
        }
    }

    async fn handle_event(
        &self,
        webhook: &GatewayWebhook,
        raw: &str,
        on_exhaustion: OnExhaustion,
    ) -> Result<WebhookOutcome, CreditError> {
        let kind = webhook.kind();
        if let WebhookEventKind::Other(event) = &kind {
            debug!("📨️ Ignoring {event} event");
            return Ok(WebhookOutcome::Ignored { reason: format!("Event type {event} is not handled") });
        }
        let reference = webhook.reference().ok_or_else(|| {
            warn!("📨️ {} event has no payment reference", webhook.event);
            CreditError::Validation("The event has no payment reference".into())
        })?;
        if kind == WebhookEventKind::Failure {
            return self.handle_failure(&reference, &webhook.failure_reason()).await;
        }
        let reported = ReportedPayment {
            user_id: webhook.data.metadata.user_id,
            amount: webhook.data.amount.map(Cents::from),
            credit_amount: webhook.data.metadata.credit_amount.map(Cents::from),
        };
        self.handle_success(&reference, reported, &webhook.event, raw, on_exhaustion).await
    }

    async fn handle_success(
        &self,
        reference: &PaymentReference,
        reported: ReportedPayment,
        event: &str,
        raw: &str,
        on_exhaustion: OnExhaustion,
    ) -> Result<WebhookOutcome, CreditError> {
        let record = match self.guard.check_or_reserve(IdempotencyLookup::Reference(reference)).await? {
            IdempotencyStatus::NotFound => {
                info!("📨️ Payment {reference} is unknown. Ignoring {event}.");
                return Ok(WebhookOutcome::Ignored { reason: format!("No payment record for {reference}") });
            },
            IdempotencyStatus::Completed(receipt) => {
                debug!("📨️ Duplicate {event} for {reference}");
                return Ok(WebhookOutcome::Duplicate { receipt });
            },
            IdempotencyStatus::InFlight(record) => {
                let stale_after = chrono::Duration::from_std(self.credit_api.settings().lock_ttl)
                    .unwrap_or_else(|_| chrono::Duration::seconds(10));
                if !record.is_stale_in_flight(Utc::now(), stale_after) {
                    debug!("📨️ Payment {reference} is already being processed");
                    return Ok(WebhookOutcome::Processing { reference: reference.to_string() });
                }
                warn!("📨️ Payment {reference} has been processing for too long. Taking it over.");
                record
            },
            IdempotencyStatus::Open(record) => record,
        };
        check_reported_matches(&record, &reported)?;
        let request = CreditRequest::for_payment(&record);
        self.credit_with_retry(request, reference, event, raw, on_exhaustion).await
    }

    async fn credit_with_retry(
        &self,
        request: CreditRequest,
        reference: &PaymentReference,
        event: &str,
        raw: &str,
        on_exhaustion: OnExhaustion,
    ) -> Result<WebhookOutcome, CreditError> {
        let mut retry = 0;
        loop {
            match self.credit_api.credit(request.clone()).await {
                Ok(CreditOutcome::Credited(receipt)) => return Ok(WebhookOutcome::Credited { receipt }),
                Ok(CreditOutcome::AlreadyCredited(receipt)) => return Ok(WebhookOutcome::Duplicate { receipt }),
                Err(e) if e.is_transient() && retry < self.retry.max_retries => {
                    let delay = self.retry.delay_for(retry);
                    retry += 1;
                    warn!(
                        "📨️ Attempt {retry}/{} to credit {reference} failed: {e}. Retrying in {}ms",
                        self.retry.max_attempts(),
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) if e.is_transient() => {
                    error!("📨️ Crediting {reference} failed after {} attempts: {e}", self.retry.max_attempts());
                    return match on_exhaustion {
                        OnExhaustion::DeadLetter => self.dead_letter(reference, event, raw, e).await,
                        OnExhaustion::ReturnError => Err(e),
                    };
                },
                Err(e) => {
                    warn!("📨️ Crediting {reference} failed permanently: {e}");
                    return Err(e);
                },
            }
        }
    }

    async fn dead_letter(
        &self,
        reference: &PaymentReference,
        event: &str,
        raw: &str,
        cause: CreditError,
    ) -> Result<WebhookOutcome, CreditError> {
        let error_message = cause.to_string();
        let db = self.credit_api.db();
        mark_payment_failed(db, reference, &error_message).await?;
        let letter = NewDeadLetter {
            reference: Some(reference.to_string()),
            event: event.to_string(),
            payload: raw.to_string(),
            error_message: error_message.clone(),
            attempts: i64::from(self.retry.max_attempts()),
        };
        let letter = db.enqueue(letter).await?;
        error!("📨️ Payment {reference} was dead-lettered as #{}. Operator attention is required.", letter.id);
        let alert = PaymentDeadLetteredEvent {
            dead_letter_id: letter.id,
            reference: letter.reference.clone(),
            error_message: error_message.clone(),
            attempts: letter.attempts,
            timestamp: letter.created_at,
        };
        self.producers.publish_payment_dead_lettered(alert).await;
        Ok(WebhookOutcome::DeadLettered {
            reference: reference.to_string(),
            dead_letter_id: letter.id,
            error: error_message,
        })
    }

    /// Records a gateway-reported failure. No lock is taken and no balance is touched.
    async fn handle_failure(&self, reference: &PaymentReference, reason: &str) -> Result<WebhookOutcome, CreditError> {
        let db = self.credit_api.db();
        let Some(record) = db.fetch_payment_by_reference(reference).await? else {
            info!("📨️ Failure reported for unknown payment {reference}. Ignoring.");
            return Ok(WebhookOutcome::Ignored { reason: format!("No payment record for {reference}") });
        };
        if record.credited {
            warn!("📨️ Gateway reported a failure for {reference}, which has already been credited. Ignoring.");
            return Ok(WebhookOutcome::Ignored { reason: format!("Payment {reference} has already been credited") });
        }
        mark_payment_failed(db, reference, reason).await?;
        Ok(WebhookOutcome::FailureRecorded { reference: reference.to_string() })
    }
}

fn check_reported_matches(record: &PaymentRecord, reported: &ReportedPayment) -> Result<(), CreditError> {
    let mismatch = reported.user_id.is_some_and(|u| u != record.user_id) ||
        reported.amount.is_some_and(|a| a != record.amount) ||
        reported.credit_amount.is_some_and(|c| c != record.credit_amount);
    if mismatch {
        error!(
            "🚨️ Gateway event for {} does not match the payment record. Reported: {reported:?}. Stored: user {}, amount \
             {}, credit {}",
            record.reference, record.user_id, record.amount, record.credit_amount
        );
        return Err(CreditError::ConsistencyViolation(format!(
            "Gateway event does not match payment {}",
            record.reference
        )));
    }
    Ok(())
}
