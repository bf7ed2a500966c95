use std::fmt::Debug;

use log::*;
use serde::{Deserialize, Serialize};
use topup_common::Cents;

use crate::{
    db_types::{NewPaymentRecord, PaymentRecord, PaymentReference, PaymentState},
    engine_api::{credit_api::mark_payment_failed, errors::CreditError},
    traits::{GatewayClient, GatewayError, InitializePaymentRequest, InsertPaymentResult, LedgerStore},
};

/// The default fraud ceiling for a single top-up: $10,000.00
pub const DEFAULT_MAX_TOPUP: Cents = Cents::from_dollars(10_000);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopupInitiation {
    pub reference: PaymentReference,
    pub authorization_url: String,
    pub access_code: String,
    pub amount: Cents,
    /// True when the idempotency key matched an earlier initiation, which is returned unchanged.
    pub is_replay: bool,
}

/// Starts top-ups: records the payment and asks the gateway where to send the user to pay.
pub struct InitiationApi<B, G> {
    db: B,
    gateway: G,
    max_topup: Cents,
}

impl<B, G> Debug for InitiationApi<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InitiationApi (max {})", self.max_topup)
    }
}

impl<B, G> InitiationApi<B, G> {
    pub fn new(db: B, gateway: G) -> Self {
        Self { db, gateway, max_topup: DEFAULT_MAX_TOPUP }
    }

    pub fn with_max_topup(mut self, max_topup: Cents) -> Self {
        self.max_topup = max_topup;
        self
    }
}

impl<B, G> InitiationApi<B, G>
where
    B: LedgerStore,
    G: GatewayClient,
{
    /// Creates a `pending` payment for `amount` and initializes it with the gateway.
    ///
    /// Repeating a call with the same `idempotency_key` returns the original initiation instead of creating a second
    /// payment. If the gateway call fails, the payment is marked `failed` and the gateway error is returned.
    pub async fn initiate(
        &self,
        user_id: i64,
        amount: Cents,
        idempotency_key: Option<String>,
    ) -> Result<TopupInitiation, CreditError> {
        if !amount.is_positive() {
            return Err(CreditError::Validation(format!("Top-up amount must be positive, got {amount}")));
        }
        if amount > self.max_topup {
            warn!("💳️ User {user_id} tried to top up {amount}, above the {} ceiling", self.max_topup);
            return Err(CreditError::Validation(format!("Top-up amount may not exceed {}", self.max_topup)));
        }
        if self.db.fetch_user_account(user_id).await?.is_none() {
            return Err(CreditError::UserNotFound(user_id));
        }
        if let Some(key) = idempotency_key.as_deref() {
            if let Some(existing) = self.db.fetch_payment_by_idempotency_key(key).await? {
                debug!("💳️ Idempotency key {key} matches payment {}", existing.reference);
                return replay(existing, user_id);
            }
        }
        let mut payment = NewPaymentRecord::new(PaymentReference::random(), user_id, amount);
        if let Some(key) = idempotency_key {
            payment = payment.with_idempotency_key(key);
        }
        let record = match self.db.insert_payment(payment).await? {
            InsertPaymentResult::Inserted(record) => record,
            InsertPaymentResult::AlreadyExists(existing) => return replay(existing, user_id),
        };
        let request = InitializePaymentRequest {
            reference: record.reference.clone(),
            user_id,
            amount: record.amount,
            credit_amount: record.credit_amount,
        };
        match self.gateway.initialize_payment(&request).await {
            Ok(init) => {
                self.db.set_gateway_details(&record.reference, &init.authorization_url, &init.access_code).await?;
                info!("💳️ Top-up {} of {amount} initiated for user {user_id}", record.reference);
                Ok(TopupInitiation {
                    reference: record.reference,
                    authorization_url: init.authorization_url,
                    access_code: init.access_code,
                    amount,
                    is_replay: false,
                })
            },
            Err(e) => {
                warn!("💳️ Gateway could not initialize {}: {e}", record.reference);
                mark_payment_failed(&self.db, &record.reference, &e.to_string()).await?;
                Err(CreditError::Gateway(e))
            },
        }
    }
}

fn replay(existing: PaymentRecord, user_id: i64) -> Result<TopupInitiation, CreditError> {
    if existing.user_id != user_id {
        warn!("💳️ User {user_id} reused an idempotency key belonging to user {}", existing.user_id);
        return Err(CreditError::Validation("The idempotency key has already been used".into()));
    }
    match (existing.authorization_url, existing.access_code) {
        (Some(authorization_url), Some(access_code)) => Ok(TopupInitiation {
            reference: existing.reference,
            authorization_url,
            access_code,
            amount: existing.amount,
            is_replay: true,
        }),
        _ if existing.state == PaymentState::Failed => {
            let reason = existing.error_message.unwrap_or_else(|| "initialization failed".into());
            Err(CreditError::Gateway(GatewayError::Rejected(reason)))
        },
        _ => Err(CreditError::Validation(format!(
            "Top-up {} is still being initialized. Try again shortly.",
            existing.reference
        ))),
    }
}
