use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use topup_common::Cents;

use crate::traits::CreditReceipt;

/// Emitted once per successful payment credit. Duplicates never produce a second event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCreditedEvent {
    pub receipt: CreditReceipt,
}

impl PaymentCreditedEvent {
    pub fn new(receipt: CreditReceipt) -> Self {
        Self { receipt }
    }
}

/// Emitted when a webhook event exhausts its retries. This is the operator alert for dead-lettered payments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDeadLetteredEvent {
    pub dead_letter_id: i64,
    pub reference: Option<String>,
    pub error_message: String,
    pub attempts: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundIssuedEvent {
    pub charge_id: i64,
    pub user_id: i64,
    pub amount: Cents,
    pub receipt: CreditReceipt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    PaymentCredited(PaymentCreditedEvent),
    PaymentDeadLettered(PaymentDeadLetteredEvent),
    RefundIssued(RefundIssuedEvent),
}
