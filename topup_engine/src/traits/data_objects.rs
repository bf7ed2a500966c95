use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use topup_common::Cents;

use crate::db_types::{refund_reference_for, LedgerTransactionType, PaymentRecord, PaymentReference};

pub enum InsertPaymentResult {
    Inserted(PaymentRecord),
    /// A record with the same idempotency key (or reference) already exists. The existing record is returned.
    AlreadyExists(PaymentRecord),
}

/// What a credit pays for. Each source maps onto its own lock key and ledger reference, so payment credits and charge
/// refunds serialize independently and can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CreditSource {
    /// A gateway payment, identified by its reference.
    Payment { reference: PaymentReference },
    /// A compensating refund for an unfulfilled charge.
    ChargeRefund { charge_id: i64 },
}

impl CreditSource {
    pub fn payment<R: Into<PaymentReference>>(reference: R) -> Self {
        Self::Payment { reference: reference.into() }
    }

    pub fn charge_refund(charge_id: i64) -> Self {
        Self::ChargeRefund { charge_id }
    }

    /// The unique reference written to the ledger for this credit.
    pub fn ledger_reference(&self) -> String {
        match self {
            Self::Payment { reference } => reference.to_string(),
            Self::ChargeRefund { charge_id } => refund_reference_for(*charge_id),
        }
    }

    pub fn lock_key(&self) -> String {
        format!("topup:lock:{}", self.ledger_reference())
    }

    pub fn transaction_type(&self) -> LedgerTransactionType {
        match self {
            Self::Payment { .. } => LedgerTransactionType::Credit,
            Self::ChargeRefund { .. } => LedgerTransactionType::VerificationRefund,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditRequest {
    pub user_id: i64,
    pub amount: Cents,
    pub source: CreditSource,
}

impl CreditRequest {
    pub fn new(user_id: i64, amount: Cents, source: CreditSource) -> Self {
        Self { user_id, amount, source }
    }

    pub fn for_payment(record: &PaymentRecord) -> Self {
        Self::new(record.user_id, record.credit_amount, CreditSource::payment(record.reference.clone()))
    }
}

/// The result of a balance credit, as originally recorded. Duplicate requests are answered with this same receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditReceipt {
    pub reference: String,
    pub user_id: i64,
    pub amount: Cents,
    pub new_balance: Cents,
    pub credited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "receipt", rename_all = "snake_case")]
pub enum CreditOutcome {
    /// This call mutated the balance.
    Credited(CreditReceipt),
    /// An earlier call already mutated the balance. Nothing was changed.
    AlreadyCredited(CreditReceipt),
}

impl CreditOutcome {
    pub fn receipt(&self) -> &CreditReceipt {
        match self {
            Self::Credited(r) | Self::AlreadyCredited(r) => r,
        }
    }

    pub fn is_new_credit(&self) -> bool {
        matches!(self, Self::Credited(_))
    }
}
