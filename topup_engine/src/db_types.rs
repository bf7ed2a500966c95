use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
pub use topup_common::Cents;

#[derive(Debug, Clone, Error)]
#[error("Invalid value: {0}")]
pub struct ConversionError(String);

/// Implements `Display` and `FromStr` for the string-backed status enums stored in the database.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($s),)+
                }
            }
        }

        impl FromStr for $name {
            type Err = ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    s => Err(ConversionError(format!("Invalid {}: {s}", stringify!($name)))),
                }
            }
        }
    };
}

//--------------------------------------   PaymentReference    ---------------------------------------------------------
/// The gateway-correlatable identifier of a payment. It is the de-duplication key for webhooks and the lock key for
/// crediting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentReference(pub String);

impl FromStr for PaymentReference {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for PaymentReference {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PaymentReference {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for PaymentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl PaymentReference {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Generates a fresh reference for a new top-up.
    pub fn random() -> Self {
        Self(format!("topup_{:016x}", rand::random::<u64>()))
    }
}

//--------------------------------------     PaymentState      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    /// The payment has been initiated with the gateway, but no confirmation has arrived.
    Pending,
    /// A worker holds the payment and is crediting it.
    Processing,
    /// The balance has been credited.
    Completed,
    /// The gateway reported a failure, or crediting exhausted its retries.
    Failed,
    /// A completed payment that has been paid back out.
    Refunded,
}

string_enum!(PaymentState {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
    Refunded => "refunded",
});

//--------------------------------------   StateTransition     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: PaymentState,
    pub to: PaymentState,
    pub at: DateTime<Utc>,
}

//--------------------------------------    PaymentRecord      ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: i64,
    pub reference: PaymentReference,
    pub idempotency_key: Option<String>,
    pub user_id: i64,
    /// The gross amount charged, in the settlement currency.
    pub amount: Cents,
    /// The amount that is credited to the user's balance.
    pub credit_amount: Cents,
    pub state: PaymentState,
    /// Set exactly once, in the same transaction that writes the crediting ledger entry.
    pub credited: bool,
    pub lock_version: i64,
    pub state_transitions: Vec<StateTransition>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub authorization_url: Option<String>,
    pub access_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    pub reference: PaymentReference,
    pub idempotency_key: Option<String>,
    pub user_id: i64,
    pub amount: Cents,
    pub credit_amount: Cents,
    pub created_at: DateTime<Utc>,
}

impl NewPaymentRecord {
    pub fn new(reference: PaymentReference, user_id: i64, amount: Cents) -> Self {
        Self { reference, idempotency_key: None, user_id, amount, credit_amount: amount, created_at: Utc::now() }
    }

    pub fn with_idempotency_key<S: Into<String>>(mut self, key: S) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_credit_amount(mut self, credit_amount: Cents) -> Self {
        self.credit_amount = credit_amount;
        self
    }
}

//-------------------------------------- LedgerTransactionType ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerTransactionType {
    Credit,
    Debit,
    Refund,
    VerificationRefund,
    Transfer,
}

string_enum!(LedgerTransactionType {
    Credit => "credit",
    Debit => "debit",
    Refund => "refund",
    VerificationRefund => "verification_refund",
    Transfer => "transfer",
});

//--------------------------------------  LedgerTransaction    ---------------------------------------------------------
/// An immutable balance mutation. Positive amounts are credits, negative amounts are debits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: i64,
    pub user_id: i64,
    pub amount: Cents,
    pub tx_type: LedgerTransactionType,
    /// Back-link to the payment reference or source charge. Unique across the ledger.
    pub reference: String,
    pub balance_after: Cents,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------     ChargeStatus      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Timeout,
    /// The cost has been paid back to the user. Terminal.
    Refunded,
}

string_enum!(ChargeStatus {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
    Timeout => "timeout",
    Refunded => "refunded",
});

impl ChargeStatus {
    /// Statuses that mean the paid service was never delivered.
    pub fn is_unfulfilled(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Timeout)
    }
}

//--------------------------------------     ChargeRecord      ---------------------------------------------------------
/// A unit of paid service (e.g. an SMS verification) that may or may not have been delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRecord {
    pub id: i64,
    pub user_id: i64,
    pub cost: Cents,
    pub status: ChargeStatus,
    pub description: Option<String>,
    pub fulfillment_marker: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChargeRecord {
    /// The ledger reference used for the compensating refund of this charge.
    pub fn refund_reference(&self) -> String {
        refund_reference_for(self.id)
    }

    /// The ledger reference of the debit that paid for this charge.
    pub fn debit_reference(&self) -> String {
        format!("charge-{}", self.id)
    }

    /// True if the charge's status says it should be refunded: it failed outright, or it has been pending for longer
    /// than `pending_timeout`. Whether a refund already exists is checked separately against the ledger.
    pub fn needs_refund(&self, now: DateTime<Utc>, pending_timeout: Duration) -> bool {
        self.status.is_unfulfilled() ||
            (self.status == ChargeStatus::Pending &&
                self.fulfillment_marker.is_none() &&
                now - self.created_at > pending_timeout)
    }
}

pub fn refund_reference_for(charge_id: i64) -> String {
    format!("refund-{charge_id}")
}

#[derive(Debug, Clone)]
pub struct NewCharge {
    pub user_id: i64,
    pub cost: Cents,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewCharge {
    pub fn new(user_id: i64, cost: Cents) -> Self {
        Self { user_id, cost, description: None, created_at: Utc::now() }
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

//--------------------------------------     UserAccount       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: i64,
    pub balance: Cents,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------   DeadLetterStatus    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterStatus {
    Pending,
    Replayed,
    Discarded,
}

string_enum!(DeadLetterStatus {
    Pending => "pending",
    Replayed => "replayed",
    Discarded => "discarded",
});

//--------------------------------------      DeadLetter       ---------------------------------------------------------
/// A verified webhook event that could not be processed after all retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: i64,
    pub reference: Option<String>,
    pub event: String,
    pub payload: String,
    pub error_message: String,
    pub attempts: i64,
    pub status: DeadLetterStatus,
    pub created_at: DateTime<Utc>,
    pub replayed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewDeadLetter {
    pub reference: Option<String>,
    pub event: String,
    pub payload: String,
    pub error_message: String,
    pub attempts: i64,
}
