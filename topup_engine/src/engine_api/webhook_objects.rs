use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{db_types::PaymentReference, traits::CreditReceipt};

/// A webhook notification from the payment gateway.
///
/// ```json
/// { "event": "charge.success",
///   "data": { "reference": "r1", "amount": 1000, "metadata": { "userId": 42, "creditAmount": 1000 } } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayWebhook {
    pub event: String,
    #[serde(default)]
    pub data: WebhookData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookData {
    #[serde(default)]
    pub reference: Option<String>,
    /// Gross amount, in cents
    #[serde(default, deserialize_with = "lenient_i64")]
    pub amount: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: WebhookMetadata,
    #[serde(default)]
    pub gateway_response: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMetadata {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub user_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub credit_amount: Option<i64>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts a number, a numeric string or null. Gateways are not consistent about how they echo metadata back.
fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            n.as_i64().map(Some).ok_or_else(|| serde::de::Error::custom(format!("{n} is not an integer")))
        },
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse::<i64>().map(Some).map_err(serde::de::Error::custom),
        Some(v) => Err(serde::de::Error::custom(format!("expected an integer, got {v}"))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventKind {
    /// The payment succeeded and should be credited.
    Success,
    /// The payment failed. Record the failure, credit nothing.
    Failure,
    /// Anything else. Acknowledged and ignored.
    Other(String),
}

impl GatewayWebhook {
    pub fn kind(&self) -> WebhookEventKind {
        match self.event.as_str() {
            "charge.success" => WebhookEventKind::Success,
            "charge.failed" | "charge.abandoned" | "charge.cancelled" | "charge.expired" => WebhookEventKind::Failure,
            other => WebhookEventKind::Other(other.to_string()),
        }
    }

    pub fn reference(&self) -> Option<PaymentReference> {
        self.data.reference.as_deref().map(str::trim).filter(|r| !r.is_empty()).map(PaymentReference::from)
    }

    pub fn failure_reason(&self) -> String {
        self.data.gateway_response.clone().unwrap_or_else(|| format!("Gateway reported {}", self.event))
    }
}

/// What the webhook pipeline did with an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// The balance was credited by this delivery.
    Credited { receipt: CreditReceipt },
    /// The payment had already been credited. Nothing changed.
    Duplicate { receipt: CreditReceipt },
    /// Another worker is crediting this payment right now.
    Processing { reference: String },
    /// The event needs no action (unknown payment, or an event type we do not handle).
    Ignored { reason: String },
    /// The gateway reported a failed payment and the record was updated.
    FailureRecorded { reference: String },
    /// Crediting failed after all retries. The event was stored in the dead-letter channel.
    DeadLettered { reference: String, dead_letter_id: i64, error: String },
}
