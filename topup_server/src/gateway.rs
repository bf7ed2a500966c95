//! The outbound HTTP client for the payment gateway.
//!
//! The gateway wraps every response in an envelope, `{ "status": bool, "message": string, "data": {...} }`. Amounts
//! are sent and received in cents.
use std::time::Duration;

use log::*;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use topup_common::{Cents, Secret, SETTLEMENT_CURRENCY_CODE};
use topup_engine::{
    db_types::PaymentReference,
    traits::{
        GatewayClient,
        GatewayError,
        GatewayPaymentStatus,
        InitializePaymentRequest,
        InitializedPayment,
        VerifiedPayment,
    },
};

use crate::{config::GatewayConfig, errors::ServerError};

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    amount: i64,
    reference: String,
}

#[derive(Clone)]
pub struct RestGatewayClient {
    client: Client,
    base_url: String,
    secret_key: Secret<String>,
    callback_url: Option<String>,
}

impl RestGatewayClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, ServerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ServerError::InitializeError(format!("Could not create the gateway HTTP client. {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            secret_key: config.secret_key.clone(),
            callback_url: config.callback_url.clone(),
        })
    }
}

impl GatewayClient for RestGatewayClient {
    async fn initialize_payment(&self, request: &InitializePaymentRequest) -> Result<InitializedPayment, GatewayError> {
        let url = format!("{}/transaction/initialize", self.base_url);
        let mut body = json!({
            "reference": request.reference.as_str(),
            "amount": request.amount.value(),
            "currency": SETTLEMENT_CURRENCY_CODE,
            "metadata": { "userId": request.user_id, "creditAmount": request.credit_amount.value() },
        });
        if let Some(callback_url) = &self.callback_url {
            body["callback_url"] = json!(callback_url);
        }
        debug!("💳️ Initializing payment {} with the gateway", request.reference);
        let response = self
            .client
            .post(url)
            .bearer_auth(self.secret_key.reveal())
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;
        let data: InitializeData = unwrap_envelope(response).await?;
        Ok(InitializedPayment { authorization_url: data.authorization_url, access_code: data.access_code })
    }

    async fn verify_payment(&self, reference: &PaymentReference) -> Result<VerifiedPayment, GatewayError> {
        let url = format!("{}/transaction/verify/{}", self.base_url, reference.as_str());
        debug!("💳️ Verifying payment {reference} with the gateway");
        let response = self
            .client
            .get(url)
            .bearer_auth(self.secret_key.reveal())
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;
        let data: VerifyData = unwrap_envelope(response).await?;
        if data.reference != reference.as_str() {
            return Err(GatewayError::InvalidResponse(format!(
                "Asked to verify {reference}, but the gateway answered for {}",
                data.reference
            )));
        }
        Ok(VerifiedPayment {
            reference: reference.clone(),
            status: payment_status(&data.status),
            amount: Cents::from(data.amount),
        })
    }
}

async fn unwrap_envelope<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let status = response.status();
    let text = response.text().await.map_err(|e| GatewayError::Unreachable(e.to_string()))?;
    parse_envelope(status.is_success(), &text)
}

fn parse_envelope<T: DeserializeOwned>(http_ok: bool, text: &str) -> Result<T, GatewayError> {
    let envelope = serde_json::from_str::<Envelope<T>>(text);
    match envelope {
        Ok(Envelope { status: true, data: Some(data), .. }) if http_ok => Ok(data),
        Ok(Envelope { message, .. }) => {
            warn!("💳️ Gateway rejected the request: {message}");
            Err(GatewayError::Rejected(message))
        },
        Err(e) if http_ok => Err(GatewayError::InvalidResponse(e.to_string())),
        Err(_) => Err(GatewayError::Rejected(text.chars().take(200).collect())),
    }
}

fn payment_status(status: &str) -> GatewayPaymentStatus {
    match status {
        "success" => GatewayPaymentStatus::Success,
        "failed" | "reversed" => GatewayPaymentStatus::Failed,
        "abandoned" => GatewayPaymentStatus::Abandoned,
        _ => GatewayPaymentStatus::Pending,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn envelopes() {
        let ok = r#"{"status":true,"message":"Authorization URL created",
            "data":{"authorization_url":"https://checkout.example.com/abc","access_code":"abc","reference":"r1"}}"#;
        let data: InitializeData = parse_envelope(true, ok).unwrap();
        assert_eq!(data.access_code, "abc");

        let rejected = r#"{"status":false,"message":"Invalid key"}"#;
        let err = parse_envelope::<InitializeData>(false, rejected).unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(m) if m == "Invalid key"));

        let err = parse_envelope::<InitializeData>(true, "<html>").unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse(_)));
        let err = parse_envelope::<InitializeData>(false, "Bad Gateway").unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
    }

    #[test]
    fn verify_statuses() {
        let body = r#"{"status":true,"message":"ok","data":{"status":"success","amount":1000,"reference":"r1"}}"#;
        let data: VerifyData = parse_envelope(true, body).unwrap();
        assert_eq!(payment_status(&data.status), GatewayPaymentStatus::Success);
        assert_eq!(payment_status("abandoned"), GatewayPaymentStatus::Abandoned);
        assert_eq!(payment_status("reversed"), GatewayPaymentStatus::Failed);
        assert_eq!(payment_status("ongoing"), GatewayPaymentStatus::Pending);
    }
}
