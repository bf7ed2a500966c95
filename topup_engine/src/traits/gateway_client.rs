use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use topup_common::Cents;

use crate::db_types::PaymentReference;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Could not reach the payment gateway: {0}")]
    Unreachable(String),
    #[error("The payment gateway rejected the request: {0}")]
    Rejected(String),
    #[error("The payment gateway returned an unexpected response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializePaymentRequest {
    pub reference: PaymentReference,
    pub user_id: i64,
    pub amount: Cents,
    pub credit_amount: Cents,
}

/// The gateway's answer to a payment initialization: where to send the user to pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializedPayment {
    pub authorization_url: String,
    pub access_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPaymentStatus {
    Success,
    Failed,
    Abandoned,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedPayment {
    pub reference: PaymentReference,
    pub status: GatewayPaymentStatus,
    pub amount: Cents,
}

/// The outbound side of the payment gateway integration.
#[allow(async_fn_in_trait)]
pub trait GatewayClient: Clone {
    async fn initialize_payment(&self, request: &InitializePaymentRequest) -> Result<InitializedPayment, GatewayError>;

    /// Asks the gateway for the authoritative status of a payment. Used by the redirect callback, which carries no
    /// signature.
    async fn verify_payment(&self, reference: &PaymentReference) -> Result<VerifiedPayment, GatewayError>;
}

/// A shared client, so that every worker can hold the same gateway connection.
impl<G: GatewayClient> GatewayClient for Arc<G> {
    async fn initialize_payment(&self, request: &InitializePaymentRequest) -> Result<InitializedPayment, GatewayError> {
        self.as_ref().initialize_payment(request).await
    }

    async fn verify_payment(&self, reference: &PaymentReference) -> Result<VerifiedPayment, GatewayError> {
        self.as_ref().verify_payment(reference).await
    }
}
