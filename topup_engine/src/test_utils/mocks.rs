use mockall::mock;

use crate::{
    db_types::PaymentReference,
    traits::{GatewayClient, GatewayError, InitializePaymentRequest, InitializedPayment, VerifiedPayment},
};

mock! {
    pub Gateway {}
    impl Clone for Gateway {
        fn clone(&self) -> Self;
    }
    impl GatewayClient for Gateway {
        async fn initialize_payment(&self, request: &InitializePaymentRequest) -> Result<InitializedPayment, GatewayError>;
        async fn verify_payment(&self, reference: &PaymentReference) -> Result<VerifiedPayment, GatewayError>;
    }
}

/// The checkout details a well-behaved gateway hands out for `reference`.
pub fn checkout_for(reference: &PaymentReference) -> InitializedPayment {
    InitializedPayment {
        authorization_url: format!("https://checkout.example.com/pay/{reference}"),
        access_code: format!("ac_{reference}"),
    }
}
