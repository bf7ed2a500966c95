use std::{sync::Arc, time::Duration};

use actix_web::{body::MessageBody, http::StatusCode, test, test::TestRequest, App};
use log::debug;
use topup_common::{Cents, Secret};
use topup_engine::{
    db_types::{NewPaymentRecord, PaymentReference},
    events::EventProducers,
    helpers::{calculate_signature, RetryPolicy},
    test_utils::{
        prepare_env::{drop_database, prepare_test_env, random_db_path},
        MockGateway,
    },
    LedgerStore,
    MemoryLockService,
    SqliteDatabase,
};

use crate::{
    config::{ServerConfig, WebhookOptions},
    middleware::OPERATOR_KEY_HEADER,
    server::ServerContext,
};

pub const WEBHOOK_SECRET: &str = "whsec_endpoint_tests";
pub const OPERATOR_KEY: &str = "operator-endpoint-tests";
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

/// A server context over a fresh SQLite database, with in-process locks and a mock gateway.
///
/// Every request shares the one mock, so its call counts hold across the whole test. They are checked when the server
/// is torn down.
pub struct TestServer {
    pub url: String,
    pub context: ServerContext<MemoryLockService, Arc<MockGateway>>,
}

impl TestServer {
    /// A server whose gateway must not be called.
    pub async fn new() -> Self {
        Self::build(test_config(), MockGateway::new()).await
    }

    pub async fn with_config(config: ServerConfig) -> Self {
        Self::build(config, MockGateway::new()).await
    }

    pub async fn with_gateway(gateway: MockGateway) -> Self {
        Self::build(test_config(), gateway).await
    }

    async fn build(config: ServerConfig, gateway: MockGateway) -> Self {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
        let context = ServerContext {
            config,
            db,
            locks: MemoryLockService::new(),
            gateway: Arc::new(gateway),
            producers: EventProducers::default(),
        };
        Self { url, context }
    }

    pub fn db(&self) -> &SqliteDatabase {
        &self.context.db
    }

    pub async fn new_user(&self) -> i64 {
        self.db().create_user_account().await.expect("Error creating user").id
    }

    pub async fn pending_payment(&self, reference: &str, user_id: i64, cents: i64) {
        let payment = NewPaymentRecord::new(PaymentReference::from(reference), user_id, Cents::from(cents));
        self.db().insert_payment(payment).await.expect("Error inserting payment");
    }

    pub async fn balance(&self, user_id: i64) -> Cents {
        self.db().fetch_user_account(user_id).await.expect("Error fetching account").expect("No such user").balance
    }

    pub async fn ledger_entries(&self, user_id: i64) -> usize {
        self.db().fetch_ledger_for_user(user_id).await.expect("Error fetching ledger").len()
    }

    /// Sends `req` through the full route table and returns the status and body.
    pub async fn send(&self, req: TestRequest) -> (StatusCode, String) {
        let app = test::init_service(App::new().configure(|cfg| self.context.configure(cfg))).await;
        debug!("Making request");
        match test::try_call_service(&app, req.to_request()).await {
            Ok(res) => {
                let status = res.status();
                let body = test::read_body(res).await;
                (status, String::from_utf8_lossy(&body).into_owned())
            },
            Err(e) => {
                let res = e.error_response();
                let status = res.status();
                let body = res.into_body().try_into_bytes().unwrap_or_default();
                (status, String::from_utf8_lossy(&body).into_owned())
            },
        }
    }

    pub async fn tear_down(self) {
        self.context.db.pool().close().await;
        drop_database(&self.url).await;
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        webhook: WebhookOptions { secret: Secret::new(WEBHOOK_SECRET.to_string()), ..Default::default() },
        operator_key: Secret::new(OPERATOR_KEY.to_string()),
        retry: RetryPolicy::default().with_max_retries(1).with_base_delay(Duration::from_millis(5)).without_jitter(),
        ..ServerConfig::new("127.0.0.1", 8370)
    }
}

pub fn success_event(reference: &str, user_id: i64, cents: i64) -> String {
    serde_json::json!({
        "event": "charge.success",
        "data": {
            "reference": reference,
            "amount": cents,
            "metadata": { "userId": user_id, "creditAmount": cents }
        }
    })
    .to_string()
}

pub fn signed_webhook(body: &str) -> TestRequest {
    let signature = calculate_signature(WEBHOOK_SECRET, body.as_bytes());
    TestRequest::post()
        .uri("/webhooks/gateway")
        .insert_header((SIGNATURE_HEADER, signature))
        .insert_header(("content-type", "application/json"))
        .set_payload(body.to_string())
}

pub fn operator_post(path: &str, body: serde_json::Value) -> TestRequest {
    TestRequest::post().uri(path).insert_header((OPERATOR_KEY_HEADER, OPERATOR_KEY)).set_json(body)
}
