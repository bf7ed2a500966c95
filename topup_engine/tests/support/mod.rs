#![allow(dead_code)]
use log::*;
use sqlx::{migrate::MigrateDatabase, Sqlite};
use topup_common::{Cents, Secret};
use topup_engine::{
    db_types::{ChargeRecord, NewCharge, NewPaymentRecord, PaymentRecord, PaymentReference},
    events::EventProducers,
    helpers::calculate_signature,
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    traits::InsertPaymentResult,
    ChargeManagement,
    CreditApi,
    LedgerStore,
    LockService,
    MemoryLockService,
    SqliteDatabase,
    WebhookApi,
};

pub const WEBHOOK_SECRET: &str = "whsec_engine_tests";

pub struct TestSystem {
    pub url: String,
    pub db: SqliteDatabase,
}

impl TestSystem {
    pub async fn new() -> Self {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
        Self { url, db }
    }

    pub async fn new_user(&self) -> i64 {
        self.db.create_user_account().await.expect("Error creating user").id
    }

    pub async fn pending_payment(&self, reference: &str, user_id: i64, cents: i64) -> PaymentRecord {
        let payment = NewPaymentRecord::new(PaymentReference::from(reference), user_id, Cents::from(cents));
        match self.db.insert_payment(payment).await.expect("Error inserting payment") {
            InsertPaymentResult::Inserted(record) => record,
            InsertPaymentResult::AlreadyExists(_) => panic!("Payment {reference} already exists"),
        }
    }

    /// Inserts a charge directly, bypassing the balance check, so that its age can be controlled.
    pub async fn aged_charge(&self, user_id: i64, cents: i64, age: chrono::Duration) -> ChargeRecord {
        let charge = NewCharge::new(user_id, Cents::from(cents)).created_at(chrono::Utc::now() - age);
        self.db.open_charge(charge).await.expect("Error opening charge").0
    }

    /// Credits `cents` to the user through a completed payment.
    pub async fn fund(&self, user_id: i64, cents: i64) {
        let reference = format!("fund-{user_id}-{:08x}", rand::random::<u32>());
        self.pending_payment(&reference, user_id, cents).await;
        self.credit_api(MemoryLockService::new())
            .credit_payment(&PaymentReference::from(reference.as_str()))
            .await
            .expect("Error funding account");
    }

    pub async fn payment(&self, reference: &str) -> PaymentRecord {
        self.db
            .fetch_payment_by_reference(&PaymentReference::from(reference))
            .await
            .expect("Error fetching payment")
            .expect("Payment does not exist")
    }

    pub async fn balance(&self, user_id: i64) -> Cents {
        self.db.fetch_user_account(user_id).await.expect("Error fetching account").expect("No such user").balance
    }

    pub fn credit_api<L: LockService>(&self, locks: L) -> CreditApi<SqliteDatabase, L> {
        CreditApi::new(self.db.clone(), locks, EventProducers::default())
    }

    pub fn webhook_api<L: LockService>(&self, locks: L) -> WebhookApi<SqliteDatabase, L> {
        WebhookApi::new(self.credit_api(locks), Secret::new(WEBHOOK_SECRET.to_string()), EventProducers::default())
    }

    pub async fn tear_down(mut self) {
        if let Err(e) = self.db.close().await {
            error!("🚀️ Failed to close database: {e}");
        }
        if let Err(e) = Sqlite::drop_database(&self.url).await {
            warn!("🚀️ Could not remove test database {}: {e}", self.url);
        }
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

pub fn sign(body: &str) -> String {
    calculate_signature(WEBHOOK_SECRET, body.as_bytes())
}
