use std::collections::HashMap;

use cucumber::World;
use log::*;
use topup_common::Secret;
use topup_engine::{
    events::EventProducers,
    test_utils::prepare_env::{create_database, random_db_path, run_migrations},
    CreditApi,
    MemoryLockService,
    ReconcileReport,
    ReconciliationApi,
    SqliteDatabase,
    WebhookApi,
    WebhookOutcome,
};
use tokio::time::sleep;

pub const WEBHOOK_SECRET: &str = "whsec_cucumber";

#[derive(Default, Debug, World)]
pub struct TopupWorld {
    pub system: Option<TopupSystem>,
}

#[derive(Debug)]
pub struct TopupSystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub locks: MemoryLockService,
    /// Test names for user ids
    pub users: HashMap<String, i64>,
    /// Test names for charge ids
    pub charges: HashMap<String, i64>,
    pub outcomes: Vec<WebhookOutcome>,
    pub report: Option<ReconcileReport>,
}

impl TopupWorld {
    pub fn system(&mut self) -> &mut TopupSystem {
        self.system.as_mut().expect("System not initialised. Start with 'Given a fresh install'")
    }
}

impl TopupSystem {
    pub async fn new() -> Self {
        let url = prepare_test_env().await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating connection to database");
        debug!("Created database: {url}");
        sleep(std::time::Duration::from_millis(50)).await;
        Self {
            db_path: url,
            db,
            locks: MemoryLockService::new(),
            users: HashMap::new(),
            charges: HashMap::new(),
            outcomes: Vec::new(),
            report: None,
        }
    }

    pub fn user(&self, name: &str) -> i64 {
        *self.users.get(name).unwrap_or_else(|| panic!("Unknown user {name}"))
    }

    pub fn charge(&self, name: &str) -> i64 {
        *self.charges.get(name).unwrap_or_else(|| panic!("Unknown charge {name}"))
    }

    pub fn credit_api(&self) -> CreditApi<SqliteDatabase, MemoryLockService> {
        CreditApi::new(self.db.clone(), self.locks.clone(), EventProducers::default())
    }

    pub fn webhook_api(&self) -> WebhookApi<SqliteDatabase, MemoryLockService> {
        let secret = Secret::new(WEBHOOK_SECRET.to_string());
        WebhookApi::new(self.credit_api(), secret, EventProducers::default())
    }

    pub fn reconciler(&self) -> ReconciliationApi<SqliteDatabase, MemoryLockService> {
        ReconciliationApi::new(self.credit_api(), EventProducers::default())
    }
}

pub async fn prepare_test_env() -> String {
    let path = random_db_path();
    create_database(&path).await;
    run_migrations(&path).await;
    path
}
