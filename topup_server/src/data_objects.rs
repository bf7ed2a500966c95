use serde::{Deserialize, Serialize};
use topup_common::Cents;
use topup_engine::db_types::ChargeStatus;

pub const DEFAULT_REPLAY_LIMIT: i64 = 50;

/// Body of `POST /api/topups`. `amount` is in cents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopupRequest {
    pub user_id: i64,
    pub amount: Cents,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenChargeRequest {
    pub user_id: i64,
    pub cost: Cents,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfilChargeRequest {
    pub marker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseChargeRequest {
    pub status: ChargeStatus,
}

/// Body of `POST /api/reconcile`. Missing fields fall back to the server's configuration, and a live run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileParams {
    #[serde(default)]
    pub days_back: Option<i64>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayParams {
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Query string of the gateway's redirect back to us. Some gateways send the reference twice, as `trxref`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub trxref: Option<String>,
}

impl CallbackQuery {
    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref().or(self.trxref.as_deref()).map(str::trim).filter(|r| !r.is_empty())
    }
}
