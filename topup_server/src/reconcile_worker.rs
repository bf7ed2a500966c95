//! Scheduled reconciliation.
//!
//! Runs the refund reconciler once at startup and then every `interval`. Runs never overlap within a process, and
//! the refund locks make overlapping runs across processes safe.
use std::time::Duration;

use actix_web::rt::{spawn, task::JoinHandle};
use log::*;
use tokio::time::{interval, MissedTickBehavior};
use topup_engine::{
    traits::{ChargeManagement, LedgerStore, LockService},
    ReconciliationApi,
};

/// Starts the worker on the current runtime. Returns `None` if `period` is zero, which disables scheduled runs.
pub fn start_reconcile_worker<B, L>(
    api: ReconciliationApi<B, L>,
    period: Duration,
    days_back: i64,
) -> Option<JoinHandle<()>>
where
    B: LedgerStore + ChargeManagement + 'static,
    L: LockService + 'static,
{
    if period.is_zero() {
        info!("🕰️ Scheduled reconciliation is disabled");
        return None;
    }
    let Some(lookback) = chrono::Duration::try_days(days_back).filter(|_| days_back > 0) else {
        error!("🕰️ {days_back} days is not a usable reconciliation window. Scheduled reconciliation is off.");
        return None;
    };
    info!("🕰️ Reconciling the last {days_back} days every {}s", period.as_secs());
    let handle = spawn(async move {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            timer.tick().await;
            debug!("🕰️ Starting scheduled reconciliation");
            match api.reconcile(lookback, false).await {
                Ok(report) if report.refunded > 0 || !report.errors.is_empty() => info!(
                    "🕰️ Scheduled reconciliation refunded {} charges ({}). {} errors.",
                    report.refunded,
                    report.total_amount,
                    report.errors.len()
                ),
                Ok(_) => debug!("🕰️ Scheduled reconciliation found nothing to refund"),
                Err(e) => warn!("🕰️ Scheduled reconciliation failed: {e}. Will try again next time."),
            }
        }
    });
    Some(handle)
}
