//! The Refund Reconciler.
//!
//! Finds charges that were paid for but never fulfilled, and refunds them through the [`CreditApi`]. Each refund is
//! credited under the reference `refund-<chargeId>`, so a charge can be refunded at most once no matter how many
//! reconcilers run, or how often.
use std::fmt::Debug;

use chrono::{Duration, Utc};
use log::*;
use serde::{Deserialize, Serialize};
use topup_common::Cents;

use crate::{
    db_types::{ChargeRecord, ChargeStatus},
    engine_api::{credit_api::CreditApi, errors::CreditError},
    events::{EventProducers, RefundIssuedEvent},
    traits::{ChargeManagement, CreditOutcome, CreditRequest, CreditSource, LedgerStore, LockService},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Unreconciled-looking charges in the window, including those that turned out to have a refund already.
    pub total_found: usize,
    pub already_refunded: usize,
    /// Refunds issued. In a dry run, refunds that would have been issued.
    pub refunded: usize,
    pub errors: Vec<RefundError>,
    /// The sum of the refunds counted in `refunded`.
    pub total_amount: Cents,
    pub dry_run: bool,
    pub refunds: Vec<RefundLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundLine {
    pub charge_id: i64,
    pub user_id: i64,
    pub amount: Cents,
    pub status: ChargeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundError {
    pub charge_id: i64,
    pub message: String,
}

pub struct ReconciliationApi<B, L> {
    credit_api: CreditApi<B, L>,
    producers: EventProducers,
    pending_timeout: Duration,
}

impl<B, L> Debug for ReconciliationApi<B, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReconciliationApi (pending timeout {}m)", self.pending_timeout.num_minutes())
    }
}

impl<B, L> ReconciliationApi<B, L> {
    pub fn new(credit_api: CreditApi<B, L>, producers: EventProducers) -> Self {
        Self { credit_api, producers, pending_timeout: Duration::minutes(10) }
    }

    /// Sets how long a charge may stay `pending` before it counts as unfulfilled.
    pub fn with_pending_timeout(mut self, pending_timeout: Duration) -> Self {
        self.pending_timeout = pending_timeout;
        self
    }
}

impl<B, L> ReconciliationApi<B, L>
where
    B: LedgerStore + ChargeManagement,
    L: LockService,
{
    /// Refunds every unreconciled charge created within `lookback` of now.
    ///
    /// With `dry_run` set, nothing is written and the report describes exactly what a live run would do. Failures on
    /// individual charges are collected in the report and do not stop the run.
    pub async fn reconcile(&self, lookback: Duration, dry_run: bool) -> Result<ReconcileReport, CreditError> {
        if lookback <= Duration::zero() {
            return Err(CreditError::Validation(format!("The reconciliation window must be positive, not {lookback}")));
        }
        let now = Utc::now();
        let since = now
            .checked_sub_signed(lookback)
            .ok_or_else(|| CreditError::Validation(format!("The reconciliation window of {lookback} is too long")))?;
        let db = self.credit_api.db();
        let candidates = db
            .fetch_refund_candidates(since)
            .await?
            .into_iter()
            .filter(|c| c.needs_refund(now, self.pending_timeout))
            .collect::<Vec<_>>();
        info!(
            "🧾️ Reconciling {} candidate charges since {since}{}",
            candidates.len(),
            if dry_run { " (dry run)" } else { "" }
        );
        let mut report = ReconcileReport { total_found: candidates.len(), dry_run, ..Default::default() };
        for charge in candidates {
            if let Err(e) = self.reconcile_charge(&charge, dry_run, &mut report).await {
                warn!("🧾️ Could not reconcile charge #{}: {e}", charge.id);
                report.errors.push(RefundError { charge_id: charge.id, message: e.to_string() });
            }
        }
        info!(
            "🧾️ Reconciliation complete. Found: {}, already refunded: {}, refunded: {} ({}), errors: {}",
            report.total_found,
            report.already_refunded,
            report.refunded,
            report.total_amount,
            report.errors.len()
        );
        Ok(report)
    }

    async fn reconcile_charge(
        &self,
        charge: &ChargeRecord,
        dry_run: bool,
        report: &mut ReconcileReport,
    ) -> Result<(), CreditError> {
        let db = self.credit_api.db();
        if db.fetch_ledger_transaction(&charge.refund_reference()).await?.is_some() {
            report.already_refunded += 1;
            if !dry_run {
                // The refund exists but the status flip was lost. Repair it.
                db.mark_charge_refunded(charge.id).await?;
                debug!("🧾️ Charge #{} was already refunded. Status repaired.", charge.id);
            }
            return Ok(());
        }
        let line =
            RefundLine { charge_id: charge.id, user_id: charge.user_id, amount: charge.cost, status: charge.status };
        if dry_run {
            debug!("🧾️ Would refund {} to user {} for charge #{}", charge.cost, charge.user_id, charge.id);
            report.refunded += 1;
            report.total_amount += charge.cost;
            report.refunds.push(line);
            return Ok(());
        }
        let request = CreditRequest::new(charge.user_id, charge.cost, CreditSource::charge_refund(charge.id));
        match self.credit_api.credit(request).await? {
            CreditOutcome::Credited(receipt) => {
                info!("🧾️ Refunded {} to user {} for charge #{}", charge.cost, charge.user_id, charge.id);
                report.refunded += 1;
                report.total_amount += charge.cost;
                report.refunds.push(line);
                let event =
                    RefundIssuedEvent { charge_id: charge.id, user_id: charge.user_id, amount: charge.cost, receipt };
                self.producers.publish_refund_issued(event).await;
            },
            CreditOutcome::AlreadyCredited(_) => {
                // Another reconciler got there between our ledger check and the lock
                report.already_refunded += 1;
            },
        }
        Ok(())
    }
}
