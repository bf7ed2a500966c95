use std::fmt::Debug;

use log::*;
use topup_common::Cents;

use crate::{
    db_types::{ChargeRecord, ChargeStatus, LedgerTransaction, NewCharge},
    engine_api::errors::CreditError,
    traits::ChargeManagement,
};

/// Opens, fulfils and closes charges for paid services.
///
/// A charge debits the user when it is opened. If it is then closed as failed, cancelled or timed out (or simply never
/// fulfilled), the reconciler refunds it.
pub struct ChargeApi<B> {
    db: B,
}

impl<B> Debug for ChargeApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChargeApi")
    }
}

impl<B> ChargeApi<B>
where B: ChargeManagement
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    /// Debits `cost` from the user and records a `pending` charge. Fails with a validation error if the balance is too
    /// low.
    pub async fn open_charge(
        &self,
        user_id: i64,
        cost: Cents,
        description: Option<String>,
    ) -> Result<(ChargeRecord, LedgerTransaction), CreditError> {
        if !cost.is_positive() {
            return Err(CreditError::Validation(format!("Charge cost must be positive, got {cost}")));
        }
        let mut charge = NewCharge::new(user_id, cost);
        if let Some(d) = description {
            charge = charge.with_description(d);
        }
        let (charge, debit) = self.db.open_charge(charge).await?;
        debug!("💳️ Charge #{} opened. User {user_id} balance is now {}", charge.id, debit.balance_after);
        Ok((charge, debit))
    }

    /// Marks the service as delivered. `marker` is the proof of delivery (e.g. the verification code received).
    pub async fn fulfil_charge(&self, id: i64, marker: &str) -> Result<ChargeRecord, CreditError> {
        let charge = self.fetch_charge(id).await?;
        if charge.status != ChargeStatus::Pending {
            return Err(CreditError::Validation(format!("Charge {id} is {} and cannot be fulfilled", charge.status)));
        }
        let charge = self.db.update_charge_status(id, ChargeStatus::Completed, Some(marker.to_string())).await?;
        Ok(charge)
    }

    /// Closes a charge without delivery. `status` must be `failed`, `cancelled` or `timeout`, and the charge must not
    /// have been fulfilled.
    pub async fn close_charge(&self, id: i64, status: ChargeStatus) -> Result<ChargeRecord, CreditError> {
        if !status.is_unfulfilled() {
            return Err(CreditError::Validation(format!("{status} is not a valid closing status")));
        }
        let charge = self.db.update_charge_status(id, status, None).await?;
        Ok(charge)
    }

    pub async fn fetch_charge(&self, id: i64) -> Result<ChargeRecord, CreditError> {
        self.db.fetch_charge(id).await?.ok_or(CreditError::ChargeNotFound(id))
    }
}
