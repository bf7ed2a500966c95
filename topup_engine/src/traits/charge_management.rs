use chrono::{DateTime, Utc};

use crate::{
    db_types::{ChargeRecord, ChargeStatus, LedgerTransaction, NewCharge},
    traits::LedgerError,
};

/// Manages charges: paid units of service that are debited up front and may turn out to be unfulfilled.
#[allow(async_fn_in_trait)]
pub trait ChargeManagement: Clone {
    /// Creates a `pending` charge and debits its cost from the user's balance, in one transaction. The debit is
    /// written to the ledger with reference `charge-<id>`.
    ///
    /// Fails with [`LedgerError::InsufficientFunds`] if the balance does not cover the cost.
    async fn open_charge(&self, charge: NewCharge) -> Result<(ChargeRecord, LedgerTransaction), LedgerError>;

    async fn fetch_charge(&self, id: i64) -> Result<Option<ChargeRecord>, LedgerError>;

    /// Sets the status of a charge. A `refunded` charge is terminal, and a `completed` one cannot be moved to an
    /// unfulfilled status. Either fails with [`LedgerError::ChargeFinalized`].
    async fn update_charge_status(
        &self,
        id: i64,
        status: ChargeStatus,
        fulfillment_marker: Option<String>,
    ) -> Result<ChargeRecord, LedgerError>;

    /// Charges created at or after `since` whose status might warrant a refund (`failed`, `cancelled`, `timeout` or
    /// `pending`). The caller decides which of them actually qualify.
    async fn fetch_refund_candidates(&self, since: DateTime<Utc>) -> Result<Vec<ChargeRecord>, LedgerError>;

    /// Marks a charge as refunded without touching any balance. Used to repair the status of charges whose refund
    /// ledger entry already exists.
    async fn mark_charge_refunded(&self, id: i64) -> Result<ChargeRecord, LedgerError>;
}
