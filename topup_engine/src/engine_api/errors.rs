use thiserror::Error;

use crate::{
    helpers::SignatureError,
    traits::{GatewayError, LedgerError, LockError},
};

/// The error taxonomy of the crediting engine.
///
/// Only [`CreditError::LockUnavailable`] and [`CreditError::Storage`] are transient. Everything else is terminal for
/// the request that produced it.
#[derive(Debug, Clone, Error)]
pub enum CreditError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Webhook authentication failed: {0}")]
    InvalidSignature(#[from] SignatureError),
    #[error("User account {0} does not exist")]
    UserNotFound(i64),
    #[error("No payment record exists for reference {0}")]
    PaymentRecordNotFound(String),
    #[error("Charge {0} does not exist")]
    ChargeNotFound(i64),
    #[error("Could not acquire the lock {0} in time")]
    LockUnavailable(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),
    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl CreditError {
    /// True for failures that may clear up if the operation is retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockUnavailable(_) | Self::Storage(_))
    }
}

impl From<LedgerError> for CreditError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::DatabaseError(s) => Self::Storage(s),
            LedgerError::StaleRecord(r) => Self::Storage(format!("Payment {r} was modified concurrently")),
            LedgerError::UserNotFound(id) => Self::UserNotFound(id),
            LedgerError::PaymentNotFound(r) => Self::PaymentRecordNotFound(r),
            LedgerError::ChargeNotFound(id) => Self::ChargeNotFound(id),
            LedgerError::IllegalTransition(t) => Self::ConsistencyViolation(t.to_string()),
            LedgerError::Inconsistent(s) => Self::ConsistencyViolation(s),
            e @ (LedgerError::InsufficientFunds { .. } |
            LedgerError::ChargeFinalized(_) |
            LedgerError::ChargeNotRefundable { .. } |
            LedgerError::DeadLetterNotFound(_)) => Self::Validation(e.to_string()),
        }
    }
}

impl From<LockError> for CreditError {
    fn from(e: LockError) -> Self {
        Self::LockUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{db_types::PaymentState, state_machine::IllegalTransition};

    #[test]
    fn transient_classification() {
        assert!(CreditError::from(LedgerError::DatabaseError("locked".into())).is_transient());
        assert!(CreditError::from(LedgerError::StaleRecord("r1".into())).is_transient());
        assert!(CreditError::from(LockError::BackendUnavailable("down".into())).is_transient());
        let illegal = IllegalTransition {
            reference: "r1".into(),
            from: PaymentState::Completed,
            to: PaymentState::Processing,
        };
        let e = CreditError::from(LedgerError::from(illegal));
        assert!(matches!(e, CreditError::ConsistencyViolation(_)));
        assert!(!e.is_transient());
        assert!(!CreditError::from(SignatureError::Mismatch).is_transient());
        let funds =
            LedgerError::InsufficientFunds { user_id: 1, balance: "$1.00".into(), required: "$2.50".into() };
        assert!(matches!(CreditError::from(funds), CreditError::Validation(_)));
    }
}
