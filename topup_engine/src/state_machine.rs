//! The payment lifecycle.
//!
//! | From \ To  | Pending | Processing | Completed | Failed | Refunded |
//! |------------|---------|------------|-----------|--------|----------|
//! | Pending    | -       | ok         | Err       | ok     | Err      |
//! | Processing | Err     | -          | ok        | ok     | Err      |
//! | Completed  | Err     | Err        | -         | Err    | ok       |
//! | Failed     | Err     | ok (retry) | Err       | -      | Err      |
//! | Refunded   | Err     | Err        | Err       | Err    | -        |
//!
//! Transitions are computed here as pure functions over a [`PaymentRecord`]; the storage backends persist the result
//! under an optimistic `lock_version` check.
use chrono::{DateTime, Utc};
use log::error;
use thiserror::Error;

use crate::db_types::{PaymentRecord, PaymentState, StateTransition};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Illegal state transition for payment {reference}: {from} -> {to}")]
pub struct IllegalTransition {
    pub reference: String,
    pub from: PaymentState,
    pub to: PaymentState,
}

impl PaymentState {
    pub fn can_transition_to(&self, to: PaymentState) -> bool {
        use PaymentState::*;
        matches!(
            (self, to),
            (Pending, Processing) |
                (Pending, Failed) |
                (Processing, Completed) |
                (Processing, Failed) |
                (Failed, Processing) |
                (Completed, Refunded)
        )
    }
}

impl PaymentRecord {
    /// Returns a copy of this record moved into state `to`, together with the audit log entry for the move.
    ///
    /// * Entering `Processing` stamps `processing_started_at` and clears `processing_completed_at`.
    /// * Entering `Completed` or `Failed` stamps `processing_completed_at`.
    /// * Entering `Failed` records `error_message`.
    ///
    /// Illegal moves are logged at error level and rejected; the record is never silently overwritten.
    pub fn transitioned(
        &self,
        to: PaymentState,
        at: DateTime<Utc>,
        error_message: Option<String>,
    ) -> Result<(PaymentRecord, StateTransition), IllegalTransition> {
        let from = self.state;
        if !from.can_transition_to(to) {
            error!(
                "🚨️ Consistency violation: payment {} cannot move from {from} to {to}. The record is left untouched.",
                self.reference
            );
            return Err(IllegalTransition { reference: self.reference.to_string(), from, to });
        }
        let transition = StateTransition { from, to, at };
        let mut record = self.clone();
        record.state = to;
        record.updated_at = at;
        match to {
            PaymentState::Processing => {
                record.processing_started_at = Some(at);
                record.processing_completed_at = None;
            },
            PaymentState::Completed => {
                record.processing_completed_at = Some(at);
                record.credited = true;
                record.error_message = None;
            },
            PaymentState::Failed => {
                record.processing_completed_at = Some(at);
                record.error_message = error_message;
            },
            PaymentState::Pending | PaymentState::Refunded => {},
        }
        record.state_transitions.push(transition.clone());
        Ok((record, transition))
    }

    /// A processing record whose holder has not made progress within `stale_after` is presumed abandoned (the
    /// holder crashed and its lock has expired).
    pub fn is_stale_in_flight(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        self.state == PaymentState::Processing &&
            self.processing_started_at.map(|started| now - started > stale_after).unwrap_or(true)
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;
    use topup_common::Cents;

    use super::*;
    use crate::db_types::PaymentReference;

    fn record(state: PaymentState) -> PaymentRecord {
        let now = Utc::now();
        PaymentRecord {
            id: 1,
            reference: PaymentReference::from("r1"),
            idempotency_key: None,
            user_id: 1,
            amount: Cents::from(1000),
            credit_amount: Cents::from(1000),
            state,
            credited: false,
            lock_version: 0,
            state_transitions: vec![],
            processing_started_at: None,
            processing_completed_at: None,
            error_message: None,
            authorization_url: None,
            access_code: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn legal_transitions() {
        use PaymentState::*;
        let legal = [
            (Pending, Processing),
            (Pending, Failed),
            (Processing, Completed),
            (Processing, Failed),
            (Failed, Processing),
            (Completed, Refunded),
        ];
        let all = [Pending, Processing, Completed, Failed, Refunded];
        for from in all {
            for to in all {
                assert_eq!(from.can_transition_to(to), legal.contains(&(from, to)), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn full_lifecycle_is_audited() {
        let t0 = Utc::now();
        let (p, _) = record(PaymentState::Pending).transitioned(PaymentState::Processing, t0, None).unwrap();
        assert_eq!(p.processing_started_at, Some(t0));
        let t1 = t0 + Duration::seconds(1);
        let (p, _) = p.transitioned(PaymentState::Failed, t1, Some("lock unavailable".into())).unwrap();
        assert_eq!(p.error_message.as_deref(), Some("lock unavailable"));
        assert_eq!(p.processing_completed_at, Some(t1));
        let t2 = t1 + Duration::seconds(1);
        let (p, _) = p.transitioned(PaymentState::Processing, t2, None).unwrap();
        assert_eq!(p.processing_completed_at, None);
        let t3 = t2 + Duration::seconds(1);
        let (p, last) = p.transitioned(PaymentState::Completed, t3, None).unwrap();
        assert!(p.credited);
        assert_eq!(p.error_message, None);
        assert_eq!(last, StateTransition { from: PaymentState::Processing, to: PaymentState::Completed, at: t3 });
        let states = p.state_transitions.iter().map(|t| t.to).collect::<Vec<_>>();
        assert_eq!(states, vec![
            PaymentState::Processing,
            PaymentState::Failed,
            PaymentState::Processing,
            PaymentState::Completed
        ]);
    }

    #[test]
    fn completed_cannot_be_reprocessed() {
        let err = record(PaymentState::Completed)
            .transitioned(PaymentState::Processing, Utc::now(), None)
            .expect_err("completed -> processing must be rejected");
        assert_eq!(err.from, PaymentState::Completed);
        assert_eq!(err.to, PaymentState::Processing);
    }

    #[test]
    fn stale_in_flight_detection() {
        let now = Utc::now();
        let mut p = record(PaymentState::Processing);
        p.processing_started_at = Some(now - Duration::seconds(30));
        assert!(p.is_stale_in_flight(now, Duration::seconds(10)));
        assert!(!p.is_stale_in_flight(now, Duration::seconds(60)));
        assert!(!record(PaymentState::Pending).is_stale_in_flight(now, Duration::seconds(1)));
    }
}
