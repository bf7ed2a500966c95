use crate::{
    db_types::{DeadLetter, NewDeadLetter},
    traits::LedgerError,
};

/// A durable store for webhook events that exhausted their retries, so that they can be inspected and replayed later.
#[allow(async_fn_in_trait)]
pub trait DeadLetterChannel: Clone {
    async fn enqueue(&self, letter: NewDeadLetter) -> Result<DeadLetter, LedgerError>;

    /// The oldest `limit` letters that have not been replayed yet.
    async fn fetch_pending_dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>, LedgerError>;

    async fn fetch_dead_letter(&self, id: i64) -> Result<Option<DeadLetter>, LedgerError>;

    async fn mark_dead_letter_replayed(&self, id: i64) -> Result<DeadLetter, LedgerError>;

    /// Bumps the attempt counter and stores the latest error. The letter stays pending.
    async fn record_failed_replay(&self, id: i64, error_message: &str) -> Result<DeadLetter, LedgerError>;
}
