mod backoff;
mod signature;

pub use backoff::RetryPolicy;
pub use signature::{calculate_signature, verify_signature, SignatureError};
