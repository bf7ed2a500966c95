//! Helpers for tests: throwaway SQLite databases, a flaky lock service and a mock payment gateway.
mod doubles;
mod mocks;
pub mod prepare_env;

pub use doubles::FlakyLockService;
pub use mocks::{checkout_for, MockGateway};
