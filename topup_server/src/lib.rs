//! # Top-up server
//! This crate hosts the HTTP front end of the top-up engine. It is responsible for:
//! * Receiving payment webhooks from the gateway, authenticating them and crediting the user exactly once.
//! * Starting top-ups with the gateway, and verifying the user's return from the gateway's payment page.
//! * Letting the application backend debit users for services, and mark those services delivered or abandoned.
//! * Reconciling paid-for services that were never delivered, on a schedule and on demand.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/webhooks/gateway`: Payment notifications from the gateway. Authenticated by signature.
//! * `/topups/callback`: The gateway's redirect back to us after payment.
//! * `/api/...`: Top-ups, charges, reconciliation and dead letter replay. Authenticated by the operator key.

pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod gateway;
pub mod middleware;
pub mod reconcile_worker;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
