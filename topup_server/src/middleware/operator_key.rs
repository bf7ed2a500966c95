//! Operator key middleware for Actix Web.
//!
//! Every `/api` route is called by the application backend or by an operator, never by end users. Callers identify
//! themselves with the shared operator key in the `x-operator-key` header. Wrap the `/api` scope with
//! [`OperatorKeyMiddlewareFactory`] to enforce it.
use std::{
    future::{ready, Ready},
    rc::Rc,
};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ErrorUnauthorized,
    Error,
};
use futures::future::LocalBoxFuture;
use log::{trace, warn};
use topup_common::Secret;

pub const OPERATOR_KEY_HEADER: &str = "x-operator-key";

pub struct OperatorKeyMiddlewareFactory {
    key: Secret<String>,
}

impl OperatorKeyMiddlewareFactory {
    pub fn new(key: Secret<String>) -> Self {
        OperatorKeyMiddlewareFactory { key }
    }
}

impl<S, B> Transform<S, ServiceRequest> for OperatorKeyMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = OperatorKeyMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(OperatorKeyMiddlewareService { key: self.key.clone(), service: Rc::new(service) }))
    }
}

pub struct OperatorKeyMiddlewareService<S> {
    key: Secret<String>,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for OperatorKeyMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let expected = self.key.reveal().clone();
        Box::pin(async move {
            trace!("🔐️ Checking operator key for {}", req.path());
            let provided = req.headers().get(OPERATOR_KEY_HEADER).and_then(|v| v.to_str().ok());
            match provided {
                Some(key) if !expected.is_empty() && keys_match(key.as_bytes(), expected.as_bytes()) => {
                    trace!("🔐️ Operator key for request ✅️");
                    service.call(req).await
                },
                Some(_) => {
                    warn!("🔐️ Invalid operator key for {}. Denying access.", req.path());
                    Err(ErrorUnauthorized("Invalid operator key."))
                },
                None => {
                    warn!("🔐️ No operator key in request to {}. Denying access.", req.path());
                    Err(ErrorUnauthorized("No operator key found."))
                },
            }
        })
    }
}

/// Compares in time that depends only on the lengths of the inputs.
fn keys_match(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod test {
    use super::keys_match;

    #[test]
    fn key_comparison() {
        assert!(keys_match(b"s3cret", b"s3cret"));
        assert!(!keys_match(b"s3cret", b"s3creT"));
        assert!(!keys_match(b"s3cret", b"s3cret!"));
        assert!(!keys_match(b"", b"x"));
    }
}
