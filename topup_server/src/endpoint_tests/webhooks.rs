use std::time::Duration;

use actix_web::{http::StatusCode, test::TestRequest};
use futures::future::join;
use serde_json::Value;
use topup_common::Cents;
use topup_engine::{
    db_types::PaymentReference,
    test_utils::MockGateway,
    traits::{CreditSource, GatewayError, GatewayPaymentStatus, VerifiedPayment},
    DeadLetterChannel,
    LockService,
};

use super::helpers::{signed_webhook, success_event, test_config, TestServer, SIGNATURE_HEADER};

#[actix_web::test]
async fn signed_webhook_credits_once() {
    let server = TestServer::new().await;
    let user = server.new_user().await;
    server.pending_payment("r1", user, 1000).await;
    let body = success_event("r1", user, 1000);

    let (status, response) = server.send(signed_webhook(&body)).await;
    assert_eq!(status, StatusCode::OK);
    let outcome: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(outcome["outcome"], "credited");

    let (status, response) = server.send(signed_webhook(&body)).await;
    assert_eq!(status, StatusCode::OK);
    let outcome: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(outcome["outcome"], "duplicate");

    assert_eq!(server.balance(user).await, Cents::from(1000));
    assert_eq!(server.ledger_entries(user).await, 1);
    server.tear_down().await;
}

#[actix_web::test]
async fn concurrent_deliveries_credit_once() {
    let server = TestServer::new().await;
    let user = server.new_user().await;
    server.pending_payment("r1", user, 1000).await;
    let body = success_event("r1", user, 1000);
    let ((a, _), (b, _)) = join(server.send(signed_webhook(&body)), server.send(signed_webhook(&body))).await;
    assert_eq!(a, StatusCode::OK);
    assert_eq!(b, StatusCode::OK);
    assert_eq!(server.balance(user).await, Cents::from(1000));
    assert_eq!(server.ledger_entries(user).await, 1);
    server.tear_down().await;
}

#[actix_web::test]
async fn bad_signatures_are_rejected_without_side_effects() {
    let server = TestServer::new().await;
    let user = server.new_user().await;
    server.pending_payment("r1", user, 1000).await;
    let body = success_event("r1", user, 1000);

    let forged = TestRequest::post()
        .uri("/webhooks/gateway")
        .insert_header((SIGNATURE_HEADER, "0".repeat(128)))
        .set_payload(body.clone());
    let (status, _) = server.send(forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let unsigned = TestRequest::post().uri("/webhooks/gateway").set_payload(body);
    let (status, response) = server.send(unsigned).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(response.contains("error"));

    assert_eq!(server.balance(user).await, Cents::from(0));
    assert!(server.db().fetch_pending_dead_letters(10).await.unwrap().is_empty());
    server.tear_down().await;
}

#[actix_web::test]
async fn malformed_and_unknown_events() {
    let server = TestServer::new().await;
    let (status, _) = server.send(signed_webhook("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, response) = server.send(signed_webhook(r#"{"event":"transfer.success","data":{}}"#)).await;
    assert_eq!(status, StatusCode::OK);
    let outcome: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(outcome["outcome"], "ignored");

    let (status, response) = server.send(signed_webhook(&success_event("nope", 1, 1000))).await;
    assert_eq!(status, StatusCode::OK);
    let outcome: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(outcome["outcome"], "ignored");
    server.tear_down().await;
}

#[actix_web::test]
async fn dead_lettered_events_can_be_refused() {
    let mut config = test_config();
    config.webhook.ack_dead_letters = false;
    // A zero lock wait cannot be met while the payment's lock is held elsewhere
    config.credit.lock_wait = Duration::ZERO;
    let server = TestServer::with_config(config).await;
    let user = server.new_user().await;
    server.pending_payment("r1", user, 1000).await;
    let key = CreditSource::payment("r1").lock_key();
    let held = server.context.locks.acquire(&key, Duration::from_secs(30), Duration::ZERO).await.unwrap();
    assert!(held.is_some());

    let (status, response) = server.send(signed_webhook(&success_event("r1", user, 1000))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.contains("Dead letter"));
    let letters = server.db().fetch_pending_dead_letters(10).await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(server.balance(user).await, Cents::from(0));
    server.tear_down().await;
}

#[actix_web::test]
async fn callback_credits_verified_payments() {
    let mut gateway = MockGateway::new();
    gateway
        .expect_verify_payment()
        .withf(|reference| reference.as_str() == "r1")
        .times(1)
        .returning(|reference| verified(reference, GatewayPaymentStatus::Success, 1000));
    gateway
        .expect_verify_payment()
        .withf(|reference| reference.as_str() == "r2")
        .times(1)
        .returning(|reference| verified(reference, GatewayPaymentStatus::Pending, 0));
    let server = TestServer::with_gateway(gateway).await;
    let user = server.new_user().await;
    server.pending_payment("r1", user, 1000).await;
    server.pending_payment("r2", user, 500).await;

    let (status, response) = server.send(TestRequest::get().uri("/topups/callback?reference=r1&trxref=r1")).await;
    assert_eq!(status, StatusCode::OK);
    let outcome: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(outcome["outcome"], "credited");

    // r2 was never paid, whatever the redirect claims
    let (status, response) = server.send(TestRequest::get().uri("/topups/callback?trxref=r2")).await;
    assert_eq!(status, StatusCode::OK);
    let outcome: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(outcome["outcome"], "ignored");

    let (status, _) = server.send(TestRequest::get().uri("/topups/callback")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(server.balance(user).await, Cents::from(1000));
    server.tear_down().await;
}

fn verified(
    reference: &PaymentReference,
    status: GatewayPaymentStatus,
    cents: i64,
) -> Result<VerifiedPayment, GatewayError> {
    Ok(VerifiedPayment { reference: reference.clone(), status, amount: Cents::from(cents) })
}
