use actix_web::{http::StatusCode, test::TestRequest};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use topup_common::Cents;
use topup_engine::{
    db_types::NewCharge,
    test_utils::{checkout_for, MockGateway},
    traits::GatewayError,
    ChargeManagement,
};

use super::helpers::{operator_post, signed_webhook, success_event, TestServer, OPERATOR_KEY};
use crate::middleware::OPERATOR_KEY_HEADER;

#[actix_web::test]
async fn api_requires_the_operator_key() {
    // Only the request carrying the key reaches the gateway
    let server = TestServer::with_gateway(accepting_gateway(1)).await;
    let user = server.new_user().await;
    let body = json!({ "user_id": user, "amount": 1000 });

    let (status, _) = server.send(TestRequest::post().uri("/api/topups").set_json(&body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong_key = TestRequest::post()
        .uri("/api/topups")
        .insert_header((OPERATOR_KEY_HEADER, format!("{OPERATOR_KEY}x")))
        .set_json(&body);
    let (status, _) = server.send(wrong_key).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = server.send(operator_post("/api/topups", body)).await;
    assert_eq!(status, StatusCode::OK);
    server.tear_down().await;
}

#[actix_web::test]
async fn empty_operator_key_refuses_everything() {
    let mut config = super::helpers::test_config();
    config.operator_key = Default::default();
    let server = TestServer::with_config(config).await;
    let req = TestRequest::post().uri("/api/reconcile").insert_header((OPERATOR_KEY_HEADER, ""));
    let (status, _) = server.send(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    server.tear_down().await;
}

#[actix_web::test]
async fn topups_are_idempotent_per_key() {
    // The replay is answered from the stored payment, without a second gateway call
    let server = TestServer::with_gateway(accepting_gateway(1)).await;
    let user = server.new_user().await;
    let body = json!({ "user_id": user, "amount": 2500, "idempotency_key": "order-17" });

    let (status, first) = server.send(operator_post("/api/topups", body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let first: Value = serde_json::from_str(&first).unwrap();
    assert_eq!(first["is_replay"], false);
    assert_eq!(first["amount"], 2500);
    let reference = first["reference"].as_str().unwrap();
    assert_eq!(first["authorization_url"], format!("https://checkout.example.com/pay/{reference}"));

    let (status, second) = server.send(operator_post("/api/topups", body)).await;
    assert_eq!(status, StatusCode::OK);
    let second: Value = serde_json::from_str(&second).unwrap();
    assert_eq!(second["is_replay"], true);
    assert_eq!(second["reference"], first["reference"]);
    server.tear_down().await;
}

#[actix_web::test]
async fn topup_validation() {
    // Invalid requests are refused before the gateway is called. Only the last request gets that far.
    let mut gateway = MockGateway::new();
    gateway
        .expect_initialize_payment()
        .times(1)
        .returning(|_| Err(GatewayError::Unreachable("connection refused".into())));
    let server = TestServer::with_gateway(gateway).await;
    let user = server.new_user().await;
    let (status, _) = server.send(operator_post("/api/topups", json!({ "user_id": user, "amount": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let too_much = json!({ "user_id": user, "amount": 1_000_001 });
    let (status, _) = server.send(operator_post("/api/topups", too_much)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = server.send(operator_post("/api/topups", json!({ "user_id": 999, "amount": 100 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server.send(operator_post("/api/topups", json!({ "user_id": user, "amount": 100 }))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    server.tear_down().await;
}

#[actix_web::test]
async fn charges_debit_and_close() {
    let server = TestServer::new().await;
    let user = server.new_user().await;
    server.pending_payment("r1", user, 1000).await;
    server.send(signed_webhook(&success_event("r1", user, 1000))).await;

    let open = json!({ "user_id": user, "cost": 250, "description": "SMS verification" });
    let (status, response) = server.send(operator_post("/api/charges", open)).await;
    assert_eq!(status, StatusCode::OK);
    let opened: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(opened["charge"]["status"], "pending");
    let id = opened["charge"]["id"].as_i64().unwrap();
    assert_eq!(server.balance(user).await, Cents::from(750));

    let path = format!("/api/charges/{id}/fulfil");
    let (status, response) = server.send(operator_post(&path, json!({ "marker": "code-4411" }))).await;
    assert_eq!(status, StatusCode::OK);
    let fulfilled: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(fulfilled["status"], "completed");

    // A delivered charge cannot be closed as undelivered
    let path = format!("/api/charges/{id}/close");
    let (status, _) = server.send(operator_post(&path, json!({ "status": "cancelled" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let too_much = json!({ "user_id": user, "cost": 10_000 });
    let (status, _) = server.send(operator_post("/api/charges", too_much)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = server.send(operator_post("/api/charges/999/fulfil", json!({ "marker": "x" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    server.tear_down().await;
}

#[actix_web::test]
async fn reconcile_refunds_timed_out_charges() {
    let server = TestServer::new().await;
    let user = server.new_user().await;
    server.pending_payment("r1", user, 1000).await;
    server.send(signed_webhook(&success_event("r1", user, 1000))).await;
    let charge = NewCharge::new(user, Cents::from(250)).created_at(Utc::now() - Duration::minutes(11));
    server.db().open_charge(charge).await.unwrap();
    assert_eq!(server.balance(user).await, Cents::from(750));

    let (status, response) = server.send(operator_post("/api/reconcile", json!({ "dry_run": true }))).await;
    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["refunded"], 1);
    assert_eq!(server.balance(user).await, Cents::from(750));

    // An empty body is a live run over the configured window
    let req = TestRequest::post().uri("/api/reconcile").insert_header((OPERATOR_KEY_HEADER, OPERATOR_KEY));
    let (status, response) = server.send(req).await;
    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(report["refunded"], 1);
    assert_eq!(report["total_amount"], 250);
    assert_eq!(server.balance(user).await, Cents::from(1000));

    let (status, response) = server.send(operator_post("/api/reconcile", json!({ "days_back": 1 }))).await;
    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(report["refunded"], 0);

    for days_back in [0, 100_000_000, i64::MAX] {
        let (status, _) = server.send(operator_post("/api/reconcile", json!({ "days_back": days_back }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "days_back = {days_back}");
    }
    let garbled = TestRequest::post()
        .uri("/api/reconcile")
        .insert_header((OPERATOR_KEY_HEADER, OPERATOR_KEY))
        .set_payload("{\"dry_run\": tru");
    let (status, _) = server.send(garbled).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(server.balance(user).await, Cents::from(1000));
    server.tear_down().await;
}

#[actix_web::test]
async fn replay_with_nothing_pending() {
    let server = TestServer::new().await;
    let (status, response) = server.send(operator_post("/api/dead_letters/replay", json!({ "limit": 5 }))).await;
    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_str(&response).unwrap();
    assert_eq!(report["examined"], 0);
    let (status, _) = server.send(operator_post("/api/dead_letters/replay", json!({ "limit": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    server.tear_down().await;
}

/// A gateway that expects exactly `calls` initializations and accepts them all.
fn accepting_gateway(calls: usize) -> MockGateway {
    let mut gateway = MockGateway::new();
    gateway.expect_initialize_payment().times(calls).returning(|req| Ok(checkout_for(&req.reference)));
    gateway
}
