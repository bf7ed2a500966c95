use std::str::FromStr;

use chrono::Duration;
use cucumber::{given, then, when};
use futures_util::future::join_all;
use topup_common::Cents;
use topup_engine::{
    db_types::{ChargeStatus, NewCharge, NewPaymentRecord, PaymentReference, PaymentState},
    helpers::calculate_signature,
    ChargeManagement,
    LedgerStore,
    WebhookOutcome,
};

use crate::cucumber::{topup_world::WEBHOOK_SECRET, TopupWorld};

fn cents(amount: &str) -> Cents {
    Cents::from_str(amount).unwrap_or_else(|e| panic!("{amount} is not a dollar amount. {e}"))
}

#[given(expr = "a user '{word}'")]
async fn new_user(world: &mut TopupWorld, name: String) {
    let sys = world.system();
    let account = sys.db.create_user_account().await.expect("Error creating user");
    sys.users.insert(name, account.id);
}

#[given(expr = "a pending payment [{word}] of {word} for '{word}'")]
async fn pending_payment(world: &mut TopupWorld, reference: String, amount: String, name: String) {
    let sys = world.system();
    let payment = NewPaymentRecord::new(PaymentReference::from(reference), sys.user(&name), cents(&amount));
    sys.db.insert_payment(payment).await.expect("Error inserting payment");
}

#[given(expr = "payment [{word}] has been credited")]
async fn credited_payment(world: &mut TopupWorld, reference: String) {
    let sys = world.system();
    sys.credit_api().credit_payment(&PaymentReference::from(reference)).await.expect("Error crediting payment");
}

#[given(expr = "a {word} charge '{word}' of {word} for '{word}' created {int} minutes ago")]
async fn aged_charge(world: &mut TopupWorld, status: String, charge: String, amount: String, name: String, mins: i64) {
    let sys = world.system();
    let status = ChargeStatus::from_str(&status).expect("Not a charge status");
    let created_at = chrono::Utc::now() - Duration::minutes(mins);
    let new_charge = NewCharge::new(sys.user(&name), cents(&amount)).created_at(created_at);
    let (record, _) = sys.db.open_charge(new_charge).await.expect("Error opening charge");
    if status != ChargeStatus::Pending {
        let marker = (status == ChargeStatus::Completed).then(|| "delivered".to_string());
        sys.db.update_charge_status(record.id, status, marker).await.expect("Error updating charge");
    }
    sys.charges.insert(charge, record.id);
}

#[when(expr = "the gateway delivers a signed {word} webhook for [{word}] {int} times at once")]
async fn concurrent_webhooks(world: &mut TopupWorld, event: String, reference: String, count: usize) {
    let sys = world.system();
    let record = sys
        .db
        .fetch_payment_by_reference(&PaymentReference::from(reference.as_str()))
        .await
        .expect("Error fetching payment")
        .expect("Payment does not exist");
    let body = serde_json::json!({
        "event": event,
        "data": {
            "reference": reference,
            "amount": record.amount.value(),
            "metadata": { "userId": record.user_id, "creditAmount": record.credit_amount.value() }
        }
    })
    .to_string();
    let signature = calculate_signature(WEBHOOK_SECRET, body.as_bytes());
    let api = sys.webhook_api();
    let deliveries = (0..count).map(|_| api.process_webhook(body.as_bytes(), Some(signature.as_str())));
    let outcomes = join_all(deliveries).await;
    sys.outcomes = outcomes.into_iter().map(|r| r.expect("Webhook failed")).collect();
}

#[when(expr = "the reconciler runs over the last {int} days")]
async fn reconcile(world: &mut TopupWorld, days: i64) {
    let sys = world.system();
    let report = sys.reconciler().reconcile(Duration::days(days), false).await.expect("Reconciliation failed");
    sys.report = Some(report);
}

#[when(expr = "the reconciler does a dry run over the last {int} days")]
async fn reconcile_dry_run(world: &mut TopupWorld, days: i64) {
    let sys = world.system();
    let report = sys.reconciler().reconcile(Duration::days(days), true).await.expect("Reconciliation failed");
    sys.report = Some(report);
}

#[then(expr = "{int} delivery credited the payment")]
async fn check_credited_count(world: &mut TopupWorld, count: usize) {
    let sys = world.system();
    let credited = sys.outcomes.iter().filter(|o| matches!(o, WebhookOutcome::Credited { .. })).count();
    assert_eq!(credited, count, "Outcomes: {:?}", sys.outcomes);
}

#[then(expr = "the balance of '{word}' is {word}")]
async fn check_balance(world: &mut TopupWorld, name: String, amount: String) {
    let sys = world.system();
    let account = sys.db.fetch_user_account(sys.user(&name)).await.expect("Error fetching account").expect("No user");
    assert_eq!(account.balance, cents(&amount), "Balance of {name} is incorrect");
}

#[then(expr = "'{word}' has {int} ledger entries")]
async fn check_ledger_length(world: &mut TopupWorld, name: String, count: usize) {
    let sys = world.system();
    let ledger = sys.db.fetch_ledger_for_user(sys.user(&name)).await.expect("Error fetching ledger");
    assert_eq!(ledger.len(), count, "Ledger: {ledger:?}");
}

#[then(expr = "payment [{word}] is {word}")]
async fn check_payment_state(world: &mut TopupWorld, reference: String, state: String) {
    let sys = world.system();
    let record = sys
        .db
        .fetch_payment_by_reference(&PaymentReference::from(reference))
        .await
        .expect("Error fetching payment")
        .expect("Payment does not exist");
    assert_eq!(record.state, PaymentState::from_str(&state).expect("Not a payment state"));
}

#[then(expr = "charge '{word}' is {word}")]
async fn check_charge_status(world: &mut TopupWorld, charge: String, status: String) {
    let sys = world.system();
    let record = sys.db.fetch_charge(sys.charge(&charge)).await.expect("Error fetching charge").expect("No charge");
    assert_eq!(record.status, ChargeStatus::from_str(&status).expect("Not a charge status"));
}

#[then(expr = "the report shows {int} found, {int} refunded and {int} already refunded, totalling {word}")]
async fn check_report(world: &mut TopupWorld, found: usize, refunded: usize, already: usize, total: String) {
    let sys = world.system();
    let report = sys.report.as_ref().expect("The reconciler has not run");
    assert_eq!(report.total_found, found, "{report:?}");
    assert_eq!(report.refunded, refunded, "{report:?}");
    assert_eq!(report.already_refunded, already, "{report:?}");
    assert_eq!(report.total_amount, cents(&total), "{report:?}");
    assert!(report.errors.is_empty(), "{report:?}");
}
