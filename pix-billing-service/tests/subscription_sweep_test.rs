mod common;

use std::sync::Arc;

use chrono::{Duration, Months, Utc};
use pix_billing_service::models::{ReportedStatus, SubscriptionStatus};
use pix_billing_service::services::{
    InMemoryStore, PaymentEvent, PaymentLedger, PngQrRenderer, ProcessorState, SubscriptionLedger,
};

fn grace() -> Duration {
    Duration::hours(72)
}

fn ledgers() -> (PaymentLedger, SubscriptionLedger) {
    let store = Arc::new(InMemoryStore::new());
    let subscriptions = SubscriptionLedger::new(store.clone());
    let payments = PaymentLedger::new(
        store,
        subscriptions.clone(),
        Arc::new(PngQrRenderer::default()),
        common::pix_settings(),
    );
    (payments, subscriptions)
}

async fn activate(payments: &PaymentLedger, user_id: &str) {
    let payment = payments.create_pending(user_id).await.unwrap();
    payments
        .apply_event(&PaymentEvent {
            txid: payment.txid,
            status: ReportedStatus::Confirmed,
            end_to_end_id: None,
            amount: None,
            occurred_at: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn lapsed_subscriptions_cancel_or_go_past_due() {
    let (payments, subscriptions) = ledgers();
    activate(&payments, "staying").await;
    activate(&payments, "leaving").await;
    subscriptions
        .request_cancel_at_period_end("leaving")
        .await
        .unwrap();

    let after_grace = Utc::now()
        .checked_add_months(Months::new(1))
        .unwrap()
        + grace()
        + Duration::minutes(1);

    let mut transitions = subscriptions
        .sweep_period_ends(after_grace, grace())
        .await
        .unwrap();
    transitions.sort_by(|a, b| a.record_id.cmp(&b.record_id));

    assert_eq!(transitions.len(), 2);
    assert_eq!(transitions[0].record_id, "leaving");
    assert_eq!(transitions[0].to, SubscriptionStatus::Canceled);
    assert_eq!(transitions[1].record_id, "staying");
    assert_eq!(transitions[1].to, SubscriptionStatus::PastDue);

    let staying = subscriptions.get("staying").await.unwrap().unwrap();
    assert_eq!(staying.status, SubscriptionStatus::PastDue);

    let repeat = subscriptions
        .sweep_period_ends(after_grace, grace())
        .await
        .unwrap();
    assert!(repeat.is_empty());
}

#[tokio::test]
async fn grace_period_is_honoured() {
    let (payments, subscriptions) = ledgers();
    activate(&payments, "U1").await;

    let within_grace = Utc::now()
        .checked_add_months(Months::new(1))
        .unwrap()
        + grace()
        - Duration::hours(1);

    let transitions = subscriptions
        .sweep_period_ends(within_grace, grace())
        .await
        .unwrap();
    assert!(transitions.is_empty());

    let subscription = subscriptions.get("U1").await.unwrap().unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Active);
}

#[tokio::test]
async fn renewal_payment_reactivates_a_past_due_subscription() {
    let (payments, subscriptions) = ledgers();
    activate(&payments, "U1").await;

    let after_grace = Utc::now()
        .checked_add_months(Months::new(1))
        .unwrap()
        + grace()
        + Duration::minutes(1);
    subscriptions
        .sweep_period_ends(after_grace, grace())
        .await
        .unwrap();

    activate(&payments, "U1").await;
    let subscription = subscriptions.get("U1").await.unwrap().unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert!(!subscription.cancel_at_period_end);
}

#[tokio::test]
async fn processor_state_for_unknown_subscription_is_ignored() {
    let (_, subscriptions) = ledgers();

    let applied = subscriptions
        .apply_processor_state(
            "sub_unknown",
            &ProcessorState {
                status: SubscriptionStatus::Canceled,
                period: None,
                cancel_at_period_end: None,
            },
        )
        .await
        .unwrap();
    assert!(applied.is_none());
}
