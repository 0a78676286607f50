use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use crate::models::{PaymentStatus, SubscriptionStatus};

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once; only the
/// first call installs.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder not installed");
            return;
        }
    }

    describe_counter!(
        "pix_payments_created_total",
        "PIX charges issued by checkout"
    );
    describe_counter!(
        "pix_payment_transitions_total",
        "Payments leaving PENDING, by target status"
    );
    describe_counter!(
        "subscription_transitions_total",
        "Subscription status changes, by target status"
    );
    describe_counter!(
        "processor_secret_attempts_total",
        "Reconciliation attempts against the card processor"
    );
    describe_counter!(
        "processor_secret_resolved_total",
        "Confirmation secrets found, by the strategy that found them"
    );
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_payment_created() {
    counter!("pix_payments_created_total").increment(1);
}

pub fn record_payment_transition(to: PaymentStatus) {
    counter!("pix_payment_transitions_total", "to" => to.as_str()).increment(1);
}

pub fn record_subscription_transition(to: SubscriptionStatus) {
    counter!("subscription_transitions_total", "to" => to.as_str()).increment(1);
}

pub fn record_secret_attempt() {
    counter!("processor_secret_attempts_total").increment(1);
}

pub fn record_secret_resolved(strategy: &'static str) {
    counter!("processor_secret_resolved_total", "strategy" => strategy).increment(1);
}
