use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout_at, Instant};

use super::client::ProcessorApi;
use super::strategies::{default_strategies, ReconcileContext, SecretStrategy};
use crate::services::metrics::{record_secret_attempt, record_secret_resolved};

const BACKOFF_STEP: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_millis(2000);
const SUBSCRIPTION_EXPAND: &[&str] = &["latest_invoice.payment_intent"];

/// Linear backoff: 250ms per attempt, capped at 2s.
pub fn backoff_for(attempt: u32) -> Duration {
    BACKOFF_STEP.saturating_mul(attempt).min(BACKOFF_CAP)
}

/// Polls the processor until a confirmation secret shows up or the time
/// budget runs out. Read-only: nothing is written on either side.
#[derive(Clone)]
pub struct ConfirmationSecretResolver {
    api: Arc<dyn ProcessorApi>,
    strategies: Arc<Vec<Box<dyn SecretStrategy>>>,
}

impl ConfirmationSecretResolver {
    pub fn new(api: Arc<dyn ProcessorApi>) -> Self {
        Self::with_strategies(api, default_strategies())
    }

    pub fn with_strategies(
        api: Arc<dyn ProcessorApi>,
        strategies: Vec<Box<dyn SecretStrategy>>,
    ) -> Self {
        Self {
            api,
            strategies: Arc::new(strategies),
        }
    }

    /// `None` once `max_wait` is spent; that is an expected outcome, the
    /// client polls again later.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(
        &self,
        subscription_id: &str,
        customer_id: &str,
        max_wait: Duration,
    ) -> Option<String> {
        let deadline = Instant::now() + max_wait;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            record_secret_attempt();

            match timeout_at(deadline, self.attempt(subscription_id, customer_id, attempt)).await {
                Ok(Some((secret, strategy))) => {
                    record_secret_resolved(strategy);
                    tracing::info!(
                        subscription_id = %subscription_id,
                        strategy,
                        attempt,
                        "Confirmation secret resolved"
                    );
                    return Some(secret);
                }
                Ok(None) => {}
                Err(_) => {
                    tracing::debug!(attempt, "Attempt cut off by deadline");
                    break;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(backoff_for(attempt).min(deadline - now)).await;
        }

        tracing::warn!(
            subscription_id = %subscription_id,
            attempts = attempt,
            "Confirmation secret not available before deadline"
        );
        None
    }

    async fn attempt(
        &self,
        subscription_id: &str,
        customer_id: &str,
        attempt: u32,
    ) -> Option<(String, &'static str)> {
        let subscription = match self
            .api
            .get_subscription(subscription_id, SUBSCRIPTION_EXPAND)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Subscription re-fetch failed");
                return None;
            }
        };

        let ctx = ReconcileContext {
            api: self.api.as_ref(),
            customer_id,
            subscription: &subscription,
        };

        for strategy in self.strategies.iter() {
            match strategy.resolve(&ctx).await {
                Ok(Some(secret)) if !secret.is_empty() => return Some((secret, strategy.name())),
                Ok(_) => {
                    tracing::debug!(attempt, strategy = strategy.name(), "No secret yet");
                }
                Err(e) => {
                    tracing::debug!(attempt, strategy = strategy.name(), error = %e, "Strategy failed");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_linear_then_capped() {
        assert_eq!(backoff_for(1), Duration::from_millis(250));
        assert_eq!(backoff_for(4), Duration::from_millis(1000));
        assert_eq!(backoff_for(8), Duration::from_millis(2000));
        assert_eq!(backoff_for(50), Duration::from_millis(2000));
        assert_eq!(backoff_for(u32::MAX), Duration::from_millis(2000));
    }
}
