use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ScheduleConfig;
use crate::services::{PaymentLedger, SubscriptionLedger};

/// Drives the two periodic sweeps on independent intervals until shut down.
pub struct SweepScheduler {
    payments: PaymentLedger,
    subscriptions: SubscriptionLedger,
    schedule: ScheduleConfig,
    shutdown_token: CancellationToken,
}

impl SweepScheduler {
    pub fn new(
        payments: PaymentLedger,
        subscriptions: SubscriptionLedger,
        schedule: ScheduleConfig,
    ) -> Self {
        Self {
            payments,
            subscriptions,
            schedule,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token that stops both loops when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(&self) -> Vec<JoinHandle<()>> {
        tracing::info!(
            payment_every_secs = self.schedule.payment_sweep_every.as_secs(),
            subscription_every_secs = self.schedule.subscription_sweep_every.as_secs(),
            grace_hours = self.schedule.grace_period.num_hours(),
            "Starting sweeps"
        );

        let payments = self.payments.clone();
        let payment_loop = spawn_loop(
            "payment_expiry",
            self.schedule.payment_sweep_every,
            self.shutdown_token.clone(),
            move || {
                let payments = payments.clone();
                async move {
                    match payments.sweep_expired(Utc::now()).await {
                        Ok(transitions) if !transitions.is_empty() => {
                            tracing::info!(expired = transitions.len(), "Payment expiry sweep finished");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Payment expiry sweep failed"),
                    }
                }
            },
        );

        let subscriptions = self.subscriptions.clone();
        let grace = self.schedule.grace_period;
        let subscription_loop = spawn_loop(
            "subscription_period_end",
            self.schedule.subscription_sweep_every,
            self.shutdown_token.clone(),
            move || {
                let subscriptions = subscriptions.clone();
                async move {
                    match subscriptions.sweep_period_ends(Utc::now(), grace).await {
                        Ok(transitions) if !transitions.is_empty() => {
                            tracing::info!(changed = transitions.len(), "Subscription sweep finished");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Subscription sweep failed"),
                    }
                }
            },
        );

        vec![payment_loop, subscription_loop]
    }

    pub fn shutdown(&self) {
        tracing::info!("Stopping sweeps");
        self.shutdown_token.cancel();
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    every: Duration,
    shutdown: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(sweep = name, "Sweep loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    tick().await;
                }
            }
        }
    })
}
