use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use service_core::error::AppError;
use tracing::instrument;

use super::client::ProcessorApi;
use super::reconcile::ConfirmationSecretResolver;
use crate::models::SubscriptionStatus;
use crate::services::subscriptions::SubscriptionLedger;

#[derive(Debug, Clone, Serialize)]
pub struct CardCheckout {
    pub subscription_id: String,
    pub status: SubscriptionStatus,
    pub client_secret: Option<String>,
}

/// Card subscription checkout against the external processor.
#[derive(Clone)]
pub struct CardBilling {
    api: Arc<dyn ProcessorApi>,
    resolver: ConfirmationSecretResolver,
    subscriptions: SubscriptionLedger,
    /// user id -> processor customer id. Advisory; the subscription record
    /// holds the durable mapping.
    customers: Arc<DashMap<String, String>>,
    price_id: Option<String>,
    secret_wait: Duration,
}

impl CardBilling {
    pub fn new(
        api: Arc<dyn ProcessorApi>,
        resolver: ConfirmationSecretResolver,
        subscriptions: SubscriptionLedger,
        price_id: Option<String>,
        secret_wait: Duration,
    ) -> Self {
        Self {
            api,
            resolver,
            subscriptions,
            customers: Arc::new(DashMap::new()),
            price_id,
            secret_wait,
        }
    }

    async fn ensure_customer(&self, user_id: &str, email: &str) -> Result<String, AppError> {
        if let Some(cached) = self.customers.get(user_id) {
            return Ok(cached.value().clone());
        }

        let stored = self
            .subscriptions
            .get(user_id)
            .await?
            .and_then(|s| s.processor_customer_id);

        let customer_id = match stored {
            Some(id) => id,
            None => self.api.create_customer(email, user_id).await?.id,
        };

        self.customers
            .insert(user_id.to_string(), customer_id.clone());
        Ok(customer_id)
    }

    /// Create the processor subscription, record it locally as INCOMPLETE
    /// and try to hand back the secret the client needs to pay.
    #[instrument(skip(self, email))]
    pub async fn start_subscription(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<CardCheckout, AppError> {
        let price_id = self.price_id.as_deref().ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("PROCESSOR_PRICE_ID is not configured"))
        })?;

        if let Some(existing) = self.subscriptions.get(user_id).await? {
            if existing.status == SubscriptionStatus::Active {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "User {} already has an active subscription",
                    user_id
                )));
            }
        }

        let customer_id = self.ensure_customer(user_id, email).await?;
        let created = self
            .api
            .create_subscription(&customer_id, price_id, user_id)
            .await?;

        let status = SubscriptionStatus::from_processor(&created.value.status)
            .unwrap_or(SubscriptionStatus::Incomplete);
        self.subscriptions
            .attach_processor_ids(user_id, &customer_id, &created.value.id, status)
            .await?;

        tracing::info!(
            user_id = %user_id,
            processor_subscription_id = %created.value.id,
            status = status.as_str(),
            "Card subscription created"
        );

        let client_secret = self
            .resolver
            .resolve(&created.value.id, &customer_id, self.secret_wait)
            .await;

        Ok(CardCheckout {
            subscription_id: created.value.id,
            status,
            client_secret,
        })
    }

    /// Retry secret resolution for a subscription still awaiting payment.
    #[instrument(skip(self))]
    pub async fn resolve_secret(&self, user_id: &str) -> Result<Option<String>, AppError> {
        let subscription = self
            .subscriptions
            .get(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("No subscription for user {}", user_id)))?;

        let (Some(processor_id), Some(customer_id)) = (
            subscription.processor_subscription_id.as_deref(),
            subscription.processor_customer_id.as_deref(),
        ) else {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "User {} has no card subscription",
                user_id
            )));
        };

        if subscription.status != SubscriptionStatus::Incomplete {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Subscription is {} and not awaiting payment",
                subscription.status.as_str()
            )));
        }

        Ok(self
            .resolver
            .resolve(processor_id, customer_id, self.secret_wait)
            .await)
    }
}
