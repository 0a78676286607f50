//! Persistence seams for payments and subscriptions.
//!
//! Every `update_*` is a compare-and-swap on `version`: the caller passes the
//! record as it read it, the store writes only if the stored version is still
//! the same, and returns the record with its version bumped. A stale write
//! fails with `AppError::Conflict`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use service_core::error::AppError;

use crate::models::{Payment, PaymentStatus, Subscription, SubscriptionStatus};

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), AppError>;

    async fn get_payment_by_txid(&self, txid: &str) -> Result<Option<Payment>, AppError>;

    async fn update_payment(&self, payment: &Payment) -> Result<Payment, AppError>;

    /// PENDING payments whose `expires_at` is strictly before `now`.
    async fn list_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Payment>, AppError>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Fails with `Conflict` when the user already has a subscription.
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), AppError>;

    async fn get_subscription_by_user(
        &self,
        user_id: &str,
    ) -> Result<Option<Subscription>, AppError>;

    async fn get_subscription_by_processor_id(
        &self,
        processor_subscription_id: &str,
    ) -> Result<Option<Subscription>, AppError>;

    async fn update_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, AppError>;

    /// ACTIVE subscriptions whose period ended strictly before `cutoff`.
    async fn list_active_ended_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, AppError>;
}

fn stale(kind: &str, key: &str, expected: i64, found: i64) -> AppError {
    AppError::Conflict(anyhow::anyhow!(
        "{} {} was modified concurrently (expected version {}, found {})",
        kind,
        key,
        expected,
        found
    ))
}

/// Process-local store used by tests and when no database is configured.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    payments: Arc<DashMap<String, Payment>>,
    subscriptions: Arc<DashMap<String, Subscription>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), AppError> {
        use dashmap::mapref::entry::Entry;

        match self.payments.entry(payment.txid.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict(anyhow::anyhow!(
                "Payment with txid {} already exists",
                payment.txid
            ))),
            Entry::Vacant(slot) => {
                slot.insert(payment.clone());
                Ok(())
            }
        }
    }

    async fn get_payment_by_txid(&self, txid: &str) -> Result<Option<Payment>, AppError> {
        Ok(self.payments.get(txid).map(|p| p.value().clone()))
    }

    async fn update_payment(&self, payment: &Payment) -> Result<Payment, AppError> {
        let mut stored = self.payments.get_mut(&payment.txid).ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Payment {} not found", payment.txid))
        })?;

        if stored.version != payment.version {
            return Err(stale("Payment", &payment.txid, payment.version, stored.version));
        }

        let mut next = payment.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn list_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Payment>, AppError> {
        Ok(self
            .payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Pending && p.expires_at < now)
            .map(|p| p.value().clone())
            .collect())
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), AppError> {
        use dashmap::mapref::entry::Entry;

        match self.subscriptions.entry(subscription.user_id.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict(anyhow::anyhow!(
                "Subscription for user {} already exists",
                subscription.user_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(subscription.clone());
                Ok(())
            }
        }
    }

    async fn get_subscription_by_user(
        &self,
        user_id: &str,
    ) -> Result<Option<Subscription>, AppError> {
        Ok(self.subscriptions.get(user_id).map(|s| s.value().clone()))
    }

    async fn get_subscription_by_processor_id(
        &self,
        processor_subscription_id: &str,
    ) -> Result<Option<Subscription>, AppError> {
        Ok(self
            .subscriptions
            .iter()
            .find(|s| s.processor_subscription_id.as_deref() == Some(processor_subscription_id))
            .map(|s| s.value().clone()))
    }

    async fn update_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, AppError> {
        let mut stored = self
            .subscriptions
            .get_mut(&subscription.user_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Subscription for user {} not found",
                    subscription.user_id
                ))
            })?;

        if stored.version != subscription.version {
            return Err(stale(
                "Subscription",
                &subscription.user_id,
                subscription.version,
                stored.version,
            ));
        }

        let mut next = subscription.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn list_active_ended_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, AppError> {
        Ok(self
            .subscriptions
            .iter()
            .filter(|s| {
                s.status == SubscriptionStatus::Active
                    && s.current_period_end.is_some_and(|end| end < cutoff)
            })
            .map(|s| s.value().clone())
            .collect())
    }
}
