use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use service_core::error::AppError;
use tracing::instrument;

use super::metrics::record_subscription_transition;
use super::repository::SubscriptionStore;
use crate::models::{
    stored_now, stored_precision, Subscription, SubscriptionStatus, SubscriptionTransition,
};

/// Write attempts before a persistent version conflict is surfaced.
const MAX_WRITE_ATTEMPTS: usize = 3;

/// State reported by the card processor for one of its subscriptions.
#[derive(Debug, Clone)]
pub struct ProcessorState {
    pub status: SubscriptionStatus,
    pub period: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub cancel_at_period_end: Option<bool>,
}

#[derive(Clone)]
pub struct SubscriptionLedger {
    store: Arc<dyn SubscriptionStore>,
}

impl SubscriptionLedger {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<Subscription>, AppError> {
        self.store.get_subscription_by_user(user_id).await
    }

    /// Read-modify-write with conflict retry. A missing record is created
    /// (INACTIVE) first when `create` is set, otherwise `Ok(None)`.
    ///
    /// `mutate` returns whether it changed anything; an existing record it
    /// leaves alone is returned unwritten, paired with `false`.
    async fn modify<F>(
        &self,
        user_id: &str,
        create: bool,
        mutate: F,
    ) -> Result<Option<(Subscription, bool)>, AppError>
    where
        F: Fn(&mut Subscription) -> Result<bool, AppError> + Send + Sync,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let now = stored_now();
            let existing = self.store.get_subscription_by_user(user_id).await?;

            let result = match existing {
                Some(current) => {
                    let mut next = current.clone();
                    if !mutate(&mut next)? {
                        return Ok(Some((current, false)));
                    }
                    next.updated_at = now;
                    self.store.update_subscription(&next).await
                }
                None if create => {
                    let mut fresh = Subscription::new_inactive(user_id, now);
                    mutate(&mut fresh)?;
                    let inserted = self.store.insert_subscription(&fresh).await;
                    inserted.map(|_| fresh)
                }
                None => return Ok(None),
            };

            match result {
                Ok(written) => return Ok(Some((written, true))),
                Err(e) if e.is_conflict() => {
                    tracing::debug!(user_id = %user_id, attempt, "Subscription write lost a race, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::Conflict(anyhow::anyhow!(
            "Subscription for user {} kept changing; gave up after {} attempts",
            user_id,
            MAX_WRITE_ATTEMPTS
        )))
    }

    /// Activate for the given window, creating the record on first use.
    ///
    /// A record whose current period already starts at or after
    /// `period_start` is left as is, so activating for the same confirmation
    /// twice changes nothing the second time.
    #[instrument(skip(self))]
    pub(crate) async fn activate(
        &self,
        user_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Subscription, AppError> {
        let period_start = stored_precision(period_start);
        let period_end = stored_precision(period_end);

        let (activated, changed) = self
            .modify(user_id, true, |sub| {
                if sub.current_period_start.is_some_and(|start| start >= period_start) {
                    return Ok(false);
                }
                sub.set_period(period_start, period_end)?;
                sub.status = SubscriptionStatus::Active;
                sub.cancel_at_period_end = false;
                Ok(true)
            })
            .await?
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!("Activation produced no record"))
            })?;

        if !changed {
            tracing::info!(
                user_id = %user_id,
                period_start = %period_start,
                "Activation already covered by the current period"
            );
            return Ok(activated);
        }

        record_subscription_transition(SubscriptionStatus::Active);
        tracing::info!(
            user_id = %user_id,
            period_end = %period_end,
            "Subscription activated"
        );
        Ok(activated)
    }

    /// Mark the subscription to end instead of lapsing at its period end.
    #[instrument(skip(self))]
    pub async fn request_cancel_at_period_end(
        &self,
        user_id: &str,
    ) -> Result<Subscription, AppError> {
        let updated = self
            .modify(user_id, false, |sub| {
                sub.cancel_at_period_end = true;
                Ok(true)
            })
            .await?
            .map(|(sub, _)| sub)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("No subscription for user {}", user_id))
            })?;

        tracing::info!(user_id = %user_id, "Cancellation at period end requested");
        Ok(updated)
    }

    /// Move ACTIVE subscriptions past `period_end + grace` to CANCELED (when
    /// cancellation was requested) or PAST_DUE.
    #[instrument(skip(self))]
    pub async fn sweep_period_ends(
        &self,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> Result<Vec<SubscriptionTransition>, AppError> {
        let candidates = self.store.list_active_ended_before(now - grace).await?;
        let mut transitions = Vec::new();

        for candidate in candidates {
            let current = match self
                .store
                .get_subscription_by_user(&candidate.user_id)
                .await
            {
                Ok(Some(current)) => current,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(user_id = %candidate.user_id, error = %e, "Sweep read failed, skipping");
                    continue;
                }
            };

            if !current.is_past_grace(now, grace) {
                continue;
            }

            let target = if current.cancel_at_period_end {
                SubscriptionStatus::Canceled
            } else {
                SubscriptionStatus::PastDue
            };

            let mut next = current.clone();
            next.status = target;
            next.updated_at = stored_precision(now);

            match self.store.update_subscription(&next).await {
                Ok(_) => {
                    record_subscription_transition(target);
                    tracing::info!(
                        user_id = %current.user_id,
                        to = target.as_str(),
                        "Subscription period ended"
                    );
                    transitions.push(SubscriptionTransition {
                        record_id: current.user_id.clone(),
                        from: current.status,
                        to: target,
                        at: now,
                    });
                }
                Err(e) if e.is_conflict() => {
                    tracing::debug!(user_id = %current.user_id, "Concurrent write won, skipping");
                }
                Err(e) => {
                    tracing::warn!(user_id = %current.user_id, error = %e, "Sweep write failed, skipping");
                }
            }
        }

        Ok(transitions)
    }

    /// Record the processor ids of a freshly created card subscription.
    #[instrument(skip(self))]
    pub async fn attach_processor_ids(
        &self,
        user_id: &str,
        customer_id: &str,
        processor_subscription_id: &str,
        status: SubscriptionStatus,
    ) -> Result<Subscription, AppError> {
        self.modify(user_id, true, |sub| {
            sub.processor_customer_id = Some(customer_id.to_string());
            sub.processor_subscription_id = Some(processor_subscription_id.to_string());
            sub.status = status;
            Ok(true)
        })
        .await?
        .map(|(sub, _)| sub)
        .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Attach produced no record")))
    }

    /// Mirror the processor's view of a card subscription. Unknown ids are
    /// `Ok(None)`.
    #[instrument(skip(self, state), fields(status = state.status.as_str()))]
    pub async fn apply_processor_state(
        &self,
        processor_subscription_id: &str,
        state: &ProcessorState,
    ) -> Result<Option<Subscription>, AppError> {
        let Some(local) = self
            .store
            .get_subscription_by_processor_id(processor_subscription_id)
            .await?
        else {
            return Ok(None);
        };

        let updated = self
            .modify(&local.user_id, false, |sub| {
                if let Some((start, end)) = state.period {
                    sub.set_period(start, end)?;
                }
                if state.status == SubscriptionStatus::Active
                    && (sub.current_period_start.is_none() || sub.current_period_end.is_none())
                {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "Processor reported an active subscription without a billing period"
                    )));
                }
                if let Some(flag) = state.cancel_at_period_end {
                    sub.cancel_at_period_end = flag;
                }
                sub.status = state.status;
                Ok(true)
            })
            .await?
            .map(|(sub, _)| sub);

        if let Some(sub) = &updated {
            if sub.status != local.status {
                record_subscription_transition(sub.status);
            }
            tracing::info!(
                user_id = %sub.user_id,
                processor_subscription_id = %processor_subscription_id,
                status = sub.status.as_str(),
                "Applied processor subscription state"
            );
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::repository::InMemoryStore;

    fn ledger() -> SubscriptionLedger {
        SubscriptionLedger::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn activation_creates_then_extends() {
        let ledger = ledger();
        let now = stored_now();

        let first = ledger
            .activate("u1", now, now + Duration::days(30))
            .await
            .unwrap();
        assert_eq!(first.status, SubscriptionStatus::Active);
        assert_eq!(first.version, 0);

        let renewed_at = now + Duration::days(29);
        let second = ledger
            .activate("u1", renewed_at, renewed_at + Duration::days(30))
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.version, 1);
        assert_eq!(second.current_period_end, Some(renewed_at + Duration::days(30)));
    }

    #[tokio::test]
    async fn repeated_activation_for_same_start_is_a_no_op() {
        let ledger = ledger();
        let now = stored_now();
        let first = ledger.activate("u1", now, now + Duration::days(30)).await.unwrap();

        let again = ledger.activate("u1", now, now + Duration::days(30)).await.unwrap();
        assert_eq!(again, first);

        let older = ledger
            .activate("u1", now - Duration::days(1), now + Duration::days(29))
            .await
            .unwrap();
        assert_eq!(older.version, first.version);
        assert_eq!(older.current_period_end, Some(now + Duration::days(30)));
    }

    #[tokio::test]
    async fn activation_clears_pending_cancellation() {
        let ledger = ledger();
        let now = stored_now();
        ledger.activate("u1", now, now + Duration::days(30)).await.unwrap();
        ledger.request_cancel_at_period_end("u1").await.unwrap();

        let later = now + Duration::days(30);
        let renewed = ledger.activate("u1", later, later + Duration::days(30)).await.unwrap();
        assert!(!renewed.cancel_at_period_end);
    }

    #[tokio::test]
    async fn inverted_window_is_rejected() {
        let ledger = ledger();
        let now = Utc::now();
        assert!(ledger.activate("u1", now, now - Duration::days(1)).await.is_err());
        assert!(ledger.get("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_for_unknown_user_is_not_found() {
        let err = ledger().request_cancel_at_period_end("nobody").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn unknown_processor_subscription_is_ignored() {
        let state = ProcessorState {
            status: SubscriptionStatus::Canceled,
            period: None,
            cancel_at_period_end: None,
        };
        let result = ledger().apply_processor_state("sub_missing", &state).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn processor_state_is_mirrored() {
        let ledger = ledger();
        ledger
            .attach_processor_ids("u1", "cus_1", "sub_1", SubscriptionStatus::Incomplete)
            .await
            .unwrap();

        let now = Utc::now();
        let state = ProcessorState {
            status: SubscriptionStatus::Active,
            period: Some((now, now + Duration::days(30))),
            cancel_at_period_end: Some(true),
        };
        let updated = ledger
            .apply_processor_state("sub_1", &state)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, SubscriptionStatus::Active);
        assert!(updated.cancel_at_period_end);
        assert_eq!(updated.processor_customer_id.as_deref(), Some("cus_1"));
    }
}
