//! Subscription model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

/// Subscription status. The last three only occur on card-billed subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Inactive,
    Active,
    PastDue,
    Canceled,
    Incomplete,
    Trialing,
    Unpaid,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Inactive => "INACTIVE",
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::PastDue => "PAST_DUE",
            SubscriptionStatus::Canceled => "CANCELED",
            SubscriptionStatus::Incomplete => "INCOMPLETE",
            SubscriptionStatus::Trialing => "TRIALING",
            SubscriptionStatus::Unpaid => "UNPAID",
        }
    }

    /// Map a card processor's lowercase status. `incomplete_expired` has no
    /// local counterpart and is treated as canceled.
    pub fn from_processor(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "canceled" | "incomplete_expired" => Some(SubscriptionStatus::Canceled),
            "incomplete" => Some(SubscriptionStatus::Incomplete),
            "trialing" => Some(SubscriptionStatus::Trialing),
            "unpaid" => Some(SubscriptionStatus::Unpaid),
            _ => None,
        }
    }
}

/// A user's subscription. One per user, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub processor_customer_id: Option<String>,
    pub processor_subscription_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Subscription {
    /// A fresh, never-activated subscription for `user_id`.
    pub fn new_inactive(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            status: SubscriptionStatus::Inactive,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            processor_customer_id: None,
            processor_subscription_id: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Set the billing window, refusing an end before its start.
    pub fn set_period(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if end < start {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Billing period ends ({}) before it starts ({})",
                end,
                start
            )));
        }
        self.current_period_start = Some(start);
        self.current_period_end = Some(end);
        Ok(())
    }

    /// True once `now` is past the period end plus the grace window.
    pub fn is_past_grace(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        self.status == SubscriptionStatus::Active
            && self
                .current_period_end
                .is_some_and(|end| end < now - grace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn inverted_period_rejected() {
        let now = Utc::now();
        let mut sub = Subscription::new_inactive("u1", now);
        assert!(sub.set_period(now, now - Duration::seconds(1)).is_err());
        assert!(sub.current_period_start.is_none());
        assert!(sub.set_period(now, now).is_ok());
    }

    #[test]
    fn grace_window_respected() {
        let now = Utc::now();
        let mut sub = Subscription::new_inactive("u1", now);
        sub.status = SubscriptionStatus::Active;
        sub.set_period(now - Duration::days(31), now - Duration::hours(2))
            .unwrap();

        assert!(!sub.is_past_grace(now, Duration::hours(3)));
        assert!(sub.is_past_grace(now, Duration::hours(1)));
    }

    #[test]
    fn processor_status_mapping() {
        assert_eq!(
            SubscriptionStatus::from_processor("past_due"),
            Some(SubscriptionStatus::PastDue)
        );
        assert_eq!(
            SubscriptionStatus::from_processor("incomplete_expired"),
            Some(SubscriptionStatus::Canceled)
        );
        assert_eq!(SubscriptionStatus::from_processor("paused"), None);
    }
}
