use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, DateTime as BsonDateTime};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Collection, Database, IndexModel};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use super::repository::{PaymentStore, SubscriptionStore};
use crate::models::{Payment, PaymentStatus, Subscription, SubscriptionStatus};

const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PaymentDocument {
    #[serde(rename = "_id")]
    id: String,
    user_id: String,
    txid: String,
    amount: String,
    status: PaymentStatus,
    pix_payload: String,
    qr_image: String,
    end_to_end_id: Option<String>,
    created_at: BsonDateTime,
    confirmed_at: Option<BsonDateTime>,
    expires_at: BsonDateTime,
    updated_at: BsonDateTime,
    #[serde(default)]
    subscription_applied: bool,
    version: i64,
}

impl From<&Payment> for PaymentDocument {
    fn from(p: &Payment) -> Self {
        Self {
            id: p.id.to_string(),
            user_id: p.user_id.clone(),
            txid: p.txid.clone(),
            amount: p.amount.to_string(),
            status: p.status,
            pix_payload: p.pix_payload.clone(),
            qr_image: p.qr_image.clone(),
            end_to_end_id: p.end_to_end_id.clone(),
            created_at: BsonDateTime::from_chrono(p.created_at),
            confirmed_at: p.confirmed_at.map(BsonDateTime::from_chrono),
            expires_at: BsonDateTime::from_chrono(p.expires_at),
            updated_at: BsonDateTime::from_chrono(p.updated_at),
            subscription_applied: p.subscription_applied,
            version: p.version,
        }
    }
}

impl TryFrom<PaymentDocument> for Payment {
    type Error = AppError;

    fn try_from(d: PaymentDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&d.id)?,
            user_id: d.user_id,
            txid: d.txid,
            amount: Decimal::from_str(&d.amount).map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Stored amount {:?} is invalid: {}", d.amount, e))
            })?,
            status: d.status,
            pix_payload: d.pix_payload,
            qr_image: d.qr_image,
            end_to_end_id: d.end_to_end_id,
            created_at: d.created_at.to_chrono(),
            confirmed_at: d.confirmed_at.map(|t| t.to_chrono()),
            expires_at: d.expires_at.to_chrono(),
            updated_at: d.updated_at.to_chrono(),
            subscription_applied: d.subscription_applied,
            version: d.version,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubscriptionDocument {
    #[serde(rename = "_id")]
    id: String,
    user_id: String,
    status: SubscriptionStatus,
    current_period_start: Option<BsonDateTime>,
    current_period_end: Option<BsonDateTime>,
    cancel_at_period_end: bool,
    processor_customer_id: Option<String>,
    processor_subscription_id: Option<String>,
    created_at: BsonDateTime,
    updated_at: BsonDateTime,
    version: i64,
}

impl From<&Subscription> for SubscriptionDocument {
    fn from(s: &Subscription) -> Self {
        Self {
            id: s.id.to_string(),
            user_id: s.user_id.clone(),
            status: s.status,
            current_period_start: s.current_period_start.map(BsonDateTime::from_chrono),
            current_period_end: s.current_period_end.map(BsonDateTime::from_chrono),
            cancel_at_period_end: s.cancel_at_period_end,
            processor_customer_id: s.processor_customer_id.clone(),
            processor_subscription_id: s.processor_subscription_id.clone(),
            created_at: BsonDateTime::from_chrono(s.created_at),
            updated_at: BsonDateTime::from_chrono(s.updated_at),
            version: s.version,
        }
    }
}

impl TryFrom<SubscriptionDocument> for Subscription {
    type Error = AppError;

    fn try_from(d: SubscriptionDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&d.id)?,
            user_id: d.user_id,
            status: d.status,
            current_period_start: d.current_period_start.map(|t| t.to_chrono()),
            current_period_end: d.current_period_end.map(|t| t.to_chrono()),
            cancel_at_period_end: d.cancel_at_period_end,
            processor_customer_id: d.processor_customer_id,
            processor_subscription_id: d.processor_subscription_id,
            created_at: d.created_at.to_chrono(),
            updated_at: d.updated_at.to_chrono(),
            version: d.version,
        })
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw)
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Stored id {:?} is invalid: {}", raw, e)))
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

/// MongoDB-backed store. Collections: `payments` (unique `txid`) and
/// `subscriptions` (unique `user_id`).
#[derive(Clone)]
pub struct MongoStore {
    payments: Collection<PaymentDocument>,
    subscriptions: Collection<SubscriptionDocument>,
}

impl MongoStore {
    pub fn new(db: &Database) -> Self {
        Self {
            payments: db.collection("payments"),
            subscriptions: db.collection("subscriptions"),
        }
    }

    pub async fn init_indexes(&self) -> Result<(), AppError> {
        let txid_index = IndexModel::builder()
            .keys(doc! { "txid": 1 })
            .options(
                IndexOptions::builder()
                    .name("payment_txid_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        // Serves the expiry sweep.
        let pending_index = IndexModel::builder()
            .keys(doc! { "status": 1, "expires_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("payment_status_expiry_idx".to_string())
                    .build(),
            )
            .build();

        self.payments
            .create_indexes([txid_index, pending_index], None)
            .await?;

        let user_index = IndexModel::builder()
            .keys(doc! { "user_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("subscription_user_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        let processor_index = IndexModel::builder()
            .keys(doc! { "processor_subscription_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("subscription_processor_idx".to_string())
                    .sparse(true)
                    .build(),
            )
            .build();

        let period_index = IndexModel::builder()
            .keys(doc! { "status": 1, "current_period_end": 1 })
            .options(
                IndexOptions::builder()
                    .name("subscription_status_period_idx".to_string())
                    .build(),
            )
            .build();

        self.subscriptions
            .create_indexes([user_index, processor_index, period_index], None)
            .await?;

        tracing::info!("Billing indexes initialized");
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for MongoStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), AppError> {
        match self
            .payments
            .insert_one(PaymentDocument::from(payment), None)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(AppError::Conflict(anyhow::anyhow!(
                "Payment with txid {} already exists",
                payment.txid
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_payment_by_txid(&self, txid: &str) -> Result<Option<Payment>, AppError> {
        self.payments
            .find_one(doc! { "txid": txid }, None)
            .await?
            .map(Payment::try_from)
            .transpose()
    }

    async fn update_payment(&self, payment: &Payment) -> Result<Payment, AppError> {
        let mut next = payment.clone();
        next.version += 1;

        let filter = doc! { "_id": payment.id.to_string(), "version": payment.version };
        let result = self
            .payments
            .replace_one(filter, PaymentDocument::from(&next), None)
            .await?;

        if result.matched_count == 0 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Payment {} was modified concurrently (expected version {})",
                payment.txid,
                payment.version
            )));
        }
        Ok(next)
    }

    async fn list_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Payment>, AppError> {
        let filter = doc! {
            "status": PaymentStatus::Pending.as_str(),
            "expires_at": { "$lt": BsonDateTime::from_chrono(now) },
        };
        let docs: Vec<PaymentDocument> = self.payments.find(filter, None).await?.try_collect().await?;
        docs.into_iter().map(Payment::try_from).collect()
    }
}

#[async_trait]
impl SubscriptionStore for MongoStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), AppError> {
        match self
            .subscriptions
            .insert_one(SubscriptionDocument::from(subscription), None)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(AppError::Conflict(anyhow::anyhow!(
                "Subscription for user {} already exists",
                subscription.user_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_subscription_by_user(
        &self,
        user_id: &str,
    ) -> Result<Option<Subscription>, AppError> {
        self.subscriptions
            .find_one(doc! { "user_id": user_id }, None)
            .await?
            .map(Subscription::try_from)
            .transpose()
    }

    async fn get_subscription_by_processor_id(
        &self,
        processor_subscription_id: &str,
    ) -> Result<Option<Subscription>, AppError> {
        self.subscriptions
            .find_one(
                doc! { "processor_subscription_id": processor_subscription_id },
                None,
            )
            .await?
            .map(Subscription::try_from)
            .transpose()
    }

    async fn update_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, AppError> {
        let mut next = subscription.clone();
        next.version += 1;

        let filter = doc! { "_id": subscription.id.to_string(), "version": subscription.version };
        let result = self
            .subscriptions
            .replace_one(filter, SubscriptionDocument::from(&next), None)
            .await?;

        if result.matched_count == 0 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Subscription for user {} was modified concurrently (expected version {})",
                subscription.user_id,
                subscription.version
            )));
        }
        Ok(next)
    }

    async fn list_active_ended_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, AppError> {
        let filter = doc! {
            "status": SubscriptionStatus::Active.as_str(),
            "current_period_end": { "$lt": BsonDateTime::from_chrono(cutoff) },
        };
        let docs: Vec<SubscriptionDocument> = self
            .subscriptions
            .find(filter, None)
            .await?
            .try_collect()
            .await?;
        docs.into_iter().map(Subscription::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn payment_document_conversion_keeps_fields() {
        let now = crate::models::stored_now();
        let payment = Payment {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            txid: "SUB202401011200-ABC".to_string(),
            amount: Decimal::new(4990, 2),
            status: PaymentStatus::Confirmed,
            pix_payload: "000201".to_string(),
            qr_image: "iVBOR".to_string(),
            end_to_end_id: Some("E123".to_string()),
            created_at: now,
            confirmed_at: Some(now),
            expires_at: now + Duration::minutes(30),
            updated_at: now,
            subscription_applied: true,
            version: 3,
        };

        let restored = Payment::try_from(PaymentDocument::from(&payment)).unwrap();
        assert_eq!(restored.amount.to_string(), "49.90");
        assert_eq!(restored.status, PaymentStatus::Confirmed);
        assert_eq!(restored.version, 3);
        assert!(restored.subscription_applied);
        // Timestamps already at millisecond precision survive BSON intact.
        assert_eq!(restored, payment);
    }
}
