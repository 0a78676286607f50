use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Payment, PaymentStatus, Subscription, SubscriptionStatus};

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub txid: String,
    pub encoded_payload: String,
    pub qr_image: String,
    pub amount: Decimal,
    pub expires_at: DateTime<Utc>,
}

impl From<Payment> for CheckoutResponse {
    fn from(p: Payment) -> Self {
        Self {
            txid: p.txid,
            encoded_payload: p.pix_payload,
            qr_image: p.qr_image,
            amount: p.amount,
            expires_at: p.expires_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentStatusResponse {
    pub txid: String,
    pub payment_status: PaymentStatus,
    pub subscription_status: Option<SubscriptionStatus>,
    pub amount: Decimal,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
}

impl PaymentStatusResponse {
    pub fn new(payment: Payment, subscription: Option<Subscription>) -> Self {
        Self {
            txid: payment.txid,
            payment_status: payment.status,
            subscription_status: subscription.as_ref().map(|s| s.status),
            amount: payment.amount,
            expires_at: payment.expires_at,
            confirmed_at: payment.confirmed_at,
            current_period_start: subscription.as_ref().and_then(|s| s.current_period_start),
            current_period_end: subscription.as_ref().and_then(|s| s.current_period_end),
        }
    }
}

/// Settlement notification posted by the PIX provider.
#[derive(Debug, Deserialize, Validate)]
pub struct PixWebhookRequest {
    #[validate(length(min = 1, max = 35))]
    pub txid: String,
    #[serde(rename = "endToEndId", default)]
    pub end_to_end_id: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[validate(length(min = 1))]
    pub status: String,
    #[serde(rename = "occurredAt", default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PixWebhookResponse {
    pub txid: String,
    pub applied: bool,
    pub payment_status: Option<PaymentStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CancelSubscriptionRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub user_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(s: Subscription) -> Self {
        Self {
            user_id: s.user_id,
            status: s.status,
            current_period_start: s.current_period_start,
            current_period_end: s.current_period_end,
            cancel_at_period_end: s.cancel_at_period_end,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CardSubscriptionRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClientSecretResponse {
    pub client_secret: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_accepts_string_or_number_amount() {
        let a: PixWebhookRequest = serde_json::from_str(
            r#"{"txid":"SUB1","status":"CONFIRMED","amount":"49.90"}"#,
        )
        .unwrap();
        let b: PixWebhookRequest =
            serde_json::from_str(r#"{"txid":"SUB1","status":"CONFIRMED","amount":49.90}"#).unwrap();
        assert_eq!(a.amount, b.amount);
    }

    #[test]
    fn empty_txid_fails_validation() {
        let req: PixWebhookRequest =
            serde_json::from_str(r#"{"txid":"","status":"CONFIRMED"}"#).unwrap();
        assert!(req.validate().is_err());
    }
}
