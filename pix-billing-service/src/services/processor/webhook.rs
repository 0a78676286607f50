//! Card processor event intake: signature check, then status mirroring.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_json::Value;
use service_core::error::AppError;
use service_core::utils::signature::verify_hmac_sha256_hex;

use super::client::ProcessorApi;
use super::resources::{string_at, Invoice, ProcessorSubscription};
use crate::models::SubscriptionStatus;
use crate::services::subscriptions::{ProcessorState, SubscriptionLedger};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Deserialize)]
pub struct ProcessorEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_: String,
    pub data: ProcessorEventData,
}

#[derive(Debug, Deserialize)]
pub struct ProcessorEventData {
    pub object: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    Ignored,
}

/// Check a `t=<unix>,v1=<hex>` header against `"{t}.{body}"`.
///
/// Header problems are `BadRequest`; a wrong signature or stale timestamp is
/// `Unauthorized`.
pub fn verify_signature(
    secret: &[u8],
    header: &str,
    body: &[u8],
    now: DateTime<Utc>,
    tolerance_seconds: i64,
) -> Result<(), AppError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("t=") {
            timestamp = Some(rest);
        } else if let Some(rest) = part.strip_prefix("v1=") {
            signatures.push(rest);
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Signature header has no timestamp")))?;
    if signatures.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Signature header has no v1 signature"
        )));
    }
    let signed_at: i64 = timestamp
        .parse()
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Signature timestamp is not a number")))?;

    let tolerance = u64::try_from(tolerance_seconds).unwrap_or(0);
    if now.timestamp().abs_diff(signed_at) > tolerance {
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Signature timestamp outside tolerance"
        )));
    }

    let mut signed_payload = Vec::with_capacity(timestamp.len() + 1 + body.len());
    signed_payload.extend_from_slice(timestamp.as_bytes());
    signed_payload.push(b'.');
    signed_payload.extend_from_slice(body);

    for candidate in signatures {
        if verify_hmac_sha256_hex(secret, &signed_payload, candidate)? {
            return Ok(());
        }
    }

    Err(AppError::Unauthorized(anyhow::anyhow!("Signature mismatch")))
}

fn to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

fn to_window((start, end): (i64, i64)) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    Some((to_datetime(start)?, to_datetime(end)?))
}

#[derive(Clone)]
pub struct ProcessorWebhookHandler {
    subscriptions: SubscriptionLedger,
    api: Arc<dyn ProcessorApi>,
    secret: Option<Secret<String>>,
    tolerance_seconds: i64,
}

impl ProcessorWebhookHandler {
    pub fn new(
        subscriptions: SubscriptionLedger,
        api: Arc<dyn ProcessorApi>,
        secret: Option<Secret<String>>,
        tolerance_seconds: i64,
    ) -> Self {
        Self {
            subscriptions,
            api,
            secret,
            tolerance_seconds,
        }
    }

    /// Verify then parse. Nothing in the body is looked at before the
    /// signature passes.
    pub fn authenticate(
        &self,
        header: Option<&str>,
        body: &[u8],
    ) -> Result<ProcessorEvent, AppError> {
        let secret = self.secret.as_ref().ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("Processor webhook secret is not configured"))
        })?;
        let header = header.ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Missing {} header", SIGNATURE_HEADER))
        })?;

        if let Err(e) = verify_signature(
            secret.expose_secret().as_bytes(),
            header,
            body,
            Utc::now(),
            self.tolerance_seconds,
        ) {
            tracing::warn!(reason = %e, "Processor webhook rejected");
            return Err(e);
        }

        serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Malformed processor event: {}", e)))
    }

    #[tracing::instrument(skip(self, event), fields(event_type = %event.type_, event_id = ?event.id))]
    pub async fn handle(&self, event: &ProcessorEvent) -> Result<WebhookOutcome, AppError> {
        let object = &event.data.object;

        let applied = match event.type_.as_str() {
            "invoice.payment_succeeded" => {
                let invoice = parse_object::<Invoice>(object)?;
                let Some(subscription_id) = invoice_subscription_id(&invoice, object) else {
                    return Ok(WebhookOutcome::Ignored);
                };
                let period = match invoice.line_period().and_then(to_window) {
                    Some(window) => Some(window),
                    None => self.current_window(&subscription_id).await?,
                };
                let state = ProcessorState {
                    status: SubscriptionStatus::Active,
                    period,
                    cancel_at_period_end: None,
                };
                self.subscriptions
                    .apply_processor_state(&subscription_id, &state)
                    .await?
            }
            "invoice.payment_failed" => {
                let invoice = parse_object::<Invoice>(object)?;
                let Some(subscription_id) = invoice_subscription_id(&invoice, object) else {
                    return Ok(WebhookOutcome::Ignored);
                };
                let state = ProcessorState {
                    status: SubscriptionStatus::PastDue,
                    period: None,
                    cancel_at_period_end: None,
                };
                self.subscriptions
                    .apply_processor_state(&subscription_id, &state)
                    .await?
            }
            "customer.subscription.updated" => {
                let subscription = parse_object::<ProcessorSubscription>(object)?;
                let Some(status) = SubscriptionStatus::from_processor(&subscription.status) else {
                    tracing::info!(status = %subscription.status, "Unmapped processor status ignored");
                    return Ok(WebhookOutcome::Ignored);
                };
                let state = ProcessorState {
                    status,
                    period: subscription.period().and_then(to_window),
                    cancel_at_period_end: Some(subscription.cancel_at_period_end),
                };
                self.subscriptions
                    .apply_processor_state(&subscription.id, &state)
                    .await?
            }
            "customer.subscription.deleted" => {
                let subscription = parse_object::<ProcessorSubscription>(object)?;
                let state = ProcessorState {
                    status: SubscriptionStatus::Canceled,
                    period: None,
                    cancel_at_period_end: None,
                };
                self.subscriptions
                    .apply_processor_state(&subscription.id, &state)
                    .await?
            }
            other => {
                tracing::debug!(event_type = %other, "Processor event ignored");
                return Ok(WebhookOutcome::Ignored);
            }
        };

        match applied {
            Some(_) => Ok(WebhookOutcome::Applied),
            None => {
                tracing::info!("Processor event for an unknown subscription ignored");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn current_window(
        &self,
        subscription_id: &str,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, AppError> {
        let fetched = self.api.get_subscription(subscription_id, &[]).await?;
        Ok(fetched.value.period().and_then(to_window))
    }
}

fn parse_object<T: serde::de::DeserializeOwned>(object: &Value) -> Result<T, AppError> {
    serde_json::from_value(object.clone())
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Unexpected event object: {}", e)))
}

fn invoice_subscription_id(invoice: &Invoice, raw: &Value) -> Option<String> {
    invoice
        .subscription
        .clone()
        .or_else(|| {
            string_at(raw, &["parent", "subscription_details", "subscription"]).map(str::to_string)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::utils::signature::hmac_sha256_hex;

    const SECRET: &[u8] = b"whsec_test";

    fn header_for(body: &[u8], at: i64) -> String {
        let mut payload = format!("{}.", at).into_bytes();
        payload.extend_from_slice(body);
        format!("t={},v1={}", at, hmac_sha256_hex(SECRET, &payload).unwrap())
    }

    #[test]
    fn valid_signature_accepted() {
        let now = Utc::now();
        let body = br#"{"type":"ping","data":{"object":{}}}"#;
        let header = header_for(body, now.timestamp());
        assert!(verify_signature(SECRET, &header, body, now, 300).is_ok());
    }

    #[test]
    fn any_matching_v1_accepted() {
        let now = Utc::now();
        let body = b"{}";
        let good = header_for(body, now.timestamp());
        let header = format!("{},v1={}", good.replacen("v1=", "v1=00,v1=", 1), "ff");
        assert!(verify_signature(SECRET, &header, body, now, 300).is_ok());
    }

    #[test]
    fn tampered_body_is_unauthorized() {
        let now = Utc::now();
        let header = header_for(b"{}", now.timestamp());
        let err = verify_signature(SECRET, &header, b"{ }", now, 300).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn stale_timestamp_is_unauthorized() {
        let now = Utc::now();
        let header = header_for(b"{}", now.timestamp() - 301);
        let err = verify_signature(SECRET, &header, b"{}", now, 300).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn extreme_timestamps_are_unauthorized() {
        let now = Utc::now();
        for at in [i64::MIN, i64::MAX] {
            let header = format!("t={},v1={}", at, "00".repeat(32));
            let err = verify_signature(SECRET, &header, b"{}", now, 300).unwrap_err();
            assert!(matches!(err, AppError::Unauthorized(_)), "t={}", at);
        }
    }

    #[test]
    fn malformed_header_is_bad_request() {
        let now = Utc::now();
        for header in ["", "v1=abc", "t=123", "t=abc,v1=00"] {
            let err = verify_signature(SECRET, header, b"{}", now, 300).unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "header {:?}", header);
        }
    }
}
