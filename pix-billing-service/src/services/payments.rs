use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use service_core::error::AppError;
use tracing::instrument;
use uuid::Uuid;

use super::metrics::{record_payment_created, record_payment_transition};
use super::qr::QrRenderer;
use super::repository::PaymentStore;
use super::subscriptions::SubscriptionLedger;
use crate::config::PixSettings;
use crate::models::{
    stored_now, stored_precision, Payment, PaymentStatus, PaymentTransition, ReportedStatus,
    Subscription,
};
use crate::pix::{generate_txid, CodeKind, PixPayload};

const MAX_WRITE_ATTEMPTS: usize = 3;
const MANUAL_REFERENCE_PREFIX: &str = "MANUAL-";

/// A settlement notification for one charge.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub txid: String,
    pub status: ReportedStatus,
    pub end_to_end_id: Option<String>,
    pub amount: Option<Decimal>,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Owns payment records: issues charges, applies settlement events, and
/// expires charges nobody paid.
#[derive(Clone)]
pub struct PaymentLedger {
    store: Arc<dyn PaymentStore>,
    subscriptions: SubscriptionLedger,
    renderer: Arc<dyn QrRenderer>,
    settings: PixSettings,
}

impl PaymentLedger {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        subscriptions: SubscriptionLedger,
        renderer: Arc<dyn QrRenderer>,
        settings: PixSettings,
    ) -> Self {
        Self {
            store,
            subscriptions,
            renderer,
            settings,
        }
    }

    /// Issue a new dynamic charge for `user_id` at the configured price.
    #[instrument(skip(self))]
    pub async fn create_pending(&self, user_id: &str) -> Result<Payment, AppError> {
        let profile = self.settings.validate()?;
        let now = stored_now();
        let txid = generate_txid(&self.settings.txid_prefix, now);

        let mut amount = profile
            .amount
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        amount.rescale(2);

        let pix_payload = PixPayload {
            key: &profile.key,
            merchant_name: &profile.merchant_name,
            merchant_city: &profile.merchant_city,
            amount,
            txid: &txid,
            kind: CodeKind::Dynamic,
        }
        .encode()?;

        let renderer = Arc::clone(&self.renderer);
        let to_render = pix_payload.clone();
        let qr_image = tokio::task::spawn_blocking(move || renderer.render_base64(&to_render))
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("QR render task failed: {}", e)))??;

        let payment = Payment {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            txid,
            amount,
            status: PaymentStatus::Pending,
            pix_payload,
            qr_image,
            end_to_end_id: None,
            created_at: now,
            confirmed_at: None,
            expires_at: now + self.settings.qr_expiry,
            updated_at: now,
            subscription_applied: false,
            version: 0,
        };

        self.store.insert_payment(&payment).await?;
        record_payment_created();

        tracing::info!(
            txid = %payment.txid,
            user_id = %user_id,
            amount = %payment.amount,
            expires_at = %payment.expires_at,
            "PIX charge created"
        );
        Ok(payment)
    }

    pub async fn get_by_txid(&self, txid: &str) -> Result<Option<Payment>, AppError> {
        self.store.get_payment_by_txid(txid).await
    }

    /// The payment together with its owner's subscription, if any.
    pub async fn status_of(
        &self,
        txid: &str,
    ) -> Result<(Payment, Option<Subscription>), AppError> {
        let payment = self
            .store
            .get_payment_by_txid(txid)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment {} not found", txid)))?;
        let subscription = self.subscriptions.get(&payment.user_id).await?;
        Ok((payment, subscription))
    }

    /// Apply a settlement event. `Ok(None)` means the txid is unknown.
    ///
    /// Only PENDING leaves PENDING. Of several concurrent confirmations only
    /// the one whose write lands confirms; a later delivery of the same
    /// confirmation only finishes an activation that did not get recorded.
    #[instrument(skip(self, event), fields(txid = %event.txid))]
    pub async fn apply_event(&self, event: &PaymentEvent) -> Result<Option<Payment>, AppError> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let Some(current) = self.store.get_payment_by_txid(&event.txid).await? else {
                return Ok(None);
            };

            if attempt == 1 {
                if let Some(reported) = event.amount {
                    if reported != current.amount {
                        tracing::warn!(
                            txid = %current.txid,
                            expected = %current.amount,
                            reported = %reported,
                            "Settlement amount differs from charge amount"
                        );
                    }
                }
            }

            let target = match (&event.status, current.status) {
                (ReportedStatus::Confirmed, PaymentStatus::Confirmed) => {
                    if current.subscription_applied {
                        return Ok(Some(current));
                    }
                    tracing::info!(txid = %current.txid, "Resuming activation for a confirmed payment");
                    return self.finish_activation(current).await.map(Some);
                }
                // FAILED and EXPIRED are as final as CONFIRMED: a late
                // confirmation for an expired charge is logged, not applied.
                (_, status) if status.is_terminal() => {
                    tracing::info!(
                        txid = %current.txid,
                        stored = status.as_str(),
                        reported = ?event.status,
                        "Late event for a settled payment ignored"
                    );
                    return Ok(Some(current));
                }
                (ReportedStatus::Other(raw), _) => {
                    tracing::info!(txid = %current.txid, reported = %raw, "Unhandled payment status ignored");
                    return Ok(Some(current));
                }
                (ReportedStatus::Confirmed, _) => PaymentStatus::Confirmed,
                (ReportedStatus::Failed, _) => PaymentStatus::Failed,
            };

            let now = stored_now();
            let mut next = current.clone();
            next.status = target;
            next.updated_at = now;
            if target == PaymentStatus::Confirmed {
                next.confirmed_at = Some(event.occurred_at.map_or(now, stored_precision));
                next.end_to_end_id = event.end_to_end_id.clone();
            }

            match self.store.update_payment(&next).await {
                Ok(written) => {
                    record_payment_transition(target);
                    tracing::info!(
                        txid = %written.txid,
                        to = target.as_str(),
                        end_to_end_id = ?written.end_to_end_id,
                        "Payment settled"
                    );

                    if target == PaymentStatus::Confirmed {
                        return self.finish_activation(written).await.map(Some);
                    }
                    return Ok(Some(written));
                }
                Err(e) if e.is_conflict() => {
                    tracing::debug!(txid = %event.txid, attempt, "Payment write lost a race, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::Conflict(anyhow::anyhow!(
            "Payment {} kept changing; gave up after {} attempts",
            event.txid,
            MAX_WRITE_ATTEMPTS
        )))
    }

    /// Activate the owner's subscription for a CONFIRMED payment, then mark
    /// the payment so redeliveries stop here.
    ///
    /// The period starts at the confirmation write (`updated_at`, which no
    /// other write touches while the marker is unset), so a retry after a
    /// failed activation recomputes the same window and a repeat is a no-op.
    async fn finish_activation(&self, confirmed: Payment) -> Result<Payment, AppError> {
        let period_start = confirmed.updated_at;
        let period_end = period_start
            .checked_add_months(Months::new(1))
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Billing period overflow")))?;
        self.subscriptions
            .activate(&confirmed.user_id, period_start, period_end)
            .await?;

        let mut current = confirmed;
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            if current.subscription_applied {
                return Ok(current);
            }
            let mut next = current.clone();
            next.subscription_applied = true;
            next.updated_at = stored_now();

            match self.store.update_payment(&next).await {
                Ok(written) => return Ok(written),
                Err(e) if e.is_conflict() => {
                    tracing::debug!(txid = %current.txid, attempt, "Activation marker lost a race, re-reading");
                    current = self
                        .store
                        .get_payment_by_txid(&current.txid)
                        .await?
                        .ok_or_else(|| {
                            AppError::NotFound(anyhow::anyhow!("Payment {} vanished", current.txid))
                        })?;
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::Conflict(anyhow::anyhow!(
            "Payment {} kept changing while recording activation",
            current.txid
        )))
    }

    /// Operator confirmation without a settlement notification.
    #[instrument(skip(self))]
    pub async fn confirm_manually(&self, txid: &str) -> Result<Payment, AppError> {
        let event = PaymentEvent {
            txid: txid.to_string(),
            status: ReportedStatus::Confirmed,
            end_to_end_id: Some(format!(
                "{}{}",
                MANUAL_REFERENCE_PREFIX,
                Uuid::new_v4().simple().to_string().to_uppercase()
            )),
            amount: None,
            occurred_at: None,
        };

        self.apply_event(&event)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment {} not found", txid)))
    }

    /// Expire PENDING charges whose deadline passed before `now`.
    #[instrument(skip(self))]
    pub async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentTransition>, AppError> {
        let candidates = self.store.list_expired_pending(now).await?;
        let mut transitions = Vec::new();

        for candidate in candidates {
            // Re-read: a confirmation may have landed since the listing.
            let current = match self.store.get_payment_by_txid(&candidate.txid).await {
                Ok(Some(current)) => current,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(txid = %candidate.txid, error = %e, "Sweep read failed, skipping");
                    continue;
                }
            };

            if !current.is_expired_at(now) {
                tracing::debug!(txid = %current.txid, status = current.status.as_str(), "No longer expirable");
                continue;
            }

            let mut next = current.clone();
            next.status = PaymentStatus::Expired;
            next.updated_at = stored_precision(now);

            match self.store.update_payment(&next).await {
                Ok(_) => {
                    record_payment_transition(PaymentStatus::Expired);
                    tracing::info!(txid = %current.txid, "Payment expired");
                    transitions.push(PaymentTransition {
                        record_id: current.txid.clone(),
                        from: current.status,
                        to: PaymentStatus::Expired,
                        at: now,
                    });
                }
                Err(e) if e.is_conflict() => {
                    tracing::debug!(txid = %current.txid, "Concurrent write won, skipping");
                }
                Err(e) => {
                    tracing::warn!(txid = %current.txid, error = %e, "Sweep write failed, skipping");
                }
            }
        }

        Ok(transitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::repository::InMemoryStore;

    struct FixedRenderer;

    impl QrRenderer for FixedRenderer {
        fn render_base64(&self, _payload: &str) -> Result<String, AppError> {
            Ok("cXI=".to_string())
        }
    }

    fn settings(amount: &str) -> PixSettings {
        PixSettings {
            key: Some("pagamentos@exemplo.com.br".to_string()),
            merchant_name: Some("Loja Exemplo".to_string()),
            merchant_city: Some("Sao Paulo".to_string()),
            amount: Some(amount.to_string()),
            txid_prefix: "SUB".to_string(),
            qr_expiry: chrono::Duration::minutes(30),
            webhook_secret: None,
        }
    }

    fn ledger(settings: PixSettings) -> PaymentLedger {
        let store = Arc::new(InMemoryStore::new());
        PaymentLedger::new(
            store.clone(),
            SubscriptionLedger::new(store),
            Arc::new(FixedRenderer),
            settings,
        )
    }

    #[tokio::test]
    async fn pending_charge_is_rounded_and_expires() {
        let ledger = ledger(settings("10.005"));
        let payment = ledger.create_pending("u1").await.unwrap();

        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.amount.to_string(), "10.01");
        assert_eq!(payment.expires_at - payment.created_at, chrono::Duration::minutes(30));
        assert!(payment.txid.starts_with("SUB"));
        assert!(crate::pix::verify_checksum(&payment.pix_payload));
    }

    #[tokio::test]
    async fn missing_pix_key_is_config_error() {
        let mut s = settings("49.90");
        s.key = None;
        let err = ledger(s).create_pending("u1").await.unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[tokio::test]
    async fn failed_then_confirmed_stays_failed() {
        let ledger = ledger(settings("49.90"));
        let payment = ledger.create_pending("u1").await.unwrap();

        let failed = PaymentEvent {
            txid: payment.txid.clone(),
            status: ReportedStatus::Failed,
            end_to_end_id: None,
            amount: None,
            occurred_at: None,
        };
        let after = ledger.apply_event(&failed).await.unwrap().unwrap();
        assert_eq!(after.status, PaymentStatus::Failed);

        let late = PaymentEvent {
            status: ReportedStatus::Confirmed,
            ..failed
        };
        let after = ledger.apply_event(&late).await.unwrap().unwrap();
        assert_eq!(after.status, PaymentStatus::Failed);
        assert!(ledger.subscriptions.get("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_status_leaves_payment_pending() {
        let ledger = ledger(settings("49.90"));
        let payment = ledger.create_pending("u1").await.unwrap();

        let event = PaymentEvent {
            txid: payment.txid.clone(),
            status: ReportedStatus::parse("ATIVA"),
            end_to_end_id: None,
            amount: None,
            occurred_at: None,
        };
        let after = ledger.apply_event(&event).await.unwrap().unwrap();
        assert_eq!(after.status, PaymentStatus::Pending);
        assert_eq!(after.version, payment.version);
    }

    #[tokio::test]
    async fn manual_confirmation_uses_synthetic_reference() {
        let ledger = ledger(settings("49.90"));
        let payment = ledger.create_pending("u1").await.unwrap();

        let confirmed = ledger.confirm_manually(&payment.txid).await.unwrap();
        assert_eq!(confirmed.status, PaymentStatus::Confirmed);
        assert!(confirmed
            .end_to_end_id
            .as_deref()
            .is_some_and(|r| r.starts_with(MANUAL_REFERENCE_PREFIX)));

        assert!(matches!(
            ledger.confirm_manually("NOPE").await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }
}
