use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use service_core::error::AppError;
use service_core::utils::signature::verify_hmac_sha256_hex;
use validator::Validate;

use crate::dtos::{PixWebhookRequest, PixWebhookResponse};
use crate::models::ReportedStatus;
use crate::services::PaymentEvent;
use crate::startup::AppState;

pub const PIX_SIGNATURE_HEADER: &str = "x-pix-signature";

/// Settlement notifications from the PIX provider.
///
/// 200 when the event was applied (replays included), 202 when the txid is
/// not ours, 400/422 for bodies that cannot be understood.
pub async fn pix_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<PixWebhookResponse>), AppError> {
    if let Some(secret) = state.config.pix.webhook_secret_bytes() {
        let signature = headers
            .get(PIX_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("Missing {} header", PIX_SIGNATURE_HEADER))
            })?;
        if !verify_hmac_sha256_hex(secret, &body, signature)? {
            tracing::warn!("PIX webhook signature mismatch");
            return Err(AppError::Unauthorized(anyhow::anyhow!("Signature mismatch")));
        }
    }

    let req: PixWebhookRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Malformed webhook body: {}", e)))?;
    req.validate()?;

    let event = PaymentEvent {
        txid: req.txid.trim().to_string(),
        status: ReportedStatus::parse(&req.status),
        end_to_end_id: req.end_to_end_id,
        amount: req.amount,
        occurred_at: req.occurred_at,
    };

    match state.payments.apply_event(&event).await? {
        Some(payment) => Ok((
            StatusCode::OK,
            Json(PixWebhookResponse {
                txid: payment.txid,
                applied: true,
                payment_status: Some(payment.status),
            }),
        )),
        None => {
            tracing::info!(txid = %event.txid, "Webhook for unknown txid accepted");
            Ok((
                StatusCode::ACCEPTED,
                Json(PixWebhookResponse {
                    txid: event.txid,
                    applied: false,
                    payment_status: None,
                }),
            ))
        }
    }
}
