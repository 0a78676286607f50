use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{CardSubscriptionRequest, ClientSecretResponse};
use crate::services::processor::webhook::SIGNATURE_HEADER;
use crate::services::processor::{CardCheckout, WebhookOutcome};
use crate::startup::AppState;

pub async fn processor_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let header = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let event = state.processor_webhooks.authenticate(header, &body)?;
    let outcome = state.processor_webhooks.handle(&event).await?;

    Ok(Json(json!({
        "received": true,
        "applied": outcome == WebhookOutcome::Applied,
    })))
}

pub async fn start_card_subscription(
    State(state): State<AppState>,
    Json(req): Json<CardSubscriptionRequest>,
) -> Result<(StatusCode, Json<CardCheckout>), AppError> {
    req.validate()?;
    let checkout = state
        .card_billing
        .start_subscription(req.user_id.trim(), req.email.trim())
        .await?;
    Ok((StatusCode::CREATED, Json(checkout)))
}

pub async fn card_client_secret(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ClientSecretResponse>, AppError> {
    let client_secret = state.card_billing.resolve_secret(&user_id).await?;
    Ok(Json(ClientSecretResponse { client_secret }))
}
