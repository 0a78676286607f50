use axum::{extract::State, Json};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{CancelSubscriptionRequest, SubscriptionResponse};
use crate::startup::AppState;

pub async fn cancel_at_period_end(
    State(state): State<AppState>,
    Json(req): Json<CancelSubscriptionRequest>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    req.validate()?;
    let subscription = state
        .subscriptions
        .request_cancel_at_period_end(req.user_id.trim())
        .await?;
    Ok(Json(subscription.into()))
}
