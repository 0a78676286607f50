use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{CheckoutRequest, CheckoutResponse, PaymentStatusResponse};
use crate::startup::AppState;

pub async fn create_checkout(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), AppError> {
    req.validate()?;

    let payment = state.payments.create_pending(req.user_id.trim()).await?;
    Ok((StatusCode::CREATED, Json(payment.into())))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(txid): Path<String>,
) -> Result<Json<PaymentStatusResponse>, AppError> {
    let (payment, subscription) = state.payments.status_of(&txid).await?;
    Ok(Json(PaymentStatusResponse::new(payment, subscription)))
}
