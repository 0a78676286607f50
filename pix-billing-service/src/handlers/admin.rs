use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;

use crate::dtos::PaymentStatusResponse;
use crate::middleware::AdminGuard;
use crate::startup::AppState;

pub async fn confirm_payment(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(txid): Path<String>,
) -> Result<Json<PaymentStatusResponse>, AppError> {
    tracing::info!(txid = %txid, "Manual confirmation requested");
    state.payments.confirm_manually(&txid).await?;
    let (payment, subscription) = state.payments.status_of(&txid).await?;
    Ok(Json(PaymentStatusResponse::new(payment, subscription)))
}
