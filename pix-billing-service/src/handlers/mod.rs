//! HTTP handlers for pix-billing-service.

pub mod admin;
pub mod checkout;
pub mod processor;
pub mod subscriptions;
pub mod webhooks;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use mongodb::bson::doc;
use serde_json::json;
use service_core::error::AppError;

use crate::services::get_metrics;
use crate::startup::AppState;

pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "pix-billing-service" })),
    )
}

/// Ready once the database answers a ping. The in-memory store is always ready.
pub async fn readiness_check(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    if let Some(db) = &state.db {
        if let Err(e) = db.run_command(doc! { "ping": 1 }, None).await {
            tracing::warn!(error = %e, "Readiness ping failed");
            return Err(AppError::ServiceUnavailable);
        }
    }
    Ok((StatusCode::OK, Json(json!({ "status": "ready" }))))
}

pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        get_metrics(),
    )
}
