//! Operator authentication for the manual confirmation route.
//!
//! The caller must present `X-Admin-Token` equal to the configured token.
//! Without a configured token the route is closed to everyone.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use secrecy::ExposeSecret;
use service_core::error::AppError;
use subtle::ConstantTimeEq;

use crate::startup::AppState;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Proof that the request carried the operator token.
#[derive(Debug, Clone, Copy)]
pub struct AdminGuard;

#[async_trait]
impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin_token.as_ref() else {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Manual confirmation is disabled"
            )));
        };

        let provided = parts
            .headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing {} header", ADMIN_TOKEN_HEADER))
            })?;

        let expected = expected.expose_secret().as_bytes();
        let provided = provided.as_bytes();
        if expected.len() != provided.len() || !bool::from(expected.ct_eq(provided)) {
            tracing::warn!("Rejected admin request with wrong token");
            return Err(AppError::Unauthorized(anyhow::anyhow!("Invalid admin token")));
        }

        Ok(AdminGuard)
    }
}
