//! Card processor transport.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_json::Value;
use service_core::error::AppError;
use thiserror::Error;

use super::resources::{Customer, Fetched, Invoice, PaymentIntent, ProcessorSubscription};

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("card processor is not configured")]
    NotConfigured,

    #[error("card processor unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{context} failed with status {status}: {message}")]
    Api {
        context: String,
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("unexpected card processor response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<ProcessorError> for AppError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::NotConfigured => {
                AppError::ConfigError(anyhow::anyhow!("Card processor is not configured"))
            }
            other => AppError::BadGateway(other.to_string()),
        }
    }
}

/// The calls the card flow and reconciliation make against the processor.
#[async_trait]
pub trait ProcessorApi: Send + Sync {
    async fn create_customer(&self, email: &str, user_id: &str) -> Result<Customer, ProcessorError>;

    /// Create an incomplete subscription whose first invoice awaits payment.
    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        user_id: &str,
    ) -> Result<Fetched<ProcessorSubscription>, ProcessorError>;

    async fn get_subscription(
        &self,
        subscription_id: &str,
        expand: &[&str],
    ) -> Result<Fetched<ProcessorSubscription>, ProcessorError>;

    async fn get_invoice(
        &self,
        invoice_id: &str,
        expand: &[&str],
    ) -> Result<Fetched<Invoice>, ProcessorError>;

    async fn get_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Fetched<PaymentIntent>, ProcessorError>;

    /// Most recent intents for a customer, newest first.
    async fn list_payment_intents(
        &self,
        customer_id: &str,
        limit: u32,
    ) -> Result<Vec<Fetched<PaymentIntent>>, ProcessorError>;
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ErrorDetails {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

/// Stripe-compatible REST client over reqwest.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: Option<Secret<String>>,
}

impl StripeClient {
    pub fn new(base_url: impl Into<String>, secret_key: Option<Secret<String>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().is_empty())
    }

    fn bearer(&self) -> Result<String, ProcessorError> {
        self.secret_key
            .as_ref()
            .map(|k| format!("Bearer {}", k.expose_secret()))
            .ok_or(ProcessorError::NotConfigured)
    }

    async fn ensure_success(
        resp: reqwest::Response,
        context: &str,
    ) -> Result<Value, ProcessorError> {
        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = resp.text().await?;

        if status.is_success() {
            return Ok(serde_json::from_str(&body)?);
        }

        let details = serde_json::from_str::<ErrorEnvelope>(&body).ok().map(|e| e.error);
        let code = details.as_ref().and_then(|d| d.code.clone());
        let message = details
            .as_ref()
            .and_then(|d| d.message.clone())
            .unwrap_or_else(|| "no error message".to_string());

        tracing::error!(
            status = %status,
            request_id = ?request_id,
            error_type = ?details.as_ref().and_then(|d| d.type_.clone()),
            error_code = ?code,
            context = %context,
            "Card processor request failed"
        );

        Err(ProcessorError::Api {
            context: context.to_string(),
            status: status.as_u16(),
            code,
            message,
        })
    }

    async fn get(
        &self,
        path: &str,
        query: &[(String, String)],
        context: &str,
    ) -> Result<Value, ProcessorError> {
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header(AUTHORIZATION, self.bearer()?)
            .query(query)
            .send()
            .await?;
        Self::ensure_success(resp, context).await
    }

    async fn post(
        &self,
        path: &str,
        form: &[(String, String)],
        context: &str,
    ) -> Result<Value, ProcessorError> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header(AUTHORIZATION, self.bearer()?)
            .form(form)
            .send()
            .await?;
        Self::ensure_success(resp, context).await
    }
}

fn expand_params(expand: &[&str]) -> Vec<(String, String)> {
    expand
        .iter()
        .map(|e| ("expand[]".to_string(), e.to_string()))
        .collect()
}

#[async_trait]
impl ProcessorApi for StripeClient {
    async fn create_customer(&self, email: &str, user_id: &str) -> Result<Customer, ProcessorError> {
        let form = vec![
            ("email".to_string(), email.to_string()),
            ("metadata[user_id]".to_string(), user_id.to_string()),
        ];
        let raw = self.post("/customers", &form, "create customer").await?;
        let customer: Customer = serde_json::from_value(raw)?;
        tracing::info!(customer_id = %customer.id, user_id = %user_id, "Processor customer created");
        Ok(customer)
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        user_id: &str,
    ) -> Result<Fetched<ProcessorSubscription>, ProcessorError> {
        let mut form = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("items[0][price]".to_string(), price_id.to_string()),
            ("payment_behavior".to_string(), "default_incomplete".to_string()),
            (
                "payment_settings[save_default_payment_method]".to_string(),
                "on_subscription".to_string(),
            ),
            ("metadata[user_id]".to_string(), user_id.to_string()),
        ];
        form.extend(expand_params(&["latest_invoice.payment_intent"]));

        let raw = self.post("/subscriptions", &form, "create subscription").await?;
        Fetched::parse(raw)
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
        expand: &[&str],
    ) -> Result<Fetched<ProcessorSubscription>, ProcessorError> {
        let raw = self
            .get(
                &format!("/subscriptions/{}", subscription_id),
                &expand_params(expand),
                "retrieve subscription",
            )
            .await?;
        Fetched::parse(raw)
    }

    async fn get_invoice(
        &self,
        invoice_id: &str,
        expand: &[&str],
    ) -> Result<Fetched<Invoice>, ProcessorError> {
        let raw = self
            .get(
                &format!("/invoices/{}", invoice_id),
                &expand_params(expand),
                "retrieve invoice",
            )
            .await?;
        Fetched::parse(raw)
    }

    async fn get_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Fetched<PaymentIntent>, ProcessorError> {
        let raw = self
            .get(
                &format!("/payment_intents/{}", payment_intent_id),
                &[],
                "retrieve payment intent",
            )
            .await?;
        Fetched::parse(raw)
    }

    async fn list_payment_intents(
        &self,
        customer_id: &str,
        limit: u32,
    ) -> Result<Vec<Fetched<PaymentIntent>>, ProcessorError> {
        let query = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        let raw = self
            .get("/payment_intents", &query, "list payment intents")
            .await?;

        match raw.get("data") {
            Some(Value::Array(items)) => items.iter().cloned().map(Fetched::parse).collect(),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_client_refuses_calls() {
        let client = StripeClient::new("http://127.0.0.1:9", None);
        assert!(!client.is_configured());
        let err = client.get_payment_intent("pi_1").await.unwrap_err();
        assert!(matches!(err, ProcessorError::NotConfigured));
        assert!(matches!(AppError::from(err), AppError::ConfigError(_)));
    }

    #[test]
    fn api_errors_map_to_bad_gateway() {
        let err = ProcessorError::Api {
            context: "create customer".to_string(),
            status: 402,
            code: Some("card_declined".to_string()),
            message: "Your card was declined.".to_string(),
        };
        assert!(matches!(AppError::from(err), AppError::BadGateway(_)));
    }
}
