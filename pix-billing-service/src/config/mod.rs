use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use service_core::error::AppError;

use crate::pix::payload::{MERCHANT_CITY_MAX, MERCHANT_NAME_MAX, PIX_KEY_MAX};
use crate::pix::txid::{self, TXID_PREFIX_MAX};
use crate::pix::{format_amount, normalize_text};

#[derive(Clone, Debug)]
pub struct BillingConfig {
    pub server: service_core::config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: Option<DatabaseConfig>,
    pub pix: PixSettings,
    pub schedule: ScheduleConfig,
    pub processor: ProcessorConfig,
    /// Manual confirmation is disabled when unset.
    pub admin_token: Option<Secret<String>>,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

/// Raw PIX settings as read from the environment. Checked lazily by
/// [`PixSettings::validate`] so a card-only deployment can still boot.
#[derive(Clone, Debug)]
pub struct PixSettings {
    pub key: Option<String>,
    pub merchant_name: Option<String>,
    pub merchant_city: Option<String>,
    pub amount: Option<String>,
    pub txid_prefix: String,
    pub qr_expiry: chrono::Duration,
    /// When set, `/webhooks/pix` requires `X-Pix-Signature`.
    pub webhook_secret: Option<Secret<String>>,
}

/// PIX settings that passed validation.
#[derive(Clone, Debug, PartialEq)]
pub struct PixProfile {
    pub key: String,
    pub merchant_name: String,
    pub merchant_city: String,
    pub amount: Decimal,
}

#[derive(Clone, Debug)]
pub struct ScheduleConfig {
    pub grace_period: chrono::Duration,
    pub payment_sweep_every: Duration,
    pub subscription_sweep_every: Duration,
}

#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    pub secret_key: Option<Secret<String>>,
    pub webhook_secret: Option<Secret<String>>,
    pub price_id: Option<String>,
    pub api_base_url: String,
    pub secret_wait: Duration,
    pub webhook_tolerance_seconds: i64,
}

impl ProcessorConfig {
    /// Card billing needs both an API key and a price to subscribe to.
    pub fn card_billing_enabled(&self) -> bool {
        self.secret_key.is_some() && self.price_id.is_some()
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("{} has invalid value {:?}: {}", name, raw, e))
        }),
    }
}

fn require_positive(name: &str, value: i64) -> Result<i64, AppError> {
    if value <= 0 {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "{} must be positive, got {}",
            name,
            value
        )));
    }
    Ok(value)
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let server = service_core::config::Config::load()?;

        let database = match (env_opt("BILLING_DATABASE_URL"), env_opt("BILLING_DATABASE_NAME")) {
            (Some(url), name) => Some(DatabaseConfig {
                url: Secret::new(url),
                db_name: name.unwrap_or_else(|| "billing_db".to_string()),
            }),
            (None, _) => None,
        };

        let qr_expiry_minutes =
            require_positive("PIX_QR_EXPIRY_MINUTES", env_parse("PIX_QR_EXPIRY_MINUTES", 30)?)?;
        let grace_hours = env_parse("SUBSCRIPTION_GRACE_PERIOD_HOURS", 72i64)?;
        if grace_hours < 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SUBSCRIPTION_GRACE_PERIOD_HOURS cannot be negative"
            )));
        }
        let payment_sweep = require_positive(
            "PAYMENT_EXPIRY_SWEEP_SECONDS",
            env_parse("PAYMENT_EXPIRY_SWEEP_SECONDS", 60)?,
        )?;
        let subscription_sweep = require_positive(
            "SUBSCRIPTION_SWEEP_SECONDS",
            env_parse("SUBSCRIPTION_SWEEP_SECONDS", 3600)?,
        )?;

        Ok(Self {
            server,
            service_name: env_opt("SERVICE_NAME").unwrap_or_else(|| "pix-billing-service".to_string()),
            log_level: env_opt("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            otlp_endpoint: env_opt("OTLP_ENDPOINT"),
            database,
            pix: PixSettings {
                key: env_opt("PIX_KEY"),
                merchant_name: env_opt("PIX_MERCHANT_NAME"),
                merchant_city: env_opt("PIX_MERCHANT_CITY"),
                amount: env_opt("PIX_AMOUNT"),
                txid_prefix: env_opt("PIX_TXID_PREFIX").unwrap_or_else(|| "SUB".to_string()),
                qr_expiry: chrono::Duration::minutes(qr_expiry_minutes),
                webhook_secret: env_opt("PIX_WEBHOOK_SECRET").map(Secret::new),
            },
            schedule: ScheduleConfig {
                grace_period: chrono::Duration::hours(grace_hours),
                payment_sweep_every: Duration::from_secs(payment_sweep as u64),
                subscription_sweep_every: Duration::from_secs(subscription_sweep as u64),
            },
            processor: ProcessorConfig {
                secret_key: env_opt("PROCESSOR_SECRET_KEY").map(Secret::new),
                webhook_secret: env_opt("PROCESSOR_WEBHOOK_SECRET").map(Secret::new),
                price_id: env_opt("PROCESSOR_PRICE_ID"),
                api_base_url: env_opt("PROCESSOR_API_BASE_URL")
                    .unwrap_or_else(|| "https://api.stripe.com/v1".to_string()),
                secret_wait: Duration::from_millis(env_parse("PROCESSOR_SECRET_WAIT_MS", 8000u64)?),
                webhook_tolerance_seconds: env_parse("PROCESSOR_WEBHOOK_TOLERANCE_SECONDS", 300i64)?,
            },
            admin_token: env_opt("ADMIN_TOKEN").map(Secret::new),
        })
    }
}

impl PixSettings {
    /// Check that everything needed to issue a charge is present and usable.
    pub fn validate(&self) -> Result<PixProfile, AppError> {
        fn missing(name: &str) -> AppError {
            AppError::ConfigError(anyhow::anyhow!("{} is not configured", name))
        }

        let key = self.key.clone().ok_or_else(|| missing("PIX_KEY"))?;
        let merchant_name = self
            .merchant_name
            .clone()
            .ok_or_else(|| missing("PIX_MERCHANT_NAME"))?;
        let merchant_city = self
            .merchant_city
            .clone()
            .ok_or_else(|| missing("PIX_MERCHANT_CITY"))?;
        let raw_amount = self.amount.as_deref().ok_or_else(|| missing("PIX_AMOUNT"))?;

        if key.trim().len() > PIX_KEY_MAX {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PIX_KEY is {} bytes, limit is {}",
                key.trim().len(),
                PIX_KEY_MAX
            )));
        }
        let prefix_len = txid::sanitize(&self.txid_prefix).len();
        if prefix_len > TXID_PREFIX_MAX {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PIX_TXID_PREFIX is {} characters, limit is {}",
                prefix_len,
                TXID_PREFIX_MAX
            )));
        }

        let amount = Decimal::from_str(raw_amount).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("PIX_AMOUNT {:?} is not a number: {}", raw_amount, e))
        })?;
        if amount <= Decimal::ZERO {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PIX_AMOUNT must be greater than zero, got {}",
                amount
            )));
        }
        // Must fit a TLV value.
        if format_amount(amount).map_or(true, |s| s.len() > 13) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PIX_AMOUNT {} is too large",
                amount
            )));
        }

        if normalize_text(&merchant_name, MERCHANT_NAME_MAX).is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PIX_MERCHANT_NAME has no usable characters"
            )));
        }
        if normalize_text(&merchant_city, MERCHANT_CITY_MAX).is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PIX_MERCHANT_CITY has no usable characters"
            )));
        }

        Ok(PixProfile {
            key,
            merchant_name,
            merchant_city,
            amount,
        })
    }

    pub fn webhook_secret_bytes(&self) -> Option<&[u8]> {
        self.webhook_secret
            .as_ref()
            .map(|s| s.expose_secret().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PixSettings {
        PixSettings {
            key: Some("pagamentos@exemplo.com.br".to_string()),
            merchant_name: Some("Loja Exemplo".to_string()),
            merchant_city: Some("Sao Paulo".to_string()),
            amount: Some("49.90".to_string()),
            txid_prefix: "SUB".to_string(),
            qr_expiry: chrono::Duration::minutes(30),
            webhook_secret: None,
        }
    }

    #[test]
    fn complete_settings_validate() {
        let profile = settings().validate().unwrap();
        assert_eq!(profile.amount, Decimal::new(4990, 2));
    }

    #[test]
    fn missing_key_is_config_error() {
        let mut s = settings();
        s.key = None;
        assert!(matches!(s.validate(), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn malformed_amount_is_config_error() {
        for bad in ["abc", "0", "-5.00", "99999999999999"] {
            let mut s = settings();
            s.amount = Some(bad.to_string());
            assert!(
                matches!(s.validate(), Err(AppError::ConfigError(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn long_txid_prefix_is_config_error() {
        let mut s = settings();
        s.txid_prefix = "SUBSCRIPTIONBILLING".to_string();
        assert!(matches!(s.validate(), Err(AppError::ConfigError(_))));

        s.txid_prefix = "SUBSCRIPTIONBI".to_string();
        assert!(s.validate().is_ok());
    }

    #[test]
    fn oversized_key_is_config_error() {
        let mut s = settings();
        s.key = Some(format!("{}@exemplo.com.br", "a".repeat(70)));
        assert!(matches!(s.validate(), Err(AppError::ConfigError(_))));

        s.key = Some("a".repeat(PIX_KEY_MAX));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn unusable_city_is_config_error() {
        let mut s = settings();
        s.merchant_city = Some("!!!".to_string());
        assert!(matches!(s.validate(), Err(AppError::ConfigError(_))));
    }
}
