#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use pix_billing_service::config::{
    BillingConfig, PixSettings, ProcessorConfig, ScheduleConfig,
};
use pix_billing_service::services::processor::ProcessorApi;
use pix_billing_service::startup::{AppState, Application};
use secrecy::Secret;
use serde_json::Value;

pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const PROCESSOR_WEBHOOK_SECRET: &str = "whsec_test";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub state: AppState,
    pub client: reqwest::Client,
}

pub fn pix_settings() -> PixSettings {
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

/// In-memory, random port, sweeps effectively idle.
pub fn test_config() -> BillingConfig {
    BillingConfig {
        server: service_core::config::Config {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        },
        service_name: "pix-billing-service-test".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        database: None,
        pix: pix_settings(),
        schedule: ScheduleConfig {
            grace_period: chrono::Duration::hours(72),
            payment_sweep_every: Duration::from_secs(3600),
            subscription_sweep_every: Duration::from_secs(3600),
        },
        processor: ProcessorConfig {
            secret_key: Some(Secret::new("sk_test".to_string())),
            webhook_secret: Some(Secret::new(PROCESSOR_WEBHOOK_SECRET.to_string())),
            price_id: Some("price_monthly".to_string()),
            api_base_url: "http://127.0.0.1:9".to_string(),
            secret_wait: Duration::from_millis(500),
            webhook_tolerance_seconds: 300,
        },
        admin_token: Some(Secret::new(ADMIN_TOKEN.to_string())),
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_config()).await
    }

    pub async fn spawn_with(config: BillingConfig) -> Self {
        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        Self::serve(app).await
    }

    pub async fn spawn_with_processor(config: BillingConfig, api: Arc<dyn ProcessorApi>) -> Self {
        let app = Application::build_with_processor(config, api)
            .await
            .expect("Failed to build test application");
        Self::serve(app).await
    }

    async fn serve(app: Application) -> Self {
        let port = app.port();
        let state = app.state().clone();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        TestApp {
            address,
            port,
            state,
            client,
        }
    }

    pub async fn checkout(&self, user_id: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/checkout", self.address))
            .json(&serde_json::json!({ "user_id": user_id }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_pix_webhook(&self, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}/webhooks/pix", self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn status(&self, txid: &str) -> reqwest::Response {
        self.client
            .get(format!("{}/payments/{}/status", self.address, txid))
            .send()
            .await
            .expect("Failed to execute request")
    }
}
