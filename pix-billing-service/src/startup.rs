//! Application startup and lifecycle management.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client, Database};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::{request_id_middleware, REQUEST_ID_HEADER};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::BillingConfig;
use crate::handlers;
use crate::services::processor::{
    CardBilling, ConfirmationSecretResolver, ProcessorApi, ProcessorWebhookHandler, StripeClient,
};
use crate::services::{
    init_metrics, InMemoryStore, MongoStore, PaymentLedger, PaymentStore, PngQrRenderer,
    SubscriptionLedger, SubscriptionStore,
};
use crate::workers::SweepScheduler;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BillingConfig>,
    /// `None` when running on the in-memory store.
    pub db: Option<Database>,
    pub payments: PaymentLedger,
    pub subscriptions: SubscriptionLedger,
    pub card_billing: CardBilling,
    pub processor_webhooks: ProcessorWebhookHandler,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/checkout", post(handlers::checkout::create_checkout))
        .route("/payments/:txid/status", get(handlers::checkout::payment_status))
        .route("/webhooks/pix", post(handlers::webhooks::pix_webhook))
        .route("/webhooks/processor", post(handlers::processor::processor_webhook))
        .route(
            "/admin/payments/:txid/confirm",
            post(handlers::admin::confirm_payment),
        )
        .route(
            "/subscriptions/cancel",
            post(handlers::subscriptions::cancel_at_period_end),
        )
        .route(
            "/subscriptions/card",
            post(handlers::processor::start_card_subscription),
        )
        .route(
            "/subscriptions/card/:user_id/secret",
            get(handlers::processor::card_client_secret),
        )
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route_layer(middleware::from_fn(metrics_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(
                    |request: &axum::http::Request<_>| {
                        let request_id = request
                            .headers()
                            .get(REQUEST_ID_HEADER)
                            .and_then(|value| value.to_str().ok())
                            .unwrap_or("-");

                        tracing::info_span!(
                            "http_request",
                            request_id = %request_id,
                            method = %request.method(),
                            uri = %request.uri(),
                        )
                    },
                )),
        )
        .with_state(state)
}

async fn connect(config: &BillingConfig) -> Result<Option<(Database, MongoStore)>, AppError> {
    let Some(database) = &config.database else {
        return Ok(None);
    };

    let mut client_options = ClientOptions::parse(database.url.expose_secret()).await?;
    client_options.app_name = Some(config.service_name.clone());

    let client = Client::with_options(client_options)?;
    let db = client.database(&database.db_name);

    let store = MongoStore::new(&db);
    store.init_indexes().await?;

    Ok(Some((db, store)))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    sweeps: SweepScheduler,
}

impl Application {
    /// Build with the processor client derived from configuration.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        let api: Arc<dyn ProcessorApi> = Arc::new(StripeClient::new(
            config.processor.api_base_url.clone(),
            config.processor.secret_key.clone(),
        ));
        Self::build_with_processor(config, api).await
    }

    pub async fn build_with_processor(
        config: BillingConfig,
        api: Arc<dyn ProcessorApi>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let payment_store: Arc<dyn PaymentStore>;
        let subscription_store: Arc<dyn SubscriptionStore>;
        let db = match connect(&config).await? {
            Some((db, store)) => {
                tracing::info!(db_name = %db.name(), "Using MongoDB store");
                let store = Arc::new(store);
                payment_store = store.clone();
                subscription_store = store;
                Some(db)
            }
            None => {
                tracing::warn!("No database configured, records live in memory only");
                let store = Arc::new(InMemoryStore::new());
                payment_store = store.clone();
                subscription_store = store;
                None
            }
        };

        if let Err(e) = config.pix.validate() {
            tracing::warn!(error = %e, "PIX settings incomplete, checkout will fail until fixed");
        }
        if !config.processor.card_billing_enabled() {
            tracing::warn!("Card processor not configured, card subscriptions unavailable");
        }
        if config.admin_token.is_none() {
            tracing::info!("ADMIN_TOKEN not set, manual confirmation disabled");
        }

        let subscriptions = SubscriptionLedger::new(subscription_store);
        let payments = PaymentLedger::new(
            payment_store,
            subscriptions.clone(),
            Arc::new(PngQrRenderer::default()),
            config.pix.clone(),
        );
        let card_billing = CardBilling::new(
            Arc::clone(&api),
            ConfirmationSecretResolver::new(Arc::clone(&api)),
            subscriptions.clone(),
            config.processor.price_id.clone(),
            config.processor.secret_wait,
        );
        let processor_webhooks = ProcessorWebhookHandler::new(
            subscriptions.clone(),
            api,
            config.processor.webhook_secret.clone(),
            config.processor.webhook_tolerance_seconds,
        );

        let sweeps = SweepScheduler::new(
            payments.clone(),
            subscriptions.clone(),
            config.schedule.clone(),
        );

        let addr = config.server.listen_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "pix-billing-service listener bound");

        Ok(Self {
            port,
            listener,
            state: AppState {
                config: Arc::new(config),
                db,
                payments,
                subscriptions,
                card_billing,
                processor_webhooks,
            },
            sweeps,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve HTTP and run the sweeps. Dropping the returned future stops
    /// the sweeps too.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let _sweeps_guard = self.sweeps.shutdown_token().drop_guard();
        self.sweeps.start();

        let addr: SocketAddr = self.listener.local_addr()?;
        tracing::info!(addr = %addr, "HTTP server listening");

        axum::serve(self.listener, router(self.state)).await
    }
}
