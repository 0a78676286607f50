//! Card processor integration: transport, confirmation-secret
//! reconciliation, checkout and event intake.

pub mod card_billing;
pub mod client;
pub mod reconcile;
pub mod resources;
pub mod strategies;
pub mod webhook;

pub use card_billing::{CardBilling, CardCheckout};
pub use client::{ProcessorApi, ProcessorError, StripeClient};
pub use reconcile::ConfirmationSecretResolver;
pub use strategies::{default_strategies, ReconcileContext, SecretStrategy};
pub use webhook::{ProcessorWebhookHandler, WebhookOutcome};
