//! Ways of finding the confirmation secret for a subscription's first
//! payment. Right after creation the processor's object graph fills in
//! gradually, so each strategy looks in a different place.

use async_trait::async_trait;
use serde_json::Value;

use super::client::{ProcessorApi, ProcessorError};
use super::resources::{string_at, Fetched, Invoice, ProcessorSubscription};

/// How many recent intents the listing fallback inspects.
const INTENT_LISTING_LIMIT: u32 = 10;

/// Everything a strategy may look at during one attempt.
pub struct ReconcileContext<'a> {
    pub api: &'a dyn ProcessorApi,
    pub customer_id: &'a str,
    /// Freshly re-fetched with `latest_invoice.payment_intent` expanded.
    pub subscription: &'a Fetched<ProcessorSubscription>,
}

#[async_trait]
pub trait SecretStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means this strategy found nothing; the next one runs.
    async fn resolve(&self, ctx: &ReconcileContext<'_>) -> Result<Option<String>, ProcessorError>;
}

/// The lookup order used in production.
pub fn default_strategies() -> Vec<Box<dyn SecretStrategy>> {
    vec![
        Box::new(PaymentIntentRefetch),
        Box::new(InvoiceRawBody),
        Box::new(SubscriptionRawBody),
        Box::new(InvoiceRefetch),
        Box::new(CustomerIntentListing),
    ]
}

fn non_empty(secret: Option<String>) -> Option<String> {
    secret.filter(|s| !s.is_empty())
}

async fn refetch_intent_secret(
    api: &dyn ProcessorApi,
    invoice: &Invoice,
) -> Result<Option<String>, ProcessorError> {
    let Some(intent) = invoice.payment_intent.as_ref() else {
        return Ok(None);
    };
    let fetched = api.get_payment_intent(intent.id()).await?;
    Ok(non_empty(fetched.value.client_secret))
}

fn invoice_raw_secret(raw: &Value) -> Option<String> {
    string_at(raw, &["payment_intent", "client_secret"])
        .or_else(|| string_at(raw, &["confirmation_secret", "client_secret"]))
        .map(str::to_string)
}

/// Intent id from the expanded invoice, then the intent itself.
pub struct PaymentIntentRefetch;

#[async_trait]
impl SecretStrategy for PaymentIntentRefetch {
    fn name(&self) -> &'static str {
        "payment_intent_refetch"
    }

    async fn resolve(&self, ctx: &ReconcileContext<'_>) -> Result<Option<String>, ProcessorError> {
        match ctx
            .subscription
            .value
            .latest_invoice
            .as_ref()
            .and_then(|i| i.object())
        {
            Some(invoice) => refetch_intent_secret(ctx.api, invoice).await,
            None => Ok(None),
        }
    }
}

/// Secret fields read straight off the expanded invoice JSON.
pub struct InvoiceRawBody;

#[async_trait]
impl SecretStrategy for InvoiceRawBody {
    fn name(&self) -> &'static str {
        "invoice_raw_body"
    }

    async fn resolve(&self, ctx: &ReconcileContext<'_>) -> Result<Option<String>, ProcessorError> {
        Ok(ctx
            .subscription
            .raw
            .get("latest_invoice")
            .filter(|v| v.is_object())
            .and_then(invoice_raw_secret))
    }
}

/// Secret fields addressed from the subscription JSON root.
pub struct SubscriptionRawBody;

#[async_trait]
impl SecretStrategy for SubscriptionRawBody {
    fn name(&self) -> &'static str {
        "subscription_raw_body"
    }

    async fn resolve(&self, ctx: &ReconcileContext<'_>) -> Result<Option<String>, ProcessorError> {
        let raw = &ctx.subscription.raw;
        Ok(
            string_at(raw, &["latest_invoice", "payment_intent", "client_secret"])
                .or_else(|| {
                    string_at(raw, &["latest_invoice", "confirmation_secret", "client_secret"])
                })
                .map(str::to_string),
        )
    }
}

/// Fetch the latest invoice on its own and repeat the invoice lookups.
pub struct InvoiceRefetch;

#[async_trait]
impl SecretStrategy for InvoiceRefetch {
    fn name(&self) -> &'static str {
        "invoice_refetch"
    }

    async fn resolve(&self, ctx: &ReconcileContext<'_>) -> Result<Option<String>, ProcessorError> {
        let Some(invoice_id) = ctx.subscription.value.latest_invoice_id() else {
            return Ok(None);
        };
        let invoice = ctx.api.get_invoice(invoice_id, &["payment_intent"]).await?;

        if let Some(secret) = refetch_intent_secret(ctx.api, &invoice.value).await? {
            return Ok(Some(secret));
        }
        Ok(invoice_raw_secret(&invoice.raw))
    }
}

/// Last resort: the customer's recent intents, preferring the one tied to
/// the latest invoice.
pub struct CustomerIntentListing;

#[async_trait]
impl SecretStrategy for CustomerIntentListing {
    fn name(&self) -> &'static str {
        "customer_intent_listing"
    }

    async fn resolve(&self, ctx: &ReconcileContext<'_>) -> Result<Option<String>, ProcessorError> {
        let mut intents = ctx
            .api
            .list_payment_intents(ctx.customer_id, INTENT_LISTING_LIMIT)
            .await?;
        intents.sort_by(|a, b| b.value.created.cmp(&a.value.created));

        let latest_invoice = ctx.subscription.value.latest_invoice_id();
        let chosen = intents
            .iter()
            .find(|pi| {
                latest_invoice.is_some()
                    && pi.value.invoice.as_ref().map(|i| i.id()) == latest_invoice
            })
            .or_else(|| intents.iter().find(|pi| pi.value.invoice.is_some()));

        let Some(chosen) = chosen else {
            return Ok(None);
        };

        let fetched = ctx.api.get_payment_intent(&chosen.value.id).await?;
        Ok(non_empty(fetched.value.client_secret))
    }
}
