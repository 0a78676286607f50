//! Processor objects, typed where the flow needs fields and kept raw for
//! the secret lookups that have to follow whatever the API returned.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::client::ProcessorError;

/// A decoded resource together with the JSON it was decoded from.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub raw: Value,
}

impl<T: DeserializeOwned> Fetched<T> {
    pub fn parse(raw: Value) -> Result<Self, ProcessorError> {
        let value = serde_json::from_value(raw.clone())?;
        Ok(Self { value, raw })
    }
}

/// Either a bare id or the expanded object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

pub trait HasId {
    fn id(&self) -> &str;
}

impl<T: HasId> Expandable<T> {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object(obj) => obj.id(),
        }
    }

    pub fn object(&self) -> Option<&T> {
        match self {
            Expandable::Id(_) => None,
            Expandable::Object(obj) => Some(obj),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorSubscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub latest_invoice: Option<Expandable<Invoice>>,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub items: ListEnvelope<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

impl ProcessorSubscription {
    /// Billing window, falling back to the first item when the top-level
    /// fields are absent.
    pub fn period(&self) -> Option<(i64, i64)> {
        let first = self.items.data.first();
        let start = self
            .current_period_start
            .or_else(|| first.and_then(|i| i.current_period_start))?;
        let end = self
            .current_period_end
            .or_else(|| first.and_then(|i| i.current_period_end))?;
        Some((start, end))
    }

    pub fn latest_invoice_id(&self) -> Option<&str> {
        self.latest_invoice.as_ref().map(|i| i.id())
    }
}

impl HasId for ProcessorSubscription {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    pub id: String,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<Expandable<PaymentIntent>>,
    #[serde(default)]
    pub lines: ListEnvelope<InvoiceLine>,
}

impl Invoice {
    /// Service period of the first line item.
    pub fn line_period(&self) -> Option<(i64, i64)> {
        self.lines
            .data
            .first()
            .and_then(|l| l.period.as_ref())
            .map(|p| (p.start, p.end))
    }
}

impl HasId for Invoice {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceLine {
    #[serde(default)]
    pub period: Option<LinePeriod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinePeriod {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub invoice: Option<Expandable<Invoice>>,
    #[serde(default)]
    pub created: i64,
}

impl HasId for PaymentIntent {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> Default for ListEnvelope<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

/// Follow `path` through nested objects and return a non-empty string leaf.
pub fn string_at<'a>(raw: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(raw, |node, key| node.get(key))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
