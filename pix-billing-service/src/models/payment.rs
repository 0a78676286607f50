//! Payment model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment status. Only `Pending` is non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Failed,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Confirmed => "CONFIRMED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// Status as reported by a settlement webhook. Anything unrecognised is
/// carried as `Other` and ignored by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportedStatus {
    Confirmed,
    Failed,
    Other(String),
}

impl ReportedStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CONFIRMED" | "CONCLUIDA" | "PAID" => ReportedStatus::Confirmed,
            "FAILED" | "REMOVIDA_PELO_PSP" | "REMOVIDA_PELO_USUARIO_RECEBEDOR" => {
                ReportedStatus::Failed
            }
            other => ReportedStatus::Other(other.to_string()),
        }
    }
}

/// A single PIX charge. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: String,
    pub txid: String,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub pix_payload: String,
    pub qr_image: String,
    pub end_to_end_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once the confirmation has been carried over to the subscription.
    #[serde(default)]
    pub subscription_applied: bool,
    /// Optimistic concurrency token; bumped by every successful write.
    pub version: i64,
}

impl Payment {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Pending && self.expires_at < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reported_status_parsing() {
        assert_eq!(ReportedStatus::parse("confirmed"), ReportedStatus::Confirmed);
        assert_eq!(ReportedStatus::parse("CONCLUIDA"), ReportedStatus::Confirmed);
        assert_eq!(ReportedStatus::parse(" FAILED "), ReportedStatus::Failed);
        assert_eq!(
            ReportedStatus::parse("ATIVA"),
            ReportedStatus::Other("ATIVA".to_string())
        );
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Confirmed.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Expired.is_terminal());
    }

    #[test]
    fn status_serializes_screaming_case() {
        let json = serde_json::to_string(&PaymentStatus::Confirmed).unwrap();
        assert_eq!(json, "\"CONFIRMED\"");
    }
}
