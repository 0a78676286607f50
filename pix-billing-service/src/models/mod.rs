//! Domain models for pix-billing-service.

mod payment;
mod subscription;

pub use payment::{Payment, PaymentStatus, ReportedStatus};
pub use subscription::{Subscription, SubscriptionStatus};

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;

/// BSON dates keep milliseconds; anything finer is dropped before a write so
/// the record handed back equals the one a later read returns.
pub fn stored_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

/// The current time at [`stored_precision`].
pub fn stored_now() -> DateTime<Utc> {
    stored_precision(Utc::now())
}

/// One status change made by a sweep, reported back to the driver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition<S> {
    pub record_id: String,
    pub from: S,
    pub to: S,
    pub at: DateTime<Utc>,
}

pub type PaymentTransition = Transition<PaymentStatus>;
pub type SubscriptionTransition = Transition<SubscriptionStatus>;
