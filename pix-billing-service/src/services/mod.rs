pub mod metrics;
pub mod mongo;
pub mod payments;
pub mod processor;
pub mod qr;
pub mod repository;
pub mod subscriptions;

pub use metrics::{get_metrics, init_metrics};
pub use mongo::MongoStore;
pub use payments::{PaymentEvent, PaymentLedger};
pub use qr::{PngQrRenderer, QrRenderer};
pub use repository::{InMemoryStore, PaymentStore, SubscriptionStore};
pub use subscriptions::{ProcessorState, SubscriptionLedger};
