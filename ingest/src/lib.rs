//! Webhook Ingestor + Polling Schedule (C11): turns marketplace-sent events,
//! or polled marketplace state for marketplaces with no webhooks, into
//! Cross-Platform Sync Coordinator triggers (§4.7).

pub mod http;
pub mod ingestor;
pub mod normalize;
pub mod polling;
pub mod verify;

pub use ingestor::{default_event_kinds, IngestOutcome, WebhookIngestor};
pub use normalize::{EventKindTable, NormalizedEvent};
pub use polling::{PolledSale, PollingClient, PollingDriver};
