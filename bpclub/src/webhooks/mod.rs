//! Outbound webhooks for team events.
//!
//! - [`events`]: the event catalog
//! - [`signing`]: HMAC-SHA256 body signatures
//! - [`service`]: fan-out delivery and the delivery log
//!
//! Deliveries are single attempt. There is no queue and no retry; every attempt, successful or
//! not, is written to `webhook_deliveries`.

pub mod events;
pub mod service;
pub mod signing;

pub use events::WebhookEvent;
pub use service::{DeliveryOutcome, WebhookService};
