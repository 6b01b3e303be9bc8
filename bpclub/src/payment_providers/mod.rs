//! Payment provider abstraction layer
//!
//! This module defines the `PaymentProvider` trait which abstracts subscription billing across
//! payment processors. Handlers and the billing module only see the provider-neutral types
//! defined here; each implementation owns its wire format and webhook verification.

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::{config::PaymentConfig, errors::Error, types::UserId};

pub mod dummy;
pub mod stripe;

/// Create a payment provider from configuration
///
/// This is the single point where we convert config into provider instances.
/// Adding a new provider requires adding a match arm here.
pub fn create_provider(config: PaymentConfig) -> Arc<dyn PaymentProvider> {
    match config {
        PaymentConfig::Stripe(stripe_config) => Arc::new(stripe::StripeProvider::from(stripe_config)),
        PaymentConfig::Dummy(dummy_config) => Arc::new(dummy::DummyProvider::from(dummy_config)),
    }
}

/// Result type for payment provider operations
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Errors that can occur during payment processing
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment provider API error: {0}")]
    ProviderApi(String),

    #[error("Missing webhook signature header")]
    MissingSignature,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Invalid payment data: {0}")]
    InvalidData(String),

    #[error("User does not have a payment provider customer ID")]
    NoCustomerId,
}

impl From<PaymentError> for Error {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::MissingSignature => Error::BadRequest {
                message: "Missing stripe-signature header".to_string(),
            },
            PaymentError::InvalidSignature => Error::BadRequest {
                message: "Invalid signature".to_string(),
            },
            PaymentError::InvalidData(message) => Error::BadRequest { message },
            PaymentError::NoCustomerId => Error::BadRequest {
                message: "No Stripe customer found".to_string(),
            },
            PaymentError::ProviderApi(message) => Error::Upstream {
                service: "Payment provider".to_string(),
                message,
            },
        }
    }
}

/// A freshly created, not yet paid subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSubscription {
    pub subscription_id: String,
    /// Secret the client uses to confirm the first payment, if the provider issued one
    pub client_secret: Option<String>,
}

/// Provider-side view of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSubscription {
    pub id: String,
    /// Provider status string, e.g. `active` or `past_due`
    pub status: String,
    pub price_id: String,
    /// Lookup key of the price, used as our plan id when present
    pub lookup_key: Option<String>,
    pub quantity: i32,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    /// Our user id, when it was attached as metadata at creation
    pub user_id: Option<UserId>,
}

/// A verified webhook event, reduced to the cases billing acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// Checkout finished; the subscription must be fetched and stored
    CheckoutCompleted {
        subscription_id: String,
        customer_id: String,
        client_reference_id: Option<String>,
    },
    SubscriptionUpdated(ProviderSubscription),
    SubscriptionDeleted(ProviderSubscription),
    /// Any other event type; acknowledged and dropped
    Ignored { event_type: String },
}

/// Abstract payment provider interface
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a customer record and return its id.
    async fn create_customer(&self, email: &str, user_id: UserId) -> Result<String>;

    /// Start a subscription for an existing customer.
    async fn create_subscription(
        &self,
        customer_id: &str,
        user_id: UserId,
        price_id: &str,
        quantity: i64,
    ) -> Result<CreatedSubscription>;

    /// Fetch the current state of a subscription.
    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<ProviderSubscription>;

    /// Create a billing portal session and return the URL to redirect the customer to.
    async fn create_billing_portal_session(&self, customer_id: &str, return_url: &str) -> Result<String>;

    /// Verify a webhook request and decode its event.
    fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<ProviderEvent>;

    /// Whether new subscriptions are active without a confirming webhook.
    fn completes_immediately(&self) -> bool {
        false
    }
}
