//! Stripe payment provider implementation

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use stripe::Client;
use stripe_billing::{
    billing_portal_session::CreateBillingPortalSession,
    subscription::{CreateSubscription, CreateSubscriptionItems, CreateSubscriptionPaymentBehavior, RetrieveSubscription},
};
use stripe_core::customer::CreateCustomer;
use stripe_webhook::{EventObject, Webhook};
use tracing::{debug, error, info, instrument, trace};

use crate::{
    config::StripeConfig,
    payment_providers::{CreatedSubscription, PaymentError, PaymentProvider, ProviderEvent, ProviderSubscription, Result},
    types::UserId,
};

/// Header Stripe signs webhook deliveries with.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripePrice {
    id: String,
    lookup_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionItem {
    price: StripePrice,
    quantity: Option<i64>,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
}

/// The fields billing reads from a subscription object. Decoded from JSON so the same shape
/// serves typed API responses and raw event bodies.
#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    status: String,
    items: StripeList<StripeSubscriptionItem>,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    #[serde(default)]
    cancel_at_period_end: bool,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

fn timestamp(secs: Option<i64>, field: &str) -> Result<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
        .ok_or_else(|| PaymentError::InvalidData(format!("Subscription is missing {field}")))
}

impl TryFrom<StripeSubscription> for ProviderSubscription {
    type Error = PaymentError;

    fn try_from(sub: StripeSubscription) -> Result<Self> {
        let item = sub
            .items
            .data
            .into_iter()
            .next()
            .ok_or_else(|| PaymentError::InvalidData("Subscription has no items".to_string()))?;

        // Newer API versions report the billing period per item
        let current_period_start = timestamp(sub.current_period_start.or(item.current_period_start), "current_period_start")?;
        let current_period_end = timestamp(sub.current_period_end.or(item.current_period_end), "current_period_end")?;

        Ok(Self {
            id: sub.id,
            status: sub.status,
            price_id: item.price.id,
            lookup_key: item.price.lookup_key,
            quantity: item.quantity.unwrap_or(1) as i32,
            current_period_start,
            current_period_end,
            cancel_at_period_end: sub.cancel_at_period_end,
            user_id: sub.metadata.get("userId").and_then(|id| id.parse::<UserId>().ok()),
        })
    }
}

/// Read a Stripe subscription object (as JSON) into the provider-neutral view.
pub(crate) fn subscription_from_value(object: serde_json::Value) -> Result<ProviderSubscription> {
    let sub: StripeSubscription =
        serde_json::from_value(object).map_err(|e| PaymentError::InvalidData(format!("Malformed subscription: {e}")))?;
    sub.try_into()
}

fn subscription_from_stripe(sub: &stripe_billing::Subscription) -> Result<ProviderSubscription> {
    let value = serde_json::to_value(sub).map_err(|e| PaymentError::InvalidData(format!("Unreadable subscription: {e}")))?;
    subscription_from_value(value)
}

/// Client secret of the first invoice, wherever this API version exposes it.
fn invoice_client_secret(invoice: &serde_json::Value) -> Option<String> {
    ["/confirmation_secret/client_secret", "/payment_intent/client_secret"]
        .iter()
        .find_map(|pointer| invoice.pointer(pointer).and_then(|v| v.as_str()))
        .map(str::to_string)
}

fn api_error(operation: &str) -> impl FnOnce(stripe::StripeError) -> PaymentError + '_ {
    move |e| {
        error!("Failed to {}: {:?}", operation, e);
        PaymentError::ProviderApi(e.to_string())
    }
}

/// Stripe payment provider
pub struct StripeProvider {
    api_key: String,
    webhook_secret: String,
}

impl From<StripeConfig> for StripeProvider {
    fn from(config: StripeConfig) -> Self {
        Self {
            api_key: config.api_key,
            webhook_secret: config.webhook_secret,
        }
    }
}

impl StripeProvider {
    /// Get a Stripe client
    fn client(&self) -> Client {
        Client::new(&self.api_key)
    }

    /// Reduce a verified Stripe event to the cases billing handles.
    fn provider_event(event: stripe_webhook::Event) -> Result<ProviderEvent> {
        match event.data.object {
            EventObject::CheckoutSessionCompleted(session) => {
                let customer_id = session.customer.as_ref().map(|c| c.id().to_string());
                let subscription_id = session.subscription.as_ref().map(|s| s.id().to_string());
                let (Some(customer_id), Some(subscription_id)) = (customer_id, subscription_id) else {
                    return Err(PaymentError::InvalidData("Missing customer or subscription".to_string()));
                };
                Ok(ProviderEvent::CheckoutCompleted {
                    subscription_id,
                    customer_id,
                    client_reference_id: session.client_reference_id,
                })
            }
            EventObject::CustomerSubscriptionUpdated(sub) => Ok(ProviderEvent::SubscriptionUpdated(subscription_from_stripe(&sub)?)),
            EventObject::CustomerSubscriptionDeleted(sub) => Ok(ProviderEvent::SubscriptionDeleted(subscription_from_stripe(&sub)?)),
            _ => Ok(ProviderEvent::Ignored {
                event_type: format!("{:?}", event.type_),
            }),
        }
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    #[instrument(skip(self, email), err)]
    async fn create_customer(&self, email: &str, user_id: UserId) -> Result<String> {
        let customer = CreateCustomer::new()
            .email(email)
            .metadata(HashMap::from([("userId".to_string(), user_id.to_string())]))
            .send(&self.client())
            .await
            .map_err(api_error("create Stripe customer"))?;

        info!("Created Stripe customer {} for user {}", customer.id, user_id);
        Ok(customer.id.to_string())
    }

    #[instrument(skip(self), err)]
    async fn create_subscription(
        &self,
        customer_id: &str,
        user_id: UserId,
        price_id: &str,
        quantity: i64,
    ) -> Result<CreatedSubscription> {
        let mut item = CreateSubscriptionItems::new();
        item.price = Some(price_id.to_string());
        item.quantity = Some(quantity.max(1) as u64);

        let subscription = CreateSubscription::new()
            .customer(customer_id)
            .items(vec![item])
            .payment_behavior(CreateSubscriptionPaymentBehavior::DefaultIncomplete)
            .expand(vec!["latest_invoice.confirmation_secret".to_string()])
            .metadata(HashMap::from([("userId".to_string(), user_id.to_string())]))
            .send(&self.client())
            .await
            .map_err(api_error("create Stripe subscription"))?;

        let client_secret = subscription
            .latest_invoice
            .as_ref()
            .and_then(|invoice| serde_json::to_value(invoice).ok())
            .and_then(|invoice| invoice_client_secret(&invoice));

        info!("Created Stripe subscription {} for user {}", subscription.id, user_id);
        Ok(CreatedSubscription {
            subscription_id: subscription.id.to_string(),
            client_secret,
        })
    }

    #[instrument(skip(self), err)]
    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<ProviderSubscription> {
        let subscription = RetrieveSubscription::new(subscription_id)
            .send(&self.client())
            .await
            .map_err(api_error("retrieve Stripe subscription"))?;
        subscription_from_stripe(&subscription)
    }

    #[instrument(skip(self), err)]
    async fn create_billing_portal_session(&self, customer_id: &str, return_url: &str) -> Result<String> {
        let session = CreateBillingPortalSession::new()
            .customer(customer_id)
            .return_url(return_url)
            .send(&self.client())
            .await
            .map_err(api_error("create Stripe billing portal session"))?;
        Ok(session.url)
    }

    fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<ProviderEvent> {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .ok_or(PaymentError::MissingSignature)?
            .to_str()
            .map_err(|_| PaymentError::InvalidSignature)?;

        // Checks the signature and the 300 s timestamp tolerance before decoding
        let event = Webhook::construct_event(body, signature, &self.webhook_secret).map_err(|e| {
            debug!("Failed to construct webhook event: {:?}", e);
            PaymentError::InvalidSignature
        })?;

        trace!("Validated Stripe webhook event: {:?}", event.type_);
        Self::provider_event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::signing;
    use axum::http::HeaderValue;
    use serde_json::json;
    use uuid::Uuid;

    fn provider() -> StripeProvider {
        StripeProvider::from(StripeConfig {
            api_key: "sk_test_fake".to_string(),
            webhook_secret: "whsec_test".to_string(),
        })
    }

    fn signed_headers(body: &str, secret: &str, t: i64) -> HeaderMap {
        let sig = signing::sign_payload(&format!("{t}.{body}"), secret);
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&format!("t={t},v1={sig}")).unwrap());
        headers
    }

    #[test]
    fn test_stripe_provider_creation() {
        let provider = provider();
        assert_eq!(provider.api_key, "sk_test_fake");
        assert_eq!(provider.webhook_secret, "whsec_test");
        assert!(!provider.completes_immediately());
    }

    #[test]
    fn test_webhook_requires_signature_header() {
        let result = provider().validate_webhook(&HeaderMap::new(), "{}");
        assert!(matches!(result, Err(PaymentError::MissingSignature)));
    }

    #[test]
    fn test_webhook_rejects_bad_signatures() {
        let body = r#"{"id":"evt_1","type":"customer.subscription.deleted"}"#;
        let now = Utc::now().timestamp();

        let wrong_secret = signed_headers(body, "whsec_other", now);
        assert!(matches!(
            provider().validate_webhook(&wrong_secret, body),
            Err(PaymentError::InvalidSignature)
        ));

        let tampered = signed_headers(body, "whsec_test", now);
        assert!(matches!(
            provider().validate_webhook(&tampered, r#"{"id":"evt_2"}"#),
            Err(PaymentError::InvalidSignature)
        ));

        let stale = signed_headers(body, "whsec_test", now - 3600);
        assert!(matches!(
            provider().validate_webhook(&stale, body),
            Err(PaymentError::InvalidSignature)
        ));
    }

    #[test]
    fn test_subscription_from_value() {
        let user_id = Uuid::new_v4();
        let sub = subscription_from_value(json!({
            "id": "sub_123",
            "status": "active",
            "cancel_at_period_end": true,
            "metadata": {"userId": user_id.to_string()},
            "items": {"data": [{
                "price": {"id": "price_pro", "lookup_key": "pro"},
                "quantity": 3,
                "current_period_start": 1_704_067_200,
                "current_period_end": 1_706_745_600
            }]}
        }))
        .unwrap();

        assert_eq!(sub.price_id, "price_pro");
        assert_eq!(sub.lookup_key.as_deref(), Some("pro"));
        assert_eq!(sub.quantity, 3);
        assert_eq!(sub.current_period_start.timestamp(), 1_704_067_200);
        assert!(sub.cancel_at_period_end);
        assert_eq!(sub.user_id, Some(user_id));

        let no_items = subscription_from_value(json!({"id": "sub_1", "status": "active", "items": {"data": []}}));
        assert!(matches!(no_items, Err(PaymentError::InvalidData(_))));
    }

    #[test]
    fn test_invoice_client_secret() {
        let current = json!({"id": "in_1", "confirmation_secret": {"client_secret": "pi_secret_new"}});
        assert_eq!(invoice_client_secret(&current).as_deref(), Some("pi_secret_new"));

        let legacy = json!({"id": "in_1", "payment_intent": {"client_secret": "pi_secret_old"}});
        assert_eq!(invoice_client_secret(&legacy).as_deref(), Some("pi_secret_old"));

        assert_eq!(invoice_client_secret(&json!("in_unexpanded")), None);
    }
}
