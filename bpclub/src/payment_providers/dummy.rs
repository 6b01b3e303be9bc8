//! Dummy payment provider implementation
//!
//! Subscriptions are active the moment they are created and no external service is called.
//! Useful for development and tests. Webhooks use the Stripe event body format; when a secret
//! is configured they must also carry a `stripe-signature: t={unix},v1={hex hmac}` header.

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    config::DummyConfig,
    crypto,
    payment_providers::{
        CreatedSubscription, PaymentError, PaymentProvider, ProviderEvent, ProviderSubscription, Result, stripe,
    },
    types::UserId,
    webhooks::signing,
};

const SUBSCRIPTION_PREFIX: &str = "dummy_sub_";

/// Signed timestamps older than this are rejected
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct EventBody {
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutObject {
    subscription: Option<String>,
    customer: Option<String>,
    client_reference_id: Option<String>,
}

/// Check a `t=...,v1=...` header against `{t}.{body}` signed with the secret.
fn verify_signature(headers: &HeaderMap, body: &str, secret: &str, now: i64) -> Result<()> {
    let header = headers
        .get(stripe::SIGNATURE_HEADER)
        .ok_or(PaymentError::MissingSignature)?
        .to_str()
        .map_err(|_| PaymentError::InvalidSignature)?;

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for (key, value) in header.split(',').filter_map(|part| part.split_once('=')) {
        match key.trim() {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(PaymentError::InvalidSignature)?;
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(PaymentError::InvalidSignature);
    }

    let expected = signing::sign_payload(&format!("{timestamp}.{body}"), secret);
    if signatures
        .iter()
        .any(|given| crypto::constant_time_eq(given.as_bytes(), expected.as_bytes()))
    {
        Ok(())
    } else {
        Err(PaymentError::InvalidSignature)
    }
}

fn parse_event(body: &str) -> Result<ProviderEvent> {
    let event: EventBody = serde_json::from_str(body).map_err(|e| PaymentError::InvalidData(format!("Malformed event: {e}")))?;

    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let checkout: CheckoutObject = serde_json::from_value(event.data.object)
                .map_err(|e| PaymentError::InvalidData(format!("Malformed checkout session: {e}")))?;
            let (Some(subscription_id), Some(customer_id)) = (checkout.subscription, checkout.customer) else {
                return Err(PaymentError::InvalidData("Missing customer or subscription".to_string()));
            };
            Ok(ProviderEvent::CheckoutCompleted {
                subscription_id,
                customer_id,
                client_reference_id: checkout.client_reference_id,
            })
        }
        "customer.subscription.updated" => Ok(ProviderEvent::SubscriptionUpdated(stripe::subscription_from_value(
            event.data.object,
        )?)),
        "customer.subscription.deleted" => Ok(ProviderEvent::SubscriptionDeleted(stripe::subscription_from_value(
            event.data.object,
        )?)),
        _ => Ok(ProviderEvent::Ignored {
            event_type: event.event_type,
        }),
    }
}

/// Dummy payment provider that activates subscriptions immediately
pub struct DummyProvider {
    webhook_secret: Option<String>,
}

impl From<DummyConfig> for DummyProvider {
    fn from(config: DummyConfig) -> Self {
        Self {
            webhook_secret: config.webhook_secret,
        }
    }
}

#[async_trait]
impl PaymentProvider for DummyProvider {
    async fn create_customer(&self, _email: &str, user_id: UserId) -> Result<String> {
        Ok(format!("dummy_cus_{user_id}"))
    }

    async fn create_subscription(
        &self,
        _customer_id: &str,
        user_id: UserId,
        price_id: &str,
        quantity: i64,
    ) -> Result<CreatedSubscription> {
        // Everything retrieve_subscription needs is carried in the id:
        // dummy_sub_{user_id}_{quantity}_{nonce}:{price_id}
        let subscription_id = format!("{SUBSCRIPTION_PREFIX}{user_id}_{quantity}_{}:{price_id}", Uuid::new_v4().simple());
        tracing::info!("Dummy provider created subscription {} for user {}", subscription_id, user_id);

        Ok(CreatedSubscription {
            subscription_id,
            client_secret: None,
        })
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<ProviderSubscription> {
        let invalid = || PaymentError::InvalidData("Invalid dummy subscription ID format".to_string());

        let rest = subscription_id.strip_prefix(SUBSCRIPTION_PREFIX).ok_or_else(invalid)?;
        let (head, price_id) = rest.split_once(':').ok_or_else(invalid)?;
        let mut parts = head.split('_');
        let user_id = parts.next().and_then(|s| s.parse::<UserId>().ok()).ok_or_else(invalid)?;
        let quantity = parts.next().and_then(|s| s.parse::<i32>().ok()).ok_or_else(invalid)?;

        let now = Utc::now();
        Ok(ProviderSubscription {
            id: subscription_id.to_string(),
            status: "active".to_string(),
            price_id: price_id.to_string(),
            lookup_key: None,
            quantity,
            current_period_start: now,
            current_period_end: now + Duration::days(30),
            cancel_at_period_end: false,
            user_id: Some(user_id),
        })
    }

    async fn create_billing_portal_session(&self, _customer_id: &str, return_url: &str) -> Result<String> {
        Ok(return_url.to_string())
    }

    fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<ProviderEvent> {
        if let Some(secret) = &self.webhook_secret {
            verify_signature(headers, body, secret, Utc::now().timestamp())?;
        }
        parse_event(body)
    }

    fn completes_immediately(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscription_round_trips_through_id() {
        let provider = DummyProvider::from(DummyConfig::default());
        let user_id = Uuid::new_v4();

        let created = provider.create_subscription("dummy_cus", user_id, "price_pro_monthly", 4).await.unwrap();
        assert!(created.client_secret.is_none());

        let sub = provider.retrieve_subscription(&created.subscription_id).await.unwrap();
        assert_eq!(sub.user_id, Some(user_id));
        assert_eq!(sub.price_id, "price_pro_monthly");
        assert_eq!(sub.quantity, 4);
        assert_eq!(sub.status, "active");
    }

    #[tokio::test]
    async fn test_rejects_foreign_ids() {
        let provider = DummyProvider::from(DummyConfig::default());
        assert!(provider.retrieve_subscription("sub_123").await.is_err());
        assert!(provider.retrieve_subscription("dummy_sub_garbage").await.is_err());
    }

    #[test]
    fn test_webhook_signature_only_when_configured() {
        let body = r#"{"type":"invoice.paid","data":{"object":{}}}"#;

        let open = DummyProvider::from(DummyConfig::default());
        assert!(open.validate_webhook(&HeaderMap::new(), body).is_ok());

        let signed = DummyProvider::from(DummyConfig {
            webhook_secret: Some("whsec_dummy".to_string()),
        });
        assert!(matches!(
            signed.validate_webhook(&HeaderMap::new(), body),
            Err(PaymentError::MissingSignature)
        ));

        let t = Utc::now().timestamp();
        let sig = signing::sign_payload(&format!("{t}.{body}"), "whsec_dummy");
        let mut headers = HeaderMap::new();
        headers.insert("stripe-signature", HeaderValue::from_str(&format!("t={t},v1={sig}")).unwrap());
        assert!(signed.validate_webhook(&headers, body).is_ok());
    }

    #[test]
    fn test_signature_tolerance_and_tampering() {
        let body = r#"{"type":"invoice.paid","data":{"object":{}}}"#;
        let now = 1_700_000_000;
        let header = |t: i64, secret: &str| {
            let sig = signing::sign_payload(&format!("{t}.{body}"), secret);
            let mut headers = HeaderMap::new();
            headers.insert("stripe-signature", HeaderValue::from_str(&format!("t={t},v1={sig}")).unwrap());
            headers
        };

        assert!(verify_signature(&header(now - 60, "whsec"), body, "whsec", now).is_ok());
        assert!(matches!(
            verify_signature(&header(now - 600, "whsec"), body, "whsec", now),
            Err(PaymentError::InvalidSignature)
        ));
        assert!(matches!(
            verify_signature(&header(now, "other"), body, "whsec", now),
            Err(PaymentError::InvalidSignature)
        ));
        assert!(matches!(
            verify_signature(&header(now, "whsec"), "{}", "whsec", now),
            Err(PaymentError::InvalidSignature)
        ));
    }

    #[test]
    fn test_parse_events() {
        let checkout = json!({
            "type": "checkout.session.completed",
            "data": {"object": {"subscription": "sub_1", "customer": "cus_1", "client_reference_id": "ref"}}
        });
        assert_eq!(
            parse_event(&checkout.to_string()).unwrap(),
            ProviderEvent::CheckoutCompleted {
                subscription_id: "sub_1".to_string(),
                customer_id: "cus_1".to_string(),
                client_reference_id: Some("ref".to_string()),
            }
        );

        let incomplete = json!({"type": "checkout.session.completed", "data": {"object": {"customer": "cus_1"}}});
        assert!(matches!(parse_event(&incomplete.to_string()), Err(PaymentError::InvalidData(_))));

        assert_eq!(
            parse_event(r#"{"type":"invoice.paid","data":{"object":{}}}"#).unwrap(),
            ProviderEvent::Ignored {
                event_type: "invoice.paid".to_string()
            }
        );
        assert!(parse_event("not json").is_err());
    }
}
