//! API request and response models for webhook endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::webhooks::{Webhook, WebhookDelivery};
use crate::types::{DeliveryId, TeamId, WebhookId};

/// Request to create a new webhook.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct WebhookCreate {
    /// Display name; defaults to the description, then the URL
    #[serde(default)]
    pub name: Option<String>,
    /// http(s) URL to receive webhook events
    pub url: String,
    /// Event names to subscribe to (at least one)
    pub events: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Signing secret; generated when omitted
    #[serde(default)]
    pub secret: Option<String>,
}

/// Request to update a webhook. Omitted fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub events: Option<Vec<String>>,
    /// `null` clears the description
    #[serde(default, deserialize_with = "super::double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// A webhook without its secret.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: WebhookId,
    #[schema(value_type = String, format = "uuid")]
    pub team_id: TeamId,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub events: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Webhook> for WebhookResponse {
    fn from(webhook: Webhook) -> Self {
        Self {
            id: webhook.id,
            team_id: webhook.team_id,
            name: webhook.name,
            url: webhook.url,
            description: webhook.description,
            events: webhook.events,
            is_active: webhook.is_active,
            created_at: webhook.created_at,
            updated_at: webhook.updated_at,
        }
    }
}

/// Response for webhook creation, the only time the secret is returned.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookWithSecretResponse {
    #[serde(flatten)]
    pub webhook: WebhookResponse,
    pub secret: String,
}

impl From<Webhook> for WebhookWithSecretResponse {
    fn from(mut webhook: Webhook) -> Self {
        let secret = std::mem::take(&mut webhook.secret);
        Self {
            webhook: WebhookResponse::from(webhook),
            secret,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: DeliveryId,
    #[schema(value_type = String, format = "uuid")]
    pub webhook_id: WebhookId,
    pub event_type: String,
    pub request_body: serde_json::Value,
    pub response_status: i32,
    pub response_body: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl From<WebhookDelivery> for DeliveryResponse {
    fn from(db: WebhookDelivery) -> Self {
        Self {
            id: db.id,
            webhook_id: db.webhook_id,
            event_type: db.event_type,
            request_body: db.request_body,
            response_status: db.response_status,
            response_body: db.response_body,
            success: db.success,
            error: db.error,
            duration_ms: db.duration_ms,
            created_at: db.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryPage {
    pub deliveries: Vec<DeliveryResponse>,
    pub pagination: super::pagination::PaginationInfo,
}
