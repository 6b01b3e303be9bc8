//! Fan-out delivery of team events to subscribed webhooks.
//!
//! ```text
//! dispatch(team, event, data)
//!   ├─ DB: active_for_event()            // is_active AND event = ANY(events)
//!   ├─ serialize {event, data, teamId, timestamp} once
//!   └─ join_all over webhooks:
//!        ├─ sign body with the webhook's secret
//!        ├─ POST (client timeout from config)
//!        └─ DB: create_delivery()        // real status, or 0 plus error text
//! ```
//!
//! A failed POST or a failed delivery insert never affects the other webhooks of the same event.

use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::PgPool;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::db::errors::DbError;
use crate::db::handlers::Webhooks;
use crate::db::models::webhooks::{Webhook, WebhookDeliveryCreateDBRequest};
use crate::errors::Error;
use crate::types::{DeliveryId, TeamId, WebhookId, abbrev_uuid};
use crate::webhooks::events::WebhookEvent;
use crate::webhooks::signing;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    #[schema(value_type = String, format = "uuid")]
    pub delivery_id: DeliveryId,
    #[schema(value_type = String, format = "uuid")]
    pub webhook_id: WebhookId,
    /// HTTP status, or 0 when no response was received
    pub status: u16,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: i64,
}

#[derive(Clone)]
pub struct WebhookService {
    db: PgPool,
    http_client: reqwest::Client,
}

/// Request body sent to every webhook.
pub fn build_payload(team_id: TeamId, event: WebhookEvent, data: Value) -> Value {
    json!({
        "event": event.as_str(),
        "data": data,
        "teamId": team_id,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

fn headers_to_json(headers: &HeaderMap) -> Value {
    let map = headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), Value::String(value.to_str().ok()?.to_string()))))
        .collect::<serde_json::Map<_, _>>();
    Value::Object(map)
}

impl WebhookService {
    pub fn new(db: PgPool, config: &WebhookConfig) -> Result<Self, Error> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal {
                operation: format!("create webhook HTTP client: {e}"),
            })?;

        Ok(Self { db, http_client })
    }

    /// Deliver `event` to every active webhook of the team subscribed to it.
    #[instrument(skip(self, data), fields(team_id = %abbrev_uuid(&team_id), event = %event), err)]
    pub async fn dispatch(&self, team_id: TeamId, event: WebhookEvent, data: Value) -> anyhow::Result<Vec<DeliveryOutcome>> {
        let webhooks = {
            let mut conn = self.db.acquire().await?;
            Webhooks::new(&mut conn).active_for_event(team_id, event.as_str()).await?
        };

        if webhooks.is_empty() {
            debug!("No webhooks subscribed to event");
            return Ok(Vec::new());
        }

        let payload = build_payload(team_id, event, data);
        let body = serde_json::to_string(&payload)?;

        let outcomes = join_all(webhooks.iter().map(|webhook| self.deliver(webhook, event, &payload, &body))).await;

        info!(
            attempted = outcomes.len(),
            succeeded = outcomes.iter().filter(|o| o.success).count(),
            "Webhook event dispatched"
        );
        Ok(outcomes)
    }

    /// Like [`dispatch`](Self::dispatch) but for handlers: failures are logged, never returned.
    pub async fn notify(&self, team_id: TeamId, event: WebhookEvent, data: Value) {
        if let Err(e) = self.dispatch(team_id, event, data).await {
            error!(error = %e, event = %event, "Failed to dispatch webhook event");
        }
    }

    /// Deliver one event to a single webhook regardless of its subscriptions.
    #[instrument(skip(self, webhook, data), fields(webhook_id = %abbrev_uuid(&webhook.id), event = %event), err)]
    pub async fn send_to(&self, webhook: &Webhook, event: WebhookEvent, data: Value) -> anyhow::Result<DeliveryOutcome> {
        let payload = build_payload(webhook.team_id, event, data);
        let body = serde_json::to_string(&payload)?;
        Ok(self.deliver(webhook, event, &payload, &body).await)
    }

    async fn deliver(&self, webhook: &Webhook, event: WebhookEvent, payload: &Value, body: &str) -> DeliveryOutcome {
        let delivery_id = Uuid::new_v4();
        let signature = signing::signature_header(body, &webhook.secret);

        let request_headers = json!({
            "Content-Type": "application/json",
            "X-Webhook-ID": webhook.id,
            "X-Webhook-Delivery": delivery_id,
            "X-Event-Type": event.as_str(),
            "X-Webhook-Signature": signature,
        });

        let started = Instant::now();
        let result = self
            .http_client
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-ID", webhook.id.to_string())
            .header("X-Webhook-Delivery", delivery_id.to_string())
            .header("X-Event-Type", event.as_str())
            .header(signing::SIGNATURE_HEADER, &signature)
            .body(body.to_string())
            .send()
            .await;

        let (status, response_body, response_headers, error) = match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let headers = headers_to_json(response.headers());
                let text = response.text().await.unwrap_or_default();
                (status, Some(text), Some(headers), None)
            }
            Err(e) => (0, None, None, Some(e.to_string())),
        };
        let duration_ms = started.elapsed().as_millis() as i64;
        let success = (200..300).contains(&status);

        if success {
            info!(webhook_id = %abbrev_uuid(&webhook.id), status, "Webhook delivered successfully");
        } else {
            warn!(
                webhook_id = %abbrev_uuid(&webhook.id),
                status,
                error = error.as_deref().unwrap_or(""),
                "Webhook delivery failed"
            );
        }

        let record = WebhookDeliveryCreateDBRequest {
            id: delivery_id,
            webhook_id: webhook.id,
            event_type: event.as_str().to_string(),
            request_body: payload.clone(),
            request_headers,
            response_status: i32::from(status),
            response_body,
            response_headers,
            success,
            error: error.clone(),
            duration_ms,
        };
        if let Err(e) = self.record(&record).await {
            error!(error = %e, delivery_id = %abbrev_uuid(&delivery_id), "Failed to record webhook delivery");
        }

        DeliveryOutcome {
            delivery_id,
            webhook_id: webhook.id,
            status,
            success,
            error,
            duration_ms,
        }
    }

    async fn record(&self, record: &WebhookDeliveryCreateDBRequest) -> Result<(), DbError> {
        let mut conn = self.db.acquire().await?;
        Webhooks::new(&mut conn).create_delivery(record).await?;
        Ok(())
    }
}
