//! Database models for team webhooks and their delivery log.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{DeliveryId, TeamId, WebhookId};

#[derive(Debug, Clone, FromRow)]
pub struct Webhook {
    pub id: WebhookId,
    pub team_id: TeamId,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub events: Vec<String>,
    pub secret: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    /// Active and subscribed to `event`.
    pub fn accepts_event(&self, event: &str) -> bool {
        self.is_active && self.events.iter().any(|e| e == event)
    }
}

#[derive(Debug, Clone)]
pub struct WebhookCreateDBRequest {
    pub team_id: TeamId,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub events: Vec<String>,
    pub secret: String,
}

/// Partial update; `None` leaves a column unchanged.
#[derive(Debug, Clone, Default)]
pub struct WebhookUpdateDBRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub description: Option<Option<String>>,
    pub events: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WebhookDelivery {
    pub id: DeliveryId,
    pub webhook_id: WebhookId,
    pub event_type: String,
    pub request_body: serde_json::Value,
    pub request_headers: serde_json::Value,
    pub response_status: i32,
    pub response_body: Option<String>,
    pub response_headers: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one POST, written after the attempt finishes.
#[derive(Debug, Clone)]
pub struct WebhookDeliveryCreateDBRequest {
    pub id: DeliveryId,
    pub webhook_id: WebhookId,
    pub event_type: String,
    pub request_body: serde_json::Value,
    pub request_headers: serde_json::Value,
    pub response_status: i32,
    pub response_body: Option<String>,
    pub response_headers: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn webhook(events: &[&str], is_active: bool) -> Webhook {
        Webhook {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            name: "hook".to_string(),
            url: "https://example.com".to_string(),
            description: None,
            events: events.iter().map(|s| s.to_string()).collect(),
            secret: "s".to_string(),
            is_active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_accepts_event() {
        let hook = webhook(&["team.updated", "member.added"], true);
        assert!(hook.accepts_event("member.added"));
        assert!(!hook.accepts_event("member.removed"));
    }

    #[test]
    fn test_inactive_accepts_nothing() {
        let hook = webhook(&["team.updated"], false);
        assert!(!hook.accepts_event("team.updated"));
    }
}
