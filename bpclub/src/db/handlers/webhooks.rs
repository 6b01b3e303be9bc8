//! Database repository for team webhooks and delivery records.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::webhooks::{
    Webhook, WebhookCreateDBRequest, WebhookDelivery, WebhookDeliveryCreateDBRequest, WebhookUpdateDBRequest,
};
use crate::types::{TeamId, WebhookId, abbrev_uuid};

pub struct Webhooks<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Webhooks<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(team_id = %abbrev_uuid(&request.team_id)), err)]
    pub async fn create(&mut self, request: &WebhookCreateDBRequest) -> Result<Webhook> {
        let webhook = sqlx::query_as::<_, Webhook>(
            r#"
            INSERT INTO webhooks (team_id, name, url, description, events, secret)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(request.team_id)
        .bind(&request.name)
        .bind(&request.url)
        .bind(&request.description)
        .bind(&request.events)
        .bind(&request.secret)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(webhook)
    }

    /// Webhook by id, scoped to its team.
    #[instrument(skip(self), fields(webhook_id = %abbrev_uuid(&id)), err)]
    pub async fn get(&mut self, team_id: TeamId, id: WebhookId) -> Result<Option<Webhook>> {
        let webhook = sqlx::query_as::<_, Webhook>("SELECT * FROM webhooks WHERE team_id = $1 AND id = $2")
            .bind(team_id)
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(webhook)
    }

    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn list_by_team(&mut self, team_id: TeamId) -> Result<Vec<Webhook>> {
        let webhooks = sqlx::query_as::<_, Webhook>("SELECT * FROM webhooks WHERE team_id = $1 ORDER BY created_at DESC")
            .bind(team_id)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(webhooks)
    }

    #[instrument(skip(self, request), fields(webhook_id = %abbrev_uuid(&id)), err)]
    pub async fn update(&mut self, team_id: TeamId, id: WebhookId, request: &WebhookUpdateDBRequest) -> Result<Option<Webhook>> {
        let webhook = sqlx::query_as::<_, Webhook>(
            r#"
            UPDATE webhooks
            SET name = COALESCE($3, name),
                url = COALESCE($4, url),
                description = CASE WHEN $5::boolean THEN $6 ELSE description END,
                events = COALESCE($7, events),
                is_active = COALESCE($8, is_active),
                updated_at = NOW()
            WHERE team_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(team_id)
        .bind(id)
        .bind(&request.name)
        .bind(&request.url)
        .bind(request.description.is_some())
        .bind(request.description.clone().flatten())
        .bind(&request.events)
        .bind(request.is_active)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(webhook)
    }

    #[instrument(skip(self), fields(webhook_id = %abbrev_uuid(&id)), err)]
    pub async fn delete(&mut self, team_id: TeamId, id: WebhookId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM webhooks WHERE team_id = $1 AND id = $2")
            .bind(team_id)
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Active webhooks of a team subscribed to `event`.
    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn active_for_event(&mut self, team_id: TeamId, event: &str) -> Result<Vec<Webhook>> {
        let webhooks = sqlx::query_as::<_, Webhook>(
            r#"
            SELECT * FROM webhooks
            WHERE team_id = $1 AND is_active AND $2 = ANY(events)
            "#,
        )
        .bind(team_id)
        .bind(event)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(webhooks)
    }

    #[instrument(skip(self, request), fields(webhook_id = %abbrev_uuid(&request.webhook_id)), err)]
    pub async fn create_delivery(&mut self, request: &WebhookDeliveryCreateDBRequest) -> Result<WebhookDelivery> {
        let delivery = sqlx::query_as::<_, WebhookDelivery>(
            r#"
            INSERT INTO webhook_deliveries (
                id, webhook_id, event_type, request_body, request_headers,
                response_status, response_body, response_headers, success, error, duration_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(request.id)
        .bind(request.webhook_id)
        .bind(&request.event_type)
        .bind(&request.request_body)
        .bind(&request.request_headers)
        .bind(request.response_status)
        .bind(&request.response_body)
        .bind(&request.response_headers)
        .bind(request.success)
        .bind(&request.error)
        .bind(request.duration_ms)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(delivery)
    }

    /// Deliveries for a webhook, newest first.
    #[instrument(skip(self), fields(webhook_id = %abbrev_uuid(&webhook_id)), err)]
    pub async fn list_deliveries(&mut self, webhook_id: WebhookId, limit: i64, offset: i64) -> Result<Vec<WebhookDelivery>> {
        let deliveries = sqlx::query_as::<_, WebhookDelivery>(
            r#"
            SELECT * FROM webhook_deliveries
            WHERE webhook_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(webhook_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(deliveries)
    }

    #[instrument(skip(self), fields(webhook_id = %abbrev_uuid(&webhook_id)), err)]
    pub async fn count_deliveries(&mut self, webhook_id: WebhookId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM webhook_deliveries WHERE webhook_id = $1")
            .bind(webhook_id)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(count)
    }
}
