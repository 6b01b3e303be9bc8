//! Database repository for subscriptions and usage records.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::subscriptions::{
    SubscriptionDBResponse, SubscriptionStatus, SubscriptionUpsertDBRequest, UsageRecordDBResponse,
};
use crate::types::{SubscriptionId, UserId, abbrev_uuid};

pub struct Subscriptions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Subscriptions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Insert a subscription or refresh the row with the same processor id.
    #[instrument(skip(self, request), fields(stripe_id = %request.stripe_id), err)]
    pub async fn upsert(&mut self, request: &SubscriptionUpsertDBRequest) -> Result<SubscriptionDBResponse> {
        let subscription = sqlx::query_as::<_, SubscriptionDBResponse>(
            r#"
            INSERT INTO subscriptions (
                user_id, team_id, stripe_id, plan_id, price_id, status, quantity,
                current_period_start, current_period_end, cancel_at_period_end
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT ON CONSTRAINT subscriptions_stripe_id_unique DO UPDATE SET
                plan_id = EXCLUDED.plan_id,
                price_id = EXCLUDED.price_id,
                status = EXCLUDED.status,
                quantity = EXCLUDED.quantity,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                team_id = COALESCE(EXCLUDED.team_id, subscriptions.team_id),
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(request.user_id)
        .bind(request.team_id)
        .bind(&request.stripe_id)
        .bind(&request.plan_id)
        .bind(&request.price_id)
        .bind(request.status)
        .bind(request.quantity)
        .bind(request.current_period_start)
        .bind(request.current_period_end)
        .bind(request.cancel_at_period_end)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(subscription)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_stripe_id(&mut self, stripe_id: &str) -> Result<Option<SubscriptionDBResponse>> {
        let subscription = sqlx::query_as::<_, SubscriptionDBResponse>("SELECT * FROM subscriptions WHERE stripe_id = $1")
            .bind(stripe_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(subscription)
    }

    /// The user's most recent ACTIVE subscription.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn latest_active_for_user(&mut self, user_id: UserId) -> Result<Option<SubscriptionDBResponse>> {
        let subscription = sqlx::query_as::<_, SubscriptionDBResponse>(
            r#"
            SELECT * FROM subscriptions
            WHERE user_id = $1 AND status = 'ACTIVE'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(subscription)
    }

    #[instrument(skip(self), err)]
    pub async fn set_status(&mut self, stripe_id: &str, status: SubscriptionStatus) -> Result<Option<SubscriptionDBResponse>> {
        let subscription = sqlx::query_as::<_, SubscriptionDBResponse>(
            "UPDATE subscriptions SET status = $2, updated_at = NOW() WHERE stripe_id = $1 RETURNING *",
        )
        .bind(stripe_id)
        .bind(status)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(subscription)
    }

    #[instrument(skip(self, description), fields(subscription_id = %abbrev_uuid(&subscription_id)), err)]
    pub async fn record_usage(
        &mut self,
        subscription_id: SubscriptionId,
        quantity: i32,
        description: Option<&str>,
    ) -> Result<UsageRecordDBResponse> {
        let record = sqlx::query_as::<_, UsageRecordDBResponse>(
            r#"
            INSERT INTO usage_records (subscription_id, quantity, description)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(subscription_id)
        .bind(quantity)
        .bind(description)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(record)
    }

    /// Usage records inside `[start, end]`, newest first. Open bounds are unconstrained.
    #[instrument(skip(self), fields(subscription_id = %abbrev_uuid(&subscription_id)), err)]
    pub async fn list_usage(
        &mut self,
        subscription_id: SubscriptionId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<UsageRecordDBResponse>> {
        let records = sqlx::query_as::<_, UsageRecordDBResponse>(
            r#"
            SELECT * FROM usage_records
            WHERE subscription_id = $1
              AND ($2::TIMESTAMPTZ IS NULL OR recorded_at >= $2)
              AND ($3::TIMESTAMPTZ IS NULL OR recorded_at <= $3)
            ORDER BY recorded_at DESC
            "#,
        )
        .bind(subscription_id)
        .bind(start)
        .bind(end)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(records)
    }
}
