//! Database models for subscriptions and metered usage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::types::{SubscriptionId, TeamId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Trialing,
    Unpaid,
    Paused,
}

impl SubscriptionStatus {
    /// Map a payment-processor status string (`active`, `past_due`, ...) onto our status.
    pub fn from_provider(status: &str) -> Option<Self> {
        match status.to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "past_due" => Some(Self::PastDue),
            "canceled" | "cancelled" => Some(Self::Canceled),
            "incomplete" => Some(Self::Incomplete),
            "incomplete_expired" => Some(Self::IncompleteExpired),
            "trialing" => Some(Self::Trialing),
            "unpaid" => Some(Self::Unpaid),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }
}

/// Insert or update keyed on the processor's subscription id.
#[derive(Debug, Clone)]
pub struct SubscriptionUpsertDBRequest {
    pub user_id: UserId,
    pub team_id: Option<TeamId>,
    pub stripe_id: String,
    pub plan_id: String,
    pub price_id: String,
    pub status: SubscriptionStatus,
    pub quantity: i32,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionDBResponse {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub team_id: Option<TeamId>,
    pub stripe_id: String,
    pub plan_id: String,
    pub price_id: String,
    pub status: SubscriptionStatus,
    pub quantity: i32,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UsageRecordDBResponse {
    pub id: Uuid,
    pub subscription_id: SubscriptionId,
    pub quantity: i32,
    pub description: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
