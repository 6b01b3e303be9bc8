//! API models for subscriptions and usage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::billing::PlanInfo;
use crate::db::models::subscriptions::{SubscriptionDBResponse, SubscriptionStatus, UsageRecordDBResponse};
use crate::types::SubscriptionId;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlansResponse {
    pub plans: Vec<PlanInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: SubscriptionId,
    pub plan_id: String,
    pub price_id: String,
    pub status: SubscriptionStatus,
    pub quantity: i32,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
}

impl From<SubscriptionDBResponse> for SubscriptionResponse {
    fn from(db: SubscriptionDBResponse) -> Self {
        Self {
            id: db.id,
            plan_id: db.plan_id,
            price_id: db.price_id,
            status: db.status,
            quantity: db.quantity,
            current_period_start: db.current_period_start,
            current_period_end: db.current_period_end,
            cancel_at_period_end: db.cancel_at_period_end,
        }
    }
}

/// The caller's current subscription, `null` when there is none.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentSubscriptionResponse {
    pub subscription: Option<SubscriptionResponse>,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    pub price_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionResponse {
    pub subscription_id: String,
    /// Secret for confirming the first payment client-side, when the processor issued one
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PortalSessionResponse {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookReceivedResponse {
    pub received: bool,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UsageCreate {
    pub quantity: i32,
    #[serde(default)]
    pub description: Option<String>,
}

/// Optional `[startDate, endDate]` period; both bounds are needed to restrict.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct UsageQuery {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl UsageQuery {
    pub fn period(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.start_date.zip(self.end_date)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecordResponse {
    pub quantity: i32,
    pub description: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl From<UsageRecordDBResponse> for UsageRecordResponse {
    fn from(db: UsageRecordDBResponse) -> Self {
        Self {
            quantity: db.quantity,
            description: db.description,
            recorded_at: db.recorded_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UsageResponse {
    pub records: Vec<UsageRecordResponse>,
    pub total: i64,
}
