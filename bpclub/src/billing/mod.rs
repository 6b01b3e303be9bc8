//! Subscription plans, plan limits and usage metering.
//!
//! Plans are static; their processor price ids come from configuration. A subscription is
//! matched to a plan by price id, so a price that is not configured grants nothing beyond the
//! free tier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    config::{BillingConfig, PlanPriceIds},
    db::{
        errors::Result as DbResult,
        handlers::{Subscriptions, Teams},
        models::subscriptions::{SubscriptionDBResponse, SubscriptionStatus, SubscriptionUpsertDBRequest, UsageRecordDBResponse},
    },
    errors::{Error, Result},
    payment_providers::{PaymentProvider, ProviderEvent, ProviderSubscription},
    types::{SubscriptionId, UserId, abbrev_uuid},
    webhooks::WebhookEvent,
};

/// A subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub key: &'static str,
    pub name: &'static str,
    /// `None` means unlimited
    pub max_team_members: Option<i64>,
    pub features: &'static [&'static str],
}

pub static PLANS: [Plan; 3] = [
    Plan {
        key: "starter",
        name: "Starter",
        max_team_members: Some(5),
        features: &["Basic features", "Email support", "Team collaboration"],
    },
    Plan {
        key: "pro",
        name: "Pro",
        max_team_members: Some(20),
        features: &[
            "All Starter features",
            "Priority support",
            "Advanced analytics",
            "Custom branding",
            "API access",
        ],
    },
    Plan {
        key: "enterprise",
        name: "Enterprise",
        max_team_members: None,
        features: &[
            "All Pro features",
            "Unlimited team members",
            "Enterprise SSO",
            "Custom integrations",
            "Dedicated support",
            "SLA guarantees",
        ],
    },
];

impl Plan {
    pub fn price_id<'a>(&self, prices: &'a PlanPriceIds) -> &'a str {
        match self.key {
            "starter" => &prices.starter,
            "pro" => &prices.pro,
            _ => &prices.enterprise,
        }
    }

    /// Case-insensitive substring match over the plan's features.
    pub fn has_feature(&self, feature: &str) -> bool {
        let needle = feature.to_lowercase();
        self.features.iter().any(|f| f.to_lowercase().contains(&needle))
    }
}

/// The plan sold under `price_id`, if any.
pub fn plan_for_price(price_id: &str, prices: &PlanPriceIds) -> Option<&'static Plan> {
    PLANS.iter().find(|plan| plan.price_id(prices) == price_id)
}

/// Plan as listed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanInfo {
    pub id: String,
    pub name: String,
    /// Absent for unlimited plans
    pub max_team_members: Option<i64>,
    pub features: Vec<String>,
    pub price_id: String,
}

pub fn list_plans(prices: &PlanPriceIds) -> Vec<PlanInfo> {
    PLANS
        .iter()
        .map(|plan| PlanInfo {
            id: plan.key.to_string(),
            name: plan.name.to_string(),
            max_team_members: plan.max_team_members,
            features: plan.features.iter().map(|f| f.to_string()).collect(),
            price_id: plan.price_id(prices).to_string(),
        })
        .collect()
}

/// Result of a member-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MemberLimit {
    pub allowed: bool,
    /// `None` means unlimited
    pub limit: Option<i64>,
    pub current: i64,
}

/// The user's most recent ACTIVE subscription.
pub async fn get_user_subscription(conn: &mut PgConnection, user_id: UserId) -> DbResult<Option<SubscriptionDBResponse>> {
    Subscriptions::new(conn).latest_active_for_user(user_id).await
}

/// Whether the user's active plan lists a feature matching `feature`.
#[instrument(skip(conn, config), fields(user_id = %abbrev_uuid(&user_id)), err)]
pub async fn check_subscription_access(
    conn: &mut PgConnection,
    config: &BillingConfig,
    user_id: UserId,
    feature: &str,
) -> DbResult<bool> {
    let Some(subscription) = get_user_subscription(conn, user_id).await? else {
        return Ok(false);
    };
    Ok(plan_for_price(&subscription.price_id, &config.plans).is_some_and(|plan| plan.has_feature(feature)))
}

/// Whether teams created by `creator` may take one more member.
///
/// Memberships are counted across every team the creator owns. Without an active subscription
/// on a known plan the configured free limit applies.
#[instrument(skip(conn, config), fields(creator = %abbrev_uuid(&creator)), err)]
pub async fn check_team_member_limit(conn: &mut PgConnection, config: &BillingConfig, creator: UserId) -> DbResult<MemberLimit> {
    let limit = match get_user_subscription(conn, creator).await? {
        Some(subscription) => match plan_for_price(&subscription.price_id, &config.plans) {
            Some(plan) => plan.max_team_members,
            None => {
                warn!(price_id = %subscription.price_id, "Active subscription on an unknown price, using free limit");
                Some(config.free_member_limit)
            }
        },
        None => Some(config.free_member_limit),
    };

    let current = Teams::new(conn).count_members_of_teams_created_by(creator).await?;

    Ok(MemberLimit {
        allowed: limit.is_none_or(|max| current < max),
        limit,
        current,
    })
}

pub async fn record_usage(
    conn: &mut PgConnection,
    subscription_id: SubscriptionId,
    quantity: i32,
    description: Option<&str>,
) -> DbResult<UsageRecordDBResponse> {
    Subscriptions::new(conn).record_usage(subscription_id, quantity, description).await
}

/// Usage over an optional `[start, end]` period.
#[derive(Debug, Clone)]
pub struct UsageSummary {
    pub records: Vec<UsageRecordDBResponse>,
    pub total: i64,
}

pub async fn get_subscription_usage(
    conn: &mut PgConnection,
    subscription_id: SubscriptionId,
    period: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> DbResult<UsageSummary> {
    let (start, end) = period.map_or((None, None), |(s, e)| (Some(s), Some(e)));
    let records = Subscriptions::new(conn).list_usage(subscription_id, start, end).await?;
    let total = records.iter().map(|r| i64::from(r.quantity)).sum();
    Ok(UsageSummary { records, total })
}

fn upsert_request(sub: &ProviderSubscription, user_id: UserId, config: &BillingConfig) -> Result<SubscriptionUpsertDBRequest> {
    let status = SubscriptionStatus::from_provider(&sub.status).ok_or_else(|| Error::BadRequest {
        message: format!("Unknown subscription status: {}", sub.status),
    })?;
    let plan_id = sub
        .lookup_key
        .clone()
        .or_else(|| plan_for_price(&sub.price_id, &config.plans).map(|p| p.key.to_string()))
        .unwrap_or_else(|| "pro".to_string());

    Ok(SubscriptionUpsertDBRequest {
        user_id,
        team_id: None,
        stripe_id: sub.id.clone(),
        plan_id,
        price_id: sub.price_id.clone(),
        status,
        quantity: sub.quantity,
        current_period_start: sub.current_period_start,
        current_period_end: sub.current_period_end,
        cancel_at_period_end: sub.cancel_at_period_end,
    })
}

/// Store a subscription fetched from the provider for `user_id`.
pub async fn store_subscription(
    conn: &mut PgConnection,
    config: &BillingConfig,
    sub: &ProviderSubscription,
    user_id: UserId,
) -> Result<SubscriptionDBResponse> {
    let request = upsert_request(sub, user_id, config)?;
    Ok(Subscriptions::new(conn).upsert(&request).await?)
}

/// Apply a verified provider event to the subscriptions table.
///
/// Returns the affected subscription and the team event it corresponds to, or `None` for events
/// that change nothing.
#[instrument(skip_all, err)]
pub async fn apply_provider_event(
    conn: &mut PgConnection,
    provider: &dyn PaymentProvider,
    config: &BillingConfig,
    event: ProviderEvent,
) -> Result<Option<(SubscriptionDBResponse, WebhookEvent)>> {
    match event {
        ProviderEvent::CheckoutCompleted {
            subscription_id,
            client_reference_id,
            ..
        } => {
            let sub = provider.retrieve_subscription(&subscription_id).await?;
            let user_id = client_reference_id
                .and_then(|id| id.parse::<UserId>().ok())
                .or(sub.user_id)
                .ok_or_else(|| Error::BadRequest {
                    message: "Missing customer or subscription".to_string(),
                })?;
            let stored = store_subscription(conn, config, &sub, user_id).await?;
            info!(stripe_id = %stored.stripe_id, "Subscription created from checkout");
            Ok(Some((stored, WebhookEvent::SubscriptionCreated)))
        }
        ProviderEvent::SubscriptionUpdated(sub) => {
            let Some(existing) = Subscriptions::new(conn).get_by_stripe_id(&sub.id).await? else {
                warn!(stripe_id = %sub.id, "Update for unknown subscription ignored");
                return Ok(None);
            };
            let stored = store_subscription(conn, config, &sub, existing.user_id).await?;
            Ok(Some((stored, WebhookEvent::SubscriptionUpdated)))
        }
        ProviderEvent::SubscriptionDeleted(sub) => {
            let status = SubscriptionStatus::from_provider(&sub.status).unwrap_or(SubscriptionStatus::Canceled);
            let mut repo = Subscriptions::new(conn);
            let Some(existing) = repo.get_by_stripe_id(&sub.id).await? else {
                warn!(stripe_id = %sub.id, "Deletion for unknown subscription ignored");
                return Ok(None);
            };
            let request = SubscriptionUpsertDBRequest {
                status,
                cancel_at_period_end: false,
                ..upsert_request(&sub, existing.user_id, config)?
            };
            let stored = repo.upsert(&request).await?;
            Ok(Some((stored, WebhookEvent::SubscriptionCancelled)))
        }
        ProviderEvent::Ignored { event_type } => {
            info!(event_type, "Ignoring payment webhook event");
            Ok(None)
        }
    }
}
