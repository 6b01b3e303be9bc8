//! Plans, subscriptions, usage metering and the payment processor webhook.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
};
use serde_json::json;
use tracing::{info, instrument};

use crate::{
    AppState,
    api::models::{
        billing::{
            CreateSubscriptionRequest, CreateSubscriptionResponse, CurrentSubscriptionResponse, PlansResponse,
            PortalSessionResponse, SubscriptionResponse, UsageCreate, UsageQuery, UsageRecordResponse, UsageResponse,
            WebhookReceivedResponse,
        },
        users::CurrentUser,
    },
    audit::AuditEntry,
    billing,
    db::{
        handlers::{Teams, Users},
        models::{audit_logs::AuditCategory, subscriptions::SubscriptionDBResponse},
    },
    errors::{Error, Result},
    payment_providers::PaymentProvider,
    types::UserId,
    webhooks::WebhookEvent,
};

fn provider(state: &AppState) -> Result<Arc<dyn PaymentProvider>> {
    state.payment_provider.clone().ok_or_else(|| Error::NotImplemented {
        message: "Payment processing is not configured".to_string(),
    })
}

async fn active_subscription(state: &AppState, user_id: UserId) -> Result<SubscriptionDBResponse> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    billing::get_user_subscription(&mut conn, user_id)
        .await?
        .ok_or_else(|| Error::NotFoundMessage {
            message: "No active subscription found".to_string(),
        })
}

/// Audit and notify a subscription change on every team the subscriber created.
async fn announce(state: &AppState, subscription: &SubscriptionDBResponse, event: WebhookEvent, actor: Option<CurrentUser>) -> Result<()> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let teams: Vec<_> = Teams::new(&mut conn)
        .list_for_user(subscription.user_id)
        .await?
        .into_iter()
        .filter(|team| team.created_by == subscription.user_id)
        .collect();
    drop(conn);

    let data = json!({
        "subscriptionId": subscription.id,
        "planId": subscription.plan_id,
        "status": subscription.status,
        "quantity": subscription.quantity,
    });
    for team in teams {
        state
            .audit()
            .log(
                AuditEntry::builder()
                    .team_id(team.id)
                    .action(event.as_str())
                    .category(AuditCategory::Billing)
                    .maybe_actor(actor.clone())
                    .target_id(subscription.id.to_string())
                    .target_type("subscription")
                    .target_name(subscription.plan_id.clone())
                    .metadata(data.clone())
                    .build(),
            )
            .await;
        state.webhooks.notify(team.id, event, data.clone()).await;
    }
    Ok(())
}

/// Subscription plans with their prices
#[utoipa::path(
    get,
    path = "/billing/plans",
    tag = "billing",
    summary = "List plans",
    responses((status = 200, description = "Available plans", body = PlansResponse))
)]
#[instrument(skip_all)]
pub async fn list_plans(State(state): State<AppState>) -> Json<PlansResponse> {
    Json(PlansResponse {
        plans: billing::list_plans(&state.config.billing.plans),
    })
}

/// The caller's latest active subscription
#[utoipa::path(
    get,
    path = "/stripe/subscription",
    tag = "billing",
    summary = "Get subscription",
    responses(
        (status = 200, description = "Current subscription, or null", body = CurrentSubscriptionResponse),
        (status = 401, description = "Unauthorized"),
    )
)]
#[instrument(skip_all)]
pub async fn get_subscription(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<CurrentSubscriptionResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let subscription = billing::get_user_subscription(&mut conn, current_user.id).await?;
    Ok(Json(CurrentSubscriptionResponse {
        subscription: subscription.map(SubscriptionResponse::from),
    }))
}

/// Start a subscription, creating the processor customer on first use
#[utoipa::path(
    post,
    path = "/stripe/create-subscription",
    tag = "billing",
    summary = "Create subscription",
    request_body = CreateSubscriptionRequest,
    responses(
        (status = 200, description = "Subscription started", body = CreateSubscriptionResponse),
        (status = 400, description = "Invalid price or quantity"),
        (status = 401, description = "Unauthorized"),
        (status = 501, description = "Payment processing is not configured"),
        (status = 502, description = "Payment provider failed"),
    )
)]
#[instrument(skip_all)]
pub async fn create_subscription(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<Json<CreateSubscriptionResponse>> {
    let provider = provider(&state)?;
    if request.price_id.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "Price ID is required".to_string(),
        });
    }
    if request.quantity < 1 {
        return Err(Error::BadRequest {
            message: "Quantity must be at least 1".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn)
        .get_by_id(current_user.id)
        .await?
        .ok_or_else(|| Error::NotFoundMessage {
            message: "User not found".to_string(),
        })?;

    let customer_id = match user.stripe_customer_id {
        Some(id) => id,
        None => {
            let id = provider.create_customer(&user.email, user.id).await?;
            Users::new(&mut conn).set_stripe_customer_id(user.id, &id).await?;
            id
        }
    };

    let created = provider
        .create_subscription(&customer_id, user.id, &request.price_id, request.quantity)
        .await?;
    info!(subscription_id = %created.subscription_id, "Subscription created");

    // Providers that need no payment confirmation are stored now rather than on the webhook
    if provider.completes_immediately() {
        let sub = provider.retrieve_subscription(&created.subscription_id).await?;
        let stored = billing::store_subscription(&mut conn, &state.config.billing, &sub, user.id).await?;
        drop(conn);
        announce(&state, &stored, WebhookEvent::SubscriptionCreated, Some(current_user)).await?;
    }

    Ok(Json(CreateSubscriptionResponse {
        subscription_id: created.subscription_id,
        client_secret: created.client_secret,
    }))
}

/// Billing portal link for managing payment details
#[utoipa::path(
    post,
    path = "/stripe/portal-session",
    tag = "billing",
    summary = "Create portal session",
    responses(
        (status = 200, description = "Portal URL", body = PortalSessionResponse),
        (status = 400, description = "No Stripe customer found"),
        (status = 401, description = "Unauthorized"),
        (status = 501, description = "Payment processing is not configured"),
    )
)]
#[instrument(skip_all)]
pub async fn create_portal_session(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<PortalSessionResponse>> {
    let provider = provider(&state)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let customer_id = Users::new(&mut conn)
        .get_by_id(current_user.id)
        .await?
        .and_then(|user| user.stripe_customer_id)
        .ok_or_else(|| Error::BadRequest {
            message: "No Stripe customer found".to_string(),
        })?;
    drop(conn);

    let return_url = format!("{}/settings/billing", state.config.app_url.trim_end_matches('/'));
    let url = provider.create_billing_portal_session(&customer_id, &return_url).await?;
    Ok(Json(PortalSessionResponse { url }))
}

/// Payment processor events. The body is verified against the signature header before use.
#[utoipa::path(
    post,
    path = "/stripe/webhook",
    tag = "billing",
    summary = "Payment webhook",
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Event accepted", body = WebhookReceivedResponse),
        (status = 400, description = "Missing or invalid signature, or malformed event"),
        (status = 501, description = "Payment processing is not configured"),
    )
)]
#[instrument(skip_all)]
pub async fn payment_webhook(State(state): State<AppState>, headers: HeaderMap, body: String) -> Result<Json<WebhookReceivedResponse>> {
    let provider = provider(&state)?;
    let event = provider.validate_webhook(&headers, &body)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let applied = billing::apply_provider_event(&mut conn, provider.as_ref(), &state.config.billing, event).await?;
    drop(conn);

    if let Some((subscription, event)) = applied {
        announce(&state, &subscription, event, None).await?;
    }

    Ok(Json(WebhookReceivedResponse { received: true }))
}

/// Usage recorded against the caller's active subscription
#[utoipa::path(
    get,
    path = "/billing/usage",
    tag = "billing",
    summary = "Get usage",
    params(UsageQuery),
    responses(
        (status = 200, description = "Usage records and total", body = UsageResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No active subscription found"),
    )
)]
#[instrument(skip_all)]
pub async fn get_usage(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
    current_user: CurrentUser,
) -> Result<Json<UsageResponse>> {
    let subscription = active_subscription(&state, current_user.id).await?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let usage = billing::get_subscription_usage(&mut conn, subscription.id, query.period()).await?;
    Ok(Json(UsageResponse {
        records: usage.records.into_iter().map(UsageRecordResponse::from).collect(),
        total: usage.total,
    }))
}

/// Meter usage against the caller's active subscription
#[utoipa::path(
    post,
    path = "/billing/usage",
    tag = "billing",
    summary = "Record usage",
    request_body = UsageCreate,
    responses(
        (status = 201, description = "Usage recorded", body = UsageRecordResponse),
        (status = 400, description = "Quantity must be positive"),
        (status = 404, description = "No active subscription found"),
    )
)]
#[instrument(skip_all)]
pub async fn record_usage(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<UsageCreate>,
) -> Result<(StatusCode, Json<UsageRecordResponse>)> {
    if request.quantity <= 0 {
        return Err(Error::BadRequest {
            message: "Quantity must be positive".to_string(),
        });
    }
    let subscription = active_subscription(&state, current_user.id).await?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let record = billing::record_usage(&mut conn, subscription.id, request.quantity, request.description.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::subscriptions::SubscriptionStatus;
    use crate::test_utils::{create_test_app, create_test_app_with_config, create_test_config, create_test_team, create_test_user, login};
    use serde_json::Value;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_plans(pool: PgPool) {
        let mut config = create_test_config();
        config.billing.plans.pro = "price_pro_test".to_string();
        let (server, _) = create_test_app_with_config(pool, config);

        let plans: PlansResponse = server.get("/api/billing/plans").await.json();
        let keys: Vec<_> = plans.plans.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(keys, vec!["starter", "pro", "enterprise"]);
        assert_eq!(plans.plans[1].price_id, "price_pro_test");
        assert_eq!(plans.plans[1].max_team_members, Some(20));
        assert_eq!(plans.plans[2].max_team_members, None);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_subscribe_then_meter_usage(pool: PgPool) {
        let mut config = create_test_config();
        config.billing.plans.pro = "price_pro_test".to_string();
        let (server, state) = create_test_app_with_config(pool.clone(), config);
        let user = create_test_user(&pool, "payer@example.com").await;
        create_test_team(&pool, &user, "Paying Team").await;
        let (_, cookie) = login(&state, &user).await;

        let current: CurrentSubscriptionResponse = server
            .get("/api/stripe/subscription")
            .add_header("cookie", cookie.clone())
            .await
            .json();
        assert!(current.subscription.is_none());

        let response = server
            .get("/api/billing/usage")
            .add_header("cookie", cookie.clone())
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["error"], "No active subscription found");

        let created: CreateSubscriptionResponse = server
            .post("/api/stripe/create-subscription")
            .add_header("cookie", cookie.clone())
            .json(&json!({"priceId": "price_pro_test"}))
            .await
            .json();
        assert!(created.subscription_id.starts_with("dummy_sub_"));

        let current: CurrentSubscriptionResponse = server
            .get("/api/stripe/subscription")
            .add_header("cookie", cookie.clone())
            .await
            .json();
        let subscription = current.subscription.expect("dummy subscriptions are active immediately");
        assert_eq!(subscription.plan_id, "pro");
        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert_eq!(subscription.quantity, 1);

        for (quantity, description) in [(3, "api calls"), (4, "exports")] {
            server
                .post("/api/billing/usage")
                .add_header("cookie", cookie.clone())
                .json(&json!({"quantity": quantity, "description": description}))
                .await
                .assert_status(StatusCode::CREATED);
        }
        server
            .post("/api/billing/usage")
            .add_header("cookie", cookie.clone())
            .json(&json!({"quantity": 0}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let usage: UsageResponse = server
            .get("/api/billing/usage")
            .add_header("cookie", cookie.clone())
            .await
            .json();
        assert_eq!(usage.records.len(), 2);
        assert_eq!(usage.total, 7);

        let portal: PortalSessionResponse = server
            .post("/api/stripe/portal-session")
            .add_header("cookie", cookie)
            .await
            .json();
        assert_eq!(portal.url, "http://localhost:3000/settings/billing");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_portal_requires_customer(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let user = create_test_user(&pool, "free@example.com").await;
        let (_, cookie) = login(&state, &user).await;

        let response = server.post("/api/stripe/portal-session").add_header("cookie", cookie).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["error"], "No Stripe customer found");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_webhook_cancels_subscription(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let user = create_test_user(&pool, "payer@example.com").await;
        let (_, cookie) = login(&state, &user).await;

        let created: CreateSubscriptionResponse = server
            .post("/api/stripe/create-subscription")
            .add_header("cookie", cookie.clone())
            .json(&json!({"priceId": "price_any", "quantity": 2}))
            .await
            .json();

        let body = json!({
            "type": "customer.subscription.deleted",
            "data": {"object": {
                "id": created.subscription_id,
                "status": "canceled",
                "current_period_start": 1_704_067_200,
                "current_period_end": 1_706_745_600,
                "items": {"data": [{"price": {"id": "price_any", "lookup_key": null}, "quantity": 2}]}
            }}
        });
        let received: WebhookReceivedResponse = server.post("/api/stripe/webhook").json(&body).await.json();
        assert!(received.received);

        let current: CurrentSubscriptionResponse = server
            .get("/api/stripe/subscription")
            .add_header("cookie", cookie)
            .await
            .json();
        assert!(current.subscription.is_none());

        let ignored: WebhookReceivedResponse = server
            .post("/api/stripe/webhook")
            .json(&json!({"type": "invoice.paid", "data": {"object": {}}}))
            .await
            .json();
        assert!(ignored.received);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_webhook_signature_enforced_when_configured(pool: PgPool) {
        let mut config = create_test_config();
        config.billing.payment = Some(crate::config::PaymentConfig::Dummy(crate::config::DummyConfig {
            webhook_secret: Some("whsec_test".to_string()),
        }));
        let (server, _) = create_test_app_with_config(pool, config);

        let response = server
            .post("/api/stripe/webhook")
            .json(&json!({"type": "invoice.paid", "data": {"object": {}}}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["error"], "Missing stripe-signature header");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_without_provider_returns_not_implemented(pool: PgPool) {
        let mut config = create_test_config();
        config.billing.payment = None;
        let (server, state) = create_test_app_with_config(pool.clone(), config);
        let user = create_test_user(&pool, "payer@example.com").await;
        let (_, cookie) = login(&state, &user).await;

        server
            .post("/api/stripe/create-subscription")
            .add_header("cookie", cookie)
            .json(&json!({"priceId": "price_pro"}))
            .await
            .assert_status(StatusCode::NOT_IMPLEMENTED);
    }
}
