//! HTTP handlers for team webhook management.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde_json::json;
use tracing::instrument;

use crate::{
    AppState,
    api::models::{
        pagination::{PageParams, PaginationInfo},
        users::CurrentUser,
        webhooks::{DeliveryPage, DeliveryResponse, WebhookCreate, WebhookResponse, WebhookUpdate, WebhookWithSecretResponse},
    },
    audit::AuditEntry,
    auth::permissions::{require_membership, require_team_role},
    db::{
        handlers::Webhooks,
        models::{
            audit_logs::AuditCategory,
            webhooks::{Webhook, WebhookCreateDBRequest, WebhookUpdateDBRequest},
        },
    },
    errors::{Error, Result},
    request_context::ClientInfo,
    types::{Operation, TeamId, TeamRole, WebhookId},
    webhooks::{DeliveryOutcome, WebhookEvent, events::is_known_event, signing},
};

fn validate_url(raw: &str) -> Result<()> {
    match url::Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => Ok(()),
        _ => Err(Error::BadRequest {
            message: "Webhook URL must be a valid http(s) URL".to_string(),
        }),
    }
}

fn validate_events(events: &[String]) -> Result<()> {
    if events.is_empty() {
        return Err(Error::BadRequest {
            message: "At least one event is required".to_string(),
        });
    }
    if let Some(unknown) = events.iter().find(|e| !is_known_event(e)) {
        return Err(Error::BadRequest {
            message: format!("Invalid event type: {unknown}"),
        });
    }
    Ok(())
}

fn webhook_not_found(id: WebhookId) -> Error {
    Error::NotFound {
        resource: "Webhook".to_string(),
        id: id.to_string(),
    }
}

fn audit_entry(team_id: TeamId, action: &str, actor: CurrentUser, webhook: &Webhook, client: ClientInfo) -> AuditEntry {
    AuditEntry::builder()
        .team_id(team_id)
        .action(action)
        .category(AuditCategory::Settings)
        .actor(actor)
        .target_id(webhook.id.to_string())
        .target_type("webhook")
        .target_name(webhook.name.clone())
        .metadata(json!({ "url": webhook.url, "events": webhook.events }))
        .client(client)
        .build()
}

/// List all webhooks of a team.
#[utoipa::path(
    get,
    path = "/teams/{team_id}/webhooks",
    tag = "webhooks",
    summary = "List webhooks",
    description = "List all webhooks of a team. Secrets are never included.",
    params(("team_id" = uuid::Uuid, Path, description = "Team ID")),
    responses(
        (status = 200, description = "List of webhooks", body = [WebhookResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a member of this team"),
        (status = 429, description = "Too many requests"),
    )
)]
#[instrument(skip_all)]
pub async fn list_webhooks(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    current_user: CurrentUser,
) -> Result<Json<Vec<WebhookResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    require_membership(&mut conn, team_id, &current_user, Operation::Read, "webhooks").await?;

    let webhooks = Webhooks::new(&mut conn).list_by_team(team_id).await?;
    Ok(Json(webhooks.into_iter().map(WebhookResponse::from).collect()))
}

/// Create a new webhook.
#[utoipa::path(
    post,
    path = "/teams/{team_id}/webhooks",
    tag = "webhooks",
    summary = "Create webhook",
    description = "Create a webhook. The signing secret is generated when not supplied and is only returned here.",
    params(("team_id" = uuid::Uuid, Path, description = "Team ID")),
    request_body = WebhookCreate,
    responses(
        (status = 201, description = "Webhook created", body = WebhookWithSecretResponse),
        (status = 400, description = "Invalid URL or event list"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Requires OWNER or ADMIN"),
        (status = 429, description = "Too many requests"),
    )
)]
#[instrument(skip_all)]
pub async fn create_webhook(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    current_user: CurrentUser,
    client: ClientInfo,
    Json(request): Json<WebhookCreate>,
) -> Result<(StatusCode, Json<WebhookWithSecretResponse>)> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    require_team_role(&mut conn, team_id, &current_user, TeamRole::Admin, Operation::Create, "webhooks").await?;

    validate_url(&request.url)?;
    validate_events(&request.events)?;

    let secret = request
        .secret
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(signing::generate_secret);
    let name = request
        .name
        .or_else(|| request.description.clone())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| request.url.clone());

    let webhook = Webhooks::new(&mut conn)
        .create(&WebhookCreateDBRequest {
            team_id,
            name,
            url: request.url,
            description: request.description,
            events: request.events,
            secret,
        })
        .await?;
    drop(conn);

    state
        .audit()
        .log(audit_entry(team_id, "webhook.created", current_user, &webhook, client))
        .await;

    Ok((StatusCode::CREATED, Json(webhook.into())))
}

/// Get a specific webhook.
#[utoipa::path(
    get,
    path = "/teams/{team_id}/webhooks/{webhook_id}",
    tag = "webhooks",
    summary = "Get webhook",
    description = "Get a specific webhook. Secret is not included in the response.",
    params(
        ("team_id" = uuid::Uuid, Path, description = "Team ID"),
        ("webhook_id" = uuid::Uuid, Path, description = "Webhook ID"),
    ),
    responses(
        (status = 200, description = "Webhook details", body = WebhookResponse),
        (status = 403, description = "Not a member of this team"),
        (status = 404, description = "Webhook not found"),
        (status = 429, description = "Too many requests"),
    )
)]
#[instrument(skip_all)]
pub async fn get_webhook(
    State(state): State<AppState>,
    Path((team_id, webhook_id)): Path<(TeamId, WebhookId)>,
    current_user: CurrentUser,
) -> Result<Json<WebhookResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    require_membership(&mut conn, team_id, &current_user, Operation::Read, "webhooks").await?;

    let webhook = Webhooks::new(&mut conn)
        .get(team_id, webhook_id)
        .await?
        .ok_or_else(|| webhook_not_found(webhook_id))?;
    Ok(Json(webhook.into()))
}

/// Update a webhook.
#[utoipa::path(
    patch,
    path = "/teams/{team_id}/webhooks/{webhook_id}",
    tag = "webhooks",
    summary = "Update webhook",
    params(
        ("team_id" = uuid::Uuid, Path, description = "Team ID"),
        ("webhook_id" = uuid::Uuid, Path, description = "Webhook ID"),
    ),
    request_body = WebhookUpdate,
    responses(
        (status = 200, description = "Webhook updated", body = WebhookResponse),
        (status = 400, description = "Invalid URL or event list"),
        (status = 403, description = "Requires OWNER or ADMIN"),
        (status = 404, description = "Webhook not found"),
        (status = 429, description = "Too many requests"),
    )
)]
#[instrument(skip_all)]
pub async fn update_webhook(
    State(state): State<AppState>,
    Path((team_id, webhook_id)): Path<(TeamId, WebhookId)>,
    current_user: CurrentUser,
    client: ClientInfo,
    Json(request): Json<WebhookUpdate>,
) -> Result<Json<WebhookResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    require_team_role(&mut conn, team_id, &current_user, TeamRole::Admin, Operation::Update, "webhooks").await?;

    if let Some(url) = &request.url {
        validate_url(url)?;
    }
    if let Some(events) = &request.events {
        validate_events(events)?;
    }

    let webhook = Webhooks::new(&mut conn)
        .update(
            team_id,
            webhook_id,
            &WebhookUpdateDBRequest {
                name: request.name.filter(|n| !n.trim().is_empty()),
                url: request.url,
                description: request.description,
                events: request.events,
                is_active: request.is_active,
            },
        )
        .await?
        .ok_or_else(|| webhook_not_found(webhook_id))?;
    drop(conn);

    state
        .audit()
        .log(audit_entry(team_id, "webhook.updated", current_user, &webhook, client))
        .await;

    Ok(Json(webhook.into()))
}

/// Delete a webhook.
#[utoipa::path(
    delete,
    path = "/teams/{team_id}/webhooks/{webhook_id}",
    tag = "webhooks",
    summary = "Delete webhook",
    params(
        ("team_id" = uuid::Uuid, Path, description = "Team ID"),
        ("webhook_id" = uuid::Uuid, Path, description = "Webhook ID"),
    ),
    responses(
        (status = 204, description = "Webhook deleted"),
        (status = 403, description = "Requires OWNER or ADMIN"),
        (status = 404, description = "Webhook not found"),
        (status = 429, description = "Too many requests"),
    )
)]
#[instrument(skip_all)]
pub async fn delete_webhook(
    State(state): State<AppState>,
    Path((team_id, webhook_id)): Path<(TeamId, WebhookId)>,
    current_user: CurrentUser,
    client: ClientInfo,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    require_team_role(&mut conn, team_id, &current_user, TeamRole::Admin, Operation::Delete, "webhooks").await?;

    let mut repo = Webhooks::new(&mut conn);
    let webhook = repo.get(team_id, webhook_id).await?.ok_or_else(|| webhook_not_found(webhook_id))?;
    repo.delete(team_id, webhook_id).await?;
    drop(conn);

    state
        .audit()
        .log(audit_entry(team_id, "webhook.deleted", current_user, &webhook, client))
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Delivery log of a webhook, ten per page, newest first.
#[utoipa::path(
    get,
    path = "/teams/{team_id}/webhooks/{webhook_id}/deliveries",
    tag = "webhooks",
    summary = "List deliveries",
    params(
        ("team_id" = uuid::Uuid, Path, description = "Team ID"),
        ("webhook_id" = uuid::Uuid, Path, description = "Webhook ID"),
        ("page" = Option<i64>, Query, description = "Page number, starting at 1"),
    ),
    responses(
        (status = 200, description = "One page of deliveries", body = DeliveryPage),
        (status = 403, description = "Not a member of this team"),
        (status = 404, description = "Webhook not found"),
        (status = 429, description = "Too many requests"),
    )
)]
#[instrument(skip_all)]
pub async fn list_deliveries(
    State(state): State<AppState>,
    Path((team_id, webhook_id)): Path<(TeamId, WebhookId)>,
    Query(query): Query<PageParams>,
    current_user: CurrentUser,
) -> Result<Json<DeliveryPage>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    require_membership(&mut conn, team_id, &current_user, Operation::Read, "webhook deliveries").await?;

    let mut repo = Webhooks::new(&mut conn);
    repo.get(team_id, webhook_id).await?.ok_or_else(|| webhook_not_found(webhook_id))?;

    // Fixed page size; only the page number is client controlled
    let params = PageParams::new(query.page, None);
    let total = repo.count_deliveries(webhook_id).await?;
    let deliveries = repo.list_deliveries(webhook_id, params.limit(), params.offset()).await?;

    Ok(Json(DeliveryPage {
        deliveries: deliveries.into_iter().map(DeliveryResponse::from).collect(),
        pagination: PaginationInfo::new(total, &params),
    }))
}

/// Send a test event to a webhook.
#[utoipa::path(
    post,
    path = "/teams/{team_id}/webhooks/{webhook_id}/test",
    tag = "webhooks",
    summary = "Test webhook",
    description = "Deliver a `webhook.test` event to this webhook, whatever it subscribes to, and return the outcome.",
    params(
        ("team_id" = uuid::Uuid, Path, description = "Team ID"),
        ("webhook_id" = uuid::Uuid, Path, description = "Webhook ID"),
    ),
    responses(
        (status = 200, description = "Delivery outcome", body = DeliveryOutcome),
        (status = 403, description = "Requires OWNER or ADMIN"),
        (status = 404, description = "Webhook not found"),
        (status = 429, description = "Too many requests"),
    )
)]
#[instrument(skip_all)]
pub async fn test_webhook(
    State(state): State<AppState>,
    Path((team_id, webhook_id)): Path<(TeamId, WebhookId)>,
    current_user: CurrentUser,
) -> Result<Json<DeliveryOutcome>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    require_team_role(&mut conn, team_id, &current_user, TeamRole::Admin, Operation::Update, "webhooks").await?;

    let webhook = Webhooks::new(&mut conn)
        .get(team_id, webhook_id)
        .await?
        .ok_or_else(|| webhook_not_found(webhook_id))?;
    drop(conn);

    let outcome = state
        .webhooks
        .send_to(
            &webhook,
            WebhookEvent::Test,
            json!({ "message": "This is a test webhook delivery", "webhookId": webhook.id }),
        )
        .await?;

    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{add_member, create_test_app, create_test_app_with_config, create_test_config, create_test_team, create_test_user, login};
    use serde_json::Value;
    use sqlx::PgPool;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, header_exists, method, path},
    };

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_validates_and_returns_secret_once(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let owner = create_test_user(&pool, "owner@example.com").await;
        let team = create_test_team(&pool, &owner, "Acme").await;
        let (_, cookie) = login(&state, &owner).await;
        let base = format!("/api/teams/{}/webhooks", team.id);

        let response = server
            .post(&base)
            .add_header("cookie", cookie.clone())
            .json(&json!({"url": "ftp://example.com/hook", "events": ["team.updated"]}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let response = server
            .post(&base)
            .add_header("cookie", cookie.clone())
            .json(&json!({"url": "https://example.com/hook", "events": []}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let response = server
            .post(&base)
            .add_header("cookie", cookie.clone())
            .json(&json!({"url": "https://example.com/hook", "events": ["team.exploded"]}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "Invalid event type: team.exploded");

        let response = server
            .post(&base)
            .add_header("cookie", cookie.clone())
            .json(&json!({"url": "https://example.com/hook", "events": ["team.updated"], "description": "CI hook"}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: Value = response.json();
        assert_eq!(created["name"], "CI hook");
        assert_eq!(created["secret"].as_str().unwrap().len(), 64);

        let fetched: Value = server
            .get(&format!("{base}/{}", created["id"].as_str().unwrap()))
            .add_header("cookie", cookie)
            .await
            .json();
        assert!(fetched.get("secret").is_none());
        assert_eq!(fetched["isActive"], true);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_members_can_read_but_not_write(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let owner = create_test_user(&pool, "owner@example.com").await;
        let member = create_test_user(&pool, "member@example.com").await;
        let team = create_test_team(&pool, &owner, "Acme").await;
        add_member(&pool, team.id, &member, TeamRole::Member).await;
        let (_, cookie) = login(&state, &member).await;
        let base = format!("/api/teams/{}/webhooks", team.id);

        server.get(&base).add_header("cookie", cookie.clone()).await.assert_status_ok();
        server
            .post(&base)
            .add_header("cookie", cookie)
            .json(&json!({"url": "https://example.com/hook", "events": ["team.updated"]}))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_toggle_and_delete(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let owner = create_test_user(&pool, "owner@example.com").await;
        let team = create_test_team(&pool, &owner, "Acme").await;
        let (_, cookie) = login(&state, &owner).await;
        let base = format!("/api/teams/{}/webhooks", team.id);

        let created: WebhookWithSecretResponse = server
            .post(&base)
            .add_header("cookie", cookie.clone())
            .json(&json!({"url": "https://example.com/hook", "events": ["team.updated"], "description": "old"}))
            .await
            .json();
        let url = format!("{base}/{}", created.webhook.id);

        let updated: WebhookResponse = server
            .patch(&url)
            .add_header("cookie", cookie.clone())
            .json(&json!({"isActive": false, "events": ["member.added", "member.removed"], "description": null}))
            .await
            .json();
        assert!(!updated.is_active);
        assert_eq!(updated.events, vec!["member.added", "member.removed"]);
        assert_eq!(updated.description, None);
        assert_eq!(updated.url, "https://example.com/hook");

        server.delete(&url).add_header("cookie", cookie.clone()).await.assert_status(StatusCode::NO_CONTENT);
        server.get(&url).add_header("cookie", cookie).await.assert_status(StatusCode::NOT_FOUND);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_test_delivery_is_logged(pool: PgPool) {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-event-type", "webhook.test"))
            .and(header_exists("x-webhook-signature"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&mock)
            .await;

        let (server, state) = create_test_app(pool.clone());
        let owner = create_test_user(&pool, "owner@example.com").await;
        let team = create_test_team(&pool, &owner, "Acme").await;
        let (_, cookie) = login(&state, &owner).await;
        let base = format!("/api/teams/{}/webhooks", team.id);

        // Subscribed to something else; the test ping is sent anyway
        let created: WebhookWithSecretResponse = server
            .post(&base)
            .add_header("cookie", cookie.clone())
            .json(&json!({"url": format!("{}/hook", mock.uri()), "events": ["team.deleted"]}))
            .await
            .json();
        let url = format!("{base}/{}", created.webhook.id);

        let outcome: DeliveryOutcome = server.post(&format!("{url}/test")).add_header("cookie", cookie.clone()).await.json();
        assert!(outcome.success);
        assert_eq!(outcome.status, 200);

        let page: DeliveryPage = server
            .get(&format!("{url}/deliveries"))
            .add_header("cookie", cookie)
            .await
            .json();
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.pagination.limit, 10);
        assert_eq!(page.deliveries[0].event_type, "webhook.test");
        assert_eq!(page.deliveries[0].response_body.as_deref(), Some("ok"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_management_routes_are_rate_limited(pool: PgPool) {
        let mut config = create_test_config();
        config.rate_limit.max_requests = 2;
        let (server, state) = create_test_app_with_config(pool.clone(), config);
        let owner = create_test_user(&pool, "owner@example.com").await;
        let team = create_test_team(&pool, &owner, "Acme").await;
        let (_, cookie) = login(&state, &owner).await;
        let base = format!("/api/teams/{}/webhooks", team.id);

        // Forwarded addresses are not trusted, so rotating them does not buy a fresh budget
        for (forwarded_for, remaining) in [("198.51.100.1", "1"), ("198.51.100.2", "0")] {
            let response = server
                .get(&base)
                .add_header("cookie", cookie.clone())
                .add_header("x-forwarded-for", forwarded_for)
                .await;
            response.assert_status_ok();
            assert_eq!(response.header("x-ratelimit-remaining"), remaining);
        }

        let response = server
            .get(&base)
            .add_header("cookie", cookie.clone())
            .add_header("x-forwarded-for", "198.51.100.3")
            .await;
        response.assert_status(StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.header("x-ratelimit-limit"), "2");
        let body: Value = response.json();
        assert_eq!(body["error"], "Too many requests");

        // Other routes are not limited
        server.get("/api/teams").add_header("cookie", cookie).await.assert_status_ok();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_rate_limit_buckets_by_forwarded_client_behind_trusted_proxy(pool: PgPool) {
        let mut config = create_test_config();
        config.rate_limit.max_requests = 1;
        config.trust_proxy_headers = true;
        let (server, state) = create_test_app_with_config(pool.clone(), config);
        let owner = create_test_user(&pool, "owner@example.com").await;
        let team = create_test_team(&pool, &owner, "Acme").await;
        let (_, cookie) = login(&state, &owner).await;
        let base = format!("/api/teams/{}/webhooks", team.id);

        let get = |forwarded_for: &'static str| {
            server
                .get(&base)
                .add_header("cookie", cookie.clone())
                .add_header("x-forwarded-for", forwarded_for)
        };

        get("198.51.100.4").await.assert_status_ok();
        get("198.51.100.4").await.assert_status(StatusCode::TOO_MANY_REQUESTS);
        get("198.51.100.5").await.assert_status_ok();
    }
}
