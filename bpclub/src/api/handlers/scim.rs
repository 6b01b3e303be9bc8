//! SCIM settings of a team and the SCIM 2.0 provisioning endpoints.
//!
//! Settings routes use the session cookie and require OWNER or ADMIN. The `/scim/v2.0/...`
//! routes are called by identity providers and authenticate with the team's SCIM bearer token.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    AppState,
    api::models::{
        identity::{ScimSettingsResponse, ScimSettingsUpdate},
        users::CurrentUser,
    },
    audit::AuditEntry,
    auth::permissions::require_team_role,
    crypto,
    db::{
        handlers::{ScimGroups, ScimUsers, Teams},
        models::{audit_logs::AuditCategory, teams::TeamDBResponse},
    },
    errors::{Error, Result},
    request_context::ClientInfo,
    scim::{GroupPayload, GroupResource, ListQuery, ListResponse, ResourceType, UserPayload, UserResource},
    types::{Operation, TeamId, TeamRole},
    webhooks::WebhookEvent,
};

async fn load_team(state: &AppState, team_id: TeamId, current_user: &CurrentUser, action: Operation) -> Result<TeamDBResponse> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    require_team_role(&mut conn, team_id, current_user, TeamRole::Admin, action, "SCIM settings").await?;

    Teams::new(&mut conn).get_by_id(team_id).await?.ok_or_else(|| Error::NotFound {
        resource: "Team".to_string(),
        id: team_id.to_string(),
    })
}

/// SCIM state and bearer token of a team
#[utoipa::path(
    get,
    path = "/teams/{team_id}/scim",
    tag = "identity",
    summary = "Get SCIM settings",
    params(("team_id" = uuid::Uuid, Path, description = "Team ID")),
    responses(
        (status = 200, description = "SCIM settings", body = ScimSettingsResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Requires OWNER or ADMIN"),
    )
)]
#[instrument(skip_all)]
pub async fn get_scim_settings(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    current_user: CurrentUser,
) -> Result<Json<ScimSettingsResponse>> {
    let team = load_team(&state, team_id, &current_user, Operation::Read).await?;
    Ok(Json(team.into()))
}

/// Enable or disable SCIM. Enabling generates a token if the team has none yet.
#[utoipa::path(
    post,
    path = "/teams/{team_id}/scim",
    tag = "identity",
    summary = "Update SCIM settings",
    params(("team_id" = uuid::Uuid, Path, description = "Team ID")),
    request_body = ScimSettingsUpdate,
    responses(
        (status = 200, description = "Updated SCIM settings", body = ScimSettingsResponse),
        (status = 400, description = "Enabled status is required"),
        (status = 403, description = "Requires OWNER or ADMIN"),
    )
)]
#[instrument(skip_all)]
pub async fn update_scim_settings(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    current_user: CurrentUser,
    client: ClientInfo,
    Json(request): Json<ScimSettingsUpdate>,
) -> Result<Json<ScimSettingsResponse>> {
    let enabled = request.enabled.ok_or_else(|| Error::BadRequest {
        message: "Enabled status is required".to_string(),
    })?;
    let team = load_team(&state, team_id, &current_user, Operation::Update).await?;

    let token = (enabled && team.scim_token.is_none()).then(crypto::generate_token);

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let team = Teams::new(&mut conn)
        .set_scim(team_id, enabled, token.as_deref())
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "Team".to_string(),
            id: team_id.to_string(),
        })?;
    drop(conn);

    let (action, event) = if enabled {
        ("scim.enabled", WebhookEvent::ScimEnabled)
    } else {
        ("scim.disabled", WebhookEvent::ScimDisabled)
    };

    state
        .audit()
        .log(
            AuditEntry::builder()
                .team_id(team_id)
                .action(action)
                .category(AuditCategory::Settings)
                .actor(current_user)
                .target_id(team_id.to_string())
                .target_type("team")
                .target_name(team.name.clone())
                .client(client)
                .build(),
        )
        .await;
    state.webhooks.notify(team_id, event, json!({ "teamId": team_id })).await;

    Ok(Json(team.into()))
}

/// Replace the SCIM bearer token; the old token stops working immediately
#[utoipa::path(
    post,
    path = "/teams/{team_id}/scim/token",
    tag = "identity",
    summary = "Regenerate SCIM token",
    params(("team_id" = uuid::Uuid, Path, description = "Team ID")),
    responses(
        (status = 200, description = "Settings with the new token", body = ScimSettingsResponse),
        (status = 400, description = "SCIM is not enabled for this team"),
        (status = 403, description = "Requires OWNER or ADMIN"),
    )
)]
#[instrument(skip_all)]
pub async fn regenerate_scim_token(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    current_user: CurrentUser,
    client: ClientInfo,
) -> Result<Json<ScimSettingsResponse>> {
    let team = load_team(&state, team_id, &current_user, Operation::Update).await?;
    if !team.scim_enabled {
        return Err(Error::BadRequest {
            message: "SCIM is not enabled for this team".to_string(),
        });
    }

    let token = crypto::generate_token();
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let team = Teams::new(&mut conn)
        .set_scim(team_id, true, Some(&token))
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "Team".to_string(),
            id: team_id.to_string(),
        })?;
    drop(conn);

    state
        .audit()
        .log(
            AuditEntry::builder()
                .team_id(team_id)
                .action("scim.token_regenerated")
                .category(AuditCategory::Settings)
                .actor(current_user)
                .target_id(team_id.to_string())
                .target_type("team")
                .target_name(team.name.clone())
                .client(client)
                .build(),
        )
        .await;

    Ok(Json(team.into()))
}

/// Resolve the bearer token of a provisioning request to a team with SCIM enabled.
async fn scim_team(state: &AppState, headers: &HeaderMap) -> Result<TeamDBResponse> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(Error::Unauthenticated { message: None })?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    Teams::new(&mut conn)
        .get_by_scim_token(token)
        .await?
        .ok_or(Error::Unauthenticated { message: None })
}

/// `Users`, `Users/{id}`, `Groups` or `Groups/{id}`.
fn parse_path(path: &str) -> Result<(ResourceType, Option<&str>)> {
    let mut segments = path.trim_matches('/').splitn(2, '/');
    let resource = segments
        .next()
        .and_then(ResourceType::parse)
        .ok_or_else(|| Error::NotFoundMessage {
            message: "Resource type not found".to_string(),
        })?;
    let id = segments.next().map(|s| s.trim_end_matches('/')).filter(|s| !s.is_empty());
    Ok((resource, id))
}

fn require_id(id: Option<&str>) -> Result<Uuid> {
    let id = id.ok_or_else(|| Error::BadRequest {
        message: "Resource ID is required".to_string(),
    })?;
    id.parse().map_err(|_| resource_not_found(id))
}

fn resource_not_found(id: &str) -> Error {
    Error::NotFound {
        resource: "Resource".to_string(),
        id: id.to_string(),
    }
}

fn scim_audit(team: &TeamDBResponse, action: &str, target_type: &str, target_id: Uuid, target_name: &str, client: ClientInfo) -> AuditEntry {
    AuditEntry::builder()
        .team_id(team.id)
        .action(action)
        .category(AuditCategory::Team)
        .target_id(target_id.to_string())
        .target_type(target_type)
        .target_name(target_name)
        .metadata(json!({ "source": "scim" }))
        .client(client)
        .build()
}

async fn record_change(state: &AppState, entry: AuditEntry, event: WebhookEvent, data: Value) {
    let team_id = entry.team_id;
    state.audit().log(entry).await;
    state.webhooks.notify(team_id, event, data).await;
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &Value) -> Result<T> {
    serde_json::from_value(body.clone()).map_err(|e| Error::BadRequest {
        message: format!("Invalid SCIM resource: {e}"),
    })
}

/// List or read SCIM users and groups
#[instrument(skip_all, fields(path = %path))]
pub async fn scim_get(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let team = scim_team(&state, &headers).await?;
    let (resource, id) = parse_path(&path)?;
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let body = match (resource, id) {
        (ResourceType::Users, Some(id)) => {
            let uuid = id.parse().map_err(|_| resource_not_found(id))?;
            let user = ScimUsers::new(&mut conn)
                .get(team.id, uuid)
                .await?
                .ok_or_else(|| resource_not_found(id))?;
            json!(UserResource::from(user))
        }
        (ResourceType::Users, None) => {
            let filter = query.filter_value(resource)?;
            let (users, total) = ScimUsers::new(&mut conn)
                .list(team.id, filter.as_deref(), query.count(), query.offset())
                .await?;
            let resources = users.into_iter().map(UserResource::from).collect();
            json!(ListResponse::<UserResource>::new(resources, total, &query))
        }
        (ResourceType::Groups, Some(id)) => {
            let uuid = id.parse().map_err(|_| resource_not_found(id))?;
            let mut repo = ScimGroups::new(&mut conn);
            let group = repo.get(team.id, uuid).await?.ok_or_else(|| resource_not_found(id))?;
            let members = repo.members(group.id).await?;
            json!(GroupResource::new(group, members))
        }
        (ResourceType::Groups, None) => {
            let filter = query.filter_value(resource)?;
            let mut repo = ScimGroups::new(&mut conn);
            let (groups, total) = repo.list(team.id, filter.as_deref(), query.count(), query.offset()).await?;
            let mut resources = Vec::with_capacity(groups.len());
            for group in groups {
                let members = repo.members(group.id).await?;
                resources.push(GroupResource::new(group, members));
            }
            json!(ListResponse::new(resources, total, &query))
        }
    };

    Ok(Json(body).into_response())
}

/// Provision a SCIM user or group
#[instrument(skip_all, fields(path = %path))]
pub async fn scim_post(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    client: ClientInfo,
    Json(body): Json<Value>,
) -> Result<Response> {
    let team = scim_team(&state, &headers).await?;
    let (resource, _) = parse_path(&path)?;
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let created = match resource {
        ResourceType::Users => {
            let write = parse_body::<UserPayload>(&body)?.into_write(body)?;
            let user = ScimUsers::new(&mut conn).create(team.id, &write).await?;
            drop(conn);
            debug!(user_name = %user.user_name, "Provisioned SCIM user");

            record_change(
                &state,
                scim_audit(&team, "scim.user.created", "scim_user", user.id, &user.user_name, client),
                WebhookEvent::ScimUserCreated,
                json!({ "id": user.id, "userName": user.user_name }),
            )
            .await;
            json!(UserResource::from(user))
        }
        ResourceType::Groups => {
            let write = parse_body::<GroupPayload>(&body)?.into_write(body)?;
            let mut repo = ScimGroups::new(&mut conn);
            let group = repo.create(team.id, &write).await?;
            let members = repo.members(group.id).await?;
            drop(conn);

            record_change(
                &state,
                scim_audit(&team, "scim.group.created", "scim_group", group.id, &group.display_name, client),
                WebhookEvent::ScimGroupCreated,
                json!({ "id": group.id, "displayName": group.display_name }),
            )
            .await;
            json!(GroupResource::new(group, members))
        }
    };

    Ok((StatusCode::CREATED, Json(created)).into_response())
}

/// Replace a SCIM user or group
#[instrument(skip_all, fields(path = %path))]
pub async fn scim_put(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    client: ClientInfo,
    Json(body): Json<Value>,
) -> Result<Response> {
    let team = scim_team(&state, &headers).await?;
    let (resource, id) = parse_path(&path)?;
    let id = require_id(id)?;
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let replaced = match resource {
        ResourceType::Users => {
            let write = parse_body::<UserPayload>(&body)?.into_write(body)?;
            let user = ScimUsers::new(&mut conn)
                .replace(team.id, id, &write)
                .await?
                .ok_or_else(|| resource_not_found(&id.to_string()))?;
            drop(conn);

            record_change(
                &state,
                scim_audit(&team, "scim.user.updated", "scim_user", user.id, &user.user_name, client),
                WebhookEvent::ScimUserUpdated,
                json!({ "id": user.id, "userName": user.user_name, "active": user.active }),
            )
            .await;
            json!(UserResource::from(user))
        }
        ResourceType::Groups => {
            let write = parse_body::<GroupPayload>(&body)?.into_write(body)?;
            let mut repo = ScimGroups::new(&mut conn);
            let group = repo
                .replace(team.id, id, &write)
                .await?
                .ok_or_else(|| resource_not_found(&id.to_string()))?;
            let members = repo.members(group.id).await?;
            drop(conn);

            record_change(
                &state,
                scim_audit(&team, "scim.group.updated", "scim_group", group.id, &group.display_name, client),
                WebhookEvent::ScimGroupUpdated,
                json!({ "id": group.id, "displayName": group.display_name }),
            )
            .await;
            json!(GroupResource::new(group, members))
        }
    };

    Ok(Json(replaced).into_response())
}

/// Partial updates are not supported; clients fall back to PUT
#[instrument(skip_all, fields(path = %path))]
pub async fn scim_patch(State(state): State<AppState>, Path(path): Path<String>, headers: HeaderMap) -> Result<Response> {
    scim_team(&state, &headers).await?;
    let (_, id) = parse_path(&path)?;
    require_id(id)?;

    Err(Error::NotImplemented {
        message: "PATCH not implemented".to_string(),
    })
}

/// Deprovision a SCIM user or group
#[instrument(skip_all, fields(path = %path))]
pub async fn scim_delete(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    client: ClientInfo,
) -> Result<StatusCode> {
    let team = scim_team(&state, &headers).await?;
    let (resource, id) = parse_path(&path)?;
    let id = require_id(id)?;
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    match resource {
        ResourceType::Users => {
            let mut repo = ScimUsers::new(&mut conn);
            let user = repo.get(team.id, id).await?.ok_or_else(|| resource_not_found(&id.to_string()))?;
            repo.delete(team.id, id).await?;
            drop(conn);

            record_change(
                &state,
                scim_audit(&team, "scim.user.deleted", "scim_user", user.id, &user.user_name, client),
                WebhookEvent::ScimUserDeleted,
                json!({ "id": user.id, "userName": user.user_name }),
            )
            .await;
        }
        ResourceType::Groups => {
            let mut repo = ScimGroups::new(&mut conn);
            let group = repo.get(team.id, id).await?.ok_or_else(|| resource_not_found(&id.to_string()))?;
            repo.delete(team.id, id).await?;
            drop(conn);

            record_change(
                &state,
                scim_audit(&team, "scim.group.deleted", "scim_group", group.id, &group.display_name, client),
                WebhookEvent::ScimGroupDeleted,
                json!({ "id": group.id, "displayName": group.display_name }),
            )
            .await;
        }
    }

    Ok(StatusCode::NO_CONTENT)
}
