//! Team CRUD.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::json;

use crate::{
    AppState,
    api::models::{
        teams::{MemberCountResponse, TeamCreate, TeamResponse, TeamUpdate},
        users::CurrentUser,
    },
    audit::AuditEntry,
    auth::permissions::{require_membership, require_team_role},
    db::{
        errors::DbError,
        handlers::{Members, Teams},
        models::{
            audit_logs::AuditCategory,
            teams::{TeamCreateDBRequest, TeamUpdateDBRequest},
        },
    },
    errors::{Error, Result},
    request_context::ClientInfo,
    types::{Operation, TeamId, TeamRole},
    webhooks::WebhookEvent,
};

/// URL-safe slug: lowercase, runs of anything non-alphanumeric become one `-`, no leading or
/// trailing `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    slug
}

fn normalize_domain(domain: Option<String>) -> Option<String> {
    domain.map(|d| d.trim().to_lowercase()).filter(|d| !d.is_empty())
}

fn domain_in_use() -> Error {
    Error::BadRequest {
        message: "Domain is already in use".to_string(),
    }
}

/// The domain check runs before the write, so a concurrent request can still claim the domain first.
fn domain_conflict(err: DbError) -> Error {
    if err.is_unique_violation_on("teams_domain_unique") {
        domain_in_use()
    } else {
        Error::Database(err)
    }
}

fn team_not_found(team_id: TeamId) -> Error {
    Error::NotFound {
        resource: "Team".to_string(),
        id: team_id.to_string(),
    }
}

/// Teams the caller belongs to
#[utoipa::path(
    get,
    path = "/teams",
    tag = "teams",
    summary = "List teams",
    responses(
        (status = 200, description = "Teams of the current user with their members", body = [TeamResponse]),
        (status = 401, description = "Unauthorized"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_teams(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Vec<TeamResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let teams = Teams::new(&mut conn).list_for_user(current_user.id).await?;

    let mut response = Vec::with_capacity(teams.len());
    for team in teams {
        let members = Members::new(&mut conn).list(team.id).await?;
        response.push(TeamResponse::new(team, members));
    }

    Ok(Json(response))
}

/// Create a team owned by the caller
#[utoipa::path(
    post,
    path = "/teams",
    request_body = TeamCreate,
    tag = "teams",
    summary = "Create team",
    responses(
        (status = 201, description = "Team created", body = TeamResponse),
        (status = 400, description = "Missing name or domain already in use"),
        (status = 401, description = "Unauthorized"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_team(
    State(state): State<AppState>,
    current_user: CurrentUser,
    client: ClientInfo,
    Json(request): Json<TeamCreate>,
) -> Result<(StatusCode, Json<TeamResponse>)> {
    let name = request.name.trim().to_string();
    let base_slug = slugify(&name);
    if base_slug.is_empty() {
        return Err(Error::BadRequest {
            message: "Team name is required".to_string(),
        });
    }
    let domain = normalize_domain(request.domain);

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut teams = Teams::new(&mut tx);

    if let Some(domain) = &domain
        && teams.domain_taken(domain, None).await?
    {
        return Err(domain_in_use());
    }

    let mut slug = base_slug.clone();
    let mut suffix = 1;
    while teams.slug_exists(&slug).await? {
        slug = format!("{base_slug}-{suffix}");
        suffix += 1;
    }

    let team = teams
        .create(&TeamCreateDBRequest {
            name,
            slug,
            domain,
            created_by: current_user.id,
        })
        .await
        .map_err(domain_conflict)?;
    let owner = Members::new(&mut tx).add(team.id, current_user.id, TeamRole::Owner).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    state
        .audit()
        .log(
            AuditEntry::builder()
                .team_id(team.id)
                .action("team.created")
                .category(AuditCategory::Team)
                .actor(current_user.clone())
                .target_id(team.id.to_string())
                .target_type("team")
                .target_name(team.name.clone())
                .client(client)
                .build(),
        )
        .await;
    state
        .webhooks
        .notify(
            team.id,
            WebhookEvent::TeamCreated,
            json!({ "teamId": team.id, "name": team.name, "slug": team.slug }),
        )
        .await;

    Ok((StatusCode::CREATED, Json(TeamResponse::new(team, vec![owner]))))
}

/// Memberships across every team the caller created
#[utoipa::path(
    get,
    path = "/teams/members/count",
    tag = "teams",
    summary = "Count members",
    responses(
        (status = 200, description = "Member count", body = MemberCountResponse),
        (status = 401, description = "Unauthorized"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn count_members(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<MemberCountResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let count = Teams::new(&mut conn).count_members_of_teams_created_by(current_user.id).await?;
    Ok(Json(MemberCountResponse { count }))
}

/// A team the caller belongs to
#[utoipa::path(
    get,
    path = "/teams/{team_id}",
    tag = "teams",
    summary = "Get team",
    params(("team_id" = uuid::Uuid, Path, description = "Team ID")),
    responses(
        (status = 200, description = "Team with members", body = TeamResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a member of this team"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_team(State(state): State<AppState>, Path(team_id): Path<TeamId>, current_user: CurrentUser) -> Result<Json<TeamResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    require_membership(&mut conn, team_id, &current_user, Operation::Read, "team").await?;

    let team = Teams::new(&mut conn).get_by_id(team_id).await?.ok_or_else(|| team_not_found(team_id))?;
    let members = Members::new(&mut conn).list(team_id).await?;

    Ok(Json(TeamResponse::new(team, members)))
}

/// Rename a team or change its domain
#[utoipa::path(
    patch,
    path = "/teams/{team_id}",
    request_body = TeamUpdate,
    tag = "teams",
    summary = "Update team",
    params(("team_id" = uuid::Uuid, Path, description = "Team ID")),
    responses(
        (status = 200, description = "Updated team", body = TeamResponse),
        (status = 400, description = "Invalid name or domain already in use"),
        (status = 403, description = "Requires OWNER or ADMIN"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn update_team(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    current_user: CurrentUser,
    client: ClientInfo,
    Json(request): Json<TeamUpdate>,
) -> Result<Json<TeamResponse>> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    require_team_role(&mut tx, team_id, &current_user, TeamRole::Admin, Operation::Update, "team").await?;

    let name = match request.name.map(|n| n.trim().to_string()) {
        Some(n) if n.is_empty() => {
            return Err(Error::BadRequest {
                message: "Team name cannot be empty".to_string(),
            });
        }
        other => other,
    };
    let domain = request.domain.map(normalize_domain);

    let mut teams = Teams::new(&mut tx);
    if let Some(Some(domain)) = &domain
        && teams.domain_taken(domain, Some(team_id)).await?
    {
        return Err(domain_in_use());
    }

    let team = teams
        .update(team_id, &TeamUpdateDBRequest { name, domain })
        .await
        .map_err(domain_conflict)?
        .ok_or_else(|| team_not_found(team_id))?;
    let members = Members::new(&mut tx).list(team_id).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    state
        .audit()
        .log(
            AuditEntry::builder()
                .team_id(team_id)
                .action("team.updated")
                .category(AuditCategory::Settings)
                .actor(current_user)
                .target_id(team_id.to_string())
                .target_type("team")
                .target_name(team.name.clone())
                .metadata(json!({ "name": team.name, "domain": team.domain }))
                .client(client)
                .build(),
        )
        .await;
    state
        .webhooks
        .notify(
            team_id,
            WebhookEvent::TeamUpdated,
            json!({ "teamId": team_id, "name": team.name, "domain": team.domain }),
        )
        .await;

    Ok(Json(TeamResponse::new(team, members)))
}

/// Delete a team and everything that belongs to it
#[utoipa::path(
    delete,
    path = "/teams/{team_id}",
    tag = "teams",
    summary = "Delete team",
    params(("team_id" = uuid::Uuid, Path, description = "Team ID")),
    responses(
        (status = 204, description = "Team deleted"),
        (status = 403, description = "Only team owners can delete teams"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn delete_team(State(state): State<AppState>, Path(team_id): Path<TeamId>, current_user: CurrentUser) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let member = Members::new(&mut conn).get_by_user(team_id, current_user.id).await?;
    if !matches!(member, Some(m) if m.role == TeamRole::Owner) {
        return Err(Error::Forbidden {
            message: "Only team owners can delete teams".to_string(),
        });
    }

    // Webhooks go with the team, so deliver before deleting
    state
        .webhooks
        .notify(team_id, WebhookEvent::TeamDeleted, json!({ "teamId": team_id }))
        .await;

    if !Teams::new(&mut conn).delete(team_id).await? {
        return Err(team_not_found(team_id));
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{add_member, create_test_app, create_test_team, create_test_user, login};
    use serde_json::Value;
    use sqlx::PgPool;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Acme Inc."), "acme-inc");
        assert_eq!(slugify("  --Hello,   World!-- "), "hello-world");
        assert_eq!(slugify("Ünïcode Team"), "n-code-team");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_domain_race_reports_domain_in_use() {
        let lost_race = DbError::UniqueViolation {
            constraint: Some("teams_domain_unique".to_string()),
            table: Some("teams".to_string()),
            message: "duplicate key value violates unique constraint".to_string(),
        };
        let err = domain_conflict(lost_race);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.user_message(), "Domain is already in use");

        let other = DbError::UniqueViolation {
            constraint: Some("teams_slug_unique".to_string()),
            table: Some("teams".to_string()),
            message: "duplicate key value violates unique constraint".to_string(),
        };
        assert_eq!(domain_conflict(other).status_code(), StatusCode::CONFLICT);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_team_makes_creator_owner(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let user = create_test_user(&pool, "owner@example.com").await;
        let (_, cookie) = login(&state, &user).await;

        let response = server
            .post("/api/teams")
            .add_header("cookie", cookie.clone())
            .json(&json!({"name": "Acme Inc", "domain": "Acme.com"}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let team: TeamResponse = response.json();
        assert_eq!(team.slug, "acme-inc");
        assert_eq!(team.domain.as_deref(), Some("acme.com"));
        assert_eq!(team.members.len(), 1);
        assert_eq!(team.members[0].role, TeamRole::Owner);

        // Same name gets a suffixed slug
        let response = server
            .post("/api/teams")
            .add_header("cookie", cookie.clone())
            .json(&json!({"name": "Acme Inc"}))
            .await;
        let second: TeamResponse = response.json();
        assert_eq!(second.slug, "acme-inc-1");

        // Domains are unique
        let response = server
            .post("/api/teams")
            .add_header("cookie", cookie.clone())
            .json(&json!({"name": "Other", "domain": "acme.com"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "Domain is already in use");

        let teams: Vec<TeamResponse> = server.get("/api/teams").add_header("cookie", cookie).await.json();
        assert_eq!(teams.len(), 2);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unauthenticated_requests_are_rejected(pool: PgPool) {
        let (server, _) = create_test_app(pool);
        let response = server.get("/api/teams").await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        let body: Value = response.json();
        assert_eq!(body["error"], "Unauthorized");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_get_and_update_require_roles(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let owner = create_test_user(&pool, "owner@example.com").await;
        let member = create_test_user(&pool, "member@example.com").await;
        let outsider = create_test_user(&pool, "outsider@example.com").await;
        let team = create_test_team(&pool, &owner, "Acme").await;
        add_member(&pool, team.id, &member, TeamRole::Member).await;

        let (_, member_cookie) = login(&state, &member).await;
        let (_, outsider_cookie) = login(&state, &outsider).await;
        let (_, owner_cookie) = login(&state, &owner).await;

        server
            .get(&format!("/api/teams/{}", team.id))
            .add_header("cookie", member_cookie.clone())
            .await
            .assert_status_ok();
        server
            .get(&format!("/api/teams/{}", team.id))
            .add_header("cookie", outsider_cookie)
            .await
            .assert_status(StatusCode::FORBIDDEN);

        server
            .patch(&format!("/api/teams/{}", team.id))
            .add_header("cookie", member_cookie)
            .json(&json!({"name": "Renamed"}))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let response = server
            .patch(&format!("/api/teams/{}", team.id))
            .add_header("cookie", owner_cookie.clone())
            .json(&json!({"name": "Renamed", "domain": "acme.io"}))
            .await;
        response.assert_status_ok();
        let updated: TeamResponse = response.json();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.slug, "acme");
        assert_eq!(updated.domain.as_deref(), Some("acme.io"));

        // Explicit null clears the domain
        let updated: TeamResponse = server
            .patch(&format!("/api/teams/{}", team.id))
            .add_header("cookie", owner_cookie)
            .json(&json!({"domain": null}))
            .await
            .json();
        assert_eq!(updated.domain, None);
        assert_eq!(updated.name, "Renamed");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_only_owner_can_delete(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let owner = create_test_user(&pool, "owner@example.com").await;
        let admin = create_test_user(&pool, "admin@example.com").await;
        let team = create_test_team(&pool, &owner, "Acme").await;
        add_member(&pool, team.id, &admin, TeamRole::Admin).await;

        let (_, admin_cookie) = login(&state, &admin).await;
        let response = server
            .delete(&format!("/api/teams/{}", team.id))
            .add_header("cookie", admin_cookie)
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
        let body: Value = response.json();
        assert_eq!(body["error"], "Only team owners can delete teams");

        let (_, owner_cookie) = login(&state, &owner).await;
        server
            .delete(&format!("/api/teams/{}", team.id))
            .add_header("cookie", owner_cookie)
            .await
            .assert_status(StatusCode::NO_CONTENT);

        let mut conn = pool.acquire().await.unwrap();
        assert!(Teams::new(&mut conn).get_by_id(team.id).await.unwrap().is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_count_members_across_created_teams(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let owner = create_test_user(&pool, "owner@example.com").await;
        let other = create_test_user(&pool, "other@example.com").await;
        let first = create_test_team(&pool, &owner, "First").await;
        create_test_team(&pool, &owner, "Second").await;
        add_member(&pool, first.id, &other, TeamRole::Member).await;

        let (_, cookie) = login(&state, &owner).await;
        let count: MemberCountResponse = server.get("/api/teams/members/count").add_header("cookie", cookie).await.json();
        assert_eq!(count.count, 3);
    }
}
