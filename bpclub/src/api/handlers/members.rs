//! Team membership management.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::json;
use tracing::warn;

use crate::{
    AppState,
    api::models::{
        teams::{MemberCreate, MemberResponse, MemberUpdate},
        users::CurrentUser,
    },
    audit::AuditEntry,
    auth::permissions::{require_membership, require_team_role},
    billing,
    db::{
        handlers::{Members, Teams, Users},
        models::{audit_logs::AuditCategory, teams::TeamDBResponse},
    },
    errors::{Error, Result},
    request_context::ClientInfo,
    types::{MemberId, Operation, TeamId, TeamRole},
    webhooks::WebhookEvent,
};

fn member_not_found(id: MemberId) -> Error {
    Error::NotFound {
        resource: "Member".to_string(),
        id: id.to_string(),
    }
}

async fn load_team(state: &AppState, team_id: TeamId) -> Result<TeamDBResponse> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    Teams::new(&mut conn).get_by_id(team_id).await?.ok_or_else(|| Error::NotFound {
        resource: "Team".to_string(),
        id: team_id.to_string(),
    })
}

fn display_name(user: &CurrentUser) -> &str {
    user.name.as_deref().unwrap_or(&user.email)
}

/// Members of a team
#[utoipa::path(
    get,
    path = "/teams/{team_id}/members",
    tag = "members",
    summary = "List members",
    params(("team_id" = uuid::Uuid, Path, description = "Team ID")),
    responses(
        (status = 200, description = "Team members", body = [MemberResponse]),
        (status = 403, description = "Not a member of this team"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_members(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    current_user: CurrentUser,
) -> Result<Json<Vec<MemberResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    require_membership(&mut conn, team_id, &current_user, Operation::Read, "members").await?;

    let members = Members::new(&mut conn).list(team_id).await?;
    Ok(Json(members.into_iter().map(MemberResponse::from).collect()))
}

/// Add an existing user to a team
#[utoipa::path(
    post,
    path = "/teams/{team_id}/members",
    request_body = MemberCreate,
    tag = "members",
    summary = "Add member",
    params(("team_id" = uuid::Uuid, Path, description = "Team ID")),
    responses(
        (status = 201, description = "Member added", body = MemberResponse),
        (status = 400, description = "User is already a member of this team"),
        (status = 403, description = "Requires OWNER or ADMIN, or the plan's member limit is reached"),
        (status = 404, description = "User not found"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn add_member(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    current_user: CurrentUser,
    client: ClientInfo,
    Json(request): Json<MemberCreate>,
) -> Result<(StatusCode, Json<MemberResponse>)> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    require_team_role(&mut tx, team_id, &current_user, TeamRole::Admin, Operation::Create, "members").await?;

    let team = Teams::new(&mut tx).get_by_id(team_id).await?.ok_or_else(|| Error::NotFound {
        resource: "Team".to_string(),
        id: team_id.to_string(),
    })?;

    let user = Users::new(&mut tx)
        .get_user_by_email(request.email.trim())
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "User".to_string(),
            id: request.email.clone(),
        })?;

    if Members::new(&mut tx).get_by_user(team_id, user.id).await?.is_some() {
        return Err(Error::BadRequest {
            message: "User is already a member of this team".to_string(),
        });
    }

    let limit = billing::check_team_member_limit(&mut tx, &state.config.billing, team.created_by).await?;
    if !limit.allowed {
        return Err(Error::Forbidden {
            message: "Team member limit reached. Please upgrade your plan.".to_string(),
        });
    }

    let member = Members::new(&mut tx).add(team_id, user.id, request.role).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    state
        .audit()
        .log(
            AuditEntry::builder()
                .team_id(team_id)
                .action("member.added")
                .category(AuditCategory::Team)
                .actor(current_user)
                .target_id(user.id.to_string())
                .target_type("user")
                .target_name(user.email.clone())
                .metadata(json!({ "role": member.role }))
                .client(client)
                .build(),
        )
        .await;
    state
        .webhooks
        .notify(
            team_id,
            WebhookEvent::MemberAdded,
            json!({ "memberId": member.id, "userId": user.id, "email": user.email, "role": member.role }),
        )
        .await;

    Ok((StatusCode::CREATED, Json(MemberResponse::from(member))))
}

/// One member of a team
#[utoipa::path(
    get,
    path = "/teams/{team_id}/members/{member_id}",
    tag = "members",
    summary = "Get member",
    params(
        ("team_id" = uuid::Uuid, Path, description = "Team ID"),
        ("member_id" = uuid::Uuid, Path, description = "Member ID"),
    ),
    responses(
        (status = 200, description = "Member", body = MemberResponse),
        (status = 403, description = "Not a member of this team"),
        (status = 404, description = "Member not found"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_member(
    State(state): State<AppState>,
    Path((team_id, member_id)): Path<(TeamId, MemberId)>,
    current_user: CurrentUser,
) -> Result<Json<MemberResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    require_membership(&mut conn, team_id, &current_user, Operation::Read, "members").await?;

    let member = Members::new(&mut conn)
        .get(team_id, member_id)
        .await?
        .ok_or_else(|| member_not_found(member_id))?;
    Ok(Json(MemberResponse::from(member)))
}

/// Change a member's role
#[utoipa::path(
    patch,
    path = "/teams/{team_id}/members/{member_id}",
    request_body = MemberUpdate,
    tag = "members",
    summary = "Update member role",
    params(
        ("team_id" = uuid::Uuid, Path, description = "Team ID"),
        ("member_id" = uuid::Uuid, Path, description = "Member ID"),
    ),
    responses(
        (status = 200, description = "Updated member", body = MemberResponse),
        (status = 400, description = "Cannot change role of the last owner"),
        (status = 403, description = "Requires OWNER or ADMIN"),
        (status = 404, description = "Member not found"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn update_member(
    State(state): State<AppState>,
    Path((team_id, member_id)): Path<(TeamId, MemberId)>,
    current_user: CurrentUser,
    client: ClientInfo,
    Json(request): Json<MemberUpdate>,
) -> Result<Json<MemberResponse>> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    require_team_role(&mut tx, team_id, &current_user, TeamRole::Admin, Operation::Update, "members").await?;

    let mut members = Members::new(&mut tx);
    let existing = members.get(team_id, member_id).await?.ok_or_else(|| member_not_found(member_id))?;

    if request.role != TeamRole::Owner {
        members
            .ensure_not_last_owner(&existing, Operation::Update, "Cannot change role of the last owner")
            .await?;
    }

    let updated = members
        .update_role(team_id, member_id, request.role)
        .await?
        .ok_or_else(|| member_not_found(member_id))?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    let team = load_team(&state, team_id).await?;
    if let Err(e) = state
        .email
        .send_role_change(
            &updated.user_email,
            updated.user_name.as_deref(),
            &team.name,
            &team.slug,
            existing.role,
            updated.role,
            display_name(&current_user),
        )
        .await
    {
        warn!("Failed to send role change email: {}", e);
    }

    state
        .audit()
        .log(
            AuditEntry::builder()
                .team_id(team_id)
                .action("member.updated")
                .category(AuditCategory::Team)
                .actor(current_user)
                .target_id(updated.user_id.to_string())
                .target_type("user")
                .target_name(updated.user_email.clone())
                .metadata(json!({ "oldRole": existing.role, "newRole": updated.role }))
                .client(client)
                .build(),
        )
        .await;
    state
        .webhooks
        .notify(
            team_id,
            WebhookEvent::MemberUpdated,
            json!({
                "memberId": updated.id,
                "userId": updated.user_id,
                "oldRole": existing.role,
                "newRole": updated.role,
            }),
        )
        .await;

    Ok(Json(MemberResponse::from(updated)))
}

/// Remove a member from a team
#[utoipa::path(
    delete,
    path = "/teams/{team_id}/members/{member_id}",
    tag = "members",
    summary = "Remove member",
    params(
        ("team_id" = uuid::Uuid, Path, description = "Team ID"),
        ("member_id" = uuid::Uuid, Path, description = "Member ID"),
    ),
    responses(
        (status = 204, description = "Member removed"),
        (status = 400, description = "Cannot remove the last owner"),
        (status = 403, description = "Requires OWNER or ADMIN"),
        (status = 404, description = "Member not found"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn remove_member(
    State(state): State<AppState>,
    Path((team_id, member_id)): Path<(TeamId, MemberId)>,
    current_user: CurrentUser,
    client: ClientInfo,
) -> Result<StatusCode> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    require_team_role(&mut tx, team_id, &current_user, TeamRole::Admin, Operation::Delete, "members").await?;

    let mut members = Members::new(&mut tx);
    let member = members.get(team_id, member_id).await?.ok_or_else(|| member_not_found(member_id))?;

    members
        .ensure_not_last_owner(&member, Operation::Delete, "Cannot remove the last owner")
        .await?;

    members.remove(team_id, member_id).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    let team = load_team(&state, team_id).await?;
    if let Err(e) = state
        .email
        .send_member_removal(&member.user_email, member.user_name.as_deref(), &team.name, display_name(&current_user))
        .await
    {
        warn!("Failed to send member removal email: {}", e);
    }

    state
        .audit()
        .log(
            AuditEntry::builder()
                .team_id(team_id)
                .action("member.removed")
                .category(AuditCategory::Team)
                .actor(current_user)
                .target_id(member.user_id.to_string())
                .target_type("user")
                .target_name(member.user_email.clone())
                .client(client)
                .build(),
        )
        .await;
    state
        .webhooks
        .notify(
            team_id,
            WebhookEvent::MemberRemoved,
            json!({ "memberId": member.id, "userId": member.user_id, "email": member.user_email }),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_utils::{add_member, create_test_app, create_test_app_with_config, create_test_config, create_test_team, create_test_user, login};
    use serde_json::Value;
    use sqlx::PgPool;

    fn sent_emails(config: &Config) -> Vec<String> {
        let crate::config::EmailTransportConfig::File { path } = &config.email.transport else {
            return vec![];
        };
        std::fs::read_dir(path)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| std::fs::read_to_string(e.path()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_add_member_by_email(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let owner = create_test_user(&pool, "owner@example.com").await;
        create_test_user(&pool, "new@example.com").await;
        let team = create_test_team(&pool, &owner, "Acme").await;
        let (_, cookie) = login(&state, &owner).await;

        let response = server
            .post(&format!("/api/teams/{}/members", team.id))
            .add_header("cookie", cookie.clone())
            .json(&json!({"email": "New@example.com"}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let member: MemberResponse = response.json();
        assert_eq!(member.email, "new@example.com");
        assert_eq!(member.role, TeamRole::Member);

        let response = server
            .post(&format!("/api/teams/{}/members", team.id))
            .add_header("cookie", cookie.clone())
            .json(&json!({"email": "new@example.com"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "User is already a member of this team");

        let response = server
            .post(&format!("/api/teams/{}/members", team.id))
            .add_header("cookie", cookie.clone())
            .json(&json!({"email": "ghost@example.com"}))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["error"], "User not found");

        let members: Vec<MemberResponse> = server
            .get(&format!("/api/teams/{}/members", team.id))
            .add_header("cookie", cookie)
            .await
            .json();
        assert_eq!(members.len(), 2);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_free_member_limit(pool: PgPool) {
        let mut config = create_test_config();
        config.billing.free_member_limit = 1;
        let (server, state) = create_test_app_with_config(pool.clone(), config);
        let owner = create_test_user(&pool, "owner@example.com").await;
        create_test_user(&pool, "new@example.com").await;
        let team = create_test_team(&pool, &owner, "Acme").await;
        let (_, cookie) = login(&state, &owner).await;

        let response = server
            .post(&format!("/api/teams/{}/members", team.id))
            .add_header("cookie", cookie)
            .json(&json!({"email": "new@example.com"}))
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
        let body: Value = response.json();
        assert_eq!(body["error"], "Team member limit reached. Please upgrade your plan.");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_last_owner_is_protected(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let owner = create_test_user(&pool, "owner@example.com").await;
        let team = create_test_team(&pool, &owner, "Acme").await;
        let (_, cookie) = login(&state, &owner).await;

        let mut conn = pool.acquire().await.unwrap();
        let owner_member = Members::new(&mut conn).get_by_user(team.id, owner.id).await.unwrap().unwrap();

        let response = server
            .patch(&format!("/api/teams/{}/members/{}", team.id, owner_member.id))
            .add_header("cookie", cookie.clone())
            .json(&json!({"role": "ADMIN"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "Cannot change role of the last owner");

        let response = server
            .delete(&format!("/api/teams/{}/members/{}", team.id, owner_member.id))
            .add_header("cookie", cookie)
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "Cannot remove the last owner");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_role_change_and_removal_notify(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let owner = create_test_user(&pool, "owner@example.com").await;
        let member = create_test_user(&pool, "member@example.com").await;
        let team = create_test_team(&pool, &owner, "Notify Team").await;
        add_member(&pool, team.id, &member, TeamRole::Member).await;
        let (_, cookie) = login(&state, &owner).await;

        let mut conn = pool.acquire().await.unwrap();
        let target = Members::new(&mut conn).get_by_user(team.id, member.id).await.unwrap().unwrap();

        let response = server
            .patch(&format!("/api/teams/{}/members/{}", team.id, target.id))
            .add_header("cookie", cookie.clone())
            .json(&json!({"role": "ADMIN"}))
            .await;
        response.assert_status_ok();
        let updated: MemberResponse = response.json();
        assert_eq!(updated.role, TeamRole::Admin);

        server
            .get(&format!("/api/teams/{}/members/{}", team.id, target.id))
            .add_header("cookie", cookie.clone())
            .await
            .assert_status_ok();

        server
            .delete(&format!("/api/teams/{}/members/{}", team.id, target.id))
            .add_header("cookie", cookie.clone())
            .await
            .assert_status(StatusCode::NO_CONTENT);

        server
            .get(&format!("/api/teams/{}/members/{}", team.id, target.id))
            .add_header("cookie", cookie)
            .await
            .assert_status(StatusCode::NOT_FOUND);

        let emails = sent_emails(&state.config);
        assert!(emails.iter().any(|e| e.contains("member@example.com") && e.contains("Notify Team")));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_member_cannot_manage_members(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let owner = create_test_user(&pool, "owner@example.com").await;
        let member = create_test_user(&pool, "member@example.com").await;
        create_test_user(&pool, "new@example.com").await;
        let team = create_test_team(&pool, &owner, "Acme").await;
        add_member(&pool, team.id, &member, TeamRole::Member).await;
        let (_, cookie) = login(&state, &member).await;

        server
            .get(&format!("/api/teams/{}/members", team.id))
            .add_header("cookie", cookie.clone())
            .await
            .assert_status_ok();

        let response = server
            .post(&format!("/api/teams/{}/members", team.id))
            .add_header("cookie", cookie)
            .json(&json!({"email": "new@example.com"}))
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
        let body: Value = response.json();
        assert_eq!(body["error"], "Insufficient permissions");
    }
}
