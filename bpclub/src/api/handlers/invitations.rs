//! Team invitations: issue, look up, accept and cancel.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use serde_json::json;
use sqlx::PgConnection;
use tracing::warn;

use crate::{
    AppState,
    api::models::{
        teams::{InvitationCreate, InvitationResponse, MemberResponse},
        users::CurrentUser,
    },
    audit::AuditEntry,
    auth::permissions::{require_membership, require_team_role},
    crypto,
    db::{
        handlers::{Invitations, Members, Teams, Users},
        models::{
            audit_logs::AuditCategory,
            teams::{InvitationCreateDBRequest, InvitationDBResponse, InvitationStatus},
        },
    },
    errors::{Error, Result},
    request_context::ClientInfo,
    types::{Operation, TeamId, TeamRole},
    webhooks::WebhookEvent,
};

fn invalid_invitation() -> Error {
    Error::NotFoundMessage {
        message: "Invalid or expired invitation".to_string(),
    }
}

/// A pending, unexpired invitation of `team_id` with this token.
async fn valid_invitation(conn: &mut PgConnection, team_id: TeamId, token: &str) -> Result<InvitationDBResponse> {
    Invitations::new(conn)
        .get_by_token(token)
        .await?
        .filter(|i| i.team_id == team_id && i.status == InvitationStatus::Pending && i.expires_at > Utc::now())
        .ok_or_else(invalid_invitation)
}

/// Pending invitations of a team
#[utoipa::path(
    get,
    path = "/teams/{team_id}/invitations",
    tag = "invitations",
    summary = "List invitations",
    params(("team_id" = uuid::Uuid, Path, description = "Team ID")),
    responses(
        (status = 200, description = "Pending invitations", body = [InvitationResponse]),
        (status = 403, description = "Not a member of this team"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_invitations(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    current_user: CurrentUser,
) -> Result<Json<Vec<InvitationResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    require_membership(&mut conn, team_id, &current_user, Operation::Read, "invitations").await?;

    let invitations = Invitations::new(&mut conn).list_pending(team_id).await?;
    Ok(Json(invitations.into_iter().map(InvitationResponse::from).collect()))
}

/// Invite someone to a team by email
#[utoipa::path(
    post,
    path = "/teams/{team_id}/invitations",
    request_body = InvitationCreate,
    tag = "invitations",
    summary = "Create invitation",
    params(("team_id" = uuid::Uuid, Path, description = "Team ID")),
    responses(
        (status = 201, description = "Invitation created and emailed", body = InvitationResponse),
        (status = 400, description = "Already a member or already invited"),
        (status = 403, description = "Requires OWNER or ADMIN"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_invitation(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    current_user: CurrentUser,
    client: ClientInfo,
    Json(request): Json<InvitationCreate>,
) -> Result<(StatusCode, Json<InvitationResponse>)> {
    let email = request.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(Error::BadRequest {
            message: "Email and role are required".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    require_team_role(&mut conn, team_id, &current_user, TeamRole::Admin, Operation::Create, "invitations").await?;

    if let Some(user) = Users::new(&mut conn).get_user_by_email(&email).await?
        && Members::new(&mut conn).get_by_user(team_id, user.id).await?.is_some()
    {
        return Err(Error::BadRequest {
            message: "User is already a team member".to_string(),
        });
    }

    if Invitations::new(&mut conn).find_pending(team_id, &email).await?.is_some() {
        return Err(Error::BadRequest {
            message: "Invitation already sent".to_string(),
        });
    }

    let team = Teams::new(&mut conn).get_by_id(team_id).await?.ok_or_else(|| Error::NotFound {
        resource: "Team".to_string(),
        id: team_id.to_string(),
    })?;

    let expiry = chrono::Duration::from_std(state.config.invitations.expiry).map_err(|e| Error::Internal {
        operation: format!("compute invitation expiry: {e}"),
    })?;
    let invitation = Invitations::new(&mut conn)
        .create(&InvitationCreateDBRequest {
            team_id,
            email: email.clone(),
            role: request.role,
            token: crypto::generate_token(),
            invited_by: current_user.id,
            expires_at: Utc::now() + expiry,
        })
        .await?;
    drop(conn);

    let inviter = current_user.name.clone().unwrap_or_else(|| current_user.email.clone());
    if let Err(e) = state
        .email
        .send_invitation(&email, &team.name, &inviter, invitation.role, &invitation.token)
        .await
    {
        warn!("Failed to send invitation email: {}", e);
    }

    state
        .audit()
        .log(
            AuditEntry::builder()
                .team_id(team_id)
                .action("member.invited")
                .category(AuditCategory::Team)
                .actor(current_user)
                .target_id(invitation.id.to_string())
                .target_type("invitation")
                .target_name(email.clone())
                .metadata(json!({ "role": invitation.role }))
                .client(client)
                .build(),
        )
        .await;
    state
        .webhooks
        .notify(
            team_id,
            WebhookEvent::MemberInvited,
            json!({ "invitationId": invitation.id, "email": email, "role": invitation.role }),
        )
        .await;

    Ok((StatusCode::CREATED, Json(InvitationResponse::from(invitation))))
}

/// Look up an invitation by its token
#[utoipa::path(
    get,
    path = "/teams/{team_id}/invitations/{token}",
    tag = "invitations",
    summary = "Get invitation",
    params(
        ("team_id" = uuid::Uuid, Path, description = "Team ID"),
        ("token" = String, Path, description = "Invitation token"),
    ),
    responses(
        (status = 200, description = "Invitation with its team name", body = InvitationResponse),
        (status = 404, description = "Invalid or expired invitation"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_invitation(
    State(state): State<AppState>,
    Path((team_id, token)): Path<(TeamId, String)>,
    _current_user: CurrentUser,
) -> Result<Json<InvitationResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let invitation = valid_invitation(&mut conn, team_id, &token).await?;
    let team = Teams::new(&mut conn).get_by_id(team_id).await?;

    let mut response = InvitationResponse::from(invitation);
    response.team_name = team.map(|t| t.name);
    Ok(Json(response))
}

/// Accept an invitation addressed to the caller
#[utoipa::path(
    post,
    path = "/teams/{team_id}/invitations/{token}",
    tag = "invitations",
    summary = "Accept invitation",
    params(
        ("team_id" = uuid::Uuid, Path, description = "Team ID"),
        ("token" = String, Path, description = "Invitation token"),
    ),
    responses(
        (status = 200, description = "New membership", body = MemberResponse),
        (status = 400, description = "Already a member of this team"),
        (status = 403, description = "This invitation is for a different user"),
        (status = 404, description = "Invalid or expired invitation"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn accept_invitation(
    State(state): State<AppState>,
    Path((team_id, token)): Path<(TeamId, String)>,
    current_user: CurrentUser,
    client: ClientInfo,
) -> Result<Json<MemberResponse>> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let invitation = valid_invitation(&mut tx, team_id, &token).await?;

    if !invitation.email.eq_ignore_ascii_case(&current_user.email) {
        return Err(Error::Forbidden {
            message: "This invitation is for a different user".to_string(),
        });
    }

    if Members::new(&mut tx).get_by_user(team_id, current_user.id).await?.is_some() {
        return Err(Error::BadRequest {
            message: "You are already a member of this team".to_string(),
        });
    }

    Invitations::new(&mut tx)
        .set_status(invitation.id, InvitationStatus::Accepted)
        .await?;
    let member = Members::new(&mut tx).add(team_id, current_user.id, invitation.role).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    state
        .audit()
        .log(
            AuditEntry::builder()
                .team_id(team_id)
                .action("member.joined")
                .category(AuditCategory::Team)
                .actor(current_user.clone())
                .target_id(current_user.id.to_string())
                .target_type("user")
                .target_name(current_user.email.clone())
                .metadata(json!({ "invitationId": invitation.id, "role": member.role }))
                .client(client)
                .build(),
        )
        .await;
    state
        .webhooks
        .notify(
            team_id,
            WebhookEvent::MemberAdded,
            json!({ "memberId": member.id, "userId": member.user_id, "email": member.user_email, "role": member.role }),
        )
        .await;

    Ok(Json(MemberResponse::from(member)))
}

/// Cancel a pending invitation. The invitee or a team OWNER/ADMIN may cancel.
#[utoipa::path(
    delete,
    path = "/teams/{team_id}/invitations/{token}",
    tag = "invitations",
    summary = "Cancel invitation",
    params(
        ("team_id" = uuid::Uuid, Path, description = "Team ID"),
        ("token" = String, Path, description = "Invitation token"),
    ),
    responses(
        (status = 204, description = "Invitation cancelled"),
        (status = 403, description = "Insufficient permissions"),
        (status = 404, description = "Invitation not found"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn cancel_invitation(
    State(state): State<AppState>,
    Path((team_id, token)): Path<(TeamId, String)>,
    current_user: CurrentUser,
    client: ClientInfo,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let invitation = Invitations::new(&mut conn)
        .get_by_token(&token)
        .await?
        .filter(|i| i.team_id == team_id && i.status == InvitationStatus::Pending)
        .ok_or_else(|| Error::NotFound {
            resource: "Invitation".to_string(),
            id: token.clone(),
        })?;

    if !invitation.email.eq_ignore_ascii_case(&current_user.email) {
        require_team_role(&mut conn, team_id, &current_user, TeamRole::Admin, Operation::Delete, "invitations").await?;
    }

    Invitations::new(&mut conn)
        .set_status(invitation.id, InvitationStatus::Cancelled)
        .await?;

    state
        .audit()
        .log(
            AuditEntry::builder()
                .team_id(team_id)
                .action("invitation.cancelled")
                .category(AuditCategory::Team)
                .actor(current_user)
                .target_id(invitation.id.to_string())
                .target_type("invitation")
                .target_name(invitation.email)
                .client(client)
                .build(),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{add_member, create_test_app, create_test_team, create_test_user, login};
    use serde_json::Value;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_invite_and_accept(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let owner = create_test_user(&pool, "owner@example.com").await;
        let invitee = create_test_user(&pool, "invitee@example.com").await;
        let team = create_test_team(&pool, &owner, "Acme").await;
        let (_, owner_cookie) = login(&state, &owner).await;
        let (_, invitee_cookie) = login(&state, &invitee).await;

        let response = server
            .post(&format!("/api/teams/{}/invitations", team.id))
            .add_header("cookie", owner_cookie.clone())
            .json(&json!({"email": "Invitee@Example.com", "role": "ADMIN"}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let invitation: InvitationResponse = response.json();
        assert_eq!(invitation.email, "invitee@example.com");
        assert_eq!(invitation.token.len(), 64);
        assert_eq!(invitation.status, InvitationStatus::Pending);

        let response = server
            .post(&format!("/api/teams/{}/invitations", team.id))
            .add_header("cookie", owner_cookie.clone())
            .json(&json!({"email": "invitee@example.com"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "Invitation already sent");

        let looked_up: InvitationResponse = server
            .get(&format!("/api/teams/{}/invitations/{}", team.id, invitation.token))
            .add_header("cookie", invitee_cookie.clone())
            .await
            .json();
        assert_eq!(looked_up.team_name.as_deref(), Some("Acme"));

        // Only the addressed user may accept
        let response = server
            .post(&format!("/api/teams/{}/invitations/{}", team.id, invitation.token))
            .add_header("cookie", owner_cookie.clone())
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
        let body: Value = response.json();
        assert_eq!(body["error"], "This invitation is for a different user");

        let response = server
            .post(&format!("/api/teams/{}/invitations/{}", team.id, invitation.token))
            .add_header("cookie", invitee_cookie.clone())
            .await;
        response.assert_status_ok();
        let member: MemberResponse = response.json();
        assert_eq!(member.role, TeamRole::Admin);

        // Accepted invitations can't be reused
        let response = server
            .get(&format!("/api/teams/{}/invitations/{}", team.id, invitation.token))
            .add_header("cookie", invitee_cookie)
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["error"], "Invalid or expired invitation");

        let response = server
            .post(&format!("/api/teams/{}/invitations", team.id))
            .add_header("cookie", owner_cookie)
            .json(&json!({"email": "invitee@example.com"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "User is already a team member");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_expired_invitation_is_invalid(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let owner = create_test_user(&pool, "owner@example.com").await;
        let invitee = create_test_user(&pool, "late@example.com").await;
        let team = create_test_team(&pool, &owner, "Acme").await;

        let mut conn = pool.acquire().await.unwrap();
        let invitation = Invitations::new(&mut conn)
            .create(&InvitationCreateDBRequest {
                team_id: team.id,
                email: "late@example.com".to_string(),
                role: TeamRole::Member,
                token: crypto::generate_token(),
                invited_by: owner.id,
                expires_at: Utc::now() - chrono::Duration::hours(1),
            })
            .await
            .unwrap();

        let (_, cookie) = login(&state, &invitee).await;
        server
            .post(&format!("/api/teams/{}/invitations/{}", team.id, invitation.token))
            .add_header("cookie", cookie)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_cancel_rules(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let owner = create_test_user(&pool, "owner@example.com").await;
        let member = create_test_user(&pool, "member@example.com").await;
        let team = create_test_team(&pool, &owner, "Acme").await;
        add_member(&pool, team.id, &member, TeamRole::Member).await;
        let (_, owner_cookie) = login(&state, &owner).await;
        let (_, member_cookie) = login(&state, &member).await;

        let invitation: InvitationResponse = server
            .post(&format!("/api/teams/{}/invitations", team.id))
            .add_header("cookie", owner_cookie.clone())
            .json(&json!({"email": "someone@example.com"}))
            .await
            .json();

        server
            .delete(&format!("/api/teams/{}/invitations/{}", team.id, invitation.token))
            .add_header("cookie", member_cookie)
            .await
            .assert_status(StatusCode::FORBIDDEN);

        server
            .delete(&format!("/api/teams/{}/invitations/{}", team.id, invitation.token))
            .add_header("cookie", owner_cookie.clone())
            .await
            .assert_status(StatusCode::NO_CONTENT);

        let pending: Vec<InvitationResponse> = server
            .get(&format!("/api/teams/{}/invitations", team.id))
            .add_header("cookie", owner_cookie)
            .await
            .json();
        assert!(pending.is_empty());
    }
}
