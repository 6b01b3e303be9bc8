//! SAML connection of a team.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::json;
use tracing::{info, instrument};

use crate::{
    AppState,
    api::models::{
        identity::{SamlConnectionCreate, SamlConnectionResponse},
        users::CurrentUser,
    },
    audit::AuditEntry,
    auth::permissions::require_team_role,
    db::{
        handlers::{Members, SamlConnections, Teams},
        models::{audit_logs::AuditCategory, identity::SamlConnectionUpsert, teams::TeamDBResponse},
    },
    errors::{Error, Result},
    request_context::ClientInfo,
    saml::{self, SamlSettings},
    types::{Operation, TeamId, TeamRole},
    webhooks::WebhookEvent,
};

/// Email OWNERs and ADMINs that the team's sign-in configuration changed.
async fn notify_admins(state: &AppState, team: &TeamDBResponse, action: &str, actor: &CurrentUser) -> Result<()> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let recipients: Vec<String> = Members::new(&mut conn)
        .list_with_roles(team.id, &[TeamRole::Owner, TeamRole::Admin])
        .await?
        .into_iter()
        .map(|m| m.user_email)
        .collect();
    drop(conn);

    let updated_by = actor.name.as_deref().unwrap_or(&actor.email);
    let sent = state
        .email
        .send_sso_update(&recipients, &team.name, &team.slug, action, updated_by)
        .await;
    info!(sent, total = recipients.len(), "Sent SSO change notices");
    Ok(())
}

/// The team's SAML connection, or `null` when none is configured
#[utoipa::path(
    get,
    path = "/teams/{team_id}/saml",
    tag = "identity",
    summary = "Get SAML connection",
    params(("team_id" = uuid::Uuid, Path, description = "Team ID")),
    responses(
        (status = 200, description = "SAML connection or null", body = Option<SamlConnectionResponse>),
        (status = 403, description = "Requires OWNER or ADMIN"),
    )
)]
#[instrument(skip_all)]
pub async fn get_saml_connection(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    current_user: CurrentUser,
) -> Result<Json<Option<SamlConnectionResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    require_team_role(&mut conn, team_id, &current_user, TeamRole::Admin, Operation::Read, "SAML connection").await?;

    let connection = SamlConnections::new(&mut conn).get_for_team(team_id).await?;
    let acs_url = saml::acs_url(&state.config);
    Ok(Json(connection.map(|c| SamlConnectionResponse::new(c, acs_url))))
}

/// Create or replace the team's SAML connection from base64 IdP metadata
#[utoipa::path(
    post,
    path = "/teams/{team_id}/saml",
    tag = "identity",
    summary = "Configure SAML connection",
    params(("team_id" = uuid::Uuid, Path, description = "Team ID")),
    request_body = SamlConnectionCreate,
    responses(
        (status = 200, description = "Stored connection", body = SamlConnectionResponse),
        (status = 400, description = "Metadata missing, undecodable or incomplete"),
        (status = 403, description = "Requires OWNER or ADMIN"),
    )
)]
#[instrument(skip_all)]
pub async fn configure_saml_connection(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    current_user: CurrentUser,
    client: ClientInfo,
    Json(request): Json<SamlConnectionCreate>,
) -> Result<Json<SamlConnectionResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    require_team_role(&mut conn, team_id, &current_user, TeamRole::Admin, Operation::Update, "SAML connection").await?;

    let encoded = request
        .encoded_raw_metadata
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| Error::BadRequest {
            message: "SAML metadata is required".to_string(),
        })?;
    let metadata = saml::parse_metadata(&encoded)?;
    let acs_url = saml::acs_url(&state.config);

    if let Some(message) = saml::validate_saml_config(&SamlSettings {
        entity_id: &metadata.entity_id,
        acs_url: &acs_url,
        idp_url: &metadata.sso_url,
        certificate: &metadata.certificate,
    }) {
        return Err(Error::BadRequest { message });
    }

    let team = Teams::new(&mut conn).get_by_id(team_id).await?.ok_or_else(|| Error::NotFound {
        resource: "Team".to_string(),
        id: team_id.to_string(),
    })?;
    drop(conn);

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = SamlConnections::new(&mut tx);
    let existed = repo.get_for_team(team_id).await?.is_some();
    let connection = repo
        .upsert(&SamlConnectionUpsert {
            team_id,
            tenant: request.tenant.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| team.slug.clone()),
            product: request
                .product
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| state.config.saml.product.clone()),
            encoded_metadata: encoded,
            entity_id: metadata.entity_id,
            sso_url: metadata.sso_url,
            certificate: metadata.certificate,
            redirect_url: request.redirect_url,
            default_redirect_url: request.default_redirect_url,
        })
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    let (action, event) = if existed {
        ("sso.updated", WebhookEvent::SsoUpdated)
    } else {
        ("sso.configured", WebhookEvent::SsoConfigured)
    };

    state
        .audit()
        .log(
            AuditEntry::builder()
                .team_id(team_id)
                .action(action)
                .category(AuditCategory::Settings)
                .actor(current_user.clone())
                .target_id(connection.id.to_string())
                .target_type("saml_connection")
                .target_name(connection.entity_id.clone())
                .metadata(json!({ "entityId": connection.entity_id, "ssoUrl": connection.sso_url }))
                .client(client)
                .build(),
        )
        .await;
    state
        .webhooks
        .notify(team_id, event, json!({ "teamId": team_id, "entityId": connection.entity_id }))
        .await;
    notify_admins(&state, &team, "updated", &current_user).await?;

    Ok(Json(SamlConnectionResponse::new(connection, acs_url)))
}

/// Remove the team's SAML connection
#[utoipa::path(
    delete,
    path = "/teams/{team_id}/saml",
    tag = "identity",
    summary = "Delete SAML connection",
    params(("team_id" = uuid::Uuid, Path, description = "Team ID")),
    responses(
        (status = 204, description = "Connection removed"),
        (status = 403, description = "Requires OWNER"),
        (status = 404, description = "No SAML connection configured"),
    )
)]
#[instrument(skip_all)]
pub async fn delete_saml_connection(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    current_user: CurrentUser,
    client: ClientInfo,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    require_team_role(&mut conn, team_id, &current_user, TeamRole::Owner, Operation::Delete, "SAML connection").await?;

    let team = Teams::new(&mut conn).get_by_id(team_id).await?.ok_or_else(|| Error::NotFound {
        resource: "Team".to_string(),
        id: team_id.to_string(),
    })?;
    if !SamlConnections::new(&mut conn).delete_for_team(team_id).await? {
        return Err(Error::NotFoundMessage {
            message: "No SAML connection configured".to_string(),
        });
    }
    drop(conn);

    state
        .audit()
        .log(
            AuditEntry::builder()
                .team_id(team_id)
                .action("sso.deleted")
                .category(AuditCategory::Settings)
                .actor(current_user.clone())
                .target_id(team_id.to_string())
                .target_type("team")
                .target_name(team.name.clone())
                .client(client)
                .build(),
        )
        .await;
    state.webhooks.notify(team_id, WebhookEvent::SsoDeleted, json!({ "teamId": team_id })).await;
    notify_admins(&state, &team, "removed", &current_user).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmailTransportConfig;
    use crate::saml::tests::encoded_metadata;
    use crate::test_utils::{add_member, create_test_app, create_test_team, create_test_user, login};
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
    use serde_json::Value;
    use sqlx::PgPool;

    fn emails_mentioning(state: &AppState, needle: &str) -> usize {
        let EmailTransportConfig::File { path } = &state.config.email.transport else {
            return 0;
        };
        std::fs::read_dir(path)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| std::fs::read_to_string(e.path()).ok())
                    .filter(|body| body.contains(needle))
                    .count()
            })
            .unwrap_or_default()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_configure_and_delete(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let owner = create_test_user(&pool, "owner@example.com").await;
        let admin = create_test_user(&pool, "admin@example.com").await;
        let team = create_test_team(&pool, &owner, "Saml Notice Crew").await;
        add_member(&pool, team.id, &admin, TeamRole::Admin).await;
        let (_, admin_cookie) = login(&state, &admin).await;
        let url = format!("/api/teams/{}/saml", team.id);

        let empty: Value = server.get(&url).add_header("cookie", admin_cookie.clone()).await.json();
        assert!(empty.is_null());

        let response = server
            .post(&url)
            .add_header("cookie", admin_cookie.clone())
            .json(&json!({"encodedRawMetadata": encoded_metadata()}))
            .await;
        response.assert_status_ok();
        let connection: SamlConnectionResponse = response.json();
        assert_eq!(connection.entity_id, "https://idp.example.com/metadata");
        assert_eq!(connection.sso_url, "https://idp.example.com/sso");
        assert_eq!(connection.tenant, team.slug);
        assert_eq!(connection.product, "blueprint-club");
        assert_eq!(connection.acs_url, "http://localhost:3000/api/auth/saml/acs");
        assert!(emails_mentioning(&state, "Saml Notice Crew") >= 2);

        // Admins can configure but only owners can delete
        server
            .delete(&url)
            .add_header("cookie", admin_cookie)
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let (_, owner_cookie) = login(&state, &owner).await;
        server
            .delete(&url)
            .add_header("cookie", owner_cookie.clone())
            .await
            .assert_status(StatusCode::NO_CONTENT);
        let empty: Value = server.get(&url).add_header("cookie", owner_cookie).await.json();
        assert!(empty.is_null());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_configure_rejects_bad_metadata(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let owner = create_test_user(&pool, "owner@example.com").await;
        let team = create_test_team(&pool, &owner, "Acme").await;
        let (_, cookie) = login(&state, &owner).await;
        let url = format!("/api/teams/{}/saml", team.id);

        let response = server.post(&url).add_header("cookie", cookie.clone()).json(&json!({})).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["error"], "SAML metadata is required");

        let incomplete = BASE64_STANDARD.encode(r#"<EntityDescriptor entityID="urn:idp"></EntityDescriptor>"#);
        let response = server
            .post(&url)
            .add_header("cookie", cookie)
            .json(&json!({"encodedRawMetadata": incomplete}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(
            response.json::<Value>()["error"],
            "Missing required fields: idpUrl, certificate"
        );
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_members_cannot_read_connection(pool: PgPool) {
        let (server, state) = create_test_app(pool.clone());
        let owner = create_test_user(&pool, "owner@example.com").await;
        let member = create_test_user(&pool, "member@example.com").await;
        let team = create_test_team(&pool, &owner, "Acme").await;
        add_member(&pool, team.id, &member, TeamRole::Member).await;
        let (_, cookie) = login(&state, &member).await;

        server
            .get(&format!("/api/teams/{}/saml", team.id))
            .add_header("cookie", cookie)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
}
