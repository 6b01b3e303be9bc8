//! Team audit trail: paged listing and CSV export. OWNER and ADMIN only.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{SecondsFormat, Utc};

use crate::{
    AppState,
    api::models::{
        audit_logs::{AuditLogPage, AuditLogQuery},
        users::CurrentUser,
    },
    auth::permissions::require_team_role,
    errors::{Error, Result},
    types::{Operation, TeamId, TeamRole},
};

async fn require_audit_access(state: &AppState, team_id: TeamId, current_user: &CurrentUser, action: Operation) -> Result<()> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    require_team_role(&mut conn, team_id, current_user, TeamRole::Admin, action, "audit logs").await?;
    Ok(())
}

/// Audit logs of a team, newest first
#[utoipa::path(
    get,
    path = "/teams/{team_id}/audit-logs",
    tag = "audit-logs",
    summary = "List audit logs",
    params(("team_id" = uuid::Uuid, Path, description = "Team ID"), AuditLogQuery),
    responses(
        (status = 200, description = "One page of audit logs", body = AuditLogPage),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Insufficient permissions"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    Query(query): Query<AuditLogQuery>,
    current_user: CurrentUser,
) -> Result<Json<AuditLogPage>> {
    require_audit_access(&state, team_id, &current_user, Operation::Read).await?;

    let page = state.audit().list(&query.filter(team_id), &query.page_params()).await?;
    Ok(Json(page))
}

/// All matching audit logs as a CSV download
#[utoipa::path(
    get,
    path = "/teams/{team_id}/audit-logs/export",
    tag = "audit-logs",
    summary = "Export audit logs",
    params(("team_id" = uuid::Uuid, Path, description = "Team ID"), AuditLogQuery),
    responses(
        (status = 200, description = "CSV file", content_type = "text/csv", body = String),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Insufficient permissions"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn export_audit_logs(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    Query(query): Query<AuditLogQuery>,
    current_user: CurrentUser,
) -> Result<Response> {
    require_audit_access(&state, team_id, &current_user, Operation::Export).await?;

    let csv = state.audit().export_csv(&query.filter(team_id)).await?;
    let filename = format!(
        "audit-logs-{team_id}-{}.csv",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        csv,
    )
        .into_response())
}
