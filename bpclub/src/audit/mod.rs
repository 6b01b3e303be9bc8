//! Team audit trail: recording, querying and CSV export.
//!
//! Recording is best effort. [`AuditService::log`] never fails the request that triggered it; a
//! failed insert is logged at `error` and dropped. The same applies to session activity tracking.

use bon::Builder;
use serde_json::json;
use sqlx::PgPool;
use tracing::{error, instrument};

use crate::{
    api::models::{
        audit_logs::{AuditLogPage, AuditLogResponse},
        pagination::{PageParams, PaginationInfo},
        users::CurrentUser,
    },
    db::{
        errors::DbError,
        handlers::{AuditLogs, Sessions},
        models::audit_logs::{AuditCategory, AuditLogCreateDBRequest, AuditLogDBResponse, AuditLogFilter, AuditStatus},
    },
    errors::Result,
    request_context::ClientInfo,
    types::{SessionId, TeamId, abbrev_uuid},
};

/// One audit record to append.
#[derive(Debug, Clone, Builder)]
#[builder(on(String, into))]
pub struct AuditEntry {
    pub team_id: TeamId,
    pub action: String,
    pub category: AuditCategory,
    #[builder(default = AuditStatus::Success)]
    pub status: AuditStatus,
    pub actor: Option<CurrentUser>,
    pub target_id: Option<String>,
    pub target_type: Option<String>,
    pub target_name: Option<String>,
    #[builder(default = json!({}))]
    pub metadata: serde_json::Value,
    pub client: Option<ClientInfo>,
}

impl From<AuditEntry> for AuditLogCreateDBRequest {
    fn from(entry: AuditEntry) -> Self {
        let client = entry.client.unwrap_or_default();
        Self {
            team_id: entry.team_id,
            action: entry.action,
            category: entry.category,
            status: entry.status,
            actor_id: entry.actor.as_ref().map(|a| a.id),
            actor_email: entry.actor.as_ref().map(|a| a.email.clone()),
            actor_name: entry.actor.and_then(|a| a.name),
            target_id: entry.target_id,
            target_type: entry.target_type,
            target_name: entry.target_name,
            metadata: entry.metadata,
            ip_address: client.ip_address,
            user_agent: client.user_agent,
        }
    }
}

#[derive(Clone)]
pub struct AuditService {
    db: PgPool,
}

impl AuditService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Append an entry. Failures are logged and swallowed.
    #[instrument(skip_all, fields(team_id = %abbrev_uuid(&entry.team_id), action = %entry.action))]
    pub async fn log(&self, entry: AuditEntry) {
        let request = AuditLogCreateDBRequest::from(entry);
        let result = async {
            let mut conn = self.db.acquire().await.map_err(DbError::from)?;
            AuditLogs::new(&mut conn).create(&request).await
        }
        .await;

        if let Err(e) = result {
            error!(error = %e, "Failed to write audit log");
        }
    }

    /// One page of logs matching `filter`, newest first.
    #[instrument(skip_all, fields(team_id = %abbrev_uuid(&filter.team_id)), err)]
    pub async fn list(&self, filter: &AuditLogFilter, page: &PageParams) -> Result<AuditLogPage> {
        let mut conn = self.db.acquire().await.map_err(DbError::from)?;
        let mut repo = AuditLogs::new(&mut conn);

        let total = repo.count(filter).await?;
        let logs = repo.list(filter, Some(page.limit()), page.offset()).await?;

        Ok(AuditLogPage {
            logs: logs.into_iter().map(AuditLogResponse::from).collect(),
            pagination: PaginationInfo::new(total, page),
        })
    }

    /// Every log matching `filter` rendered as CSV.
    #[instrument(skip_all, fields(team_id = %abbrev_uuid(&filter.team_id)), err)]
    pub async fn export_csv(&self, filter: &AuditLogFilter) -> Result<String> {
        let mut conn = self.db.acquire().await.map_err(DbError::from)?;
        let logs = AuditLogs::new(&mut conn).list(filter, None, 0).await?;
        Ok(logs_to_csv(&logs))
    }

    /// Mark a session as recently used. Failures are logged and swallowed.
    #[instrument(skip(self, client), fields(session_id = %abbrev_uuid(&session_id)))]
    pub async fn track_session_activity(&self, session_id: SessionId, client: &ClientInfo) {
        let result = async {
            let mut conn = self.db.acquire().await.map_err(DbError::from)?;
            Sessions::new(&mut conn)
                .touch(session_id, client.ip_address.as_deref(), client.user_agent.as_deref())
                .await
        }
        .await;

        if let Err(e) = result {
            error!(error = %e, "Failed to track session activity");
        }
    }

    /// Revoke a session. Failures are logged and swallowed.
    #[instrument(skip(self), fields(session_id = %abbrev_uuid(&session_id)))]
    pub async fn revoke_session(&self, session_id: SessionId) {
        let result = async {
            let mut conn = self.db.acquire().await.map_err(DbError::from)?;
            Sessions::new(&mut conn).revoke(session_id).await
        }
        .await;

        if let Err(e) = result {
            error!(error = %e, "Failed to revoke session");
        }
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render logs as `Timestamp,Action,Category,Status` CSV.
pub fn logs_to_csv(logs: &[AuditLogDBResponse]) -> String {
    let mut out = String::from("Timestamp,Action,Category,Status\n");
    for log in logs {
        let row = [
            log.created_at.to_rfc3339(),
            csv_field(&log.action),
            log.category.to_string(),
            log.status.to_string(),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::{Members, Teams, Users};
    use crate::db::models::{teams::TeamCreateDBRequest, users::UserCreateDBRequest};
    use crate::types::TeamRole;
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn log_row(action: &str) -> AuditLogDBResponse {
        AuditLogDBResponse {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            action: action.to_string(),
            category: AuditCategory::Team,
            status: AuditStatus::Success,
            actor_id: None,
            actor_email: None,
            actor_name: None,
            target_id: None,
            target_type: None,
            target_name: None,
            metadata: json!({}),
            ip_address: None,
            user_agent: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_csv_header_and_rows() {
        let csv = logs_to_csv(&[log_row("team.updated")]);
        assert_eq!(
            csv,
            "Timestamp,Action,Category,Status\n2024-05-01T12:00:00+00:00,team.updated,TEAM,SUCCESS\n"
        );
    }

    #[test]
    fn test_csv_quotes_special_values() {
        let csv = logs_to_csv(&[log_row("renamed \"a, b\"")]);
        assert!(csv.contains(",\"renamed \"\"a, b\"\"\",TEAM,"));
    }

    #[test]
    fn test_csv_empty_is_just_header() {
        assert_eq!(logs_to_csv(&[]), "Timestamp,Action,Category,Status\n");
    }

    async fn seed_team(pool: &PgPool) -> (TeamId, CurrentUser) {
        let mut conn = pool.acquire().await.unwrap();
        let user = Users::new(&mut conn)
            .create(&UserCreateDBRequest {
                email: "admin@example.com".to_string(),
                name: Some("Admin".to_string()),
                image: None,
                password_hash: None,
            })
            .await
            .unwrap();
        let team = Teams::new(&mut conn)
            .create(&TeamCreateDBRequest {
                name: "Acme".to_string(),
                slug: "acme".to_string(),
                domain: None,
                created_by: user.id,
            })
            .await
            .unwrap();
        Members::new(&mut conn).add(team.id, user.id, TeamRole::Owner).await.unwrap();

        let actor = CurrentUser {
            id: user.id,
            session_id: Uuid::new_v4(),
            email: user.email,
            name: user.name,
        };
        (team.id, actor)
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_constrains_only_given_filters(pool: PgPool) {
        let (team_id, actor) = seed_team(&pool).await;
        let audit = AuditService::new(pool.clone());

        for (action, category, status) in [
            ("team.updated", AuditCategory::Team, AuditStatus::Success),
            ("member.added", AuditCategory::Team, AuditStatus::Failure),
            ("auth.login", AuditCategory::Auth, AuditStatus::Success),
        ] {
            audit
                .log(
                    AuditEntry::builder()
                        .team_id(team_id)
                        .action(action)
                        .category(category)
                        .status(status)
                        .actor(actor.clone())
                        .build(),
                )
                .await;
        }

        let filter = AuditLogFilter {
            team_id,
            category: Some(AuditCategory::Team),
            status: Some(AuditStatus::Success),
            ..Default::default()
        };
        let page = audit.list(&filter, &PageParams::default()).await.unwrap();
        assert_eq!(page.logs.len(), 1);
        assert_eq!(page.logs[0].action, "team.updated");
        assert_eq!(page.logs[0].actor_email.as_deref(), Some("admin@example.com"));
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.pagination.page, 1);
        assert_eq!(page.pagination.limit, 10);

        let all = AuditLogFilter {
            team_id,
            ..Default::default()
        };
        let page = audit.list(&all, &PageParams::new(Some(2), Some(2))).await.unwrap();
        assert_eq!(page.pagination.total, 3);
        assert_eq!(page.pagination.pages, 2);
        assert_eq!(page.logs.len(), 1);
    }

    #[sqlx::test]
    async fn test_date_range_is_inclusive(pool: PgPool) {
        let (team_id, _) = seed_team(&pool).await;
        let audit = AuditService::new(pool.clone());
        audit
            .log(
                AuditEntry::builder()
                    .team_id(team_id)
                    .action("team.updated")
                    .category(AuditCategory::Settings)
                    .build(),
            )
            .await;

        let now = Utc::now();
        let inside = AuditLogFilter {
            team_id,
            start_date: Some(now - Duration::hours(1)),
            end_date: Some(now + Duration::hours(1)),
            ..Default::default()
        };
        assert_eq!(audit.list(&inside, &PageParams::default()).await.unwrap().pagination.total, 1);

        let future = AuditLogFilter {
            team_id,
            start_date: Some(now + Duration::hours(1)),
            ..Default::default()
        };
        assert_eq!(audit.list(&future, &PageParams::default()).await.unwrap().pagination.total, 0);

        let csv = audit.export_csv(&inside).await.unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.lines().nth(1).unwrap().ends_with(",team.updated,SETTINGS,SUCCESS"));
    }

    #[sqlx::test]
    async fn test_log_swallows_write_failures(pool: PgPool) {
        let audit = AuditService::new(pool.clone());
        // Unknown team violates the foreign key; the call must still return normally
        audit
            .log(
                AuditEntry::builder()
                    .team_id(Uuid::new_v4())
                    .action("team.updated")
                    .category(AuditCategory::Team)
                    .build(),
            )
            .await;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 0);
    }
}
