//! Database repository for audit logs.

use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::audit_logs::{AuditLogCreateDBRequest, AuditLogDBResponse, AuditLogFilter};
use crate::types::abbrev_uuid;

pub struct AuditLogs<'c> {
    db: &'c mut PgConnection,
}

/// Append the WHERE clause for exactly the filters that are set.
fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &AuditLogFilter) {
    query.push(" WHERE team_id = ");
    query.push_bind(filter.team_id);

    if let Some(category) = filter.category {
        query.push(" AND category = ");
        query.push_bind(category);
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ");
        query.push_bind(status);
    }
    if let Some(start) = filter.start_date {
        query.push(" AND created_at >= ");
        query.push_bind(start);
    }
    if let Some(end) = filter.end_date {
        query.push(" AND created_at <= ");
        query.push_bind(end);
    }
}

impl<'c> AuditLogs<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(team_id = %abbrev_uuid(&request.team_id), action = %request.action), err)]
    pub async fn create(&mut self, request: &AuditLogCreateDBRequest) -> Result<AuditLogDBResponse> {
        let log = sqlx::query_as::<_, AuditLogDBResponse>(
            r#"
            INSERT INTO audit_logs (
                team_id, action, category, status,
                actor_id, actor_email, actor_name,
                target_id, target_type, target_name,
                metadata, ip_address, user_agent
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(request.team_id)
        .bind(&request.action)
        .bind(request.category)
        .bind(request.status)
        .bind(request.actor_id)
        .bind(&request.actor_email)
        .bind(&request.actor_name)
        .bind(&request.target_id)
        .bind(&request.target_type)
        .bind(&request.target_name)
        .bind(&request.metadata)
        .bind(&request.ip_address)
        .bind(&request.user_agent)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(log)
    }

    /// One page of matching logs, newest first. `limit: None` returns every match.
    #[instrument(skip(self, filter), fields(team_id = %abbrev_uuid(&filter.team_id)), err)]
    pub async fn list(&mut self, filter: &AuditLogFilter, limit: Option<i64>, offset: i64) -> Result<Vec<AuditLogDBResponse>> {
        let mut query = QueryBuilder::new("SELECT * FROM audit_logs");
        push_filter(&mut query, filter);
        query.push(" ORDER BY created_at DESC");

        if let Some(limit) = limit {
            query.push(" LIMIT ");
            query.push_bind(limit);
            query.push(" OFFSET ");
            query.push_bind(offset);
        }

        let logs = query.build_query_as::<AuditLogDBResponse>().fetch_all(&mut *self.db).await?;
        Ok(logs)
    }

    #[instrument(skip(self, filter), fields(team_id = %abbrev_uuid(&filter.team_id)), err)]
    pub async fn count(&mut self, filter: &AuditLogFilter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM audit_logs");
        push_filter(&mut query, filter);

        let count: (i64,) = query.build_query_as().fetch_one(&mut *self.db).await?;
        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::db::models::audit_logs::{AuditCategory, AuditStatus};
    use uuid::Uuid;

    #[test]
    fn test_filter_sql_only_includes_set_fields() {
        let filter = AuditLogFilter {
            team_id: Uuid::new_v4(),
            category: Some(AuditCategory::Team),
            status: None,
            start_date: Some(chrono::Utc::now()),
            end_date: None,
        };
        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM audit_logs");
        push_filter(&mut query, &filter);

        assert_eq!(
            query.sql(),
            "SELECT * FROM audit_logs WHERE team_id = $1 AND category = $2 AND created_at >= $3"
        );
    }

    #[test]
    fn test_filter_sql_date_range() {
        let filter = AuditLogFilter {
            team_id: Uuid::new_v4(),
            category: None,
            status: Some(AuditStatus::Failure),
            start_date: Some(chrono::Utc::now()),
            end_date: Some(chrono::Utc::now()),
        };
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_logs");
        push_filter(&mut query, &filter);

        assert_eq!(
            query.sql(),
            "SELECT COUNT(*) FROM audit_logs WHERE team_id = $1 AND status = $2 AND created_at >= $3 AND created_at <= $4"
        );
    }
}
