//! API request/response models for audit logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::pagination::{PageParams, PaginationInfo};
use crate::db::models::audit_logs::{AuditCategory, AuditLogDBResponse, AuditLogFilter, AuditStatus};
use crate::types::{TeamId, UserId};

/// Query parameters for listing and exporting audit logs.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogQuery {
    pub category: Option<AuditCategory>,
    pub status: Option<AuditStatus>,
    /// Inclusive lower bound on `createdAt` (RFC 3339)
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `createdAt` (RFC 3339)
    pub end_date: Option<DateTime<Utc>>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub page: Option<i64>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub limit: Option<i64>,
}

impl AuditLogQuery {
    pub fn filter(&self, team_id: TeamId) -> AuditLogFilter {
        AuditLogFilter {
            team_id,
            category: self.category,
            status: self.status,
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }

    pub fn page_params(&self) -> PageParams {
        PageParams::new(self.page, self.limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    #[schema(value_type = String, format = "uuid")]
    pub team_id: TeamId,
    pub action: String,
    pub category: AuditCategory,
    pub status: AuditStatus,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub actor_id: Option<UserId>,
    pub actor_email: Option<String>,
    pub actor_name: Option<String>,
    pub target_id: Option<String>,
    pub target_type: Option<String>,
    pub target_name: Option<String>,
    pub metadata: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<AuditLogDBResponse> for AuditLogResponse {
    fn from(db: AuditLogDBResponse) -> Self {
        Self {
            id: db.id,
            team_id: db.team_id,
            action: db.action,
            category: db.category,
            status: db.status,
            actor_id: db.actor_id,
            actor_email: db.actor_email,
            actor_name: db.actor_name,
            target_id: db.target_id,
            target_type: db.target_type,
            target_name: db.target_name,
            metadata: db.metadata,
            ip_address: db.ip_address,
            user_agent: db.user_agent,
            created_at: db.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditLogPage {
    pub logs: Vec<AuditLogResponse>,
    pub pagination: PaginationInfo,
}
