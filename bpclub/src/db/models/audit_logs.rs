//! Database models for the team audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::types::{TeamId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditCategory {
    Team,
    Auth,
    Program,
    Settings,
    Billing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditStatus {
    Success,
    Failure,
    Pending,
}

impl AuditCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditCategory::Team => "TEAM",
            AuditCategory::Auth => "AUTH",
            AuditCategory::Program => "PROGRAM",
            AuditCategory::Settings => "SETTINGS",
            AuditCategory::Billing => "BILLING",
        }
    }
}

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Failure => "FAILURE",
            AuditStatus::Pending => "PENDING",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct AuditLogCreateDBRequest {
    pub team_id: TeamId,
    pub action: String,
    pub category: AuditCategory,
    pub status: AuditStatus,
    pub actor_id: Option<UserId>,
    pub actor_email: Option<String>,
    pub actor_name: Option<String>,
    pub target_id: Option<String>,
    pub target_type: Option<String>,
    pub target_name: Option<String>,
    pub metadata: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AuditLogDBResponse {
    pub id: Uuid,
    pub team_id: TeamId,
    pub action: String,
    pub category: AuditCategory,
    pub status: AuditStatus,
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

/// Filter for listing or exporting audit logs. Only the fields that are set constrain the query.
#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub team_id: TeamId,
    pub category: Option<AuditCategory>,
    pub status: Option<AuditStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}
