//! Database models for teams, memberships and invitations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::types::{InvitationId, MemberId, TeamId, TeamRole, UserId};

#[derive(Debug, Clone)]
pub struct TeamCreateDBRequest {
    pub name: String,
    pub slug: String,
    pub domain: Option<String>,
    pub created_by: UserId,
}

/// Partial update. `domain: Some(None)` clears the domain.
#[derive(Debug, Clone, Default)]
pub struct TeamUpdateDBRequest {
    pub name: Option<String>,
    pub domain: Option<Option<String>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TeamDBResponse {
    pub id: TeamId,
    pub name: String,
    pub slug: String,
    pub domain: Option<String>,
    pub created_by: UserId,
    pub scim_enabled: bool,
    pub scim_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A membership row joined with the member's user record.
#[derive(Debug, Clone, FromRow)]
pub struct TeamMemberDBResponse {
    pub id: MemberId,
    pub team_id: TeamId,
    pub user_id: UserId,
    pub role: TeamRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_email: String,
    pub user_name: Option<String>,
    pub user_image: Option<String>,
}

/// Lifecycle of an invitation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct InvitationCreateDBRequest {
    pub team_id: TeamId,
    pub email: String,
    pub role: TeamRole,
    pub token: String,
    pub invited_by: UserId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct InvitationDBResponse {
    pub id: InvitationId,
    pub team_id: TeamId,
    pub email: String,
    pub role: TeamRole,
    pub token: String,
    pub status: InvitationStatus,
    pub invited_by: UserId,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvitationDBResponse {
    /// Pending and not past its expiry.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == InvitationStatus::Pending && self.expires_at > now
    }
}
