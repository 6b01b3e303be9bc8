//! API request/response models for teams, members and invitations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::teams::{InvitationDBResponse, InvitationStatus, TeamDBResponse, TeamMemberDBResponse};
use crate::types::{InvitationId, MemberId, TeamId, TeamRole, UserId};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TeamCreate {
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct TeamUpdate {
    #[serde(default)]
    pub name: Option<String>,
    /// `null` clears the domain
    #[serde(default, deserialize_with = "super::double_option")]
    #[schema(value_type = Option<String>)]
    pub domain: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: MemberId,
    #[schema(value_type = String, format = "uuid")]
    pub team_id: TeamId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub role: TeamRole,
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<TeamMemberDBResponse> for MemberResponse {
    fn from(db: TeamMemberDBResponse) -> Self {
        Self {
            id: db.id,
            team_id: db.team_id,
            user_id: db.user_id,
            role: db.role,
            email: db.user_email,
            name: db.user_name,
            image: db.user_image,
            created_at: db.created_at,
        }
    }
}

/// A team with its members. The SCIM token is never part of this view.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TeamResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: TeamId,
    pub name: String,
    pub slug: String,
    pub domain: Option<String>,
    #[schema(value_type = String, format = "uuid")]
    pub created_by: UserId,
    pub scim_enabled: bool,
    pub members: Vec<MemberResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TeamResponse {
    pub fn new(team: TeamDBResponse, members: Vec<TeamMemberDBResponse>) -> Self {
        Self {
            id: team.id,
            name: team.name,
            slug: team.slug,
            domain: team.domain,
            created_by: team.created_by,
            scim_enabled: team.scim_enabled,
            members: members.into_iter().map(MemberResponse::from).collect(),
            created_at: team.created_at,
            updated_at: team.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MemberCountResponse {
    pub count: i64,
}

fn default_member_role() -> TeamRole {
    TeamRole::Member
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MemberCreate {
    pub email: String,
    #[serde(default = "default_member_role")]
    pub role: TeamRole,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MemberUpdate {
    pub role: TeamRole,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct InvitationCreate {
    pub email: String,
    #[serde(default = "default_member_role")]
    pub role: TeamRole,
}

/// Invitation as shown to team admins and to the invitee.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvitationResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: InvitationId,
    #[schema(value_type = String, format = "uuid")]
    pub team_id: TeamId,
    pub email: String,
    pub role: TeamRole,
    pub status: InvitationStatus,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
}

impl From<InvitationDBResponse> for InvitationResponse {
    fn from(db: InvitationDBResponse) -> Self {
        Self {
            id: db.id,
            team_id: db.team_id,
            email: db.email,
            role: db.role,
            status: db.status,
            token: db.token,
            expires_at: db.expires_at,
            created_at: db.created_at,
            team_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_distinguishes_null_from_missing() {
        let update: TeamUpdate = serde_json::from_value(json!({"domain": null})).unwrap();
        assert_eq!(update.domain, Some(None));

        let update: TeamUpdate = serde_json::from_value(json!({"name": "New"})).unwrap();
        assert_eq!(update.domain, None);
        assert_eq!(update.name.as_deref(), Some("New"));
    }

    #[test]
    fn test_member_role_defaults_to_member() {
        let request: MemberCreate = serde_json::from_value(json!({"email": "a@b.com"})).unwrap();
        assert_eq!(request.role, TeamRole::Member);
    }
}
