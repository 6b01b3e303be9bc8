//! Database models for SCIM provisioning and SAML connections.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::TeamId;

#[derive(Debug, Clone, FromRow)]
pub struct ScimUser {
    pub id: Uuid,
    pub team_id: TeamId,
    pub external_id: Option<String>,
    pub user_name: String,
    pub display_name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub email: Option<String>,
    pub active: bool,
    pub raw: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Columns written on SCIM create and replace.
#[derive(Debug, Clone)]
pub struct ScimUserWrite {
    pub external_id: Option<String>,
    pub user_name: String,
    pub display_name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub email: Option<String>,
    pub active: bool,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, FromRow)]
pub struct ScimGroup {
    pub id: Uuid,
    pub team_id: TeamId,
    pub external_id: Option<String>,
    pub display_name: String,
    pub raw: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ScimGroupWrite {
    pub external_id: Option<String>,
    pub display_name: String,
    pub member_ids: Vec<Uuid>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, FromRow)]
pub struct SamlConnection {
    pub id: Uuid,
    pub team_id: TeamId,
    pub tenant: String,
    pub product: String,
    pub encoded_metadata: String,
    pub entity_id: String,
    pub sso_url: String,
    pub certificate: String,
    pub redirect_url: Option<String>,
    pub default_redirect_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SamlConnectionUpsert {
    pub team_id: TeamId,
    pub tenant: String,
    pub product: String,
    pub encoded_metadata: String,
    pub entity_id: String,
    pub sso_url: String,
    pub certificate: String,
    pub redirect_url: Option<String>,
    pub default_redirect_url: Option<String>,
}
