//! API models for a team's SCIM and SAML settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::models::{identity::SamlConnection, teams::TeamDBResponse};
use crate::types::TeamId;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScimSettingsResponse {
    pub scim_enabled: bool,
    pub scim_token: Option<String>,
}

impl From<TeamDBResponse> for ScimSettingsResponse {
    fn from(team: TeamDBResponse) -> Self {
        Self {
            scim_enabled: team.scim_enabled,
            scim_token: team.scim_token,
        }
    }
}

/// `enabled` is optional in the schema so a missing value can be reported as a 400.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ScimSettingsUpdate {
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SamlConnectionCreate {
    /// Base64 encoded IdP metadata XML
    #[serde(default)]
    pub encoded_raw_metadata: Option<String>,
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub default_redirect_url: Option<String>,
    /// Defaults to the team slug
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SamlConnectionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    #[schema(value_type = String, format = "uuid")]
    pub team_id: TeamId,
    pub tenant: String,
    pub product: String,
    pub entity_id: String,
    pub sso_url: String,
    pub certificate: String,
    /// Our assertion consumer service URL to register with the IdP
    pub acs_url: String,
    pub redirect_url: Option<String>,
    pub default_redirect_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SamlConnectionResponse {
    pub fn new(connection: SamlConnection, acs_url: String) -> Self {
        Self {
            id: connection.id,
            team_id: connection.team_id,
            tenant: connection.tenant,
            product: connection.product,
            entity_id: connection.entity_id,
            sso_url: connection.sso_url,
            certificate: connection.certificate,
            acs_url,
            redirect_url: connection.redirect_url,
            default_redirect_url: connection.default_redirect_url,
            created_at: connection.created_at,
            updated_at: connection.updated_at,
        }
    }
}
