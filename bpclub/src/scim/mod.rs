//! SCIM 2.0 resource representations for user and group provisioning.
//!
//! Identity providers push users and groups to `/api/scim/v2.0/...`. Rows are stored per team;
//! this module converts between the SCIM wire shapes and those rows, and implements the list
//! envelope, `startIndex`/`count` paging and the `attr eq "value"` filter subset.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use std::sync::LazyLock;
use uuid::Uuid;

use crate::db::models::identity::{ScimGroup, ScimGroupWrite, ScimUser, ScimUserWrite};
use crate::errors::Error;

pub const USER_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:User";
pub const GROUP_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:Group";
pub const LIST_RESPONSE_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:ListResponse";

const DEFAULT_COUNT: i64 = 100;
const MAX_COUNT: i64 = 200;

static EQ_FILTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)^\s*([A-Za-z][\w.]*)\s+eq\s+"((?:[^"\\]|\\.)*)"\s*$"#).expect("valid regex"));

/// Resource collections served under the SCIM base path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Users,
    Groups,
}

impl ResourceType {
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "Users" => Some(Self::Users),
            "Groups" => Some(Self::Groups),
            _ => None,
        }
    }

    /// The one attribute each collection can be filtered on.
    pub fn filter_attribute(self) -> &'static str {
        match self {
            Self::Users => "userName",
            Self::Groups => "displayName",
        }
    }
}

/// `attribute eq "value"`, the only filter form supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EqFilter {
    pub attribute: String,
    pub value: String,
}

pub fn parse_filter(filter: &str) -> Result<EqFilter, Error> {
    let captures = EQ_FILTER.captures(filter).ok_or_else(|| Error::BadRequest {
        message: "Unsupported filter".to_string(),
    })?;

    Ok(EqFilter {
        attribute: captures[1].to_string(),
        value: captures[2].replace("\\\"", "\"").replace("\\\\", "\\"),
    })
}

/// Query parameters of a SCIM list request.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub start_index: Option<i64>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub count: Option<i64>,
    #[serde(default)]
    pub filter: Option<String>,
}

impl ListQuery {
    /// 1-based start index, clamped to at least 1.
    pub fn start_index(&self) -> i64 {
        self.start_index.unwrap_or(1).max(1)
    }

    pub fn count(&self) -> i64 {
        self.count.unwrap_or(DEFAULT_COUNT).clamp(0, MAX_COUNT)
    }

    pub fn offset(&self) -> i64 {
        self.start_index() - 1
    }

    /// Value to match for `resource`, or `None` when unfiltered.
    ///
    /// Filters on any attribute other than the collection's key attribute are rejected.
    pub fn filter_value(&self, resource: ResourceType) -> Result<Option<String>, Error> {
        let Some(filter) = self.filter.as_deref().filter(|f| !f.trim().is_empty()) else {
            return Ok(None);
        };

        let parsed = parse_filter(filter)?;
        if !parsed.attribute.eq_ignore_ascii_case(resource.filter_attribute()) {
            return Err(Error::BadRequest {
                message: format!("Filtering on {} is not supported", parsed.attribute),
            });
        }
        Ok(Some(parsed.value))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    pub schemas: Vec<&'static str>,
    pub total_results: i64,
    pub start_index: i64,
    pub items_per_page: i64,
    #[serde(rename = "Resources")]
    pub resources: Vec<T>,
}

impl<T> ListResponse<T> {
    pub fn new(resources: Vec<T>, total_results: i64, query: &ListQuery) -> Self {
        Self {
            schemas: vec![LIST_RESPONSE_SCHEMA],
            total_results,
            start_index: query.start_index(),
            items_per_page: resources.len() as i64,
            resources,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub resource_type: &'static str,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Name {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub value: String,
    #[serde(default)]
    pub primary: bool,
}

/// Body of a user create or replace.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPayload {
    pub user_name: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub name: Option<Name>,
    #[serde(default)]
    pub emails: Vec<Email>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl UserPayload {
    /// Convert to a row write, keeping the raw body for attributes we don't model.
    pub fn into_write(self, raw: serde_json::Value) -> Result<ScimUserWrite, Error> {
        let user_name = self
            .user_name
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::BadRequest {
                message: "userName is required".to_string(),
            })?;

        let email = self
            .emails
            .iter()
            .find(|e| e.primary)
            .or_else(|| self.emails.first())
            .map(|e| e.value.clone());
        let name = self.name.unwrap_or_default();

        Ok(ScimUserWrite {
            external_id: self.external_id,
            user_name,
            display_name: self.display_name,
            given_name: name.given_name,
            family_name: name.family_name,
            email,
            active: self.active.unwrap_or(true),
            raw,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResource {
    pub schemas: Vec<&'static str>,
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub name: Name,
    pub emails: Vec<Email>,
    pub active: bool,
    pub meta: Meta,
}

impl From<ScimUser> for UserResource {
    fn from(user: ScimUser) -> Self {
        Self {
            schemas: vec![USER_SCHEMA],
            id: user.id,
            external_id: user.external_id,
            user_name: user.user_name,
            display_name: user.display_name,
            name: Name {
                given_name: user.given_name,
                family_name: user.family_name,
            },
            emails: user
                .email
                .map(|value| vec![Email { value, primary: true }])
                .unwrap_or_default(),
            active: user.active,
            meta: Meta {
                resource_type: "User",
                created: user.created_at,
                last_modified: user.updated_at,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRef {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// Body of a group create or replace.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPayload {
    pub display_name: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub members: Vec<MemberRef>,
}

impl GroupPayload {
    /// Member references that aren't our user ids are dropped.
    pub fn into_write(self, raw: serde_json::Value) -> Result<ScimGroupWrite, Error> {
        let display_name = self
            .display_name
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| Error::BadRequest {
                message: "displayName is required".to_string(),
            })?;

        Ok(ScimGroupWrite {
            external_id: self.external_id,
            display_name,
            member_ids: self.members.iter().filter_map(|m| m.value.parse().ok()).collect(),
            raw,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupResource {
    pub schemas: Vec<&'static str>,
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub display_name: String,
    pub members: Vec<MemberRef>,
    pub meta: Meta,
}

impl GroupResource {
    pub fn new(group: ScimGroup, members: Vec<(Uuid, String)>) -> Self {
        Self {
            schemas: vec![GROUP_SCHEMA],
            id: group.id,
            external_id: group.external_id,
            display_name: group.display_name,
            members: members
                .into_iter()
                .map(|(id, user_name)| MemberRef {
                    value: id.to_string(),
                    display: Some(user_name),
                })
                .collect(),
            meta: Meta {
                resource_type: "Group",
                created: group.created_at,
                last_modified: group.updated_at,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_filter() {
        let filter = parse_filter(r#"userName eq "alice@example.com""#).unwrap();
        assert_eq!(filter.attribute, "userName");
        assert_eq!(filter.value, "alice@example.com");

        let escaped = parse_filter(r#"displayName EQ "The \"A\" team""#).unwrap();
        assert_eq!(escaped.value, r#"The "A" team"#);

        assert!(parse_filter(r#"userName co "ali""#).is_err());
        assert!(parse_filter("userName eq alice").is_err());
    }

    #[test]
    fn test_filter_attribute_must_match_resource() {
        let query = ListQuery {
            filter: Some(r#"username eq "bob""#.to_string()),
            ..Default::default()
        };
        assert_eq!(query.filter_value(ResourceType::Users).unwrap().as_deref(), Some("bob"));

        let err = query.filter_value(ResourceType::Groups).unwrap_err();
        assert_eq!(err.user_message(), "Filtering on username is not supported");
    }

    #[test]
    fn test_paging_defaults_and_clamps() {
        let query = ListQuery::default();
        assert_eq!((query.start_index(), query.count(), query.offset()), (1, 100, 0));

        let query = ListQuery {
            start_index: Some(0),
            count: Some(1000),
            filter: None,
        };
        assert_eq!((query.start_index(), query.count(), query.offset()), (1, 200, 0));

        let query = ListQuery {
            start_index: Some(11),
            count: Some(10),
            filter: None,
        };
        assert_eq!(query.offset(), 10);
    }

    #[test]
    fn test_list_response_envelope() {
        let query = ListQuery {
            start_index: Some(3),
            ..Default::default()
        };
        let body = serde_json::to_value(ListResponse::new(vec![json!({"id": 1})], 7, &query)).unwrap();
        assert_eq!(
            body,
            json!({
                "schemas": [LIST_RESPONSE_SCHEMA],
                "totalResults": 7,
                "startIndex": 3,
                "itemsPerPage": 1,
                "Resources": [{"id": 1}],
            })
        );
    }

    #[test]
    fn test_user_payload_picks_primary_email() {
        let body = json!({
            "userName": "alice",
            "name": {"givenName": "Alice", "familyName": "Liddell"},
            "emails": [
                {"value": "work@example.com"},
                {"value": "alice@example.com", "primary": true}
            ]
        });
        let payload: UserPayload = serde_json::from_value(body.clone()).unwrap();
        let write = payload.into_write(body).unwrap();

        assert_eq!(write.user_name, "alice");
        assert_eq!(write.email.as_deref(), Some("alice@example.com"));
        assert_eq!(write.given_name.as_deref(), Some("Alice"));
        assert!(write.active);
    }

    #[test]
    fn test_user_payload_requires_user_name() {
        let payload: UserPayload = serde_json::from_value(json!({"displayName": "x"})).unwrap();
        let err = payload.into_write(json!({})).unwrap_err();
        assert_eq!(err.user_message(), "userName is required");
    }

    #[test]
    fn test_group_payload_drops_foreign_member_refs() {
        let id = Uuid::new_v4();
        let payload: GroupPayload = serde_json::from_value(json!({
            "displayName": "Engineering",
            "members": [{"value": id.to_string()}, {"value": "external-42"}]
        }))
        .unwrap();
        let write = payload.into_write(json!({})).unwrap();
        assert_eq!(write.member_ids, vec![id]);
    }

    #[test]
    fn test_resource_type_parse() {
        assert_eq!(ResourceType::parse("Users"), Some(ResourceType::Users));
        assert_eq!(ResourceType::parse("Groups"), Some(ResourceType::Groups));
        assert_eq!(ResourceType::parse("Schemas"), None);
    }
}
