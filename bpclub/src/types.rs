//! Common type definitions and the team permission vocabulary.
//!
//! # ID Types
//!
//! All entity IDs are UUIDs wrapped in type aliases for readability:
//!
//! - [`UserId`]: User account identifier
//! - [`TeamId`]: Team (tenant) identifier
//! - [`WebhookId`]: Team webhook identifier
//! - [`SessionId`]: Login session identifier
//!
//! # Permissions
//!
//! Authorization is team scoped. A handler states which [`Operation`] it performs on which
//! resource and the minimum [`TeamRole`] it needs; see `auth::permissions`.
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type TeamId = Uuid;
pub type MemberId = Uuid;
pub type InvitationId = Uuid;
pub type WebhookId = Uuid;
pub type DeliveryId = Uuid;
pub type SessionId = Uuid;
pub type SubscriptionId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Role of a user inside one team.
///
/// Ordered from most to least privileged; `OWNER > ADMIN > MEMBER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TeamRole {
    Owner,
    Admin,
    Member,
}

impl TeamRole {
    fn rank(self) -> u8 {
        match self {
            TeamRole::Owner => 2,
            TeamRole::Admin => 1,
            TeamRole::Member => 0,
        }
    }

    /// True when this role grants at least the privileges of `required`.
    pub fn at_least(self, required: TeamRole) -> bool {
        self.rank() >= required.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TeamRole::Owner => "OWNER",
            TeamRole::Admin => "ADMIN",
            TeamRole::Member => "MEMBER",
        }
    }
}

impl fmt::Display for TeamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Operations that can be performed on resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
    Export,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => write!(f, "read"),
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
            Operation::Export => write!(f, "export"),
        }
    }
}
