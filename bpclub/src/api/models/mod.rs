//! API request and response data models.
//!
//! These structures define the public JSON contract. They are kept separate from the database
//! records in [`crate::db::models`] and convert from them with `From` impls, so the storage
//! and wire representations can change independently. Every model is annotated with `utoipa`
//! for the generated API docs, and responses use camelCase field names.
//!
//! - [`users`]: accounts, login payloads and sessions
//! - [`teams`]: teams, members and invitations
//! - [`audit_logs`]: audit trail queries and pages
//! - [`webhooks`]: webhook configuration and deliveries
//! - [`identity`]: SCIM and SAML settings
//! - [`billing`]: subscriptions and usage
//! - [`tutor`]: AI tutor questions and sessions
//! - [`pagination`]: page/limit parameters shared by list endpoints

use serde::{Deserialize, Deserializer};

pub mod audit_logs;
pub mod billing;
pub mod identity;
pub mod pagination;
pub mod teams;
pub mod tutor;
pub mod users;
pub mod webhooks;

/// Deserialize a field that distinguishes "absent" (`None`, via `#[serde(default)]`) from
/// an explicit `null` (`Some(None)`).
pub(crate) fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
