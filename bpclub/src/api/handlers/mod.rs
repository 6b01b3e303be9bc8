//! HTTP request handlers for all API endpoints.
//!
//! Handlers are Axum functions grouped by resource. Each one validates its input, checks the
//! caller's team role, runs its writes through the repositories in [`crate::db::handlers`], then
//! records an audit entry and fires webhooks once the data is committed.
//!
//! # Handler Modules
//!
//! - [`auth`]: Registration, login, logout and session management
//! - [`teams`]: Team CRUD and member counts
//! - [`members`]: Membership and role changes
//! - [`invitations`]: Email invitations and acceptance
//! - [`audit_logs`]: Audit trail listing and CSV export
//! - [`webhooks`]: Webhook configuration, delivery history and test pings
//! - [`scim`]: SCIM settings and the SCIM 2.0 provisioning endpoints
//! - [`saml`]: SAML connection configuration
//! - [`billing`]: Plans, subscriptions, the payment provider webhook and usage
//! - [`tutor`]: AI tutor answers, sessions and speech
//!
//! # Authentication
//!
//! Browser endpoints take a [`crate::api::models::users::CurrentUser`] extractor, which reads
//! the session cookie. SCIM provisioning authenticates with the team's bearer token instead.
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`], which maps to a status code and a JSON
//! `{"error": "..."}` body.

pub mod audit_logs;
pub mod auth;
pub mod billing;
pub mod invitations;
pub mod members;
pub mod saml;
pub mod scim;
pub mod teams;
pub mod tutor;
pub mod webhooks;
