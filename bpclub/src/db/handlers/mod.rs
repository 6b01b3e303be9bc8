//! Repository implementations for database access.
//!
//! Each repository wraps a `&mut PgConnection`, so it can be built from a pooled connection for
//! single statements or from a transaction when several writes must commit together:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! let team = Teams::new(&mut tx).create(&request).await?;
//! Members::new(&mut tx).add(team.id, user.id, TeamRole::Owner).await?;
//! tx.commit().await?;
//! ```
//!
//! - [`Users`], [`Sessions`]: accounts and login sessions
//! - [`VerificationTokens`]: password reset and email verification links
//! - [`Teams`], [`Members`], [`Invitations`]: tenancy
//! - [`AuditLogs`]: audit trail queries
//! - [`Webhooks`]: webhook configuration and delivery log
//! - [`Subscriptions`]: billing state and usage
//! - [`ScimUsers`], [`ScimGroups`], [`SamlConnections`]: identity bridge
//! - [`TutorSessions`]: AI tutor quotas

pub mod audit_logs;
pub mod identity;
pub mod invitations;
pub mod subscriptions;
pub mod teams;
pub mod tutor;
pub mod users;
pub mod verification_tokens;
pub mod webhooks;

pub use audit_logs::AuditLogs;
pub use identity::{SamlConnections, ScimGroups, ScimUsers};
pub use invitations::Invitations;
pub use subscriptions::Subscriptions;
pub use teams::{Members, Teams};
pub use tutor::TutorSessions;
pub use users::{Sessions, Users};
pub use verification_tokens::VerificationTokens;
pub use webhooks::Webhooks;
