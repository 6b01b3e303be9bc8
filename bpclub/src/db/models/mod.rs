//! Database record models matching table schemas.
//!
//! These structs derive `sqlx::FromRow` and are returned by the repositories in
//! [`crate::db::handlers`]. API representations live in [`crate::api::models`] and convert from
//! these with `From` impls, so storage and wire formats can change independently.

pub mod audit_logs;
pub mod identity;
pub mod subscriptions;
pub mod teams;
pub mod tutor;
pub mod users;
pub mod verification_tokens;
pub mod webhooks;
