//! Authentication and team authorization.
//!
//! Browser sessions are HS256 JWTs carried in an HTTP-only cookie. Each token names a
//! `user_sessions` row in its `sid` claim; the [`CurrentUser`](crate::api::models::users::CurrentUser)
//! extractor rejects tokens whose session was revoked, so logging out (or revoking a device from
//! the sessions list) takes effect before the JWT expires.
//!
//! Authorization is per team. Handlers call into [`permissions`] with the minimum
//! [`TeamRole`](crate::types::TeamRole) an operation needs.
//!
//! # Modules
//!
//! - [`current_user`]: extractor resolving the session cookie to a user
//! - [`password`]: Argon2id hashing and length rules
//! - [`permissions`]: team membership and role checks
//! - [`session`]: JWT claims and cookie formatting

pub mod current_user;
pub mod password;
pub mod permissions;
pub mod session;
