//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! Everything is mounted under `/api`:
//!
//! - **Authentication** (`/auth/*`): Registration, login and sessions
//! - **Teams** (`/teams/*`): Teams, members, invitations, audit logs, webhooks, SCIM and SAML
//!   settings
//! - **SCIM** (`/scim/v2.0/*`): Provisioning for identity providers
//! - **Billing** (`/billing/*`, `/stripe/*`): Plans, subscriptions and usage
//! - **AI tutor** (`/aitutor/*`): Answers, whiteboard lessons and speech
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa` annotations. The API reference is served at
//! `/docs` when the server is running.

pub mod handlers;
pub mod models;
