//! OpenAPI documentation for the `/api` surface, served by Scalar at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;

/// Session cookie for browser clients, bearer token for SCIM clients.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "CookieAuth".to_string(),
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    "bpclub_session",
                    "Session cookie set by `POST /auth/login` and `POST /auth/register`.",
                ))),
            );
            components.security_schemes.insert(
                "ScimToken".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some(
                            "Per-team SCIM token from the team's SCIM settings:\n\n\
                            ```\nAuthorization: Bearer YOUR_SCIM_TOKEN\n```",
                        ))
                        .build(),
                ),
            );
        }
    }
}

// SCIM provisioning is served by one wildcard route per method, so the resource paths are
// documented with stubs.

/// List or fetch SCIM resources.
#[utoipa::path(
    get,
    path = "/scim/v2.0/{resource}",
    tag = "scim",
    summary = "Read SCIM resources",
    description = "`resource` is `Users`, `Groups`, `Users/{id}` or `Groups/{id}`.

Lists accept `startIndex`, `count` and a `filter` of the form `attribute eq \"value\"`.",
    params(("resource" = String, Path, description = "Resource type, optionally followed by `/{id}`")),
    responses(
        (status = 200, description = "A ListResponse, or a single resource"),
        (status = 401, description = "Missing or unknown SCIM token"),
        (status = 404, description = "Resource type or resource not found"),
    ),
    security(("ScimToken" = []))
)]
#[allow(unused)]
fn scim_read() {}

/// Create a SCIM resource.
#[utoipa::path(
    post,
    path = "/scim/v2.0/{resource}",
    tag = "scim",
    summary = "Create SCIM resource",
    params(("resource" = String, Path, description = "`Users` or `Groups`")),
    responses(
        (status = 201, description = "Created resource"),
        (status = 400, description = "Invalid resource body"),
        (status = 401, description = "Missing or unknown SCIM token"),
    ),
    security(("ScimToken" = []))
)]
#[allow(unused)]
fn scim_create() {}

/// Replace a SCIM resource.
#[utoipa::path(
    put,
    path = "/scim/v2.0/{resource}/{id}",
    tag = "scim",
    summary = "Replace SCIM resource",
    params(
        ("resource" = String, Path, description = "`Users` or `Groups`"),
        ("id" = uuid::Uuid, Path, description = "Resource ID"),
    ),
    responses(
        (status = 200, description = "Updated resource"),
        (status = 401, description = "Missing or unknown SCIM token"),
        (status = 404, description = "Resource not found"),
    ),
    security(("ScimToken" = []))
)]
#[allow(unused)]
fn scim_replace() {}

/// Delete a SCIM resource.
#[utoipa::path(
    delete,
    path = "/scim/v2.0/{resource}/{id}",
    tag = "scim",
    summary = "Delete SCIM resource",
    params(
        ("resource" = String, Path, description = "`Users` or `Groups`"),
        ("id" = uuid::Uuid, Path, description = "Resource ID"),
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 401, description = "Missing or unknown SCIM token"),
        (status = 404, description = "Resource not found"),
    ),
    security(("ScimToken" = []))
)]
#[allow(unused)]
fn scim_remove() {}

#[derive(OpenApi)]
#[openapi(
    info(title = "Blueprint Club API"),
    servers(
        (url = "/api", description = "Blueprint Club API")
    ),
    modifiers(&SecurityAddon),
    security(("CookieAuth" = [])),
    paths(
        api::handlers::auth::register,
        api::handlers::auth::login,
        api::handlers::auth::logout,
        api::handlers::auth::get_session,
        api::handlers::auth::list_sessions,
        api::handlers::auth::revoke_session,
        api::handlers::auth::request_password_reset,
        api::handlers::auth::confirm_password_reset,
        api::handlers::auth::verify_email,
        api::handlers::teams::list_teams,
        api::handlers::teams::create_team,
        api::handlers::teams::count_members,
        api::handlers::teams::get_team,
        api::handlers::teams::update_team,
        api::handlers::teams::delete_team,
        api::handlers::members::list_members,
        api::handlers::members::add_member,
        api::handlers::members::get_member,
        api::handlers::members::update_member,
        api::handlers::members::remove_member,
        api::handlers::invitations::list_invitations,
        api::handlers::invitations::create_invitation,
        api::handlers::invitations::get_invitation,
        api::handlers::invitations::accept_invitation,
        api::handlers::invitations::cancel_invitation,
        api::handlers::audit_logs::list_audit_logs,
        api::handlers::audit_logs::export_audit_logs,
        api::handlers::webhooks::list_webhooks,
        api::handlers::webhooks::create_webhook,
        api::handlers::webhooks::get_webhook,
        api::handlers::webhooks::update_webhook,
        api::handlers::webhooks::delete_webhook,
        api::handlers::webhooks::list_deliveries,
        api::handlers::webhooks::test_webhook,
        api::handlers::scim::get_scim_settings,
        api::handlers::scim::update_scim_settings,
        api::handlers::scim::regenerate_scim_token,
        scim_read,
        scim_create,
        scim_replace,
        scim_remove,
        api::handlers::saml::get_saml_connection,
        api::handlers::saml::configure_saml_connection,
        api::handlers::saml::delete_saml_connection,
        api::handlers::billing::list_plans,
        api::handlers::billing::get_subscription,
        api::handlers::billing::create_subscription,
        api::handlers::billing::create_portal_session,
        api::handlers::billing::payment_webhook,
        api::handlers::billing::get_usage,
        api::handlers::billing::record_usage,
        api::handlers::tutor::process_question,
        api::handlers::tutor::whiteboard,
        api::handlers::tutor::get_session,
        api::handlers::tutor::voice,
        api::handlers::tutor::speak,
    ),
    components(
        schemas(
            // Accounts
            api::models::users::UserResponse,
            api::models::users::RegisterRequest,
            api::models::users::LoginRequest,
            api::models::users::AuthResponse,
            api::models::users::SessionResponse,
            api::models::users::PasswordResetRequest,
            api::models::users::PasswordResetConfirm,
            api::models::users::MessageResponse,
            // Teams
            api::models::teams::TeamCreate,
            api::models::teams::TeamUpdate,
            api::models::teams::TeamResponse,
            api::models::teams::MemberCountResponse,
            api::models::teams::MemberCreate,
            api::models::teams::MemberUpdate,
            api::models::teams::MemberResponse,
            api::models::teams::InvitationCreate,
            api::models::teams::InvitationResponse,
            crate::types::TeamRole,
            crate::db::models::teams::InvitationStatus,
            // Audit
            api::models::audit_logs::AuditLogResponse,
            api::models::audit_logs::AuditLogPage,
            crate::db::models::audit_logs::AuditCategory,
            crate::db::models::audit_logs::AuditStatus,
            api::models::pagination::PaginationInfo,
            // Webhooks
            api::models::webhooks::WebhookCreate,
            api::models::webhooks::WebhookUpdate,
            api::models::webhooks::WebhookResponse,
            api::models::webhooks::WebhookWithSecretResponse,
            api::models::webhooks::DeliveryResponse,
            api::models::webhooks::DeliveryPage,
            crate::webhooks::WebhookEvent,
            crate::webhooks::DeliveryOutcome,
            // Identity
            api::models::identity::ScimSettingsResponse,
            api::models::identity::ScimSettingsUpdate,
            api::models::identity::SamlConnectionCreate,
            api::models::identity::SamlConnectionResponse,
            // Billing
            api::models::billing::PlansResponse,
            api::models::billing::SubscriptionResponse,
            api::models::billing::CurrentSubscriptionResponse,
            api::models::billing::CreateSubscriptionRequest,
            api::models::billing::CreateSubscriptionResponse,
            api::models::billing::PortalSessionResponse,
            api::models::billing::WebhookReceivedResponse,
            api::models::billing::UsageCreate,
            api::models::billing::UsageRecordResponse,
            api::models::billing::UsageResponse,
            crate::billing::PlanInfo,
            crate::billing::MemberLimit,
            crate::db::models::subscriptions::SubscriptionStatus,
            // Tutor
            api::models::tutor::QuestionRequest,
            api::models::tutor::VoiceRequest,
            api::models::tutor::VoiceResponse,
            api::models::tutor::SpeakRequest,
            api::models::tutor::RecentQuestion,
            api::models::tutor::TutorSessionResponse,
            crate::tutor::response::TutorAnswer,
            crate::tutor::response::WhiteboardContent,
        )
    ),
    tags(
        (name = "auth", description = "Registration, login, sessions, password resets and email verification"),
        (name = "teams", description = "Teams and their settings"),
        (name = "members", description = "Team membership and roles"),
        (name = "invitations", description = "Email invitations to join a team"),
        (name = "audit-logs", description = "Per-team audit trail"),
        (name = "webhooks", description = "Outbound webhooks for team events"),
        (name = "identity", description = "SCIM and SAML configuration"),
        (name = "scim", description = "SCIM 2.0 provisioning"),
        (name = "billing", description = "Plans, subscriptions and usage"),
        (name = "tutor", description = "AI tutor"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_route_group_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/auth/login",
            "/auth/reset-password",
            "/auth/verify",
            "/teams/{team_id}/members/{member_id}",
            "/teams/{team_id}/webhooks/{webhook_id}/test",
            "/scim/v2.0/{resource}",
            "/stripe/webhook",
            "/aitutor/speak",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path} is not documented");
        }

        let schemes = &doc.components.as_ref().unwrap().security_schemes;
        assert!(schemes.contains_key("CookieAuth"));
        assert!(schemes.contains_key("ScimToken"));
    }
}
