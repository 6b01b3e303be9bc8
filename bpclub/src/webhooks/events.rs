//! Catalog of events a team webhook can subscribe to.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

macro_rules! webhook_events {
    ($($variant:ident => $name:literal,)+) => {
        /// A named domain event delivered to subscribed webhooks.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
        pub enum WebhookEvent {
            $(
                #[serde(rename = $name)]
                $variant,
            )+
        }

        impl WebhookEvent {
            /// Every event, in catalog order.
            pub const ALL: &'static [WebhookEvent] = &[$(WebhookEvent::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(WebhookEvent::$variant => $name,)+
                }
            }
        }

        impl FromStr for WebhookEvent {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(WebhookEvent::$variant),)+
                    _ => Err(format!("Unknown event type: {s}")),
                }
            }
        }
    };
}

webhook_events! {
    TeamCreated => "team.created",
    TeamUpdated => "team.updated",
    TeamDeleted => "team.deleted",
    MemberInvited => "member.invited",
    MemberAdded => "member.added",
    MemberUpdated => "member.updated",
    MemberRemoved => "member.removed",
    SsoConfigured => "sso.configured",
    SsoUpdated => "sso.updated",
    SsoDeleted => "sso.deleted",
    SsoLoginSuccess => "sso.login.success",
    SsoLoginFailed => "sso.login.failed",
    ScimEnabled => "scim.enabled",
    ScimDisabled => "scim.disabled",
    ScimUserCreated => "scim.user.created",
    ScimUserUpdated => "scim.user.updated",
    ScimUserDeleted => "scim.user.deleted",
    ScimGroupCreated => "scim.group.created",
    ScimGroupUpdated => "scim.group.updated",
    ScimGroupDeleted => "scim.group.deleted",
    SubscriptionCreated => "subscription.created",
    SubscriptionUpdated => "subscription.updated",
    SubscriptionCancelled => "subscription.cancelled",
    PaymentSucceeded => "subscription.payment.succeeded",
    PaymentFailed => "subscription.payment.failed",
    ApiKeyCreated => "security.api_key.created",
    ApiKeyDeleted => "security.api_key.deleted",
    LoginSuccess => "security.login.success",
    LoginFailed => "security.login.failed",
    AccountLocked => "security.account.locked",
    AccountUnlocked => "security.account.unlocked",
    Test => "webhook.test",
}

impl fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True when `name` is a subscribable event.
pub fn is_known_event(name: &str) -> bool {
    name.parse::<WebhookEvent>().is_ok()
}
