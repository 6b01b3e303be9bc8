//! Transactional email: team invitations, membership/SSO notices, password resets and email
//! verification.
//!
//! Bodies are rendered from the HTML templates in `templates/email` with minijinja (HTML
//! autoescaping on) and sent through SMTP or, in development and tests, written to a directory
//! as `.eml` files.

use futures::future::join_all;
use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use minijinja::{Environment, Value, context};
use std::path::Path;
use tracing::{instrument, warn};

use crate::{
    config::{Config, EmailTransportConfig},
    errors::Error,
    types::TeamRole,
};

const TEMPLATES: [(&str, &str); 7] = [
    ("base.html", include_str!("../templates/email/base.html")),
    ("invitation.html", include_str!("../templates/email/invitation.html")),
    ("role_change.html", include_str!("../templates/email/role_change.html")),
    ("member_removal.html", include_str!("../templates/email/member_removal.html")),
    ("sso_update.html", include_str!("../templates/email/sso_update.html")),
    ("password_reset.html", include_str!("../templates/email/password_reset.html")),
    ("email_verification.html", include_str!("../templates/email/email_verification.html")),
];

/// Rendered message ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

pub struct EmailService {
    transport: EmailTransport,
    templates: Environment<'static>,
    from_email: String,
    from_name: String,
    app_url: String,
    invitation_days: u64,
    password_reset_hours: u64,
    email_verification_hours: u64,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

fn template_error(e: minijinja::Error) -> Error {
    Error::Internal {
        operation: format!("render email template: {e:#}"),
    }
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let email_config = &config.email;

        let transport = match &email_config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port)
                .credentials(Credentials::new(username.clone(), password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportConfig::File { path } => {
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        let mut templates = Environment::new();
        for (name, source) in TEMPLATES {
            templates.add_template(name, source).map_err(template_error)?;
        }

        Ok(Self {
            transport,
            templates,
            from_email: email_config.from_email.clone(),
            from_name: email_config.from_name.clone(),
            app_url: config.app_url.trim_end_matches('/').to_string(),
            invitation_days: config.invitations.expiry.as_secs() / 86_400,
            password_reset_hours: config.auth.password_reset_expiry.as_secs() / 3_600,
            email_verification_hours: config.auth.email_verification_expiry.as_secs() / 3_600,
        })
    }

    /// Absolute app link; marked safe so autoescaping leaves the slashes alone.
    fn link(&self, path: &str) -> Value {
        Value::from_safe_string(format!("{}{}", self.app_url, path))
    }

    fn render(&self, template: &str, subject: String, ctx: Value) -> Result<RenderedEmail, Error> {
        let html = self
            .templates
            .get_template(template)
            .and_then(|t| t.render(ctx))
            .map_err(template_error)?;
        Ok(RenderedEmail { subject, html })
    }

    pub fn render_invitation(&self, team_name: &str, inviter: &str, role: TeamRole, token: &str) -> Result<RenderedEmail, Error> {
        self.render(
            "invitation.html",
            format!("Invitation to join {team_name} on Blueprint Club"),
            context! {
                team_name,
                inviter,
                role => role.as_str(),
                accept_url => self.link(&format!("/teams/join/{token}")),
                expires_in_days => self.invitation_days,
            },
        )
    }

    pub fn render_role_change(
        &self,
        recipient: &str,
        team_name: &str,
        team_slug: &str,
        old_role: TeamRole,
        new_role: TeamRole,
        updated_by: &str,
    ) -> Result<RenderedEmail, Error> {
        self.render(
            "role_change.html",
            format!("Role Update in {team_name}"),
            context! {
                recipient,
                team_name,
                old_role => old_role.as_str(),
                new_role => new_role.as_str(),
                updated_by,
                team_url => self.link(&format!("/teams/{team_slug}")),
            },
        )
    }

    pub fn render_member_removal(&self, recipient: &str, team_name: &str, removed_by: &str) -> Result<RenderedEmail, Error> {
        self.render(
            "member_removal.html",
            format!("Removed from {team_name}"),
            context! { recipient, team_name, removed_by },
        )
    }

    pub fn render_sso_update(&self, team_name: &str, team_slug: &str, action: &str, updated_by: &str) -> Result<RenderedEmail, Error> {
        self.render(
            "sso_update.html",
            format!("SSO Configuration Updated for {team_name}"),
            context! {
                team_name,
                action,
                updated_by,
                sso_url => self.link(&format!("/teams/{team_slug}/sso")),
            },
        )
    }

    pub fn render_password_reset(&self, recipient: &str, token: &str) -> Result<RenderedEmail, Error> {
        self.render(
            "password_reset.html",
            "Reset your password - Blueprint Club".to_string(),
            context! {
                recipient,
                reset_url => self.link(&format!("/auth/reset-password?token={token}")),
                expires_in_hours => self.password_reset_hours,
            },
        )
    }

    pub fn render_email_verification(&self, token: &str) -> Result<RenderedEmail, Error> {
        self.render(
            "email_verification.html",
            "Verify your email - Blueprint Club".to_string(),
            context! {
                verify_url => self.link(&format!("/auth/verify?token={token}")),
                expires_in_hours => self.email_verification_hours,
            },
        )
    }

    #[instrument(skip_all, err)]
    pub async fn send_password_reset(&self, to_email: &str, to_name: Option<&str>, token: &str) -> Result<(), Error> {
        let email = self.render_password_reset(to_name.unwrap_or(to_email), token)?;
        self.send_email(to_email, to_name, &email).await
    }

    #[instrument(skip_all, err)]
    pub async fn send_email_verification(&self, to_email: &str, to_name: Option<&str>, token: &str) -> Result<(), Error> {
        let email = self.render_email_verification(token)?;
        self.send_email(to_email, to_name, &email).await
    }

    #[instrument(skip(self, team_name, inviter, token), err)]
    pub async fn send_invitation(&self, to_email: &str, team_name: &str, inviter: &str, role: TeamRole, token: &str) -> Result<(), Error> {
        let email = self.render_invitation(team_name, inviter, role, token)?;
        self.send_email(to_email, None, &email).await
    }

    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, err)]
    pub async fn send_role_change(
        &self,
        to_email: &str,
        to_name: Option<&str>,
        team_name: &str,
        team_slug: &str,
        old_role: TeamRole,
        new_role: TeamRole,
        updated_by: &str,
    ) -> Result<(), Error> {
        let recipient = to_name.unwrap_or(to_email);
        let email = self.render_role_change(recipient, team_name, team_slug, old_role, new_role, updated_by)?;
        self.send_email(to_email, to_name, &email).await
    }

    #[instrument(skip_all, err)]
    pub async fn send_member_removal(&self, to_email: &str, to_name: Option<&str>, team_name: &str, removed_by: &str) -> Result<(), Error> {
        let recipient = to_name.unwrap_or(to_email);
        let email = self.render_member_removal(recipient, team_name, removed_by)?;
        self.send_email(to_email, to_name, &email).await
    }

    /// Notify every recipient; one failed address doesn't stop the others.
    #[instrument(skip_all, fields(recipients = recipients.len()))]
    pub async fn send_sso_update(&self, recipients: &[String], team_name: &str, team_slug: &str, action: &str, updated_by: &str) -> usize {
        let email = match self.render_sso_update(team_name, team_slug, action, updated_by) {
            Ok(email) => email,
            Err(e) => {
                warn!("Failed to render SSO notice: {}", e);
                return 0;
            }
        };

        let results = join_all(recipients.iter().map(|to| self.send_email(to, None, &email))).await;
        results
            .into_iter()
            .filter(|result| match result {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to send SSO notice: {}", e);
                    false
                }
            })
            .count()
    }

    async fn send_email(&self, to_email: &str, to_name: Option<&str>, email: &RenderedEmail) -> Result<(), Error> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::Internal {
                operation: format!("parse from email: {e}"),
            })?;

        let to = if let Some(name) = to_name {
            format!("{name} <{to_email}>")
        } else {
            to_email.to_string()
        }
        .parse::<Mailbox>()
        .map_err(|e| Error::Internal {
            operation: format!("parse to email: {e}"),
        })?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone())
            .map_err(|e| Error::Internal {
                operation: format!("build email message: {e}"),
            })?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send file email: {e}"),
                })?;
            }
        }

        Ok(())
    }
}
