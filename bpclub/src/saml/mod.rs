//! SAML identity-provider metadata handling.
//!
//! Only connection configuration lives here: the uploaded IdP metadata is decoded, the entity
//! id, SSO endpoint and signing certificate are pulled out, and the result is validated before
//! it is stored. Assertion validation is left to the identity provider integration.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use regex::Regex;
use std::sync::LazyLock;

use crate::config::Config;
use crate::errors::Error;

static ENTITY_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<(?:\w+:)?EntityDescriptor\b[^>]*?\bentityID\s*=\s*(?:"([^"]+)"|'([^']+)')"#).expect("valid regex")
});

static SSO_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<(?:\w+:)?SingleSignOnService\b[^>]*?\bLocation\s*=\s*(?:"([^"]+)"|'([^']+)')"#).expect("valid regex")
});

static KEY_DESCRIPTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:\w+:)?KeyDescriptor\b([^>]*)>(.*?)</(?:\w+:)?KeyDescriptor>").expect("valid regex")
});

static KEY_USE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\buse\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex"));

static CERTIFICATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<(?:\w+:)?X509Certificate>\s*(.*?)\s*</(?:\w+:)?X509Certificate>").expect("valid regex"));

/// Fields extracted from IdP metadata. Missing values are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdpMetadata {
    pub entity_id: String,
    pub sso_url: String,
    /// Base64 DER of the first signing certificate, whitespace removed
    pub certificate: String,
}

/// First match of a pattern whose alternatives each capture one group.
fn capture(re: &Regex, text: &str) -> String {
    re.captures(text)
        .and_then(|c| c.iter().skip(1).flatten().next())
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// The certificate of the first key usable for signing: `use="signing"` or no `use` at all.
/// Metadata without key descriptors falls back to the first certificate in the document.
fn signing_certificate(xml: &str) -> String {
    let mut descriptors = KEY_DESCRIPTOR.captures_iter(xml).peekable();
    if descriptors.peek().is_none() {
        return capture(&CERTIFICATE, xml);
    }

    descriptors
        .filter(|descriptor| {
            let attributes = descriptor.get(1).map_or("", |m| m.as_str());
            let key_use = capture(&KEY_USE, attributes);
            key_use.is_empty() || key_use == "signing"
        })
        .map(|descriptor| capture(&CERTIFICATE, descriptor.get(2).map_or("", |m| m.as_str())))
        .find(|certificate| !certificate.is_empty())
        .unwrap_or_default()
}

/// Decode base64 metadata XML and extract the connection fields.
pub fn parse_metadata(encoded: &str) -> Result<IdpMetadata, Error> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64_STANDARD.decode(compact).map_err(|_| Error::BadRequest {
        message: "SAML metadata must be base64 encoded".to_string(),
    })?;
    let xml = String::from_utf8(bytes).map_err(|_| Error::BadRequest {
        message: "SAML metadata is not valid UTF-8".to_string(),
    })?;

    Ok(IdpMetadata {
        entity_id: capture(&ENTITY_ID, &xml),
        sso_url: capture(&SSO_LOCATION, &xml),
        certificate: signing_certificate(&xml).split_whitespace().collect(),
    })
}

/// A connection as checked before saving.
#[derive(Debug, Clone)]
pub struct SamlSettings<'a> {
    pub entity_id: &'a str,
    pub acs_url: &'a str,
    pub idp_url: &'a str,
    pub certificate: &'a str,
}

/// `None` when complete, otherwise a message naming every missing field.
pub fn validate_saml_config(settings: &SamlSettings<'_>) -> Option<String> {
    let missing: Vec<&str> = [
        ("entityId", settings.entity_id),
        ("acsUrl", settings.acs_url),
        ("idpUrl", settings.idp_url),
        ("certificate", settings.certificate),
    ]
    .into_iter()
    .filter(|(_, value)| value.is_empty())
    .map(|(name, _)| name)
    .collect();

    if missing.is_empty() {
        None
    } else {
        Some(format!("Missing required fields: {}", missing.join(", ")))
    }
}

/// Our assertion consumer service URL.
pub fn acs_url(config: &Config) -> String {
    format!("{}{}", config.app_url.trim_end_matches('/'), config.saml.acs_path)
}
