//! HMAC-SHA256 signing of outbound webhook bodies.
//!
//! Receivers verify `X-Webhook-Signature: sha256={hex}` by computing HMAC-SHA256 over the raw
//! request body with the webhook's secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::crypto;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Prefix of the signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Generate a new webhook secret: 32 random bytes, hex encoded.
pub fn generate_secret() -> String {
    crypto::generate_token()
}

/// Hex HMAC-SHA256 of `payload` keyed by `secret`.
pub fn sign_payload(payload: &str, secret: &str) -> String {
    // HMAC accepts keys of any length, so this cannot fail
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap_or_else(|_| unreachable!());
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Value for [`SIGNATURE_HEADER`].
pub fn signature_header(payload: &str, secret: &str) -> String {
    format!("{SIGNATURE_PREFIX}{}", sign_payload(payload, secret))
}

/// Check a `sha256=...` header value against the payload.
pub fn verify_signature(payload: &str, header_value: &str, secret: &str) -> bool {
    let Some(given) = header_value.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    crypto::constant_time_eq(given.as_bytes(), sign_payload(payload, secret).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 64);
        assert_ne!(secret, generate_secret());
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            sign_payload("what do ya want for nothing?", "Jefe"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_sign_and_verify() {
        let secret = generate_secret();
        let payload = r#"{"event":"team.updated","data":{}}"#;
        let header = signature_header(payload, &secret);

        assert!(header.starts_with("sha256="));
        assert!(verify_signature(payload, &header, &secret));
        assert!(!verify_signature("tampered", &header, &secret));
        assert!(!verify_signature(payload, &header, "other-secret"));
        assert!(!verify_signature(payload, header.trim_start_matches("sha256="), &secret));
    }
}
