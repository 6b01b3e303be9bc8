//! Random token generation.
//!
//! Invitation tokens, SCIM bearer tokens, mailed verification tokens and generated webhook
//! secrets are all 32 bytes of OS-backed randomness rendered as lowercase hex (64 characters).

use rand::prelude::RngExt;
use rand::rng;
use sha2::{Digest, Sha256};

/// Number of random bytes behind every generated token.
pub const TOKEN_BYTES: usize = 32;

/// Generate `len` random bytes encoded as lowercase hex.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rng().fill(bytes.as_mut_slice());
    hex::encode(bytes)
}

/// Generate a 256-bit token, hex encoded.
pub fn generate_token() -> String {
    random_hex(TOKEN_BYTES)
}

/// SHA-256 of a token, hex encoded. Stored in place of tokens that only need to be matched.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Compare two byte strings without short-circuiting on the first mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_shape() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_random_hex_length() {
        assert_eq!(random_hex(4).len(), 8);
        assert_eq!(random_hex(0), "");
    }

    #[test]
    fn test_hash_token() {
        // SHA-256("abc")
        assert_eq!(hash_token("abc"), "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert_ne!(hash_token("abc"), hash_token("abd"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
