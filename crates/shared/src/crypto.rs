//! Cryptographic utilities for invitation tokens and callback signatures.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use lazy_static::lazy_static;
use rand::RngCore;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Number of random bytes in an invitation token (256 bits).
pub const INVITATION_TOKEN_BYTES: usize = 32;

/// Length of an encoded invitation token (32 bytes, URL-safe base64, no padding).
pub const INVITATION_TOKEN_LEN: usize = 43;

lazy_static! {
    static ref TOKEN_PATTERN: Regex =
        Regex::new(r"^[A-Za-z0-9_-]{43}$").expect("token pattern is a valid regex");
}

type HmacSha256 = Hmac<Sha256>;

/// Computes SHA-256 hash of the input and returns it as a hex string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generates a fresh invitation token from the OS-seeded CSPRNG.
pub fn generate_invitation_token() -> String {
    let mut bytes = [0u8; INVITATION_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Returns true if `token` has the shape of an issued invitation token.
///
/// This is a cheap syntactic filter; it says nothing about whether the token exists.
pub fn is_well_formed_token(token: &str) -> bool {
    TOKEN_PATTERN.is_match(token)
}

/// Signs `payload` with HMAC-SHA256 and returns `sha256=<hex>`.
pub fn sign_hmac_sha256(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a `sha256=<hex>` signature in constant time.
pub fn verify_hmac_sha256(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(hex_sig) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sha256_hex() {
        let hash = sha256_hex("test");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }

    #[test]
    fn test_sha256_hex_empty_string() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_generate_invitation_token_length() {
        let token = generate_invitation_token();
        assert_eq!(token.len(), INVITATION_TOKEN_LEN);
        assert!(is_well_formed_token(&token));
    }

    #[test]
    fn test_generate_invitation_token_unique() {
        let tokens: HashSet<String> = (0..1000).map(|_| generate_invitation_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_generate_invitation_token_url_safe() {
        let token = generate_invitation_token();
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
        assert!(!token.contains('='));
    }

    #[test]
    fn test_is_well_formed_token_rejects_garbage() {
        assert!(!is_well_formed_token(""));
        assert!(!is_well_formed_token("short"));
        assert!(!is_well_formed_token(&"a".repeat(44)));
        assert!(!is_well_formed_token(&format!("{}!", "a".repeat(42))));
        assert!(is_well_formed_token(&"a".repeat(43)));
    }

    #[test]
    fn test_hmac_sign_and_verify() {
        let payload = br#"{"invitation_id":"abc","status":"delivered"}"#;
        let signature = sign_hmac_sha256("callback-secret", payload);

        assert!(signature.starts_with("sha256="));
        assert_eq!(signature.len(), "sha256=".len() + 64);
        assert!(verify_hmac_sha256("callback-secret", payload, &signature));
    }

    #[test]
    fn test_hmac_verify_rejects_wrong_secret() {
        let payload = b"payload";
        let signature = sign_hmac_sha256("secret-a", payload);
        assert!(!verify_hmac_sha256("secret-b", payload, &signature));
    }

    #[test]
    fn test_hmac_verify_rejects_tampered_payload() {
        let signature = sign_hmac_sha256("secret", b"original");
        assert!(!verify_hmac_sha256("secret", b"tampered", &signature));
    }

    #[test]
    fn test_hmac_verify_rejects_malformed_signature() {
        assert!(!verify_hmac_sha256("secret", b"payload", "deadbeef"));
        assert!(!verify_hmac_sha256("secret", b"payload", "sha256=not-hex"));
        assert!(!verify_hmac_sha256("secret", b"payload", ""));
    }
}
