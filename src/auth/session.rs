//! Session token primitives. Tokens are opaque 32-byte values; the store
//! only ever sees their SHA-256.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as Base64Url, Engine};
use chrono::Duration;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Sessions live 14 days from the last refresh.
pub fn session_ttl() -> Duration {
    Duration::days(14)
}

/// A fresh URL-safe token. 32 bytes of OS randomness.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    Base64Url.encode(bytes)
}

/// Hash stored in place of the token.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn hash_is_stable_hex() {
        let h = hash_token("fixed");
        assert_eq!(h, hash_token("fixed"));
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
