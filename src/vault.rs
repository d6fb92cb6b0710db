//! Symmetric envelope encryption for secrets at rest.
//!
//! AES-256-GCM with a random 96-bit IV; envelopes are `iv || ciphertext ||
//! tag`. The key comes from process configuration and never touches the
//! database. TOTP secrets and VAPID private keys use separate vault
//! instances with separate keys.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Clone)]
pub struct TokenVault {
    cipher: Aes256Gcm,
}

impl TokenVault {
    pub fn new(key: &[u8; 32]) -> Self {
        let cipher = Aes256Gcm::new_from_slice(key).expect("32-byte key is always valid");
        TokenVault { cipher }
    }

    /// Encrypt under a fresh random IV.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .expect("AES-GCM encryption is infallible for in-memory buffers");
        let mut envelope = Vec::with_capacity(IV_LEN + ciphertext.len());
        envelope.extend_from_slice(&iv);
        envelope.extend_from_slice(&ciphertext);
        envelope
    }

    /// Decrypt; any modified byte fails authentication and returns `None`.
    pub fn decrypt(&self, envelope: &[u8]) -> Option<Vec<u8>> {
        if envelope.len() < IV_LEN + TAG_LEN {
            return None;
        }
        let (iv, ciphertext) = envelope.split_at(IV_LEN);
        self.cipher.decrypt(Nonce::from_slice(iv), ciphertext).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let vault = TokenVault::new(&[7; 32]);
        let plaintext = b"JBSWY3DPEHPK3PXP";
        let envelope = vault.encrypt(plaintext);
        assert_eq!(vault.decrypt(&envelope).unwrap(), plaintext);
    }

    #[test]
    fn distinct_ivs_per_call() {
        let vault = TokenVault::new(&[7; 32]);
        let a = vault.encrypt(b"same");
        let b = vault.encrypt(b"same");
        assert_ne!(a, b);
    }

    #[test]
    fn any_flipped_byte_is_rejected() {
        let vault = TokenVault::new(&[7; 32]);
        let envelope = vault.encrypt(b"secret");
        for i in 0..envelope.len() {
            let mut tampered = envelope.clone();
            tampered[i] ^= 0x01;
            assert!(vault.decrypt(&tampered).is_none(), "byte {i} accepted");
        }
    }

    #[test]
    fn wrong_key_is_rejected() {
        let vault = TokenVault::new(&[7; 32]);
        let other = TokenVault::new(&[8; 32]);
        let envelope = vault.encrypt(b"secret");
        assert!(other.decrypt(&envelope).is_none());
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let vault = TokenVault::new(&[7; 32]);
        assert!(vault.decrypt(&[0u8; 11]).is_none());
    }
}
