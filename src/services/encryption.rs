use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::Hmac;
use rand::Rng;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::AppError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Server-managed symmetric encryption of message bodies.
///
/// Keys are derived deterministically per conversation from a master secret,
/// so the conversation id is the only durable state needed to recover a key
/// (no key table). Derivation runs PBKDF2-HMAC-SHA256 at a high iteration
/// count to resist brute force against a weak master secret; because it is
/// deliberately slow, derived keys are memoized per conversation.
pub struct EncryptionService {
    master_secret: String,
    iterations: u32,
    key_cache: RwLock<HashMap<i64, [u8; 32]>>,
}

impl EncryptionService {
    pub fn new(master_secret: impl Into<String>, iterations: u32) -> Self {
        Self {
            master_secret: master_secret.into(),
            iterations,
            key_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Deterministic per-conversation key. The conversation id serves as the
    /// salt so keys differ per conversation under the same master secret.
    pub fn derive_key(&self, conversation_id: i64) -> [u8; 32] {
        if let Some(key) = self
            .key_cache
            .read()
            .expect("key cache lock poisoned")
            .get(&conversation_id)
        {
            return *key;
        }

        let password = format!("{}:{}", self.master_secret, conversation_id);
        let salt = conversation_id.to_string();
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2::<Hmac<Sha256>>(
            password.as_bytes(),
            salt.as_bytes(),
            self.iterations,
            &mut key,
        )
        .expect("PBKDF2 output length is fixed at 32 bytes");

        self.key_cache
            .write()
            .expect("key cache lock poisoned")
            .insert(conversation_id, key);
        key
    }

    /// AES-256-GCM with a random 96-bit nonce; output is
    /// base64(nonce || ciphertext || tag), safe to store as text.
    pub fn encrypt(&self, plaintext: &str, conversation_id: i64) -> Result<String, AppError> {
        let key = self.derive_key(conversation_id);
        let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key));

        let nonce_bytes: [u8; NONCE_LEN] = rand::thread_rng().gen();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, Payload::from(plaintext.as_bytes()))
            .map_err(|e| AppError::Encryption(format!("AES-GCM failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    /// Fails on malformed input, key mismatch or any authentication failure.
    /// Read paths recover from this per message; it never aborts a page.
    pub fn decrypt(&self, encoded: &str, conversation_id: i64) -> Result<String, AppError> {
        let raw = STANDARD
            .decode(encoded)
            .map_err(|e| AppError::Decryption(format!("invalid base64: {e}")))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(AppError::Decryption("ciphertext too short".into()));
        }

        let key = self.derive_key(conversation_id);
        let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key));
        let nonce = Nonce::from_slice(&raw[..NONCE_LEN]);

        let plaintext = cipher
            .decrypt(nonce, Payload::from(&raw[NONCE_LEN..]))
            .map_err(|e| AppError::Decryption(format!("AES-GCM failed: {e}")))?;

        String::from_utf8(plaintext).map_err(|e| AppError::Decryption(format!("invalid utf8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Low iteration count keeps the KDF fast in tests; the derivation path
    // is identical.
    fn service() -> EncryptionService {
        EncryptionService::new("test-master-secret", 1000)
    }

    #[test]
    fn round_trip() {
        let svc = service();
        for body in ["hello", "", "unicode αβγδ 你好", "line\nbreaks\tand\ttabs"] {
            let ciphertext = svc.encrypt(body, 100).unwrap();
            assert_ne!(ciphertext, body);
            assert_eq!(svc.decrypt(&ciphertext, 100).unwrap(), body);
        }
    }

    #[test]
    fn key_derivation_is_deterministic_per_conversation() {
        let svc = service();
        assert_eq!(svc.derive_key(1), svc.derive_key(1));
        assert_ne!(svc.derive_key(1), svc.derive_key(2));

        // A fresh instance with the same secret derives the same key.
        let other = service();
        assert_eq!(svc.derive_key(7), other.derive_key(7));
    }

    #[test]
    fn different_master_secrets_diverge() {
        let a = EncryptionService::new("secret-a", 1000);
        let b = EncryptionService::new("secret-b", 1000);
        assert_ne!(a.derive_key(1), b.derive_key(1));
    }

    #[test]
    fn nonces_vary_but_both_decrypt() {
        let svc = service();
        let c1 = svc.encrypt("same", 5).unwrap();
        let c2 = svc.encrypt("same", 5).unwrap();
        assert_ne!(c1, c2);
        assert_eq!(svc.decrypt(&c1, 5).unwrap(), "same");
        assert_eq!(svc.decrypt(&c2, 5).unwrap(), "same");
    }

    #[test]
    fn wrong_conversation_key_fails_auth() {
        let svc = service();
        let ciphertext = svc.encrypt("secret", 1).unwrap();
        assert!(matches!(
            svc.decrypt(&ciphertext, 2),
            Err(AppError::Decryption(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let svc = service();
        let ciphertext = svc.encrypt("secret", 1).unwrap();
        let mut raw = STANDARD.decode(&ciphertext).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let tampered = STANDARD.encode(raw);
        assert!(svc.decrypt(&tampered, 1).is_err());
    }

    #[test]
    fn malformed_input_is_a_decryption_error() {
        let svc = service();
        assert!(matches!(
            svc.decrypt("not@base64!!", 1),
            Err(AppError::Decryption(_))
        ));
        assert!(matches!(
            svc.decrypt(&STANDARD.encode(b"short"), 1),
            Err(AppError::Decryption(_))
        ));
    }
}
