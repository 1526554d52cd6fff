//! # CredentialVault
//!
//! Symmetric encryption of API keys and per-provider config blobs (spec §4.2). The
//! vault is the only component authorized to materialize plaintext credentials;
//! adapters receive plaintext at construction and must not persist it.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::GatewayError;

const NONCE_SIZE: usize = 12;

fn derive_key(key: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.finalize().into()
}

/// Seals and opens plaintext with a process-wide key sourced from configuration.
/// If no key was configured at startup, a volatile random key is generated and
/// [`CredentialVault::is_volatile`] returns true — callers MUST treat that as a
/// fail-fast condition in production, since anything sealed under it cannot be
/// decrypted after a restart.
pub struct CredentialVault {
    key: [u8; 32],
    volatile: bool,
}

impl CredentialVault {
    /// Build a vault from a configured encryption key, or fall back to a volatile
    /// random key with a warning.
    pub fn new(encryption_key: Option<&str>) -> Self {
        match encryption_key {
            Some(k) => Self {
                key: derive_key(k.as_bytes()),
                volatile: false,
            },
            None => {
                tracing::warn!(
                    "ENCRYPTION_KEY not configured; generating a volatile key. \
                     Credentials sealed under it cannot be decrypted after restart."
                );
                let mut raw = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut raw);
                Self {
                    key: derive_key(&raw),
                    volatile: true,
                }
            }
        }
    }

    /// Whether this vault is running on a generated, non-persistent key.
    pub fn is_volatile(&self) -> bool {
        self.volatile
    }

    /// `base64(nonce || ciphertext || tag)`.
    pub fn seal(&self, plaintext: &str) -> Result<String, GatewayError> {
        let cipher_key = Key::<Aes256Gcm>::from_slice(&self.key);
        let cipher = Aes256Gcm::new(cipher_key);

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher.encrypt(nonce, plaintext.as_bytes()).map_err(|e| {
            GatewayError::Vault {
                message: format!("seal failed: {e}"),
            }
        })?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(out))
    }

    pub fn open(&self, ciphertext: &str) -> Result<String, GatewayError> {
        let bytes = general_purpose::STANDARD
            .decode(ciphertext)
            .map_err(|e| GatewayError::Vault {
                message: format!("invalid ciphertext encoding: {e}"),
            })?;

        if bytes.len() < NONCE_SIZE + 16 {
            return Err(GatewayError::Vault {
                message: "ciphertext too short".to_string(),
            });
        }

        let cipher_key = Key::<Aes256Gcm>::from_slice(&self.key);
        let cipher = Aes256Gcm::new(cipher_key);
        let nonce = Nonce::from_slice(&bytes[..NONCE_SIZE]);
        let sealed = &bytes[NONCE_SIZE..];

        let plaintext = cipher.decrypt(nonce, sealed).map_err(|_| GatewayError::Vault {
            message: "decryption failed: tampered data or wrong key".to_string(),
        })?;

        String::from_utf8(plaintext).map_err(|e| GatewayError::Vault {
            message: format!("decrypted payload is not valid utf-8: {e}"),
        })
    }
}
