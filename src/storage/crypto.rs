//! At-rest encryption for secrets
//!
//! Anything containing a secret (API keys, long-lived backend credentials)
//! passes through [`SecretBox`] before reaching the key-value substrate.
//! The symmetric key is derived from a passphrase with PBKDF2-HMAC-SHA256
//! and a per-value random salt, then the plaintext is sealed with the
//! ChaCha20-Poly1305 AEAD under a per-value random nonce. Salt and nonce
//! are stored alongside the ciphertext; they are not secret, only unique.
//!
//! The key derivation is intentionally expensive to resist offline brute
//! force against a stolen storage snapshot. The default passphrase is
//! compiled in and therefore protects only against casual local inspection;
//! installs that can supply a per-install secret should use
//! [`SecretBox::with_passphrase`].

use crate::error::{Result, TabmateError};
use crate::storage::KeyValueTier;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

const DEFAULT_PASSPHRASE: &str = "tabmate-at-rest-v1";

/// An encrypted secret as persisted in the key-value substrate
///
/// All three fields are URL-safe base64 without padding. A fresh salt and
/// nonce are generated for every call to [`SecretBox::encrypt`]; neither
/// is ever reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    /// AEAD ciphertext including the authentication tag
    pub ciphertext: String,
    /// Per-value AEAD nonce
    pub nonce: String,
    /// Per-value key-derivation salt
    pub salt: String,
}

/// A value as it may appear in storage: either the current encrypted
/// envelope or a legacy plaintext string written before encryption was
/// introduced. Legacy values are detected by shape and re-encrypted on the
/// next write, never silently lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredSecret {
    /// Current format
    Encrypted(EncryptedSecret),
    /// Pre-encryption plaintext
    Legacy(String),
}

/// Authenticated-encryption wrapper for secrets
#[derive(Clone)]
pub struct SecretBox {
    passphrase: String,
}

impl Default for SecretBox {
    fn default() -> Self {
        Self {
            passphrase: DEFAULT_PASSPHRASE.to_string(),
        }
    }
}

impl SecretBox {
    /// Create a secret box using the compiled-in application passphrase
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a secret box bound to an install-specific passphrase
    pub fn with_passphrase(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
        }
    }

    fn derive_key(&self, salt: &[u8]) -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(
            self.passphrase.as_bytes(),
            salt,
            PBKDF2_ITERATIONS,
            &mut key,
        );
        key
    }

    /// Encrypt a plaintext string
    ///
    /// # Errors
    ///
    /// Returns `TabmateError::Storage` if the cipher cannot be initialized
    /// or sealing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use tabmate::storage::SecretBox;
    ///
    /// # fn main() -> tabmate::error::Result<()> {
    /// let secret_box = SecretBox::new();
    /// let sealed = secret_box.encrypt("api-key-123")?;
    /// assert_eq!(secret_box.decrypt(&sealed)?, "api-key-123");
    /// # Ok(())
    /// # }
    /// ```
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret> {
        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let key = self.derive_key(&salt);
        let aead = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| TabmateError::Storage(format!("Failed to initialize cipher: {}", e)))?;
        let ciphertext = aead
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| TabmateError::Storage(format!("Encryption failed: {}", e)))?;

        Ok(EncryptedSecret {
            ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
            nonce: URL_SAFE_NO_PAD.encode(nonce),
            salt: URL_SAFE_NO_PAD.encode(salt),
        })
    }

    /// Decrypt a previously encrypted secret
    ///
    /// # Errors
    ///
    /// Returns `TabmateError::Decryption` when the authentication tag does
    /// not verify (tampered or wrong-key data); corrupted plaintext is
    /// never returned silently.
    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<String> {
        let salt = URL_SAFE_NO_PAD
            .decode(secret.salt.as_bytes())
            .map_err(|e| TabmateError::Storage(format!("Failed to decode salt: {}", e)))?;
        let nonce = URL_SAFE_NO_PAD
            .decode(secret.nonce.as_bytes())
            .map_err(|e| TabmateError::Storage(format!("Failed to decode nonce: {}", e)))?;
        if nonce.len() != NONCE_LEN {
            return Err(TabmateError::Storage(format!(
                "Unexpected nonce length: {}",
                nonce.len()
            ))
            .into());
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(secret.ciphertext.as_bytes())
            .map_err(|e| TabmateError::Storage(format!("Failed to decode ciphertext: {}", e)))?;

        let key = self.derive_key(&salt);
        let aead = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| TabmateError::Storage(format!("Failed to initialize cipher: {}", e)))?;
        let plaintext = aead
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| TabmateError::Decryption)?;

        String::from_utf8(plaintext)
            .map_err(|e| TabmateError::Storage(format!("Decrypted payload is not UTF-8: {}", e)).into())
    }
}

/// Encrypted secret storage over the small-quota sync tier
///
/// Reads transparently accept legacy plaintext values and immediately
/// rewrite them in encrypted form.
pub struct SecretStore {
    tier: Arc<dyn KeyValueTier>,
    secret_box: SecretBox,
}

impl SecretStore {
    /// Create a secret store over the given tier
    pub fn new(tier: Arc<dyn KeyValueTier>, secret_box: SecretBox) -> Self {
        Self { tier, secret_box }
    }

    /// Encrypt and persist a secret under `key`
    pub async fn put(&self, key: &str, plaintext: &str) -> Result<()> {
        let sealed = self.secret_box.encrypt(plaintext)?;
        self.tier.set(key, serde_json::to_value(&sealed)?).await
    }

    /// Load and decrypt the secret under `key`
    ///
    /// Legacy plaintext values are re-encrypted in place before being
    /// returned, so no legacy value survives a successful read.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(value) = self.tier.get(key).await? else {
            return Ok(None);
        };
        let stored: StoredSecret = serde_json::from_value(value)
            .map_err(|e| TabmateError::Storage(format!("Unrecognized secret shape: {}", e)))?;
        match stored {
            StoredSecret::Encrypted(sealed) => Ok(Some(self.secret_box.decrypt(&sealed)?)),
            StoredSecret::Legacy(plaintext) => {
                tracing::debug!(key = %key, "re-encrypting legacy plaintext secret");
                self.put(key, &plaintext).await?;
                Ok(Some(plaintext))
            }
        }
    }

    /// Remove the secret under `key`; idempotent
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.tier.remove(key).await
    }
}
