// SPDX-License-Identifier: Apache-2.0
//!
//! Symmetric authenticated encryption for repository credentials (C5).
//!
//! # Security model
//!
//! Every ciphertext is AES-256-GCM under a server-wide key loaded once at
//! startup, with its own random 96-bit nonce. The stored blob is
//! versioned so the format can evolve: `[version_byte][nonce][ciphertext
//! || tag]`, base64-encoded for storage alongside other repository
//! fields. A legacy format (no version byte, a fixed nonce) is still
//! accepted on decryption so old rows keep working, and is transparently
//! upgraded to the current format on next write via [`Vault::reencrypt`].
//! The vault never logs plaintext.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

const CURRENT_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
/// Fixed nonce used by every blob written in the legacy format. Reusing a
/// nonce is only safe here because the legacy format is read-only going
/// forward — every legacy blob is re-encrypted with a fresh random nonce
/// the first time it is touched.
const LEGACY_NONCE: [u8; NONCE_LEN] = [0u8; NONCE_LEN];

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault key must be exactly 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("credential blob is malformed or truncated")]
    Malformed,
    #[error("credential blob failed to decode: {0}")]
    Encoding(String),
    #[error("decryption failed: ciphertext is invalid or was encrypted under a different key")]
    Decrypt,
    #[error("encryption failed")]
    Encrypt,
}

/// Holds the server-wide key and performs encrypt/decrypt for credential
/// blobs. Cheap to clone-by-reference; construct once at startup from
/// configuration.
pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    pub fn from_key_bytes(key_bytes: &[u8]) -> Result<Self, VaultError> {
        if key_bytes.len() != 32 {
            return Err(VaultError::InvalidKeyLength(key_bytes.len()));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt `plaintext`, always producing the current versioned format.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Encrypt)?;

        let mut blob = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        blob.push(CURRENT_VERSION);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    /// Decrypt a blob in either the current or legacy format.
    pub fn decrypt(&self, blob: &str) -> Result<String, VaultError> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(blob)
            .map_err(|e| VaultError::Encoding(e.to_string()))?;

        let (nonce_bytes, ciphertext) = if is_legacy_bytes(&raw) {
            if raw.len() < NONCE_LEN {
                return Err(VaultError::Malformed);
            }
            (LEGACY_NONCE, raw.as_slice())
        } else {
            if raw.len() < 1 + NONCE_LEN {
                return Err(VaultError::Malformed);
            }
            let mut nonce = [0u8; NONCE_LEN];
            nonce.copy_from_slice(&raw[1..1 + NONCE_LEN]);
            (nonce, &raw[1 + NONCE_LEN..])
        };

        let nonce = Nonce::from_slice(&nonce_bytes);
        let plaintext = self.cipher.decrypt(nonce, ciphertext).map_err(|_| VaultError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| VaultError::Decrypt)
    }

    /// Whether `blob` is in the legacy fixed-nonce format rather than the
    /// current versioned one.
    pub fn is_legacy_format(&self, blob: &str) -> Result<bool, VaultError> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(blob)
            .map_err(|e| VaultError::Encoding(e.to_string()))?;
        Ok(is_legacy_bytes(&raw))
    }

    /// Decrypt `blob` (in whichever format it's in) and re-encrypt it in
    /// the current format with a fresh random nonce. A no-op migration
    /// path for batch jobs: callers only need to persist the result when
    /// it differs from the input.
    pub fn reencrypt(&self, blob: &str) -> Result<String, VaultError> {
        let plaintext = self.decrypt(blob)?;
        self.encrypt(&plaintext)
    }
}

fn is_legacy_bytes(raw: &[u8]) -> bool {
    raw.first() != Some(&CURRENT_VERSION)
}
