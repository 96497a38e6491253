//! Snapshot encryption at rest.
//!
//! AES-256-GCM keyed by SHA-256 of the operator secret. Rotating the secret
//! makes every existing snapshot unreadable, which the store treats as an
//! empty start.
//!
//! Sealed format: `version (1 byte) || nonce (12 bytes) || ciphertext || tag`

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

const FORMAT_VERSION: u8 = 1;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Seals and opens whole-store snapshots
pub struct SnapshotCipher {
    cipher: Aes256Gcm,
}

impl SnapshotCipher {
    /// Derive the snapshot key from an operator secret
    pub fn from_secret(secret: &str) -> Result<Self> {
        let digest = Sha256::digest(secret.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&digest)
            .map_err(|e| Error::Internal(format!("Failed to create snapshot cipher: {e}")))?;
        Ok(Self { cipher })
    }

    /// Encrypt a serialized snapshot with a fresh random nonce
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::Internal(format!("Snapshot encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
        sealed.push(FORMAT_VERSION);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a sealed snapshot.
    ///
    /// Wrong key, truncation and tampering all surface as `CorruptStore`.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        let Some((&version, rest)) = sealed.split_first() else {
            return Err(Error::CorruptStore("empty snapshot".to_string()));
        };
        if version != FORMAT_VERSION {
            return Err(Error::CorruptStore(format!(
                "unsupported snapshot version {version}"
            )));
        }
        if rest.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::CorruptStore("snapshot too short".to_string()));
        }

        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::CorruptStore("wrong secret or corrupted data".to_string()))
    }
}
