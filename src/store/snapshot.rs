//! Encrypted snapshot file with crash-safe replacement.
//!
//! A write goes to a temp file in the target directory, is fsynced, and then
//! renamed over the live file. A crash at any point leaves either the previous
//! snapshot or the new one on disk, never a torn write.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::crypto::SnapshotCipher;
use super::records::Collections;
use crate::{Error, Result};

/// File name of the live snapshot inside the data directory
pub const STORE_FILE_NAME: &str = "tokens.enc";

/// Location and key of the persisted snapshot
pub struct SnapshotFile {
    path: PathBuf,
    cipher: SnapshotCipher,
}

impl SnapshotFile {
    /// Snapshot at `<data_dir>/tokens.enc`
    pub fn new(data_dir: &Path, secret: &str) -> Result<Self> {
        Ok(Self {
            path: data_dir.join(STORE_FILE_NAME),
            cipher: SnapshotCipher::from_secret(secret)?,
        })
    }

    /// Path of the live snapshot
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and decrypt the live snapshot.
    ///
    /// `Ok(None)` when no snapshot exists yet.
    pub fn read(&self) -> Result<Option<Collections>> {
        let sealed = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::CorruptStore(format!("unreadable snapshot: {e}"))),
        };

        let plaintext = self.cipher.open(&sealed)?;
        let collections = serde_json::from_slice(&plaintext)
            .map_err(|e| Error::CorruptStore(format!("unparsable snapshot: {e}")))?;
        Ok(Some(collections))
    }

    /// Load for startup: anything unusable becomes an empty store
    pub fn load_or_empty(&self) -> Collections {
        match self.read() {
            Ok(Some(collections)) => {
                info!(
                    path = %self.path.display(),
                    clients = collections.clients.len(),
                    access_tokens = collections.access_tokens.len(),
                    "Loaded token store"
                );
                collections
            }
            Ok(None) => {
                debug!(path = %self.path.display(), "No token store on disk, starting empty");
                Collections::default()
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Could not load token store (corrupt or wrong secret), starting fresh"
                );
                Collections::default()
            }
        }
    }

    /// Encrypt and atomically replace the live snapshot
    pub fn write(&self, collections: &Collections) -> Result<()> {
        let plaintext = serde_json::to_vec(collections)?;
        let sealed = self.cipher.seal(&plaintext)?;

        let dir = self
            .path
            .parent()
            .ok_or_else(|| Error::Persistence("snapshot path has no parent".to_string()))?;
        fs::create_dir_all(dir).map_err(|e| {
            Error::Persistence(format!("Failed to create {}: {e}", dir.display()))
        })?;

        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| Error::Persistence(format!("Failed to create temp file: {e}")))?;
        tmp.write_all(&sealed)
            .map_err(|e| Error::Persistence(format!("Failed to write temp file: {e}")))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| Error::Persistence(format!("Failed to fsync temp file: {e}")))?;

        if let Err(e) = restrict_to_owner(tmp.path()) {
            warn!(path = %tmp.path().display(), error = %e, "Failed to restrict snapshot permissions");
        }

        // A failed persist drops the temp file; the live snapshot is untouched
        tmp.persist(&self.path)
            .map_err(|e| Error::Persistence(format!("Failed to replace snapshot: {}", e.error)))?;

        if let Err(e) = sync_dir(dir) {
            warn!(dir = %dir.display(), error = %e, "Failed to fsync snapshot directory");
        }

        Ok(())
    }
}

/// Owner read/write only
#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Make the rename durable
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
