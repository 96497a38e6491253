//! Token store: encrypted, crash-safe persistence for OAuth proxy state.
//!
//! Five keyed collections (clients, pending authorizations, authorization
//! codes, access tokens, refresh tokens) live in memory behind one mutex and
//! are mirrored to a single encrypted file on every mutation.
//!
//! # Concurrency
//!
//! Every operation, reads included, holds the lock for its whole duration,
//! including the disk write. Multi-collection updates ([`TokenStore::rotate`],
//! [`TokenStore::insert_pair`], the revocation cascades) therefore appear
//! atomic to every other caller.
//!
//! # Expiry
//!
//! There is no background reaper. Records with an expiry are checked when
//! looked up; expired ones are evicted and reported as absent.
//!
//! # Durability
//!
//! A mutation is applied to a copy of the collections, written to disk, and
//! only then swapped in. If the write fails the in-memory state is unchanged
//! and the caller sees [`Error::Persistence`].

mod crypto;
mod records;
mod snapshot;

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

pub use crypto::SnapshotCipher;
pub use records::{
    AccessTokenRecord, AuthorizationCodeRecord, ClientMetadata, Collections,
    PendingAuthorization, RESERVED_CLIENT_FIELDS, RefreshTokenRecord, RegisteredClient, TokenPair,
    UpstreamCredential,
};
pub use snapshot::{STORE_FILE_NAME, SnapshotFile};

use crate::{Error, Result};

/// Current Unix time in seconds
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// One of the five persisted record kinds.
///
/// Implemented by zero-sized markers so every kind shares one
/// put/get/remove API: `store.get::<AccessTokens>(token)`.
pub trait Collection {
    /// Record type stored under each key
    type Record: Clone + Serialize + DeserializeOwned;

    /// Collection name as it appears in the persisted document
    const NAME: &'static str;

    /// Shared view of this collection
    fn entries(collections: &Collections) -> &HashMap<String, Self::Record>;

    /// Mutable view of this collection
    fn entries_mut(collections: &mut Collections) -> &mut HashMap<String, Self::Record>;

    /// Expiry of a record in Unix seconds; `None` never expires
    fn expires_at(_record: &Self::Record) -> Option<u64> {
        None
    }
}

/// Registered downstream clients
pub struct Clients;
/// Pending authorizations keyed by proxy state
pub struct PendingAuth;
/// Proxy-issued authorization codes
pub struct AuthCodes;
/// Proxy-issued access tokens
pub struct AccessTokens;
/// Proxy-issued refresh tokens
pub struct RefreshTokens;

impl Collection for Clients {
    type Record = RegisteredClient;
    const NAME: &'static str = "clients";

    fn entries(c: &Collections) -> &HashMap<String, Self::Record> {
        &c.clients
    }

    fn entries_mut(c: &mut Collections) -> &mut HashMap<String, Self::Record> {
        &mut c.clients
    }
}

impl Collection for PendingAuth {
    type Record = PendingAuthorization;
    const NAME: &'static str = "pending_auth";

    fn entries(c: &Collections) -> &HashMap<String, Self::Record> {
        &c.pending_auth
    }

    fn entries_mut(c: &mut Collections) -> &mut HashMap<String, Self::Record> {
        &mut c.pending_auth
    }

    fn expires_at(record: &Self::Record) -> Option<u64> {
        Some(record.expires_at)
    }
}

impl Collection for AuthCodes {
    type Record = AuthorizationCodeRecord;
    const NAME: &'static str = "auth_codes";

    fn entries(c: &Collections) -> &HashMap<String, Self::Record> {
        &c.auth_codes
    }

    fn entries_mut(c: &mut Collections) -> &mut HashMap<String, Self::Record> {
        &mut c.auth_codes
    }

    fn expires_at(record: &Self::Record) -> Option<u64> {
        Some(record.expires_at)
    }
}

impl Collection for AccessTokens {
    type Record = AccessTokenRecord;
    const NAME: &'static str = "access_tokens";

    fn entries(c: &Collections) -> &HashMap<String, Self::Record> {
        &c.access_tokens
    }

    fn entries_mut(c: &mut Collections) -> &mut HashMap<String, Self::Record> {
        &mut c.access_tokens
    }

    fn expires_at(record: &Self::Record) -> Option<u64> {
        Some(record.expires_at)
    }
}

impl Collection for RefreshTokens {
    type Record = RefreshTokenRecord;
    const NAME: &'static str = "refresh_tokens";

    fn entries(c: &Collections) -> &HashMap<String, Self::Record> {
        &c.refresh_tokens
    }

    fn entries_mut(c: &mut Collections) -> &mut HashMap<String, Self::Record> {
        &mut c.refresh_tokens
    }

    fn expires_at(record: &Self::Record) -> Option<u64> {
        record.expires_at
    }
}

fn is_expired<C: Collection>(record: &C::Record, now: u64) -> bool {
    C::expires_at(record).is_some_and(|expires_at| now >= expires_at)
}

/// Per-collection record counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Registered clients
    pub clients: usize,
    /// Pending authorizations
    pub pending_auth: usize,
    /// Authorization codes
    pub auth_codes: usize,
    /// Access tokens
    pub access_tokens: usize,
    /// Refresh tokens
    pub refresh_tokens: usize,
}

/// Encrypted, file-backed store for all OAuth proxy state
pub struct TokenStore {
    state: Mutex<Collections>,
    file: SnapshotFile,
}

impl TokenStore {
    /// Open the store in `data_dir`, keyed by `secret`.
    ///
    /// A missing, unreadable or undecryptable snapshot yields an empty store.
    pub fn open(data_dir: impl AsRef<Path>, secret: &str) -> Result<Self> {
        let file = SnapshotFile::new(data_dir.as_ref(), secret)?;
        let collections = file.load_or_empty();
        Ok(Self {
            state: Mutex::new(collections),
            file,
        })
    }

    /// Path of the encrypted snapshot
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Persist `next` and swap it in. On failure the guarded state is left
    /// as it was.
    fn commit(&self, state: &mut MutexGuard<'_, Collections>, next: Collections) -> Result<()> {
        self.file.write(&next)?;
        **state = next;
        Ok(())
    }

    /// Run `f` against a copy of the collections, persist the copy, then
    /// commit it. `f` returning an error aborts without touching disk.
    fn transact<T>(&self, f: impl FnOnce(&mut Collections) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let value = f(&mut next)?;
        self.commit(&mut state, next)?;
        Ok(value)
    }

    /// Insert or overwrite a record
    pub fn put<C: Collection>(&self, key: &str, record: C::Record) -> Result<()> {
        self.transact(|c| {
            C::entries_mut(c).insert(key.to_string(), record);
            Ok(())
        })
    }

    /// Look up a record, evicting it if expired
    pub fn get<C: Collection>(&self, key: &str) -> Result<Option<C::Record>> {
        Ok(self
            .take_or_peek::<C>(key, |_| false)?
            .map(|(record, _)| record))
    }

    /// Remove a record unconditionally, returning it if present
    pub fn remove<C: Collection>(&self, key: &str) -> Result<Option<C::Record>> {
        let mut state = self.state.lock();
        if !C::entries(&state).contains_key(key) {
            return Ok(None);
        }
        let mut next = state.clone();
        let removed = C::entries_mut(&mut next).remove(key);
        self.commit(&mut state, next)?;
        Ok(removed)
    }

    /// Atomically consume a record if it is live and `accept` approves it.
    ///
    /// Expired records are evicted and yield `None`. A live record that
    /// `accept` rejects is left in place and also yields `None`.
    pub fn take_if<C: Collection>(
        &self,
        key: &str,
        accept: impl FnOnce(&C::Record) -> bool,
    ) -> Result<Option<C::Record>> {
        Ok(self
            .take_or_peek::<C>(key, accept)?
            .and_then(|(record, consumed)| consumed.then_some(record)))
    }

    /// Shared lookup: evicts expired records, removes live ones when
    /// `consume` says so, otherwise returns a copy. The flag reports whether
    /// the returned record was removed.
    fn take_or_peek<C: Collection>(
        &self,
        key: &str,
        consume: impl FnOnce(&C::Record) -> bool,
    ) -> Result<Option<(C::Record, bool)>> {
        let now = unix_now();
        let mut state = self.state.lock();

        let Some(record) = C::entries(&state).get(key) else {
            return Ok(None);
        };
        let expired = is_expired::<C>(record, now);
        if !expired && !consume(record) {
            return Ok(Some((record.clone(), false)));
        }

        let mut next = state.clone();
        let removed = C::entries_mut(&mut next).remove(key);
        self.commit(&mut state, next)?;

        if expired {
            debug!(collection = C::NAME, "Evicted expired record");
            return Ok(None);
        }
        Ok(removed.map(|record| (record, true)))
    }

    /// Store a freshly issued access/refresh pair in one step
    pub fn insert_pair(&self, pair: TokenPair) -> Result<()> {
        self.transact(|c| {
            c.access_tokens.insert(pair.access_token, pair.access);
            c.refresh_tokens.insert(pair.refresh_token, pair.refresh);
            Ok(())
        })
    }

    /// Replace an access/refresh pair with a new one as a single unit.
    ///
    /// Fails with [`Error::NotFound`] and changes nothing if `old_refresh` is
    /// no longer present, so two racing refreshes cannot both succeed.
    pub fn rotate(
        &self,
        old_access: Option<&str>,
        old_refresh: &str,
        new_pair: TokenPair,
    ) -> Result<()> {
        let now = unix_now();
        self.transact(|c| {
            match c.refresh_tokens.get(old_refresh) {
                Some(record) if !is_expired::<RefreshTokens>(record, now) => {}
                _ => return Err(Error::NotFound),
            }
            if let Some(old_access) = old_access {
                c.access_tokens.remove(old_access);
            }
            c.refresh_tokens.remove(old_refresh);
            c.access_tokens.insert(new_pair.access_token, new_pair.access);
            c.refresh_tokens.insert(new_pair.refresh_token, new_pair.refresh);
            Ok(())
        })?;
        info!("Rotated token pair");
        Ok(())
    }

    /// Delete an access token and its paired refresh token.
    ///
    /// Returns whether the access token existed.
    pub fn revoke_access(&self, access_token: &str) -> Result<bool> {
        if !self.state.lock().access_tokens.contains_key(access_token) {
            return Ok(false);
        }
        self.transact(|c| {
            let Some(record) = c.access_tokens.remove(access_token) else {
                return Ok(false);
            };
            c.refresh_tokens.remove(&record.refresh_token);
            Ok(true)
        })
    }

    /// Delete a refresh token and its paired access token.
    ///
    /// Returns whether the refresh token existed.
    pub fn revoke_refresh(&self, refresh_token: &str) -> Result<bool> {
        if !self.state.lock().refresh_tokens.contains_key(refresh_token) {
            return Ok(false);
        }
        self.transact(|c| {
            let Some(record) = c.refresh_tokens.remove(refresh_token) else {
                return Ok(false);
            };
            c.access_tokens.remove(&record.access_token);
            Ok(true)
        })
    }

    /// Record counts per collection (expired records included)
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let state = self.state.lock();
        StoreStats {
            clients: state.clients.len(),
            pending_auth: state.pending_auth.len(),
            auth_codes: state.auth_codes.len(),
            access_tokens: state.access_tokens.len(),
            refresh_tokens: state.refresh_tokens.len(),
        }
    }

    /// The live access token with the furthest expiry, if any
    #[must_use]
    pub fn latest_access_token(&self) -> Option<(String, AccessTokenRecord)> {
        let now = unix_now();
        let state = self.state.lock();
        state
            .access_tokens
            .iter()
            .filter(|(_, record)| !is_expired::<AccessTokens>(record, now))
            .max_by_key(|(_, record)| record.expires_at)
            .map(|(token, record)| (token.clone(), record.clone()))
    }

    /// Drop every expired record in one pass. Operator-invoked only.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = unix_now();
        let purged = self.transact(|c| {
            let before = c.pending_auth.len()
                + c.auth_codes.len()
                + c.access_tokens.len()
                + c.refresh_tokens.len();
            c.pending_auth.retain(|_, r| !is_expired::<PendingAuth>(r, now));
            c.auth_codes.retain(|_, r| !is_expired::<AuthCodes>(r, now));
            c.access_tokens.retain(|_, r| !is_expired::<AccessTokens>(r, now));
            c.refresh_tokens.retain(|_, r| !is_expired::<RefreshTokens>(r, now));
            let after = c.pending_auth.len()
                + c.auth_codes.len()
                + c.access_tokens.len()
                + c.refresh_tokens.len();
            Ok(before - after)
        })?;
        if purged > 0 {
            info!(count = purged, "Purged expired records");
        }
        Ok(purged)
    }
}
