//! Token store persistence tests
//!
//! Covers the on-disk contract of the store:
//! - State survives reopen
//! - Wrong secret or a corrupt file starts empty
//! - Stray temp files never affect the live snapshot
//! - A failed write leaves memory untouched

use std::fs;

use mcp_remote_auth::Error;
use mcp_remote_auth::store::{
    AccessTokenRecord, AccessTokens, ClientMetadata, Clients, RefreshTokenRecord, RefreshTokens,
    RegisteredClient, STORE_FILE_NAME, TokenPair, TokenStore, UpstreamCredential, unix_now,
};
use pretty_assertions::assert_eq;

fn client(id: &str) -> RegisteredClient {
    RegisteredClient {
        client_id: id.to_string(),
        client_secret: Some("secret".to_string()),
        client_id_issued_at: unix_now(),
        client_secret_expires_at: 0,
        metadata: ClientMetadata {
            redirect_uris: vec!["https://claude.ai/api/mcp/auth_callback".to_string()],
            client_name: Some("Claude".to_string()),
            ..Default::default()
        },
    }
}

fn pair(access_token: &str, refresh_token: &str) -> TokenPair {
    TokenPair {
        access_token: access_token.to_string(),
        access: AccessTokenRecord {
            upstream_token: UpstreamCredential::new("ntn_upstream"),
            client_id: "c1".to_string(),
            scopes: vec![],
            expires_at: unix_now() + 3600,
            refresh_token: refresh_token.to_string(),
            resource: None,
            identity: Some("Ada (Acme)".to_string()),
        },
        refresh_token: refresh_token.to_string(),
        refresh: RefreshTokenRecord {
            upstream_token: UpstreamCredential::new("ntn_upstream"),
            client_id: "c1".to_string(),
            scopes: vec![],
            access_token: access_token.to_string(),
            resource: None,
            identity: Some("Ada (Acme)".to_string()),
            expires_at: None,
        },
    }
}

#[test]
fn state_survives_reopen() {
    // GIVEN: a store with a client and a token pair
    let dir = tempfile::tempdir().unwrap();
    {
        let store = TokenStore::open(dir.path(), "secret").unwrap();
        store.put::<Clients>("c1", client("c1")).unwrap();
        store.insert_pair(pair("a1", "r1")).unwrap();
    }

    // WHEN: it is reopened with the same secret
    let store = TokenStore::open(dir.path(), "secret").unwrap();

    // THEN: everything is still there
    assert_eq!(store.get::<Clients>("c1").unwrap(), Some(client("c1")));
    let access = store.get::<AccessTokens>("a1").unwrap().unwrap();
    assert_eq!(access.upstream_token.expose(), "ntn_upstream");
    assert_eq!(access.identity.as_deref(), Some("Ada (Acme)"));
    let refresh = store.get::<RefreshTokens>("r1").unwrap().unwrap();
    assert_eq!(refresh.identity.as_deref(), Some("Ada (Acme)"));
}

#[test]
fn snapshot_does_not_contain_plaintext() {
    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::open(dir.path(), "secret").unwrap();
    store.insert_pair(pair("a1", "r1")).unwrap();

    let raw = fs::read(dir.path().join(STORE_FILE_NAME)).unwrap();
    assert!(!raw.windows(12).any(|w| w == b"ntn_upstream"));
}

#[test]
fn wrong_secret_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = TokenStore::open(dir.path(), "old-secret").unwrap();
        store.put::<Clients>("c1", client("c1")).unwrap();
    }

    let store = TokenStore::open(dir.path(), "new-secret").unwrap();

    assert!(store.get::<Clients>("c1").unwrap().is_none());
    assert_eq!(store.stats().clients, 0);
}

#[test]
fn corrupt_file_starts_empty_and_is_replaced_on_write() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(STORE_FILE_NAME), b"\x01garbage").unwrap();

    let store = TokenStore::open(dir.path(), "secret").unwrap();
    assert_eq!(store.stats().clients, 0);

    store.put::<Clients>("c1", client("c1")).unwrap();
    let reopened = TokenStore::open(dir.path(), "secret").unwrap();
    assert!(reopened.get::<Clients>("c1").unwrap().is_some());
}

#[test]
fn stray_temp_file_is_ignored() {
    // GIVEN: a committed snapshot and a half-written temp file from a crash
    let dir = tempfile::tempdir().unwrap();
    {
        let store = TokenStore::open(dir.path(), "secret").unwrap();
        store.put::<Clients>("c1", client("c1")).unwrap();
    }
    fs::write(dir.path().join(".tmpA1b2C3"), b"\x01partial").unwrap();

    // WHEN: the store is reopened
    let store = TokenStore::open(dir.path(), "secret").unwrap();

    // THEN: the committed snapshot wins
    assert!(store.get::<Clients>("c1").unwrap().is_some());
}

#[test]
fn failed_write_rolls_back_memory() {
    // GIVEN: a store with one committed client
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let store = TokenStore::open(&data_dir, "secret").unwrap();
    store.put::<Clients>("c1", client("c1")).unwrap();

    // AND: the data directory is replaced by a plain file
    fs::remove_dir_all(&data_dir).unwrap();
    fs::write(&data_dir, b"not a directory").unwrap();

    // WHEN: further mutations are attempted
    let put = store.put::<Clients>("c2", client("c2"));
    let removed = store.remove::<Clients>("c1");

    // THEN: both fail and memory still matches the last commit
    assert!(matches!(put, Err(Error::Persistence(_))));
    assert!(matches!(removed, Err(Error::Persistence(_))));
    assert!(store.get::<Clients>("c1").unwrap().is_some());
    assert!(store.get::<Clients>("c2").unwrap().is_none());
}

#[test]
fn failed_rotation_keeps_old_pair() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let store = TokenStore::open(&data_dir, "secret").unwrap();
    store.insert_pair(pair("a1", "r1")).unwrap();

    fs::remove_dir_all(&data_dir).unwrap();
    fs::write(&data_dir, b"not a directory").unwrap();

    let result = store.rotate(Some("a1"), "r1", pair("a2", "r2"));

    assert!(matches!(result, Err(Error::Persistence(_))));
    assert!(store.get::<AccessTokens>("a1").unwrap().is_some());
    assert!(store.get::<RefreshTokens>("r1").unwrap().is_some());
    assert!(store.get::<AccessTokens>("a2").unwrap().is_none());
}

#[test]
fn concurrent_rotations_have_one_winner() {
    use std::sync::Arc;
    use std::thread;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(TokenStore::open(dir.path(), "secret").unwrap());
    store.insert_pair(pair("a0", "r0")).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store
                    .rotate(Some("a0"), "r0", pair(&format!("a{}", i + 1), &format!("r{}", i + 1)))
                    .is_ok()
            })
        })
        .collect();
    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(wins, 1);
    let stats = store.stats();
    assert_eq!(stats.access_tokens, 1);
    assert_eq!(stats.refresh_tokens, 1);
}
