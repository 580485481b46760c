//! Legacy v0 migration integration tests
//!
//! Builds realistic v0 snapshots (identity, connections keyed by public
//! key, `App:` entries, storage internals) and runs the migrator against
//! in-memory and SQLite storage.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use brightid_client::encoding::b64_to_url_safe_b64;
use brightid_client::keychain::{Keychain, MemoryKeychain};
use brightid_client::migration::{partition_keys, Migrator, FALLBACK_USERNAME};
use brightid_client::ops::{Ed25519Signer, OperationSigner};
use brightid_client::state::{Action, MemoryStateStore, StateStore};
use brightid_client::storage::{KeyValueStorage, MemoryStorage, SqliteStorage};
use brightid_client::{BrightIdError, MigrationDomain};

struct Snapshot {
    user: Ed25519Signer,
    bob: String,
    carol: String,
    entries: Vec<(String, String)>,
}

/// Secret key the way v0 persisted a Uint8Array: `{"0": b0, "1": b1, ...}`
fn indexed_secret(signer: &Ed25519Signer) -> Value {
    let bytes = brightid_client::encoding::b64_to_bytes(&signer.secret_key_b64()).unwrap();
    let map: Map<String, Value> = bytes
        .iter()
        .enumerate()
        .map(|(i, b)| (i.to_string(), json!(b)))
        .collect();
    Value::Object(map)
}

fn v0_snapshot() -> Snapshot {
    let user = Ed25519Signer::from_secret_bytes(&[1u8; 32]).unwrap();
    let bob = Ed25519Signer::from_secret_bytes(&[2u8; 32]).unwrap().public_key();
    let carol = Ed25519Signer::from_secret_bytes(&[3u8; 32]).unwrap().public_key();

    let user_data = json!({
        "publicKey": user.public_key(),
        "name": "Alice",
        "photo": {"filename": "alice.jpg"},
        "secretKey": indexed_secret(&user),
        "score": 0,
    });

    let entries = vec![
        ("userData".to_string(), user_data.to_string()),
        (
            bob.clone(),
            json!({
                "publicKey": bob,
                "name": "Bob",
                "connectionDate": 1000,
                "trustScore": "90",
            })
            .to_string(),
        ),
        (
            carol.clone(),
            json!({
                "publicKey": carol,
                "name": "Carol",
                "connectionDate": "3000",
            })
            .to_string(),
        ),
        (
            "App:ethdenver".to_string(),
            json!({
                "name": "ethdenver",
                "url": "https://ethdenver.com",
                "logo": "data:image/png;base64,AAAA",
                "dateAdded": 1500,
            })
            .to_string(),
        ),
        (
            "App:gitcoin".to_string(),
            json!({"name": "gitcoin", "dateAdded": 2500}).to_string(),
        ),
        ("store:version".to_string(), "\"1\"".to_string()),
    ];

    Snapshot {
        user,
        bob,
        carol,
        entries,
    }
}

struct Harness {
    migrator: Migrator,
    storage: Arc<dyn KeyValueStorage>,
    keychain: Arc<MemoryKeychain>,
    state: Arc<MemoryStateStore>,
}

fn harness(storage: Arc<dyn KeyValueStorage>) -> Harness {
    let keychain = Arc::new(MemoryKeychain::new());
    let state = Arc::new(MemoryStateStore::new());
    let migrator = Migrator::new(storage.clone(), keychain.clone(), state.clone());
    Harness {
        migrator,
        storage,
        keychain,
        state,
    }
}

// =============================================================================
// Full run
// =============================================================================

#[tokio::test]
async fn test_run_migrates_and_verifies() {
    let snapshot = v0_snapshot();
    let h = harness(Arc::new(MemoryStorage::from_entries(snapshot.entries.clone())));

    let report = h.migrator.run().await.unwrap();
    assert_eq!(report.connections, 2);
    assert_eq!(report.apps, 2);
    assert!(report.all_verified(), "{report:?}");

    let expected_id = b64_to_url_safe_b64(&snapshot.user.public_key());
    assert_eq!(report.user_id.as_deref(), Some(expected_id.as_str()));

    let state = h.state.state();
    assert_eq!(state.user.name.as_deref(), Some("Alice"));
    assert_eq!(state.user.extra.get("score"), Some(&json!(0)));
    assert!(!state.user.extra.contains_key("secretKey"));

    // newest connection first, upgraded ids
    let names: Vec<_> = state.connections.iter().map(|c| c.name.as_deref()).collect();
    assert_eq!(names, vec![Some("Carol"), Some("Bob")]);
    assert_eq!(state.connections[0].id, Some(b64_to_url_safe_b64(&snapshot.carol)));
    assert_eq!(state.connections[1].id, Some(b64_to_url_safe_b64(&snapshot.bob)));
    assert!(state
        .connections
        .iter()
        .all(|c| c.status.as_deref() == Some("verified")));
    assert_eq!(state.connections[1].extra.get("trustScore"), Some(&json!("90")));

    // newest app first, unknown fields kept
    let apps: Vec<_> = state.apps.iter().map(|a| a.name.as_deref()).collect();
    assert_eq!(apps, vec![Some("gitcoin"), Some("ethdenver")]);
    assert!(state.apps[1].extra.contains_key("logo"));
    assert!(state.safe_pub_key.is_none());
}

#[tokio::test]
async fn test_migrated_key_signs_as_the_legacy_identity() {
    let snapshot = v0_snapshot();
    let h = harness(Arc::new(MemoryStorage::from_entries(snapshot.entries.clone())));
    h.migrator.run().await.unwrap();

    let credentials = h.keychain.obtain().await.unwrap().unwrap();
    assert_eq!(credentials.username, FALLBACK_USERNAME);

    let signer = Ed25519Signer::from_keychain(h.keychain.as_ref()).await.unwrap();
    assert_eq!(signer.public_key(), snapshot.user.public_key());
}

#[tokio::test]
async fn test_run_against_device_database() {
    let snapshot = v0_snapshot();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("RKStorage");

    let storage = SqliteStorage::open(&path).unwrap();
    for (key, value) in &snapshot.entries {
        storage.set(key, value).await.unwrap();
    }
    drop(storage);

    let h = harness(Arc::new(SqliteStorage::open(&path).unwrap()));
    let report = h.migrator.run().await.unwrap();
    assert!(report.all_verified(), "{report:?}");
    assert_eq!(report.connections, 2);
}

#[tokio::test]
async fn test_user_id_is_kept_as_keychain_username() {
    let mut snapshot = v0_snapshot();
    let mut user_data: Value = serde_json::from_str(&snapshot.entries[0].1).unwrap();
    user_data["id"] = json!("legacy-id");
    snapshot.entries[0].1 = user_data.to_string();

    let h = harness(Arc::new(MemoryStorage::from_entries(snapshot.entries)));
    h.migrator.bootstrap_v0().await.unwrap();

    let credentials = h.keychain.obtain().await.unwrap().unwrap();
    assert_eq!(credentials.username, "legacy-id");
}

// =============================================================================
// Partitioning
// =============================================================================

#[tokio::test]
async fn test_user_connection_app_partition() {
    let storage = MemoryStorage::from_entries([
        (
            "userData",
            r#"{"publicKey":"cGs=","name":"A","secretKey":"AQID"}"#,
        ),
        ("conn:abc", r#"{"name":"B","publicKey":"conn:abc"}"#),
        ("App:xyz", r#"{"name":"xyz","dateAdded":1}"#),
    ]);
    let h = harness(Arc::new(storage));

    let all_keys = h.storage.all_keys().await.unwrap();
    let partitioned = partition_keys(&all_keys);
    assert_eq!(partitioned.user.as_deref(), Some("userData"));
    assert_eq!(partitioned.connections, vec!["conn:abc".to_string()]);
    assert_eq!(partitioned.apps, vec!["App:xyz".to_string()]);
    assert!(partitioned.internal.is_empty());

    h.migrator.bootstrap_v0().await.unwrap();
    assert_eq!(h.migrator.get_connections(&all_keys).await.unwrap(), 1);
    assert_eq!(h.migrator.get_apps(&all_keys).await.unwrap(), 1);

    let state = h.state.state();
    assert_eq!(state.user.name.as_deref(), Some("A"));
    assert_eq!(state.connections.len(), 1);
    assert_eq!(state.connections[0].name.as_deref(), Some("B"));
    assert_eq!(state.apps.len(), 1);
    assert_eq!(state.apps[0].name.as_deref(), Some("xyz"));
}

#[tokio::test]
async fn test_apps_with_string_dates_are_imported() {
    let storage = MemoryStorage::from_entries([
        ("App:old", r#"{"name":"old","dateAdded":100}"#),
        ("App:new", r#"{"name":"new","dateAdded":"2500"}"#),
        ("App:undated", r#"{"name":"undated"}"#),
    ]);
    let h = harness(Arc::new(storage));
    let all_keys = h.storage.all_keys().await.unwrap();

    assert_eq!(h.migrator.get_apps(&all_keys).await.unwrap(), 3);
    let state = h.state.state();
    let names: Vec<_> = state.apps.iter().map(|a| a.name.as_deref()).collect();
    assert_eq!(names, vec![Some("new"), Some("old"), Some("undated")]);
    // the stored form is kept as-is
    assert_eq!(state.apps[0].date_added, Some(json!("2500")));
    assert!(h.migrator.verify_apps(&all_keys).await.unwrap());
}

// =============================================================================
// Verification
// =============================================================================

#[tokio::test]
async fn test_verification_is_rerunnable_and_detects_drift() {
    let snapshot = v0_snapshot();
    let h = harness(Arc::new(MemoryStorage::from_entries(snapshot.entries.clone())));
    h.migrator.run().await.unwrap();

    let all_keys = h.storage.all_keys().await.unwrap();
    for _ in 0..2 {
        assert!(h.migrator.verify_user_data().await.unwrap());
        assert!(h.migrator.verify_connections(&all_keys).unwrap());
        assert!(h.migrator.verify_apps(&all_keys).await.unwrap());
    }

    let mut apps = h.state.state().apps;
    apps.reverse();
    h.state.dispatch(Action::SetApps(apps));
    assert!(!h.migrator.verify_apps(&all_keys).await.unwrap());

    let mut connections = h.state.state().connections;
    connections.pop();
    h.state.dispatch(Action::SetConnections(connections));
    assert!(!h.migrator.verify_connections(&all_keys).unwrap());

    let mut user = h.state.state().user;
    user.name = Some("Mallory".into());
    h.state.dispatch(Action::SetUserData(user));
    assert!(!h.migrator.verify_user_data().await.unwrap());
}

#[tokio::test]
async fn test_verify_user_data_without_source_fails() {
    let snapshot = v0_snapshot();
    let h = harness(Arc::new(MemoryStorage::from_entries(snapshot.entries.clone())));
    h.migrator.run().await.unwrap();

    h.storage.remove("userData").await.unwrap();
    let err = h.migrator.verify_user_data().await.unwrap_err();
    assert!(matches!(
        err,
        BrightIdError::Verification {
            domain: MigrationDomain::User,
            ..
        }
    ));
    assert!(err.to_string().starts_with("unable to verify user data"));
}

// =============================================================================
// Upgrade pass
// =============================================================================

#[tokio::test]
async fn test_upgrade_is_idempotent() {
    let snapshot = v0_snapshot();
    let h = harness(Arc::new(MemoryStorage::from_entries(snapshot.entries.clone())));
    h.migrator.run().await.unwrap();

    let once = h.state.state();
    h.migrator.upgrade_conns_and_ids().unwrap();
    assert_eq!(h.state.state(), once);
}

#[tokio::test]
async fn test_upgrade_leaves_keyless_connections_alone() {
    let storage = MemoryStorage::from_entries([
        (
            "userData",
            r#"{"publicKey":"a+b/","name":"A","secretKey":"AQID"}"#,
        ),
        ("peer1", r#"{"id":"peer1","name":"B","status":"initiated"}"#),
    ]);
    let h = harness(Arc::new(storage));
    h.state.dispatch(Action::SetSafePubKey("pending".into()));

    let report = h.migrator.run().await.unwrap();
    assert_eq!(report.user_id.as_deref(), Some("a-b_"));
    assert!(report.connections_verified);

    let state = h.state.state();
    assert_eq!(state.connections[0].id.as_deref(), Some("peer1"));
    assert_eq!(state.connections[0].status.as_deref(), Some("initiated"));
    assert!(state.safe_pub_key.is_none());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_missing_identity_blocks_migration() {
    let h = harness(Arc::new(MemoryStorage::from_entries([(
        "conn:abc",
        r#"{"name":"B"}"#,
    )])));

    let err = h.migrator.run().await.unwrap_err();
    assert_eq!(err.domain(), Some(MigrationDomain::User));
    assert_eq!(
        err.to_string(),
        "unable to recover user data: no prior identity found"
    );
    assert!(h.keychain.obtain().await.unwrap().is_none());
    assert!(h.state.state().connections.is_empty());
}

#[tokio::test]
async fn test_corrupt_connection_names_its_domain() {
    let h = harness(Arc::new(MemoryStorage::from_entries([
        (
            "userData",
            r#"{"publicKey":"cGs=","name":"A","secretKey":"AQID"}"#,
        ),
        ("conn:abc", "{truncated"),
    ])));

    let err = h.migrator.run().await.unwrap_err();
    assert_eq!(err.domain(), Some(MigrationDomain::Connections));
    assert!(err.to_string().starts_with("unable to recover connections"));
}
