//! Signed-operation pipeline integration tests
//!
//! Covers canonicalize -> hash -> sign end to end:
//! - construction order never changes the bytes
//! - keys and signatures are deterministic
//! - a missing signing key fails before anything is produced

use brightid_client::keychain::{FileKeychain, KdfParams, Keychain, MemoryKeychain};
use brightid_client::ops::intent::{add_membership, set_trusted_connections};
use brightid_client::ops::{
    canonical_string, hash_operation, verify_signature, Ed25519Signer, OperationSigner,
};
use brightid_client::{sign_operation, BrightIdError, OperationIntent, OperationName};
use serde_json::{json, Map, Value};

fn fixed_signer() -> Ed25519Signer {
    Ed25519Signer::from_secret_bytes(&[7u8; 32]).unwrap()
}

// =============================================================================
// Add Membership scenario
// =============================================================================

#[tokio::test]
async fn test_add_membership_scenario() {
    let signer = fixed_signer();
    let keychain = MemoryKeychain::with_credentials("u1", &signer.secret_key_b64());

    let first = {
        let signer = Ed25519Signer::from_keychain(&keychain).await.unwrap();
        sign_operation(add_membership("u1", "g1", 1000), &signer).unwrap()
    };
    let second = {
        let signer = Ed25519Signer::from_keychain(&keychain).await.unwrap();
        sign_operation(add_membership("u1", "g1", 1000), &signer).unwrap()
    };

    assert_eq!(
        first.message().unwrap(),
        r#"{"group":"g1","id":"u1","name":"Add Membership","timestamp":1000,"v":5}"#
    );
    assert_eq!(first.key(), second.key());
    assert_eq!(first.sig(), second.sig());
    assert!(first.key().is_well_formed());
    assert!(first.verify(&signer.public_key()).unwrap());
}

#[tokio::test]
async fn test_add_membership_without_key_is_unavailable() {
    let empty = MemoryKeychain::new();
    let result = Ed25519Signer::from_keychain(&empty).await;
    assert!(matches!(result, Err(BrightIdError::KeyUnavailable(_))));
}

#[tokio::test]
async fn test_locked_file_keychain_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keychain.json");

    FileKeychain::new(&path, "right")
        .with_kdf(KdfParams::insecure_fast())
        .save("u1", &fixed_signer().secret_key_b64())
        .await
        .unwrap();

    let locked = FileKeychain::new(&path, "wrong").with_kdf(KdfParams::insecure_fast());
    assert!(matches!(
        Ed25519Signer::from_keychain(&locked).await,
        Err(BrightIdError::KeyUnavailable(_))
    ));

    let unlocked = FileKeychain::new(&path, "right").with_kdf(KdfParams::insecure_fast());
    let signer = Ed25519Signer::from_keychain(&unlocked).await.unwrap();
    assert_eq!(signer.public_key(), fixed_signer().public_key());
}

// =============================================================================
// Canonical form
// =============================================================================

#[test]
fn test_construction_order_is_irrelevant() {
    let forward = OperationIntent::new(OperationName::AddMembership, 1000)
        .with("id", "u1")
        .with("group", "g1");

    let mut fields = Map::new();
    fields.insert("group".into(), json!("g1"));
    fields.insert("v".into(), json!(5));
    fields.insert("id".into(), json!("u1"));
    fields.insert("timestamp".into(), json!(1000));
    fields.insert("name".into(), json!("Add Membership"));
    let backward = OperationIntent::from_fields(fields);

    assert_eq!(
        canonical_string(&forward).unwrap(),
        canonical_string(&backward).unwrap()
    );

    let signer = fixed_signer();
    assert_eq!(
        sign_operation(forward, &signer).unwrap().key(),
        sign_operation(backward, &signer).unwrap().key()
    );
}

#[test]
fn test_nested_values_are_canonical() {
    let intent = set_trusted_connections("u1", &["b".to_string(), "a".to_string()], 1)
        .with("meta", json!({"z": 1, "a": {"y": [3, 1], "b": null}}));
    assert_eq!(
        canonical_string(&intent).unwrap(),
        r#"{"id":"u1","meta":{"a":{"b":null,"y":[3,1]},"z":1},"name":"Set Trusted Connections","timestamp":1,"trusted":["b","a"],"v":5}"#
    );
}

#[test]
fn test_unrepresentable_values_are_serialization_errors() {
    #[derive(serde::Serialize)]
    struct Bad {
        score: f64,
    }
    assert!(matches!(
        canonical_string(&Bad { score: f64::NAN }),
        Err(BrightIdError::Serialization(_))
    ));
    assert!(matches!(
        canonical_string(&Bad { score: f64::INFINITY }),
        Err(BrightIdError::Serialization(_))
    ));

    // a timestamp the node would round changes the signed bytes
    let intent = add_membership("u1", "g1", i64::MAX);
    assert!(matches!(
        sign_operation(intent, &fixed_signer()),
        Err(BrightIdError::Serialization(_))
    ));
}

// =============================================================================
// Hash and signature determinism
// =============================================================================

#[test]
fn test_hash_and_signature_are_deterministic() {
    let signer = fixed_signer();
    let message = canonical_string(&add_membership("u1", "g1", 1000)).unwrap();

    let keys: Vec<_> = (0..5).map(|_| hash_operation(message.as_bytes())).collect();
    assert!(keys.windows(2).all(|w| w[0] == w[1]));

    let sigs: Vec<_> = (0..5).map(|_| signer.sign(message.as_bytes())).collect();
    assert!(sigs.windows(2).all(|w| w[0] == w[1]));
    assert!(verify_signature(message.as_bytes(), &sigs[0], &signer.public_key()).unwrap());
}

#[test]
fn test_signed_record_body() {
    let signer = fixed_signer();
    let op = sign_operation(add_membership("u1", "g1", 1000), &signer).unwrap();
    let body: Value = serde_json::to_value(&op).unwrap();

    let object = body.as_object().unwrap();
    let mut fields: Vec<_> = object.keys().cloned().collect();
    fields.sort();
    assert_eq!(fields, vec!["_key", "group", "id", "name", "sig", "timestamp", "v"]);
    assert_eq!(body["_key"].as_str().unwrap().len(), 43);
}
