//! Signed operation records and the sign pipeline

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::canonical::canonical_string;
use super::hasher::{hash_operation, OperationKey};
use super::intent::OperationIntent;
use super::signer::{verify_signature, OperationSigner};
use crate::error::Result;

/// Intent plus its derived `sig` and `_key`, as PUT to the node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedOperation {
    #[serde(flatten)]
    intent: OperationIntent,
    sig: String,
    #[serde(rename = "_key")]
    key: OperationKey,
}

impl SignedOperation {
    pub fn intent(&self) -> &OperationIntent {
        &self.intent
    }

    /// Base64 detached signature
    pub fn sig(&self) -> &str {
        &self.sig
    }

    /// Content address; also the submission key
    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    /// The canonical message that was hashed and signed
    pub fn message(&self) -> Result<String> {
        canonical_string(&self.intent)
    }

    /// Recompute `_key` and check `sig` against `public_key`
    pub fn verify(&self, public_key: &str) -> Result<bool> {
        let message = self.message()?;
        if hash_operation(message.as_bytes()) != self.key {
            return Ok(false);
        }
        verify_signature(message.as_bytes(), &self.sig, public_key)
    }
}

/// Canonicalize, hash and sign an intent.
///
/// The intent is validated first; a failure at any stage aborts this
/// operation only and is returned unchanged.
pub fn sign_operation(intent: OperationIntent, signer: &dyn OperationSigner) -> Result<SignedOperation> {
    intent.validate()?;
    let message = canonical_string(&intent)?;
    let key = hash_operation(message.as_bytes());
    let sig = signer.sign(message.as_bytes());

    debug!(key = %key, name = ?intent.name().ok(), "Signed operation");

    Ok(SignedOperation { intent, sig, key })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrightIdError;
    use crate::ops::intent::add_membership;
    use crate::ops::signer::Ed25519Signer;

    #[test]
    fn test_sign_operation_fields() {
        let signer = Ed25519Signer::generate();
        let op = sign_operation(add_membership("u1", "g1", 1000), &signer).unwrap();

        assert_eq!(
            op.message().unwrap(),
            r#"{"group":"g1","id":"u1","name":"Add Membership","timestamp":1000,"v":5}"#
        );
        assert_eq!(op.key(), &hash_operation(op.message().unwrap().as_bytes()));
        assert!(op.verify(&signer.public_key()).unwrap());
    }

    #[test]
    fn test_serialized_record_is_flat() {
        let signer = Ed25519Signer::generate();
        let op = sign_operation(add_membership("u1", "g1", 1000), &signer).unwrap();
        let body = serde_json::to_value(&op).unwrap();

        assert_eq!(body["name"], "Add Membership");
        assert_eq!(body["group"], "g1");
        assert_eq!(body["_key"], op.key().as_str());
        assert_eq!(body["sig"], op.sig());

        let back: SignedOperation = serde_json::from_value(body).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_tampered_record_fails_verification() {
        let signer = Ed25519Signer::generate();
        let op = sign_operation(add_membership("u1", "g1", 1000), &signer).unwrap();

        let mut body = serde_json::to_value(&op).unwrap();
        body["group"] = "g2".into();
        let tampered: SignedOperation = serde_json::from_value(body).unwrap();
        assert!(!tampered.verify(&signer.public_key()).unwrap());

        let other = Ed25519Signer::generate();
        assert!(!op.verify(&other.public_key()).unwrap());
    }

    #[test]
    fn test_invalid_intent_is_rejected_before_signing() {
        let signer = Ed25519Signer::generate();
        let intent = add_membership("u1", "g1", 1000).with("sig", "forged");
        assert!(matches!(
            sign_operation(intent, &signer),
            Err(BrightIdError::Serialization(_))
        ));
    }
}
