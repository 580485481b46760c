//! Operation signing
//!
//! Signatures are Ed25519 detached signatures over the exact canonical
//! message bytes. Ed25519 derives its nonce from the key and message, so
//! signing the same message twice yields the same signature.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use tracing::debug;

use crate::encoding::{b64_to_bytes, b64_to_url_safe_b64, bytes_to_b64};
use crate::error::{BrightIdError, Result};
use crate::keychain::Keychain;

/// Ed25519 seed length
pub const SEED_LEN: usize = 32;

/// NaCl-style secret key length (seed followed by public key)
pub const KEYPAIR_LEN: usize = 64;

/// Anything that can produce detached signatures for operations
pub trait OperationSigner: Send + Sync {
    /// Standard base64 public key
    fn public_key(&self) -> String;

    /// Standard base64 detached signature over `message`
    fn sign(&self, message: &[u8]) -> String;
}

/// Ed25519 signer holding the identity's secret key
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    /// Fresh random identity
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Accepts a 32-byte seed or a 64-byte `seed || public` secret key.
    ///
    /// For the 64-byte form the embedded public key must match the seed.
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self> {
        let signing_key = match secret.len() {
            SEED_LEN => {
                let mut seed = [0u8; SEED_LEN];
                seed.copy_from_slice(secret);
                SigningKey::from_bytes(&seed)
            }
            KEYPAIR_LEN => {
                let mut keypair = [0u8; KEYPAIR_LEN];
                keypair.copy_from_slice(secret);
                SigningKey::from_keypair_bytes(&keypair).map_err(|e| {
                    BrightIdError::InvalidKey(format!("secret key does not match its public half: {e}"))
                })?
            }
            n => {
                return Err(BrightIdError::InvalidKey(format!(
                    "expected {SEED_LEN} or {KEYPAIR_LEN} secret key bytes, got {n}"
                )))
            }
        };
        Ok(Self { signing_key })
    }

    /// Secret key in standard base64 (either accepted length)
    pub fn from_b64(secret: &str) -> Result<Self> {
        Self::from_secret_bytes(&b64_to_bytes(secret)?)
    }

    /// Load the identity's key from the secure store.
    ///
    /// # Errors
    ///
    /// [`BrightIdError::KeyUnavailable`] if the store is empty, locked, or
    /// holds material that is not a usable key.
    pub async fn from_keychain(keychain: &dyn Keychain) -> Result<Self> {
        let credentials = keychain
            .obtain()
            .await
            .map_err(|e| match e {
                unavailable @ BrightIdError::KeyUnavailable(_) => unavailable,
                other => BrightIdError::KeyUnavailable(other.to_string()),
            })?
            .ok_or_else(|| BrightIdError::KeyUnavailable("no credentials in keychain".into()))?;

        let secret = credentials
            .secret_key_bytes()
            .map_err(|e| BrightIdError::KeyUnavailable(e.to_string()))?;
        let signer = Self::from_secret_bytes(&secret)
            .map_err(|e| BrightIdError::KeyUnavailable(e.to_string()))?;

        debug!(username = %credentials.username, "Loaded signing key from keychain");
        Ok(signer)
    }

    /// 64-byte `seed || public` form, standard base64
    pub fn secret_key_b64(&self) -> String {
        bytes_to_b64(&self.signing_key.to_keypair_bytes())
    }

    /// User-facing id: url-safe base64 of the public key
    pub fn user_id(&self) -> String {
        b64_to_url_safe_b64(&self.public_key())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl OperationSigner for Ed25519Signer {
    fn public_key(&self) -> String {
        bytes_to_b64(self.signing_key.verifying_key().as_bytes())
    }

    fn sign(&self, message: &[u8]) -> String {
        bytes_to_b64(&self.signing_key.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Check a base64 detached signature against a base64 (or url-safe) public key
pub fn verify_signature(message: &[u8], signature_b64: &str, public_key_b64: &str) -> Result<bool> {
    let public: [u8; 32] = b64_to_bytes(public_key_b64)?
        .try_into()
        .map_err(|_| BrightIdError::InvalidKey("public key must be 32 bytes".into()))?;
    let key = VerifyingKey::from_bytes(&public)
        .map_err(|e| BrightIdError::InvalidKey(format!("invalid public key: {e}")))?;

    let sig: [u8; 64] = match b64_to_bytes(signature_b64).map(<[u8; 64]>::try_from) {
        Ok(Ok(sig)) => sig,
        _ => return Ok(false),
    };
    let signature = Signature::from_bytes(&sig);
    Ok(key.verify(message, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keychain::MemoryKeychain;

    #[test]
    fn test_sign_is_deterministic_and_verifies() {
        let signer = Ed25519Signer::generate();
        let message = b"{\"id\":\"u1\",\"name\":\"Add Membership\"}";

        let first = signer.sign(message);
        let second = signer.sign(message);
        assert_eq!(first, second);

        assert!(verify_signature(message, &first, &signer.public_key()).unwrap());
        assert!(!verify_signature(b"tampered", &first, &signer.public_key()).unwrap());
    }

    #[test]
    fn test_seed_and_keypair_forms_agree() {
        let signer = Ed25519Signer::generate();
        let from_keypair = Ed25519Signer::from_b64(&signer.secret_key_b64()).unwrap();
        let seed = signer.signing_key.to_bytes();
        let from_seed = Ed25519Signer::from_secret_bytes(&seed).unwrap();

        assert_eq!(from_keypair.public_key(), signer.public_key());
        assert_eq!(from_seed.public_key(), signer.public_key());
        assert_eq!(from_seed.sign(b"m"), signer.sign(b"m"));
    }

    #[test]
    fn test_invalid_secret_lengths() {
        assert!(matches!(
            Ed25519Signer::from_secret_bytes(&[0u8; 16]),
            Err(BrightIdError::InvalidKey(_))
        ));

        // 64 bytes whose public half does not belong to the seed
        let mut mismatched = Ed25519Signer::generate().signing_key.to_keypair_bytes();
        mismatched[40] ^= 0xff;
        assert!(Ed25519Signer::from_secret_bytes(&mismatched).is_err());
    }

    #[test]
    fn test_user_id_is_url_safe() {
        let signer = Ed25519Signer::generate();
        let id = signer.user_id();
        assert!(!id.contains('+') && !id.contains('/') && !id.contains('='));
        assert!(verify_signature(b"x", &signer.sign(b"x"), &id).unwrap());
    }

    #[test]
    fn test_garbage_signature_is_false() {
        let signer = Ed25519Signer::generate();
        assert!(!verify_signature(b"x", "AQID", &signer.public_key()).unwrap());
        assert!(verify_signature(b"x", "AQID", "AQID").is_err());
    }

    #[tokio::test]
    async fn test_from_keychain() {
        let signer = Ed25519Signer::generate();
        let keychain = MemoryKeychain::with_credentials("u1", &signer.secret_key_b64());
        let loaded = Ed25519Signer::from_keychain(&keychain).await.unwrap();
        assert_eq!(loaded.public_key(), signer.public_key());
    }

    #[tokio::test]
    async fn test_missing_key_is_unavailable() {
        let empty = MemoryKeychain::new();
        assert!(matches!(
            Ed25519Signer::from_keychain(&empty).await,
            Err(BrightIdError::KeyUnavailable(_))
        ));

        let garbage = MemoryKeychain::with_credentials("u1", "AQID");
        assert!(matches!(
            Ed25519Signer::from_keychain(&garbage).await,
            Err(BrightIdError::KeyUnavailable(_))
        ));
    }
}
