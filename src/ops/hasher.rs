//! Content addressing for operations
//!
//! An operation's `_key` is the SHA-256 of its canonical message, base64
//! encoded and then made url-safe so it can sit directly in
//! `/operations/{key}`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::encoding::{b64_to_url_safe_b64, bytes_to_b64};

/// Length of an encoded key: 32 digest bytes in unpadded base64
pub const OPERATION_KEY_LEN: usize = 43;

/// Content address of a canonical operation message
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationKey(String);

impl OperationKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a key received from elsewhere (a stored record, a CLI flag)
    pub fn from_encoded(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Whether this key has the shape [`hash_operation`] produces
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == OPERATION_KEY_LEN
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }
}

impl std::fmt::Display for OperationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash canonical bytes into an operation key
pub fn hash_operation(message: &[u8]) -> OperationKey {
    let digest = Sha256::digest(message);
    OperationKey(b64_to_url_safe_b64(&bytes_to_b64(&digest)))
}

/// Hex SHA-256, used in logs and audit output
pub fn content_hash_hex(message: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message);
    hex::encode(hasher.finalize())
}
