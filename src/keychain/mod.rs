//! Secure credential store
//!
//! The identity's secret key is read from here on demand by the signer and
//! written exactly once, at account creation or during migration. It is
//! never placed in a payload and never logged.
//!
//! # Backends
//!
//! - [`MemoryKeychain`]: process-local, for tests and one-shot runs
//! - [`FileKeychain`]: a single password-encrypted file

pub mod crypto;
pub mod file;

use async_trait::async_trait;
use tokio::sync::RwLock;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::encoding::b64_to_bytes;
use crate::error::Result;

pub use crypto::KdfParams;
pub use file::FileKeychain;

/// Username/secret pair held by the keychain
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    /// Account the secret belongs to (the user id, or a sentinel)
    pub username: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Secret key as stored (standard base64)
    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    /// Decoded secret key bytes
    pub fn secret_key_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        b64_to_bytes(&self.secret_key).map(Zeroizing::new)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Key-value credential store: `save(id, secret)` / `obtain()`
#[async_trait]
pub trait Keychain: Send + Sync {
    /// Store the secret for `username`, replacing any previous entry
    async fn save(&self, username: &str, secret_key: &str) -> Result<()>;

    /// Current credentials, or `None` when nothing has been saved
    async fn obtain(&self) -> Result<Option<Credentials>>;

    /// Forget the stored credentials
    async fn clear(&self) -> Result<()>;
}

/// In-memory keychain
#[derive(Default)]
pub struct MemoryKeychain {
    credentials: RwLock<Option<Credentials>>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(username: &str, secret_key: &str) -> Self {
        Self {
            credentials: RwLock::new(Some(Credentials::new(username, secret_key))),
        }
    }
}

#[async_trait]
impl Keychain for MemoryKeychain {
    async fn save(&self, username: &str, secret_key: &str) -> Result<()> {
        *self.credentials.write().await = Some(Credentials::new(username, secret_key));
        Ok(())
    }

    async fn obtain(&self) -> Result<Option<Credentials>> {
        Ok(self.credentials.read().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        *self.credentials.write().await = None;
        Ok(())
    }
}
