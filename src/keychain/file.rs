//! Password-encrypted keychain file
//!
//! One JSON document per keychain. The username is stored in clear; the
//! secret is sealed with ChaCha20-Poly1305 under an Argon2id key derived
//! from the keychain password. Salt and nonce are fresh on every save.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::crypto::{
    decrypt_secret, derive_key_encryption_key, encrypt_secret, generate_random_bytes, KdfParams,
    NONCE_LEN, SALT_LEN,
};
use super::{Credentials, Keychain};
use crate::encoding::{b64_to_bytes, bytes_to_b64};
use crate::error::{BrightIdError, Result};

/// On-disk layout
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedCredentials {
    username: String,
    salt: String,
    nonce: String,
    ciphertext: String,
    kdf: KdfParams,
}

/// Keychain persisted to a single encrypted file
pub struct FileKeychain {
    path: PathBuf,
    password: Zeroizing<String>,
    kdf: KdfParams,
}

impl FileKeychain {
    pub fn new(path: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            password: Zeroizing::new(password.into()),
            kdf: KdfParams::default(),
        }
    }

    /// Override the Argon2id cost used for new writes
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn seal(&self, username: &str, secret_key: &str) -> Result<SealedCredentials> {
        let salt: [u8; SALT_LEN] = generate_random_bytes();
        let nonce: [u8; NONCE_LEN] = generate_random_bytes();
        let key = derive_key_encryption_key(self.password.as_bytes(), &salt, self.kdf)?;
        let ciphertext = encrypt_secret(secret_key.as_bytes(), &key, &nonce)?;

        Ok(SealedCredentials {
            username: username.to_string(),
            salt: bytes_to_b64(&salt),
            nonce: bytes_to_b64(&nonce),
            ciphertext: bytes_to_b64(&ciphertext),
            kdf: self.kdf,
        })
    }

    fn unseal(&self, sealed: &SealedCredentials) -> Result<Credentials> {
        let salt = b64_to_bytes(&sealed.salt)
            .map_err(|e| BrightIdError::Keychain(format!("corrupt salt: {e}")))?;
        let nonce: [u8; NONCE_LEN] = b64_to_bytes(&sealed.nonce)
            .ok()
            .and_then(|n| n.try_into().ok())
            .ok_or_else(|| BrightIdError::Keychain("corrupt nonce".into()))?;
        let ciphertext = b64_to_bytes(&sealed.ciphertext)
            .map_err(|e| BrightIdError::Keychain(format!("corrupt ciphertext: {e}")))?;

        let key = derive_key_encryption_key(self.password.as_bytes(), &salt, sealed.kdf)?;
        let plaintext = decrypt_secret(&ciphertext, &key, &nonce)?;
        let secret = std::str::from_utf8(&plaintext)
            .map_err(|_| BrightIdError::Keychain("secret is not valid UTF-8".into()))?;

        Ok(Credentials::new(sealed.username.clone(), secret))
    }
}

#[async_trait]
impl Keychain for FileKeychain {
    async fn save(&self, username: &str, secret_key: &str) -> Result<()> {
        let sealed = self.seal(username, secret_key)?;
        let body = serde_json::to_vec_pretty(&sealed)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| BrightIdError::Keychain(format!("creating keychain dir: {e}")))?;
            }
        }
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|e| BrightIdError::Keychain(format!("writing {}: {e}", self.path.display())))?;

        info!(path = %self.path.display(), username, "Saved credentials to keychain");
        Ok(())
    }

    async fn obtain(&self) -> Result<Option<Credentials>> {
        let body = match tokio::fs::read(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No keychain file");
                return Ok(None);
            }
            Err(e) => {
                return Err(BrightIdError::Keychain(format!(
                    "reading {}: {e}",
                    self.path.display()
                )))
            }
        };

        let sealed: SealedCredentials = serde_json::from_slice(&body)
            .map_err(|e| BrightIdError::Keychain(format!("corrupt keychain file: {e}")))?;
        self.unseal(&sealed).map(Some)
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BrightIdError::Keychain(format!(
                "removing {}: {e}",
                self.path.display()
            ))),
        }
    }
}
