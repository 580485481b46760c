//! Recovery backups and signed profile uploads
//!
//! Unlike operation submission, every non-2xx answer here is an error:
//! the body's `errorMessage` if the server sent one, else the problem
//! category.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::node::DEFAULT_NODE_URL;
use super::response::SubmitResponse;
use crate::encoding::b64_to_url_safe_b64;
use crate::error::{BrightIdError, Result};
use crate::keychain::Keychain;
use crate::ops::intent::set_signing_key;
use crate::ops::{sign_operation, Ed25519Signer};

/// Default recovery-backup endpoint
pub const DEFAULT_RECOVERY_URL: &str = "https://recovery.brightid.org";

#[derive(Debug, Clone)]
pub struct BackupApiConfig {
    /// Serves `/backups/...`
    pub recovery_url: String,
    /// Serves `/profile/...`; normally the node
    pub profile_url: String,
    pub timeout: Duration,
}

impl Default for BackupApiConfig {
    fn default() -> Self {
        Self {
            recovery_url: DEFAULT_RECOVERY_URL.to_string(),
            profile_url: DEFAULT_NODE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct BackupApi {
    config: BackupApiConfig,
    client: Client,
}

impl BackupApi {
    pub fn new(config: BackupApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BrightIdError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config: BackupApiConfig {
                recovery_url: config.recovery_url.trim_end_matches('/').to_string(),
                profile_url: config.profile_url.trim_end_matches('/').to_string(),
                ..config
            },
            client,
        })
    }

    /// Fetch the backup stored under two keys; returns the response body
    pub async fn get_recovery(&self, key1: &str, key2: &str) -> Result<Value> {
        let url = self.backup_url(key1, key2);
        let response = Self::send(self.client.get(&url)).await?;
        Ok(response.data.unwrap_or(Value::Null))
    }

    /// Store `data` under two keys
    pub async fn put_recovery(&self, key1: &str, key2: &str, data: &str) -> Result<()> {
        let url = self.backup_url(key1, key2);
        Self::send(self.client.put(&url).json(&json!({ "data": data }))).await?;
        debug!(url = %url, "Stored recovery backup");
        Ok(())
    }

    /// Signed profile uploaded for `public_key`, if any
    pub async fn get_sig(&self, public_key: &str) -> Result<Option<Value>> {
        let url = format!(
            "{}/profile/download/{}",
            self.config.profile_url,
            b64_to_url_safe_b64(public_key)
        );
        let response = Self::send(self.client.get(&url)).await?;
        Ok(response
            .data
            .and_then(|body| body.get("data").cloned())
            .filter(|data| !data.is_null()))
    }

    /// Sign a `Set Signing Key` operation with the keychain's identity and
    /// upload the signature, keyed by the new signing key.
    ///
    /// # Errors
    ///
    /// [`BrightIdError::KeyUnavailable`] when the keychain has no usable key,
    /// [`BrightIdError::ServerRejected`] on a non-2xx answer.
    pub async fn set_sig(
        &self,
        id: &str,
        timestamp: i64,
        signing_key: &str,
        keychain: &dyn Keychain,
    ) -> Result<()> {
        let credentials = keychain
            .obtain()
            .await?
            .ok_or_else(|| BrightIdError::KeyUnavailable("no credentials in keychain".into()))?;
        let signer = credentials
            .secret_key_bytes()
            .and_then(|secret| Ed25519Signer::from_secret_bytes(&secret))
            .map_err(|e| BrightIdError::KeyUnavailable(e.to_string()))?;

        let op = sign_operation(set_signing_key(id, signing_key, timestamp), &signer)?;
        let body = json!({
            "data": {
                "signer": credentials.username,
                "id": id,
                "sig": op.sig(),
            },
            "uuid": b64_to_url_safe_b64(signing_key),
        });

        let url = format!("{}/profile/upload", self.config.profile_url);
        Self::send(self.client.post(&url).json(&body)).await?;
        info!(id = %id, "Uploaded signing key signature");
        Ok(())
    }

    fn backup_url(&self, key1: &str, key2: &str) -> String {
        format!(
            "{}/backups/{}/{}",
            self.config.recovery_url,
            b64_to_url_safe_b64(key1),
            b64_to_url_safe_b64(key2)
        )
    }

    async fn send(request: RequestBuilder) -> Result<SubmitResponse> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        SubmitResponse::from_response(response, status)
            .await?
            .error_for_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_url_uses_url_safe_keys() {
        let api = BackupApi::new(BackupApiConfig {
            recovery_url: "http://recovery.local/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            api.backup_url("a+b/c==", "d/e"),
            "http://recovery.local/backups/a-b_c/d_e"
        );
    }
}
