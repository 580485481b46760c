//! Operation submitter for the BrightID node
//!
//! Signed records are PUT to `/operations/{_key}`. Because the path is the
//! record's content address, repeating a submission is harmless, and the
//! client keeps a ledger of recently accepted records so it can skip the
//! network entirely when one is submitted again.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::response::SubmitResponse;
use crate::error::{BrightIdError, Result};
use crate::ops::{canonical_string, content_hash_hex, hash_operation, OperationKey, SignedOperation};

/// Default node endpoint
pub const DEFAULT_NODE_URL: &str = "http://node.brightid.org";

/// Status the node answers an accepted operation with
pub const DEFAULT_SUCCESS_STATUS: u16 = 204;

/// How long an accepted record is answered from the ledger
pub const DEFAULT_LEDGER_TTL: Duration = Duration::from_secs(3600);

/// Exponential backoff for transport failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Node client configuration
#[derive(Debug, Clone)]
pub struct NodeApiConfig {
    /// Base URL, without trailing slash
    pub base_url: String,
    pub success_status: u16,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Accepted records older than this are sent again; zero disables the cache
    pub ledger_ttl: Duration,
}

impl Default for NodeApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_NODE_URL.to_string(),
            success_status: DEFAULT_SUCCESS_STATUS,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            ledger_ttl: DEFAULT_LEDGER_TTL,
        }
    }
}

struct LedgerEntry {
    /// Digest of the accepted record's canonical body, signature included
    digest: String,
    response: SubmitResponse,
    accepted_at: Instant,
}

/// Records the node has accepted from this client, kept for `ttl`
pub(crate) struct SubmissionLedger {
    entries: DashMap<String, LedgerEntry>,
    ttl: Duration,
}

impl SubmissionLedger {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cached response if `key` was accepted within the TTL.
    ///
    /// Fails if `key` was accepted for a record with a different body.
    pub(crate) fn check(&self, key: &OperationKey, digest: &str) -> Result<Option<SubmitResponse>> {
        let Some(entry) = self.entries.get(key.as_str()) else {
            return Ok(None);
        };
        if entry.accepted_at.elapsed() >= self.ttl {
            return Ok(None);
        }
        if entry.digest != digest {
            return Err(BrightIdError::IntegrityViolation(format!(
                "operation key {key} already accepted for a different record"
            )));
        }
        Ok(Some(entry.response.clone()))
    }

    pub(crate) fn accept(&self, key: &OperationKey, digest: String, response: &SubmitResponse) {
        self.cleanup();
        if self.ttl.is_zero() {
            return;
        }
        self.entries.insert(
            key.as_str().to_string(),
            LedgerEntry {
                digest,
                response: response.clone(),
                accepted_at: Instant::now(),
            },
        );
    }

    pub(crate) fn forget(&self, key: &OperationKey) {
        self.entries.remove(key.as_str());
    }

    /// Drop expired entries
    pub(crate) fn cleanup(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.accepted_at.elapsed() < ttl);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Client for the node's operations endpoint
pub struct NodeApi {
    config: NodeApiConfig,
    client: Client,
    ledger: SubmissionLedger,
}

impl NodeApi {
    pub fn new(config: NodeApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BrightIdError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            ledger: SubmissionLedger::new(config.ledger_ttl),
            config: NodeApiConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            client,
        })
    }

    pub fn config(&self) -> &NodeApiConfig {
        &self.config
    }

    /// Submit a signed record.
    ///
    /// Rejections by the node come back as an unsuccessful
    /// [`SubmitResponse`]; transport failures are retried per the
    /// [`RetryPolicy`] and then returned as errors.
    ///
    /// # Errors
    ///
    /// - [`BrightIdError::IntegrityViolation`] if `_key` does not address the
    ///   record's message, or the key was accepted for a different record
    /// - [`BrightIdError::Network`] / [`BrightIdError::Timeout`] after the
    ///   last attempt
    pub async fn submit(&self, op: &SignedOperation) -> Result<SubmitResponse> {
        let message = op.message()?;
        let key = op.key();
        if &hash_operation(message.as_bytes()) != key {
            return Err(BrightIdError::IntegrityViolation(format!(
                "operation key {key} does not match the record's content"
            )));
        }

        let digest = content_hash_hex(canonical_string(op)?.as_bytes());
        if let Some(cached) = self.ledger.check(key, &digest)? {
            debug!(key = %key, "Operation already accepted, skipping resubmission");
            return Ok(cached);
        }

        let response = self.put_with_retry(op).await?;
        if response.success {
            self.ledger.accept(key, digest, &response);
            info!(key = %key, status = response.status, "Operation accepted");
        } else {
            warn!(
                key = %key,
                status = response.status,
                error = ?response.error_message(),
                "Operation rejected"
            );
        }
        Ok(response)
    }

    /// Drop a key from the ledger so the next submit goes to the network
    pub fn forget(&self, key: &OperationKey) {
        self.ledger.forget(key);
    }

    /// Accepted records currently answered from the ledger
    pub fn submitted_count(&self) -> usize {
        self.ledger.len()
    }

    /// Processing state the node reports for an operation
    pub async fn get_operation_state(&self, key: &OperationKey) -> Result<Value> {
        let url = self.operation_url(key);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            SubmitResponse::from_parts(status, &text, self.config.success_status).into_result()?;
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn operation_url(&self, key: &OperationKey) -> String {
        format!(
            "{}/operations/{}",
            self.config.base_url,
            urlencoding::encode(key.as_str())
        )
    }

    async fn put_with_retry(&self, op: &SignedOperation) -> Result<SubmitResponse> {
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.put_once(op).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = policy.backoff_for(attempt);
                    warn!(
                        key = %op.key(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Submission failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn put_once(&self, op: &SignedOperation) -> Result<SubmitResponse> {
        let url = self.operation_url(op.key());
        debug!(url = %url, "PUT operation");
        let response = self.client.put(&url).json(op).send().await?;
        SubmitResponse::from_response(response, self.config.success_status).await
    }
}
