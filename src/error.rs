//! Error types for brightid-client

use thiserror::Error;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, BrightIdError>;

/// Which slice of local state a migration or verification step covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationDomain {
    User,
    Connections,
    Apps,
}

impl MigrationDomain {
    fn noun(&self) -> &'static str {
        match self {
            MigrationDomain::User => "user data",
            MigrationDomain::Connections => "connections",
            MigrationDomain::Apps => "apps",
        }
    }
}

impl std::fmt::Display for MigrationDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationDomain::User => write!(f, "user"),
            MigrationDomain::Connections => write!(f, "connections"),
            MigrationDomain::Apps => write!(f, "apps"),
        }
    }
}

/// Client error
#[derive(Debug, Error)]
pub enum BrightIdError {
    /// Operation intent holds a value with no canonical form
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Signing key could not be read from the secure store
    #[error("Signing key unavailable: {0}")]
    KeyUnavailable(String),

    /// Key material is malformed
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Transport-level failure (retryable)
    #[error("Network error: {0}")]
    Network(String),

    /// Request did not complete in time (retryable)
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Server answered with a rejection
    #[error("Server rejected request ({status}): {message}")]
    ServerRejected { status: u16, message: String },

    /// Two distinct operations share one content address
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// Legacy state could not be migrated
    #[error("unable to recover {}: {message}", domain.noun())]
    Migration {
        domain: MigrationDomain,
        message: String,
    },

    /// Migrated state could not be checked against the legacy source
    #[error("unable to verify {}: {message}", domain.noun())]
    Verification {
        domain: MigrationDomain,
        message: String,
    },

    /// Persisted storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Secure credential store failure
    #[error("Keychain error: {0}")]
    Keychain(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BrightIdError {
    /// Transport faults that may succeed on another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrightIdError::Network(_) | BrightIdError::Timeout(_))
    }

    pub fn migration(domain: MigrationDomain, message: impl Into<String>) -> Self {
        BrightIdError::Migration {
            domain,
            message: message.into(),
        }
    }

    pub fn verification(domain: MigrationDomain, message: impl Into<String>) -> Self {
        BrightIdError::Verification {
            domain,
            message: message.into(),
        }
    }

    /// Domain tag for migration and verification failures
    pub fn domain(&self) -> Option<MigrationDomain> {
        match self {
            BrightIdError::Migration { domain, .. } | BrightIdError::Verification { domain, .. } => {
                Some(*domain)
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BrightIdError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BrightIdError::Timeout(err.to_string())
        } else if err.is_connect() {
            BrightIdError::Network(format!("failed to connect: {err}"))
        } else {
            BrightIdError::Network(err.to_string())
        }
    }
}

impl From<rusqlite::Error> for BrightIdError {
    fn from(err: rusqlite::Error) -> Self {
        BrightIdError::Storage(err.to_string())
    }
}
