//! brightid-client - headless core of a BrightID identity client
//!
//! Owns the pieces of the client that carry real engineering weight:
//!
//! ## Services
//!
//! - **Operations**: canonical serialization, content-addressed keys and
//!   Ed25519 detached signatures for node operations
//! - **Node API**: idempotent `PUT /operations/{key}` submission with an
//!   explicit retry policy
//! - **Backup API**: recovery blobs and signing-key profile uploads
//! - **Keychain**: secure credential store (in-memory or encrypted file)
//! - **Storage**: persisted key-value storage, including the on-device
//!   AsyncStorage sqlite layout
//! - **Migration**: one-shot upgrade of the legacy `v0` snapshot into the
//!   injected state container, with cross-checks

pub mod api;
pub mod config;
pub mod encoding;
pub mod error;
pub mod keychain;
pub mod migration;
pub mod ops;
pub mod state;
pub mod storage;

pub use api::{BackupApi, BackupApiConfig, NodeApi, NodeApiConfig, Problem, RetryPolicy, SubmitResponse};
pub use config::Args;
pub use error::{BrightIdError, MigrationDomain, Result};
pub use keychain::{Credentials, Keychain};
pub use migration::{MigrationReport, Migrator};
pub use ops::{sign_operation, OperationIntent, OperationKey, OperationName, SignedOperation};
pub use state::{Action, AppState, StateStore};
pub use storage::KeyValueStorage;
