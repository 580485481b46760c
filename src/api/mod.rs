//! HTTP clients for the node and the recovery service

pub mod backup;
pub mod node;
pub mod response;

pub use backup::{BackupApi, BackupApiConfig, DEFAULT_RECOVERY_URL};
pub use node::{
    NodeApi, NodeApiConfig, RetryPolicy, DEFAULT_LEDGER_TTL, DEFAULT_NODE_URL, DEFAULT_SUCCESS_STATUS,
};
pub use response::{Problem, SubmitResponse};
