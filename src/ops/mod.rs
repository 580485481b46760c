//! Signed-operation pipeline
//!
//! ```text
//! OperationIntent ──canonicalize──▶ message bytes
//!                                     ├──hash──▶ _key
//!                                     └──sign──▶ sig
//!                 ──────────────────▶ SignedOperation ──▶ NodeApi::submit
//! ```
//!
//! Each stage is a pure function of its inputs, so identical intents always
//! produce identical `_key`s and resubmission is safe.

pub mod canonical;
pub mod hasher;
pub mod intent;
pub mod record;
pub mod signer;

pub use canonical::{canonical_f64, canonical_string, canonicalize, MAX_SAFE_INTEGER};
pub use hasher::{content_hash_hex, hash_operation, OperationKey};
pub use intent::{OperationIntent, OperationName, PROTOCOL_VERSION};
pub use record::{sign_operation, SignedOperation};
pub use signer::{verify_signature, Ed25519Signer, OperationSigner};
