//! Cryptographic primitives for the file-backed keychain.
//!
//! # Algorithms
//!
//! - **Key Derivation**: Argon2id (memory-hard, brute-force resistant)
//! - **Encryption**: ChaCha20-Poly1305 (authenticated encryption)
//!
//! # Security Parameters
//!
//! Default Argon2id parameters for password-based secret encryption:
//! - 64 MB memory (prevents GPU attacks)
//! - 3 iterations
//! - 4 parallelism threads

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{BrightIdError, Result};

// =============================================================================
// Constants
// =============================================================================

/// Argon2id memory cost in KiB (64 MB)
pub const ARGON2_MEMORY_KB: u32 = 65536;

/// Argon2id iteration count
pub const ARGON2_ITERATIONS: u32 = 3;

/// Argon2id parallelism (threads)
pub const ARGON2_PARALLELISM: u32 = 4;

/// Salt length for key derivation (16 bytes)
pub const SALT_LEN: usize = 16;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 auth tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

/// Argon2id cost parameters, stored next to each ciphertext so a keychain
/// written with one set can still be opened after the defaults change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kb: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kb: ARGON2_MEMORY_KB,
            iterations: ARGON2_ITERATIONS,
            parallelism: ARGON2_PARALLELISM,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests and throwaway keychains
    pub fn insecure_fast() -> Self {
        Self {
            memory_kb: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

// =============================================================================
// Key Derivation
// =============================================================================

/// Derive a 256-bit encryption key from a password using Argon2id.
///
/// The key only ever lives in a zeroizing buffer.
pub fn derive_key_encryption_key(
    password: &[u8],
    salt: &[u8],
    params: KdfParams,
) -> Result<Zeroizing<[u8; 32]>> {
    let params = Params::new(params.memory_kb, params.iterations, params.parallelism, Some(32))
        .map_err(|e| BrightIdError::Keychain(format!("Invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password, salt, &mut key[..])
        .map_err(|e| BrightIdError::Keychain(format!("Key derivation failed: {e}")))?;

    Ok(key)
}

// =============================================================================
// Encryption / Decryption
// =============================================================================

/// Encrypt secret material using ChaCha20-Poly1305.
///
/// Returns ciphertext followed by the 16-byte auth tag. The nonce must never
/// be reused with the same key.
pub fn encrypt_secret(
    plaintext: &[u8],
    encryption_key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(encryption_key));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| BrightIdError::Keychain(format!("Encryption failed: {e}")))
}

/// Decrypt secret material using ChaCha20-Poly1305.
///
/// # Errors
///
/// Returns [`BrightIdError::KeyUnavailable`] if the ciphertext was tampered
/// with or the wrong password was used.
pub fn decrypt_secret(
    ciphertext: &[u8],
    encryption_key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(encryption_key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| BrightIdError::KeyUnavailable("failed to decrypt keychain (wrong password?)".into()))
}
