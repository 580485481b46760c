//! Byte/string encodings shared by the operation pipeline and migration
//!
//! Public keys travel as standard base64 inside payloads and as url-safe,
//! unpadded base64 in paths and user ids.

use std::collections::BTreeMap;

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{BrightIdError, Result};

/// Standard base64 with padding
pub fn bytes_to_b64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

/// Decode standard base64, tolerating missing padding and the url-safe alphabet
pub fn b64_to_bytes(input: &str) -> Result<Vec<u8>> {
    if let Ok(data) = general_purpose::STANDARD.decode(input) {
        return Ok(data);
    }
    if let Ok(data) = general_purpose::STANDARD_NO_PAD.decode(input) {
        return Ok(data);
    }
    if let Ok(data) = general_purpose::URL_SAFE_NO_PAD.decode(input) {
        return Ok(data);
    }
    general_purpose::URL_SAFE
        .decode(input)
        .map_err(|e| BrightIdError::InvalidKey(format!("invalid base64: {e}")))
}

/// `+` -> `-`, `/` -> `_`, padding dropped
pub fn b64_to_url_safe_b64(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '=')
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect()
}

/// Inverse of [`b64_to_url_safe_b64`], restoring padding
pub fn url_safe_b64_to_b64(s: &str) -> String {
    let mut out: String = s
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    while out.len() % 4 != 0 {
        out.push('=');
    }
    out
}

/// Key material as older app versions persisted it.
///
/// A `Uint8Array` run through `JSON.stringify` becomes an object keyed by
/// index, so `{"0":12,"1":200,...}` is the common case. Arrays and base64
/// strings show up in data written by later versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LegacyKey {
    Base64(String),
    Bytes(Vec<u8>),
    Indexed(BTreeMap<String, u8>),
}

impl LegacyKey {
    /// Raw bytes, with indexed objects ordered by numeric index
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            LegacyKey::Base64(s) => b64_to_bytes(s),
            LegacyKey::Bytes(bytes) => Ok(bytes.clone()),
            LegacyKey::Indexed(map) => {
                let mut indexed = Vec::with_capacity(map.len());
                for (index, byte) in map {
                    let index: usize = index.parse().map_err(|_| {
                        BrightIdError::InvalidKey(format!("non-numeric key index '{index}'"))
                    })?;
                    indexed.push((index, *byte));
                }
                indexed.sort_unstable_by_key(|(index, _)| *index);
                for (expected, (index, _)) in indexed.iter().enumerate() {
                    if *index != expected {
                        return Err(BrightIdError::InvalidKey(format!(
                            "key indices are not contiguous (missing {expected})"
                        )));
                    }
                }
                Ok(indexed.into_iter().map(|(_, byte)| byte).collect())
            }
        }
    }

    /// Standard base64 of the key bytes
    pub fn to_b64(&self) -> Result<String> {
        Ok(bytes_to_b64(&self.to_bytes()?))
    }
}
