// ABOUTME: Decodes 256-bit master keys from raw, hex or base64 text
// ABOUTME: Key bytes are zeroized on drop and never printed
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::fmt;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use zeroize::Zeroizing;

use crate::errors::{AppError, AppResult};

/// Size of every master key
pub const MASTER_KEY_LEN: usize = 32;

/// 256-bit key material
#[derive(Clone)]
pub struct MasterKey(Zeroizing<[u8; MASTER_KEY_LEN]>);

impl MasterKey {
    /// Wrap raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Parse 32 raw bytes, 64 hex characters, or base64 (standard or url-safe, padded or not)
    ///
    /// # Errors
    ///
    /// Returns a config error when no encoding yields exactly 32 bytes.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let raw = raw.trim();

        if raw.len() == 2 * MASTER_KEY_LEN && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            let bytes = hex::decode(raw)
                .map_err(|e| AppError::config(format!("invalid hex master key: {e}")))?;
            return Self::from_slice(&bytes);
        }

        if raw.len() == MASTER_KEY_LEN {
            return Self::from_slice(raw.as_bytes());
        }

        for engine in [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD] {
            if let Ok(bytes) = engine.decode(raw) {
                if bytes.len() == MASTER_KEY_LEN {
                    return Self::from_slice(&bytes);
                }
            }
        }

        Err(AppError::config(
            "master key must be 32 raw bytes, 64 hex characters or base64 of 32 bytes",
        ))
    }

    fn from_slice(bytes: &[u8]) -> AppResult<Self> {
        let arr: [u8; MASTER_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| AppError::config("master key must decode to 32 bytes"))?;
        Ok(Self::from_bytes(arr))
    }

    /// Key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; MASTER_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(**redacted**)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_all_encodings() {
        let bytes: [u8; 32] = core::array::from_fn(|i| i as u8);
        let hex_key = hex::encode(bytes);
        let b64 = STANDARD.encode(bytes);
        let b64_raw = STANDARD_NO_PAD.encode(bytes);

        for input in [hex_key.as_str(), b64.as_str(), b64_raw.as_str()] {
            let key = MasterKey::parse(input).unwrap();
            assert_eq!(key.as_bytes(), &bytes);
        }

        let raw = "0123456789abcdef0123456789ABCDEF";
        assert_eq!(MasterKey::parse(raw).unwrap().as_bytes(), raw.as_bytes());
    }

    #[test]
    fn rejects_short_keys() {
        assert!(MasterKey::parse("too-short").is_err());
        assert!(MasterKey::parse(&STANDARD.encode([0_u8; 16])).is_err());
    }

    #[test]
    fn debug_is_redacted() {
        let key = MasterKey::from_bytes([7; 32]);
        assert_eq!(format!("{key:?}"), "MasterKey(**redacted**)");
    }
}
