// ABOUTME: TOTP enrollment, recovery code and trusted device models
// ABOUTME: The TOTP secret is sealed with the MFA-specific ciphertext prefix
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// TOTP enrollment row, one per user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaTotp {
    /// User
    pub user_id: Uuid,
    /// Sealed base32 secret
    pub secret_enc: String,
    /// Set once the first code verifies
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Time of the last accepted code
    pub last_used_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Update time
    pub updated_at: DateTime<Utc>,
}

impl MfaTotp {
    /// Enrollment finished
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }
}

/// Recovery code row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryCode {
    /// User
    pub user_id: Uuid,
    /// Hex SHA-256 of the normalized code
    pub code_hash: String,
    /// Consumption time
    pub used_at: Option<DateTime<Utc>>,
}

/// Remembered device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedDevice {
    /// User
    pub user_id: Uuid,
    /// Hex SHA-256 of the device cookie
    pub device_hash: String,
    /// Expiry
    pub expires_at: DateTime<Utc>,
}
