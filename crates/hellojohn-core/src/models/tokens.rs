// ABOUTME: Refresh token, consent, role and one-shot email token models
// ABOUTME: Only hashes of opaque tokens are ever persisted
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted refresh token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Row id
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: Uuid,
    /// Client the token was issued to
    pub client_id: String,
    /// Subject
    pub user_id: Uuid,
    /// Hex SHA-256 of the opaque token
    pub token_hash: String,
    /// Space separated granted scopes
    pub scope: String,
    /// Authentication methods of the original login
    pub amr: Vec<String>,
    /// Issue time
    pub issued_at: DateTime<Utc>,
    /// Expiry
    pub expires_at: DateTime<Utc>,
    /// Revocation time
    pub revoked_at: Option<DateTime<Utc>>,
    /// Predecessor in the rotation chain
    pub rotated_from: Option<Uuid>,
}

impl RefreshToken {
    /// Usable at `now`
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Scopes a user granted to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consent {
    /// Row id
    pub id: Uuid,
    /// User
    pub user_id: Uuid,
    /// Client
    pub client_id: String,
    /// Granted scopes
    pub granted_scopes: Vec<String>,
    /// Grant time
    pub granted_at: DateTime<Utc>,
    /// Revocation time
    pub revoked_at: Option<DateTime<Utc>>,
}

/// RBAC role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role name
    pub name: String,
    /// Description
    pub description: String,
    /// Permission strings
    pub permissions: Vec<String>,
}

/// Purpose of an emailed one-shot token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTokenPurpose {
    /// Email verification
    VerifyEmail,
    /// Password reset
    PasswordReset,
}

impl EmailTokenPurpose {
    /// Column value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VerifyEmail => "verify_email",
            Self::PasswordReset => "password_reset",
        }
    }

    /// Parse a column value
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "verify_email" => Some(Self::VerifyEmail),
            "password_reset" => Some(Self::PasswordReset),
            _ => None,
        }
    }
}

impl fmt::Display for EmailTokenPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emailed one-shot token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailToken {
    /// Row id
    pub id: Uuid,
    /// Tenant
    pub tenant_id: Uuid,
    /// User
    pub user_id: Uuid,
    /// Purpose
    pub purpose: EmailTokenPurpose,
    /// Hex SHA-256 of the token
    pub token_hash: String,
    /// Expiry
    pub expires_at: DateTime<Utc>,
    /// Consumption time
    pub used_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}
