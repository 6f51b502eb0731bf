// ABOUTME: Signing key records with lifecycle status for JWKS publication
// ABOUTME: Private key material is only ever stored sealed under the master key
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// JOSE algorithm for every key the provider issues
pub const KEY_ALG_EDDSA: &str = "EdDSA";

/// Key lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    /// Signs new tokens
    Active,
    /// Published for verification until `not_after`
    Grace,
    /// Never published
    Revoked,
}

/// Which key set a record belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyOwner {
    /// Shared global set
    Global,
    /// Per-tenant set
    Tenant(String),
}

impl KeyOwner {
    /// File stem used by stores
    #[must_use]
    pub fn storage_name(&self) -> &str {
        match self {
            Self::Global => "global",
            Self::Tenant(slug) => slug,
        }
    }
}

impl fmt::Display for KeyOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Tenant(slug) => write!(f, "tenant:{slug}"),
        }
    }
}

/// Persisted signing key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningKeyRecord {
    /// Key id
    pub kid: String,
    /// Algorithm, always EdDSA
    pub alg: String,
    /// Sealed 32-byte Ed25519 seed
    pub private_key_enc: String,
    /// Base64url raw public key
    pub public_key: String,
    /// Lifecycle status
    pub status: KeyStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// End of the grace window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
}

impl SigningKeyRecord {
    /// Whether the key belongs in the published JWKS at `now`
    #[must_use]
    pub fn is_published(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            KeyStatus::Active => true,
            KeyStatus::Grace => !matches!(self.not_after, Some(end) if end <= now),
            KeyStatus::Revoked => false,
        }
    }
}
