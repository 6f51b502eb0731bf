// ABOUTME: Operator account stored in the control plane
// ABOUTME: Admins authenticate against the global issuer, not a tenant
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Administrator account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAccount {
    /// Account id, used as `sub`
    pub id: Uuid,
    /// Login email
    pub email: String,
    /// PHC password hash
    pub password_hash: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Disable time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_at: Option<DateTime<Utc>>,
}
