// ABOUTME: Short-lived protocol state kept in the cache between HTTP round trips
// ABOUTME: Authorization codes, MFA challenges and browser sessions
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cached authorization code, keyed by `code:<hash>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCodePayload {
    /// Subject
    pub user_id: Uuid,
    /// Tenant
    pub tenant_id: Uuid,
    /// Client
    pub client_id: String,
    /// Redirect URI the code is bound to
    pub redirect_uri: String,
    /// Granted scope
    pub scope: String,
    /// OIDC nonce
    pub nonce: Option<String>,
    /// PKCE challenge
    pub code_challenge: String,
    /// PKCE method, always S256
    pub code_challenge_method: String,
    /// Authentication methods
    pub amr: Vec<String>,
    /// Unix time of authentication
    pub auth_time: i64,
    /// Unix expiry
    pub expires_at: i64,
}

/// Pending MFA step-up, keyed by `mfa:<token>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaChallenge {
    /// Subject
    pub user_id: Uuid,
    /// Tenant
    pub tenant_id: Uuid,
    /// Client
    pub client_id: String,
    /// Methods used so far
    pub amr: Vec<String>,
    /// Scopes to grant on completion
    pub scopes: Vec<String>,
    /// Unix creation time
    pub created_at: i64,
}

/// Browser session, keyed by `sid:<hash>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    /// Subject
    pub user_id: Uuid,
    /// Tenant
    pub tenant_id: Uuid,
    /// Unix expiry
    pub expires: i64,
    /// Methods used at login
    #[serde(default = "default_amr")]
    pub amr: Vec<String>,
}

fn default_amr() -> Vec<String> {
    vec!["pwd".to_owned()]
}
