// ABOUTME: JWT claim sets for access, ID and admin tokens plus scope and ACR helpers
// ABOUTME: System claims (roles, permissions) travel in a namespaced object keyed by the issuer
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::constants::{acr, amr};

/// Access token claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Issuer
    pub iss: String,
    /// User id
    pub sub: String,
    /// Client id
    pub aud: String,
    /// Issued at
    pub iat: i64,
    /// Not before
    pub nbf: i64,
    /// Expiry
    pub exp: i64,
    /// Tenant id
    pub tid: String,
    /// Authentication methods
    pub amr: Vec<String>,
    /// Assurance level
    pub acr: String,
    /// Space separated scopes
    pub scp: String,
    /// Namespaced extra claims
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom: Map<String, Value>,
}

impl AccessClaims {
    /// Granted scopes
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        split_scopes(&self.scp)
    }

    /// System claims, when present
    #[must_use]
    pub fn sys(&self) -> Option<SysClaims> {
        self.custom
            .get(&sys_claims_key(&self.iss))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// ID token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer
    pub iss: String,
    /// User id
    pub sub: String,
    /// Client id
    pub aud: String,
    /// Issued at
    pub iat: i64,
    /// Expiry
    pub exp: i64,
    /// Authentication time
    pub auth_time: i64,
    /// Echoed nonce
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Tenant id
    pub tid: String,
    /// Authentication methods
    pub amr: Vec<String>,
    /// Assurance level
    pub acr: String,
    /// Email, with the `email` scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Email verified flag, with the `email` scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

/// Roles and permissions embedded under `<iss>/claims/sys`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysClaims {
    /// Role names
    #[serde(default)]
    pub roles: Vec<String>,
    /// Permission strings
    #[serde(default)]
    pub perms: Vec<String>,
    /// Administrator flag
    #[serde(default)]
    pub is_admin: bool,
}

/// Admin API token claims; `token_use` separates access from refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminClaims {
    /// Issuer
    pub iss: String,
    /// Admin id
    pub sub: String,
    /// Always `admin`
    pub aud: String,
    /// Issued at
    pub iat: i64,
    /// Expiry
    pub exp: i64,
    /// Admin email
    pub email: String,
    /// `access` or `refresh`
    pub token_use: String,
}

/// Key of the system claims object
#[must_use]
pub fn sys_claims_key(issuer: &str) -> String {
    format!("{issuer}/claims/sys")
}

/// ACR for a set of methods: LoA 2 once MFA was performed
#[must_use]
pub fn acr_for(methods: &[String]) -> &'static str {
    if methods.iter().any(|m| m == amr::MFA) {
        acr::LOA2
    } else {
        acr::LOA1
    }
}

/// Split a space separated scope string, dropping duplicates
#[must_use]
pub fn split_scopes(scope: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for s in scope.split_whitespace() {
        if !out.iter().any(|existing| existing == s) {
            out.push(s.to_owned());
        }
    }
    out
}

/// Three dot-separated segments
#[must_use]
pub fn looks_like_jwt(token: &str) -> bool {
    token.split('.').count() == 3
}

/// `tid` read from an unverified JWT payload, used only to pick the verifying tenant
#[must_use]
pub fn peek_tenant_id(token: &str) -> Option<Uuid> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let value: Value = serde_json::from_slice(&bytes).ok()?;
    value.get("tid")?.as_str().and_then(|s| Uuid::parse_str(s).ok())
}
