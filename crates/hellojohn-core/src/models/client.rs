// ABOUTME: OIDC client and scope models stored per tenant in the control plane
// ABOUTME: Confidential clients keep their secret encrypted in secretEnc
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scopes every tenant starts with
pub const SYSTEM_SCOPES: &[&str] = &["openid", "profile", "email", "offline_access"];

/// Client authentication class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    /// Browser or native app without a secret
    #[default]
    Public,
    /// Server-side client with a secret
    Confidential,
}

/// Registered OIDC client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcClient {
    /// Client identifier, unique across all tenants
    pub client_id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Public or confidential
    #[serde(default, rename = "type")]
    pub client_type: ClientType,
    /// Exact redirect URIs
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// CORS origins
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_origins: Vec<String>,
    /// Enabled login providers (`password`, `google`, ...)
    #[serde(default)]
    pub providers: Vec<String>,
    /// Scopes the client may request
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Plaintext mirror, never persisted
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret: String,
    /// Encrypted client secret
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_enc: String,
    /// Block password login until the email is verified
    #[serde(default)]
    pub require_email_verification: bool,
    /// Front-end page that receives reset tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_password_url: Option<String>,
    /// Front-end page that receives verification tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_email_url: Option<String>,
    /// Custom claim schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_schema: Option<Value>,
    /// Static claims merged into access tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_mapping: Option<Value>,
}

impl OidcClient {
    /// New public client with password login and the standard scopes
    #[must_use]
    pub fn new_public(client_id: impl Into<String>, redirect_uris: Vec<String>) -> Self {
        Self {
            client_id: client_id.into(),
            name: String::new(),
            client_type: ClientType::Public,
            redirect_uris,
            allowed_origins: Vec::new(),
            providers: vec!["password".to_owned()],
            scopes: vec!["openid".to_owned(), "profile".to_owned(), "email".to_owned()],
            secret: String::new(),
            secret_enc: String::new(),
            require_email_verification: false,
            reset_password_url: None,
            verify_email_url: None,
            claim_schema: None,
            claim_mapping: None,
        }
    }

    /// Whether the provider is enabled for this client
    #[must_use]
    pub fn allows_provider(&self, provider: &str) -> bool {
        self.providers.iter().any(|p| p == provider)
    }

    /// Whether every requested scope is allowed
    #[must_use]
    pub fn allows_scopes<S: AsRef<str>>(&self, requested: &[S]) -> bool {
        requested
            .iter()
            .all(|scope| self.scopes.iter().any(|allowed| allowed == scope.as_ref()))
    }
}

/// Scope definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    /// Scope name
    pub name: String,
    /// Description shown on consent screens
    #[serde(default)]
    pub description: String,
    /// System scopes cannot be deleted
    #[serde(default)]
    pub system: bool,
}

impl Scope {
    /// System scope set
    #[must_use]
    pub fn system_defaults() -> Vec<Self> {
        SYSTEM_SCOPES
            .iter()
            .map(|name| Self {
                name: (*name).to_owned(),
                description: String::new(),
                system: true,
            })
            .collect()
    }
}
