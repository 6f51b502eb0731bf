// ABOUTME: Tenant model and its nested settings document
// ABOUTME: Secrets are held as *_enc ciphertext with optional in-memory plaintext mirrors
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant record stored in the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    /// Stable identifier
    pub id: Uuid,
    /// Unique URL-safe name
    pub slug: String,
    /// Display name
    pub name: String,
    /// Default language for templates
    #[serde(default = "default_language")]
    pub language: String,
    /// Tenant settings
    #[serde(default)]
    pub settings: TenantSettings,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

fn default_language() -> String {
    "en".to_owned()
}

impl Tenant {
    /// Build a new tenant with default settings
    #[must_use]
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            slug: slug.into(),
            name: name.into(),
            language: default_language(),
            settings: TenantSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the tenant declares its own user database
    #[must_use]
    pub fn has_user_db(&self) -> bool {
        self.settings
            .user_db
            .as_ref()
            .is_some_and(|db| !db.driver.is_empty() && (!db.dsn.is_empty() || !db.dsn_enc.is_empty()))
    }

    /// Whether slugs are acceptable: lowercase ascii letters, digits and dashes
    #[must_use]
    pub fn is_valid_slug(slug: &str) -> bool {
        !slug.is_empty()
            && slug.len() <= 64
            && slug
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !slug.starts_with('-')
    }
}

/// How the issuer URL of a tenant is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuerMode {
    /// One issuer for all tenants
    #[default]
    Global,
    /// `<base>/t/<slug>`
    Path,
    /// `https://<slug>.<base-host>`
    Domain,
}

impl IssuerMode {
    /// Parse from configuration text
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "global" => Some(Self::Global),
            "path" => Some(Self::Path),
            "domain" => Some(Self::Domain),
            _ => None,
        }
    }
}

impl fmt::Display for IssuerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Global => "global",
            Self::Path => "path",
            Self::Domain => "domain",
        })
    }
}

/// Per-tenant settings document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TenantSettings {
    /// Branding logo URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    /// Branding color
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand_color: Option<String>,
    /// Browser session lifetime override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_lifetime_seconds: Option<i64>,
    /// Access token TTL override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_ttl_seconds: Option<i64>,
    /// Refresh token TTL override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_ttl_seconds: Option<i64>,
    /// Whether MFA enrollment is offered
    pub mfa_enabled: bool,
    /// Whether social login is offered
    pub social_login_enabled: bool,
    /// Issuer construction mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_mode: Option<IssuerMode>,
    /// Issuer override, wins over mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_override: Option<String>,
    /// Outbound mail server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpSettings>,
    /// Data-plane database
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_db: Option<UserDbSettings>,
    /// Tenant cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSettings>,
    /// Social providers keyed by provider name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub social_providers: BTreeMap<String, SocialProviderConfig>,
    /// Custom user fields
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub user_fields: Vec<UserFieldDefinition>,
    /// Email templates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mailing: Option<MailingSettings>,
}

impl TenantSettings {
    /// Clear every plaintext secret mirror
    pub fn strip_plaintext(&mut self) {
        if let Some(smtp) = self.smtp.as_mut() {
            smtp.password.clear();
        }
        if let Some(db) = self.user_db.as_mut() {
            db.dsn.clear();
        }
        if let Some(cache) = self.cache.as_mut() {
            cache.password.clear();
        }
        for provider in self.social_providers.values_mut() {
            provider.client_secret.clear();
        }
    }
}

/// SMTP settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmtpSettings {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Login user
    pub username: String,
    /// Plaintext mirror, never persisted
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    /// Encrypted password
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password_enc: String,
    /// Sender address
    pub from_email: String,
    /// Use implicit TLS
    pub use_tls: bool,
}

/// Data-plane database settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserDbSettings {
    /// Adapter name (`sqlite`, `postgres`)
    pub driver: String,
    /// Plaintext mirror, never persisted
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dsn: String,
    /// Encrypted DSN
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dsn_enc: String,
    /// Postgres schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Operator manages schema, migrations are skipped
    pub manual_mode: bool,
}

/// Tenant cache settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Whether a dedicated cache is provisioned
    pub enabled: bool,
    /// `memory` or `redis`
    pub driver: String,
    /// Redis host
    pub host: String,
    /// Redis port
    pub port: u16,
    /// Plaintext mirror, never persisted
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    /// Encrypted password
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password_enc: String,
    /// Redis database index
    pub db: u32,
    /// Key prefix
    pub prefix: String,
}

/// Social provider settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SocialProviderConfig {
    /// Provider enabled
    pub enabled: bool,
    /// OAuth client id at the provider
    pub client_id: String,
    /// Plaintext mirror, never persisted
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
    /// Encrypted client secret
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_secret_enc: String,
}

/// Custom user field type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Free text
    #[default]
    Text,
    /// Integer
    Int,
    /// Boolean
    Bool,
    /// ISO-8601 date
    Date,
}

/// Custom user field definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserFieldDefinition {
    /// Field key
    pub name: String,
    /// Field type
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Must be provided at registration
    pub required: bool,
    /// Unique per tenant
    pub unique: bool,
    /// Indexed for lookup
    pub indexed: bool,
    /// Free-form description
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Email template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailTemplate {
    /// Subject line
    pub subject: String,
    /// Body with `{{link}}` and `{{tenant}}` placeholders
    pub body: String,
}

/// Mailing settings: templates keyed by language then template id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MailingSettings {
    /// Templates
    pub templates: BTreeMap<String, BTreeMap<String, EmailTemplate>>,
}

impl MailingSettings {
    /// Template for a language, falling back to English
    #[must_use]
    pub fn template(&self, language: &str, id: &str) -> Option<&EmailTemplate> {
        self.templates
            .get(language)
            .and_then(|set| set.get(id))
            .or_else(|| self.templates.get("en").and_then(|set| set.get(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_uses_camel_case_and_skips_empty_mirrors() {
        let mut tenant = Tenant::new("acme", "Acme");
        tenant.settings.user_db = Some(UserDbSettings {
            driver: "postgres".to_owned(),
            dsn_enc: "GCMV1:abc".to_owned(),
            ..UserDbSettings::default()
        });
        let yaml = serde_yaml::to_string(&tenant).unwrap();
        assert!(yaml.contains("userDb:"));
        assert!(yaml.contains("dsnEnc: GCMV1:abc"));
        assert!(!yaml.contains("dsn: "));
        let back: Tenant = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, tenant);
        assert!(back.has_user_db());
    }

    #[test]
    fn slug_rules() {
        assert!(Tenant::is_valid_slug("acme-01"));
        assert!(!Tenant::is_valid_slug("Acme"));
        assert!(!Tenant::is_valid_slug("-x"));
        assert!(!Tenant::is_valid_slug(""));
    }

    #[test]
    fn strip_plaintext_clears_all_mirrors() {
        let mut settings = TenantSettings {
            smtp: Some(SmtpSettings {
                password: "p".to_owned(),
                ..SmtpSettings::default()
            }),
            ..TenantSettings::default()
        };
        settings.social_providers.insert(
            "google".to_owned(),
            SocialProviderConfig {
                client_secret: "s".to_owned(),
                ..SocialProviderConfig::default()
            },
        );
        settings.strip_plaintext();
        assert!(settings.smtp.unwrap().password.is_empty());
        assert!(settings.social_providers["google"].client_secret.is_empty());
    }
}
