// ABOUTME: End-user and linked identity models of the tenant data plane
// ABOUTME: Password credentials live on the identity row with provider "password"
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Provider name of local password identities
pub const PASSWORD_PROVIDER: &str = "password";

/// End user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// User id
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: Uuid,
    /// Lowercased email
    pub email: String,
    /// Email ownership proven
    pub email_verified: bool,
    /// Full name
    pub name: Option<String>,
    /// Given name
    pub given_name: Option<String>,
    /// Family name
    pub family_name: Option<String>,
    /// Avatar URL
    pub picture: Option<String>,
    /// BCP47 locale
    pub locale: Option<String>,
    /// Tenant-defined custom fields
    #[serde(default)]
    pub custom_fields: Map<String, Value>,
    /// Disable timestamp
    pub disabled_at: Option<DateTime<Utc>>,
    /// Automatic re-enable time
    pub disabled_until: Option<DateTime<Utc>>,
    /// Reason shown to operators
    pub disabled_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Update time
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// New enabled user
    #[must_use]
    pub fn new(tenant_id: Uuid, email: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            email: email.trim().to_lowercase(),
            email_verified: false,
            name: None,
            given_name: None,
            family_name: None,
            picture: None,
            locale: None,
            custom_fields: Map::new(),
            disabled_at: None,
            disabled_until: None,
            disabled_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Disabled at `now`: `disabled_at` set and `disabled_until` absent or in the future
    #[must_use]
    pub fn is_disabled(&self, now: DateTime<Utc>) -> bool {
        self.disabled_at.is_some() && !matches!(self.disabled_until, Some(until) if until <= now)
    }
}

/// Linked credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Identity id
    pub id: Uuid,
    /// Owning user
    pub user_id: Uuid,
    /// Provider name
    pub provider: String,
    /// Subject at the provider
    pub provider_user_id: String,
    /// Email reported by the provider
    pub email: Option<String>,
    /// Provider verified the email
    pub email_verified: bool,
    /// PHC password hash for the password provider
    pub password_hash: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Identity {
    /// Local password identity for a user
    #[must_use]
    pub fn password(user: &User, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user.id,
            provider: PASSWORD_PROVIDER.to_owned(),
            provider_user_id: user.email.clone(),
            email: Some(user.email.clone()),
            email_verified: user.email_verified,
            password_hash: Some(password_hash),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn disabled_window() {
        let now = Utc::now();
        let mut user = User::new(Uuid::new_v4(), " Ana@Example.COM ");
        assert_eq!(user.email, "ana@example.com");
        assert!(!user.is_disabled(now));

        user.disabled_at = Some(now);
        assert!(user.is_disabled(now));

        user.disabled_until = Some(now + Duration::hours(1));
        assert!(user.is_disabled(now));

        user.disabled_until = Some(now - Duration::seconds(1));
        assert!(!user.is_disabled(now));
    }
}
