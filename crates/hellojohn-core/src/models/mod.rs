// ABOUTME: Domain model module index and shared time helpers
// ABOUTME: Re-exports tenant, client, user, key, token, MFA and admin models
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use chrono::{DateTime, Utc};

mod admin;
mod client;
mod keys;
mod mfa;
mod protocol;
mod tenant;
mod tokens;
mod user;

pub use admin::AdminAccount;
pub use client::{ClientType, OidcClient, Scope, SYSTEM_SCOPES};
pub use keys::{KeyOwner, KeyStatus, SigningKeyRecord, KEY_ALG_EDDSA};
pub use mfa::{MfaTotp, RecoveryCode, TrustedDevice};
pub use protocol::{AuthCodePayload, MfaChallenge, SessionPayload};
pub use tenant::{
    CacheSettings, EmailTemplate, FieldType, IssuerMode, MailingSettings, SmtpSettings,
    SocialProviderConfig, Tenant, TenantSettings, UserDbSettings, UserFieldDefinition,
};
pub use tokens::{Consent, EmailToken, EmailTokenPurpose, RefreshToken, Role};
pub use user::{Identity, User, PASSWORD_PROVIDER};

/// Convert a timestamp to unix seconds
#[must_use]
pub fn to_unix(ts: DateTime<Utc>) -> i64 {
    ts.timestamp()
}

/// Convert unix seconds to a timestamp, clamping out-of-range values to the epoch
#[must_use]
pub fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
