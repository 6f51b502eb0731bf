// ABOUTME: Protocol constants shared by the engines and routes
// ABOUTME: TTLs, cache key prefixes, cookie names, ACR values and header names
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

/// Time-to-live values in seconds
pub mod ttl {
    /// Authorization code lifetime
    pub const AUTH_CODE_SECS: u64 = 600;
    /// MFA challenge lifetime
    pub const MFA_CHALLENGE_SECS: u64 = 300;
    /// Default browser session lifetime
    pub const SESSION_SECS: i64 = 8 * 3600;
    /// Upper bound for remembered MFA devices
    pub const TRUSTED_DEVICE_MAX_SECS: i64 = 30 * 24 * 3600;
    /// Email verification / password reset token lifetime
    pub const EMAIL_TOKEN_SECS: i64 = 24 * 3600;
    /// Admin access token lifetime
    pub const ADMIN_ACCESS_SECS: i64 = 900;
    /// Admin refresh token lifetime
    pub const ADMIN_REFRESH_SECS: i64 = 7 * 24 * 3600;
    /// Global discovery document `Cache-Control` max-age
    pub const DISCOVERY_MAX_AGE_SECS: u64 = 600;
}

/// Cache key prefixes
pub mod cache_keys {
    /// Authorization codes
    pub const AUTH_CODE: &str = "code:";
    /// MFA challenges
    pub const MFA_CHALLENGE: &str = "mfa:";
    /// Browser sessions
    pub const SESSION: &str = "sid:";
}

/// Cookie names
pub mod cookies {
    /// Browser session cookie
    pub const SESSION: &str = "sid";
    /// Trusted MFA device cookie
    pub const MFA_TRUST: &str = "mfa_trust";
}

/// Authentication context class references
pub mod acr {
    /// Password only
    pub const LOA1: &str = "urn:hellojohn:loa:1";
    /// Password plus second factor
    pub const LOA2: &str = "urn:hellojohn:loa:2";
}

/// Authentication method references
pub mod amr {
    /// Password
    pub const PWD: &str = "pwd";
    /// Second factor
    pub const MFA: &str = "mfa";
    /// One-time password
    pub const OTP: &str = "otp";
}

/// HTTP header names
pub mod headers {
    /// Tenant slug hint
    pub const TENANT_SLUG: &str = "x-tenant-slug";
    /// Tenant id hint
    pub const TENANT_ID: &str = "x-tenant-id";
    /// Build version on `/readyz`
    pub const SERVICE_VERSION: &str = "x-service-version";
    /// Build commit on `/readyz`
    pub const SERVICE_COMMIT: &str = "x-service-commit";
}

/// MFA parameters
pub mod mfa {
    /// Recovery codes generated per enrollment
    pub const RECOVERY_CODE_COUNT: usize = 10;
    /// Characters per recovery code
    pub const RECOVERY_CODE_LEN: usize = 10;
    /// Alphabet without 0/O, 1/I/L
    pub const RECOVERY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
    /// TOTP step
    pub const TOTP_PERIOD_SECS: u64 = 30;
    /// TOTP digits
    pub const TOTP_DIGITS: usize = 6;
    /// TOTP secret size, 160 bits
    pub const TOTP_SECRET_BYTES: usize = 20;
    /// Largest accepted verification window
    pub const MAX_TOTP_WINDOW: u8 = 3;
}

/// Password policy
pub mod password {
    /// Minimum password length
    pub const MIN_LENGTH: usize = 8;
    /// Maximum password length accepted for hashing
    pub const MAX_LENGTH: usize = 256;
}

/// Opaque token sizes
pub mod tokens {
    /// Random bytes in codes, refresh tokens, sessions
    pub const OPAQUE_BYTES: usize = 32;
}
