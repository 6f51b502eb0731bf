// ABOUTME: TOTP second factor: enrollment, verification with anti-replay, recovery codes, trusted devices
// ABOUTME: Completes the step-up challenge started by the authorize and login flows
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! # MFA engine
//!
//! RFC 6238 TOTP with SHA-1, six digits and a 30 second step. A code is
//! accepted within `±window` steps of the current counter. The counter of the
//! last accepted code is persisted as `last_used_at = counter * 30` by a
//! conditional UPDATE that only moves forward; any code whose counter is not
//! strictly greater is a replay, even when two requests race.
//!
//! Recovery codes are stored as `sha256_hex` of the normalized code
//! (uppercase, separators removed) and are single-use.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::{info, warn};
use uuid::Uuid;

use super::login::verify_password;
use super::token::{Grant, TokenEngine, TokenResponse};
use crate::cache::{set_json, take_json, CacheProvider};
use crate::constants::{amr, cache_keys, mfa, ttl};
use crate::crypto::hashing::{constant_time_eq, random_token, sha256_hex};
use crate::crypto::password::PasswordService;
use crate::crypto::secretbox::PREFIX_MFA;
use crate::errors::{AppError, AppResult};
use crate::models::{from_unix, MfaChallenge, MfaTotp, TrustedDevice, PASSWORD_PROVIDER};
use crate::storage::TenantDataAccess;

/// Issuer label and verification window
#[derive(Debug, Clone)]
pub struct MfaSettings {
    /// Issuer shown by authenticator apps
    pub issuer: String,
    /// Accepted steps on each side of the current one, clamped to `0..=3`
    pub window: u8,
}

/// Secret material returned once by enrollment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enrollment {
    /// Base32 secret
    pub secret_base32: String,
    /// `otpauth://` provisioning URL
    pub otpauth_url: String,
}

/// Result of a successful verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verification {
    /// Whether this verification confirmed the enrollment
    pub enabled: bool,
    /// Plaintext recovery codes, only on the confirming verification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_codes: Option<Vec<String>>,
}

/// Either a TOTP code or a recovery code, never both
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecondFactor {
    /// Six digit TOTP code
    Totp(String),
    /// Single-use recovery code
    Recovery(String),
}

impl SecondFactor {
    /// Pick the factor from optional request fields
    ///
    /// # Errors
    ///
    /// `InvalidInput` unless exactly one of the two is present.
    pub fn from_fields(code: Option<&str>, recovery: Option<&str>) -> AppResult<Self> {
        let code = code.map(str::trim).filter(|c| !c.is_empty());
        let recovery = recovery.map(str::trim).filter(|c| !c.is_empty());
        match (code, recovery) {
            (Some(code), None) => Ok(Self::Totp(code.to_owned())),
            (None, Some(recovery)) => Ok(Self::Recovery(recovery.to_owned())),
            _ => Err(AppError::invalid_input("provide exactly one of code or recovery")),
        }
    }
}

/// `POST /v2/mfa/totp/challenge` body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChallengeRequest {
    /// Handle from `mfa_required`
    pub mfa_token: String,
    /// TOTP code
    pub code: Option<String>,
    /// Recovery code
    pub recovery: Option<String>,
    /// Remember this device
    pub remember_device: bool,
    /// Remember duration, capped at 30 days
    pub remember_ttl_seconds: Option<i64>,
}

/// Completed challenge
#[derive(Debug, Clone)]
pub struct ChallengeOutcome {
    /// Issued tokens
    pub tokens: TokenResponse,
    /// Trusted device cookie value and lifetime when requested
    pub trust_cookie: Option<(String, i64)>,
}

/// Store a step-up challenge under a fresh opaque handle
///
/// # Errors
///
/// Cache failures.
pub async fn start_challenge(cache: &dyn CacheProvider, challenge: &MfaChallenge) -> AppResult<String> {
    let mfa_token = random_token();
    set_json(
        cache,
        &format!("{}{mfa_token}", cache_keys::MFA_CHALLENGE),
        challenge,
        Duration::from_secs(ttl::MFA_CHALLENGE_SECS),
    )
    .await?;
    Ok(mfa_token)
}

/// Uppercase with spaces and dashes removed
#[must_use]
pub fn normalize_recovery_code(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Fresh plaintext recovery codes
#[must_use]
pub fn generate_recovery_codes() -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..mfa::RECOVERY_CODE_COUNT)
        .map(|_| {
            (0..mfa::RECOVERY_CODE_LEN)
                .map(|_| {
                    let idx = rng.gen_range(0..mfa::RECOVERY_CODE_ALPHABET.len());
                    char::from(mfa::RECOVERY_CODE_ALPHABET[idx])
                })
                .collect()
        })
        .collect()
}

fn new_secret() -> Vec<u8> {
    let mut bytes = vec![0_u8; mfa::TOTP_SECRET_BYTES];
    rand::thread_rng().fill(bytes.as_mut_slice());
    bytes
}

fn build_totp(secret_base32: &str, issuer: &str, account: &str) -> AppResult<TOTP> {
    let secret = Secret::Encoded(secret_base32.to_owned())
        .to_bytes()
        .map_err(|e| AppError::internal(format!("invalid TOTP secret: {e:?}")))?;
    totp_from_bytes(secret, issuer, account)
}

fn totp_from_bytes(secret: Vec<u8>, issuer: &str, account: &str) -> AppResult<TOTP> {
    TOTP::new(
        Algorithm::SHA1,
        mfa::TOTP_DIGITS,
        0,
        mfa::TOTP_PERIOD_SECS,
        secret,
        Some(issuer.to_owned()),
        account.to_owned(),
    )
    .map_err(|e| AppError::internal(format!("failed to build TOTP: {e}")))
}

/// Counter of the step within `window` of `now_secs` that produced `code`
#[must_use]
pub fn matching_counter(totp: &TOTP, code: &str, now_secs: u64, window: u8) -> Option<u64> {
    let code = code.trim();
    if code.len() != mfa::TOTP_DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let current = now_secs / mfa::TOTP_PERIOD_SECS;
    let window = u64::from(window);
    (current.saturating_sub(window)..=current + window)
        .find(|counter| constant_time_eq(&totp.generate(counter * mfa::TOTP_PERIOD_SECS), code))
}

/// TOTP enrollment, verification and step-up completion
pub struct MfaEngine {
    tokens: Arc<TokenEngine>,
    passwords: Arc<PasswordService>,
    settings: MfaSettings,
}

impl MfaEngine {
    /// Engine issuing tokens through `tokens`
    #[must_use]
    pub fn new(tokens: Arc<TokenEngine>, passwords: Arc<PasswordService>, mut settings: MfaSettings) -> Self {
        settings.window = settings.window.min(mfa::MAX_TOTP_WINDOW);
        Self {
            tokens,
            passwords,
            settings,
        }
    }

    /// Start or restart an enrollment
    ///
    /// # Errors
    ///
    /// `Conflict` when an enrollment is already confirmed, `NoDBForTenant`,
    /// storage or crypto failures.
    pub async fn enroll(&self, access: &TenantDataAccess, user_id: Uuid) -> AppResult<Enrollment> {
        let repo = access.mfa()?;
        if repo.get_totp(user_id).await?.is_some_and(|t| t.is_confirmed()) {
            return Err(AppError::conflict("mfa already enabled"));
        }
        let user = access
            .users()?
            .get_user_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user"))?;

        let totp = totp_from_bytes(new_secret(), &self.settings.issuer, &user.email)?;
        let secret = totp.get_secret_base32();
        let sealed = self
            .tokens
            .dal()
            .secret_box()
            .seal_with_prefix(PREFIX_MFA, &secret)?;
        repo.upsert_totp(user_id, &sealed, Utc::now()).await?;
        info!(tenant = %access.slug(), %user_id, "totp enrollment started");
        Ok(Enrollment {
            secret_base32: secret,
            otpauth_url: totp.get_url(),
        })
    }

    async fn check_totp(&self, access: &TenantDataAccess, row: &MfaTotp, code: &str) -> AppResult<()> {
        let secret = self
            .tokens
            .dal()
            .secret_box()
            .open_with_prefix(PREFIX_MFA, &row.secret_enc)?;
        let totp = build_totp(&secret, &self.settings.issuer, "user")?;
        let now = Utc::now().timestamp().max(0) as u64;
        let counter = matching_counter(&totp, code, now, self.settings.window)
            .ok_or_else(AppError::invalid_mfa_code)?;
        let last_counter = row
            .last_used_at
            .map(|at| at.timestamp().max(0) as u64 / mfa::TOTP_PERIOD_SECS);
        let replayed = last_counter.is_some_and(|last| counter <= last)
            || !access
                .mfa()?
                .mark_totp_used(row.user_id, from_unix((counter * mfa::TOTP_PERIOD_SECS) as i64))
                .await?;
        if replayed {
            warn!(tenant = %access.slug(), user_id = %row.user_id, "totp replay rejected");
            return Err(AppError::invalid_mfa_code());
        }
        Ok(())
    }

    async fn confirmed_totp(access: &TenantDataAccess, user_id: Uuid) -> AppResult<MfaTotp> {
        access
            .mfa()?
            .get_totp(user_id)
            .await?
            .filter(MfaTotp::is_confirmed)
            .ok_or_else(|| AppError::invalid_input("mfa is not enabled"))
    }

    async fn check_factor(&self, access: &TenantDataAccess, user_id: Uuid, factor: &SecondFactor) -> AppResult<()> {
        let row = Self::confirmed_totp(access, user_id).await?;
        match factor {
            SecondFactor::Totp(code) => self.check_totp(access, &row, code).await,
            SecondFactor::Recovery(code) => {
                let hash = sha256_hex(&normalize_recovery_code(code));
                if access
                    .mfa()?
                    .consume_recovery_code(user_id, &hash, Utc::now())
                    .await?
                {
                    info!(tenant = %access.slug(), %user_id, "recovery code consumed");
                    Ok(())
                } else {
                    Err(AppError::invalid_mfa_code())
                }
            }
        }
    }

    async fn store_recovery_codes(access: &TenantDataAccess, user_id: Uuid) -> AppResult<Vec<String>> {
        let codes = generate_recovery_codes();
        let hashes: Vec<String> = codes
            .iter()
            .map(|c| sha256_hex(&normalize_recovery_code(c)))
            .collect();
        access
            .mfa()?
            .replace_recovery_codes(user_id, &hashes, Utc::now())
            .await?;
        Ok(codes)
    }

    /// Verify a TOTP code; the first success confirms the enrollment
    ///
    /// # Errors
    ///
    /// `invalid_mfa_code` for wrong or replayed codes, `InvalidInput` when
    /// nothing is enrolled.
    pub async fn verify(&self, access: &TenantDataAccess, user_id: Uuid, code: &str) -> AppResult<Verification> {
        let row = access
            .mfa()?
            .get_totp(user_id)
            .await?
            .ok_or_else(|| AppError::invalid_input("mfa enrollment not started"))?;
        self.check_totp(access, &row, code).await?;
        if row.is_confirmed() {
            return Ok(Verification {
                enabled: true,
                recovery_codes: None,
            });
        }
        access.mfa()?.confirm_totp(user_id, Utc::now()).await?;
        let codes = Self::store_recovery_codes(access, user_id).await?;
        info!(tenant = %access.slug(), %user_id, "totp enrollment confirmed");
        Ok(Verification {
            enabled: true,
            recovery_codes: Some(codes),
        })
    }

    async fn check_password(&self, access: &TenantDataAccess, user_id: Uuid, password: &str) -> AppResult<()> {
        let phc = access
            .users()?
            .get_identity(user_id, PASSWORD_PROVIDER)
            .await?
            .and_then(|identity| identity.password_hash);
        if verify_password(&self.passwords, password, phc).await? {
            Ok(())
        } else {
            Err(AppError::auth_invalid("invalid credentials"))
        }
    }

    /// Remove the enrollment, recovery codes included
    ///
    /// # Errors
    ///
    /// 401 on a wrong password or factor.
    pub async fn disable(
        &self,
        access: &TenantDataAccess,
        user_id: Uuid,
        password: &str,
        factor: &SecondFactor,
    ) -> AppResult<()> {
        self.check_password(access, user_id, password).await?;
        self.check_factor(access, user_id, factor).await?;
        let repo = access.mfa()?;
        repo.replace_recovery_codes(user_id, &[], Utc::now()).await?;
        repo.delete_totp(user_id).await?;
        info!(tenant = %access.slug(), %user_id, "totp disabled");
        Ok(())
    }

    /// Replace all recovery codes
    ///
    /// # Errors
    ///
    /// 401 on a wrong password or factor.
    pub async fn rotate_recovery(
        &self,
        access: &TenantDataAccess,
        user_id: Uuid,
        password: &str,
        factor: &SecondFactor,
    ) -> AppResult<Vec<String>> {
        self.check_password(access, user_id, password).await?;
        self.check_factor(access, user_id, factor).await?;
        let codes = Self::store_recovery_codes(access, user_id).await?;
        info!(tenant = %access.slug(), %user_id, "recovery codes rotated");
        Ok(codes)
    }

    /// Complete a step-up challenge and issue tokens
    ///
    /// The handle is taken from the cache before the factor is checked, so
    /// each `mfa_token` gets exactly one attempt. A wrong code burns it and
    /// the client has to restart the flow.
    ///
    /// # Errors
    ///
    /// `invalid_mfa_code` for unknown handles and wrong codes, 403 for
    /// disabled users.
    pub async fn challenge(&self, req: &ChallengeRequest) -> AppResult<ChallengeOutcome> {
        if req.mfa_token.trim().is_empty() {
            return Err(AppError::missing_field("mfa_token"));
        }
        let factor = SecondFactor::from_fields(req.code.as_deref(), req.recovery.as_deref())?;
        let dal = self.tokens.dal();
        let global = dal.global_cache();
        let key = format!("{}{}", cache_keys::MFA_CHALLENGE, req.mfa_token);

        let challenge: MfaChallenge = take_json(global.as_ref(), &key)
            .await?
            .ok_or_else(AppError::invalid_mfa_code)?;
        let tenant = dal
            .control()
            .tenant_by_id(challenge.tenant_id)
            .await?
            .ok_or_else(|| AppError::tenant_not_found(&challenge.tenant_id.to_string()))?;
        let access = dal.open_for(tenant).await?;
        if let Err(err) = self.check_factor(&access, challenge.user_id, &factor).await {
            warn!(tenant = %access.slug(), user_id = %challenge.user_id, "mfa challenge failed, handle discarded");
            return Err(err);
        }

        let client = dal
            .control()
            .client(access.slug(), &challenge.client_id)
            .await?
            .ok_or_else(|| AppError::invalid_client("unknown client"))?;
        let user = access
            .users()?
            .get_user_by_id(challenge.user_id)
            .await?
            .ok_or_else(|| AppError::auth_invalid("invalid credentials"))?;
        if user.is_disabled(Utc::now()) {
            return Err(AppError::forbidden("user is disabled"));
        }

        let mut methods = challenge.amr.clone();
        for method in [amr::OTP, amr::MFA] {
            if !methods.iter().any(|m| m == method) {
                methods.push(method.to_owned());
            }
        }
        let tokens = self
            .tokens
            .issue(
                &access,
                &Grant {
                    client: &client,
                    user: &user,
                    scopes: &challenge.scopes,
                    amr: &methods,
                    nonce: None,
                    auth_time: Utc::now().timestamp(),
                    id_token: false,
                },
            )
            .await?;

        let trust_cookie = if req.remember_device {
            let lifetime = req
                .remember_ttl_seconds
                .filter(|v| *v > 0)
                .unwrap_or(ttl::TRUSTED_DEVICE_MAX_SECS)
                .min(ttl::TRUSTED_DEVICE_MAX_SECS);
            let cookie = random_token();
            access
                .mfa()?
                .add_trusted_device(&TrustedDevice {
                    user_id: user.id,
                    device_hash: sha256_hex(&cookie),
                    expires_at: Utc::now() + chrono::Duration::seconds(lifetime),
                })
                .await?;
            Some((cookie, lifetime))
        } else {
            None
        };
        info!(tenant = %access.slug(), client_id = %client.client_id, user_id = %user.id, "mfa challenge completed");
        Ok(ChallengeOutcome { tokens, trust_cookie })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_codes_shape() {
        let codes = generate_recovery_codes();
        assert_eq!(codes.len(), mfa::RECOVERY_CODE_COUNT);
        for code in &codes {
            assert_eq!(code.len(), mfa::RECOVERY_CODE_LEN);
            assert!(code.bytes().all(|b| mfa::RECOVERY_CODE_ALPHABET.contains(&b)));
        }
        assert_eq!(normalize_recovery_code("abcd-efgh 23"), "ABCDEFGH23");
    }

    #[test]
    fn factor_requires_exactly_one() {
        assert_eq!(
            SecondFactor::from_fields(Some("123456"), None).unwrap(),
            SecondFactor::Totp("123456".to_owned())
        );
        assert_eq!(
            SecondFactor::from_fields(Some(" "), Some("ABCD")).unwrap(),
            SecondFactor::Recovery("ABCD".to_owned())
        );
        assert!(SecondFactor::from_fields(Some("1"), Some("2")).is_err());
        assert!(SecondFactor::from_fields(None, None).is_err());
    }

    #[test]
    fn window_bounds_accepted_counters() {
        let seed = totp_from_bytes(new_secret(), "HelloJohn", "ana@example.com").unwrap();
        let totp = build_totp(&seed.get_secret_base32(), "HelloJohn", "ana@example.com").unwrap();
        let now = 1_700_000_000_u64;
        let current = now / mfa::TOTP_PERIOD_SECS;

        let code = totp.generate(now);
        assert_eq!(matching_counter(&totp, &code, now, 0), Some(current));

        let previous = totp.generate(now - mfa::TOTP_PERIOD_SECS);
        assert_eq!(matching_counter(&totp, &previous, now, 1), Some(current - 1));

        let stale = totp.generate(now - 5 * mfa::TOTP_PERIOD_SECS);
        assert_eq!(matching_counter(&totp, &stale, now, 3), None);
        assert_eq!(matching_counter(&totp, "12ab56", now, 3), None);
    }

    #[test]
    fn provisioning_url_names_issuer() {
        let totp = totp_from_bytes(new_secret(), "HelloJohn", "ana@example.com").unwrap();
        let url = totp.get_url();
        assert!(url.starts_with("otpauth://totp/"));
        assert!(url.contains("issuer=HelloJohn"));
    }
}
