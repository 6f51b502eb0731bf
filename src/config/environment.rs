// ABOUTME: Environment-based server configuration with typed parsing and validation
// ABOUTME: Master keys are decoded once here so a bad key fails startup
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! Server configuration
//!
//! All options come from environment variables. Parsing goes through a lookup
//! closure so the same code path is used by [`ServerConfig::from_env`] and by
//! tests that supply a map.

use std::env;
use std::fmt;
use std::path::PathBuf;

use uuid::Uuid;

use crate::crypto::master_key::MasterKey;
use crate::errors::{AppError, AppResult};
use crate::models::IssuerMode;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Process configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Control-plane root directory
    pub fs_root: PathBuf,
    /// Key sealing signing keys at rest
    pub signing_master_key: MasterKey,
    /// Key sealing tenant secrets
    pub secretbox_master_key: MasterKey,
    /// Base issuer URL for `global` mode
    pub base_url: String,
    /// Listen address
    pub server_addr: String,
    /// Hosted login page
    pub login_url: String,
    /// Issue tokens right after registration
    pub register_auto_login: bool,
    /// Enable the admin API backed by the filesystem store
    pub fs_admin_enable: bool,
    /// TOTP verification window in steps
    pub mfa_totp_window: u8,
    /// Issuer label in otpauth URLs
    pub mfa_totp_issuer: String,
    /// Users treated as admins without RBAC rows
    pub admin_subs: Vec<Uuid>,
    /// Build version
    pub service_version: String,
    /// Build commit
    pub service_commit: String,
    /// Global database DSN
    pub global_db_dsn: Option<String>,
    /// Default data-plane DSN
    pub default_tenant_db_dsn: Option<String>,
    /// Default cache URL
    pub cache_url: Option<String>,
    /// Issuer mode for tenants that do not set one
    pub issuer_mode: IssuerMode,
    /// Access token lifetime
    pub access_token_ttl_secs: i64,
    /// Refresh token lifetime
    pub refresh_token_ttl_secs: i64,
    /// JWKS memo TTL
    pub jwks_cache_ttl_secs: u64,
    /// Accept Bearer authentication at the authorize endpoint
    pub authorize_allow_bearer: bool,
    /// Newline separated list of rejected passwords
    pub password_blacklist_path: Option<PathBuf>,
    /// Log format
    pub log_format: LogFormat,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("fs_root", &self.fs_root)
            .field("base_url", &self.base_url)
            .field("server_addr", &self.server_addr)
            .field("issuer_mode", &self.issuer_mode)
            .field("global_db", &self.global_db_dsn.is_some())
            .field("default_tenant_db", &self.default_tenant_db_dsn.is_some())
            .field("cache_url", &self.cache_url.is_some())
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Load from process environment
    ///
    /// # Errors
    ///
    /// Returns an error when a master key is missing or malformed, or when a
    /// numeric option does not parse.
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load through a lookup function
    ///
    /// # Errors
    ///
    /// Same as [`ServerConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let signing_master_key = get("SIGNING_MASTER_KEY")
            .ok_or_else(|| AppError::config("SIGNING_MASTER_KEY is required"))
            .and_then(|raw| MasterKey::parse(&raw))?;
        let secretbox_master_key = get("SECRETBOX_MASTER_KEY")
            .or_else(|| get("EMAIL_MASTER_KEY"))
            .ok_or_else(|| AppError::config("SECRETBOX_MASTER_KEY is required"))
            .and_then(|raw| MasterKey::parse(&raw))?;

        let base_url = get("V2_BASE_URL")
            .unwrap_or_else(|| "http://localhost:8082".to_owned())
            .trim_end_matches('/')
            .to_owned();
        let server_addr = normalize_addr(&get("V2_SERVER_ADDR").unwrap_or_else(|| ":8082".to_owned()));
        let login_url = get("LOGIN_URL").unwrap_or_else(|| format!("{base_url}/login"));

        let mfa_totp_window: u8 = parse_num(&get, "MFA_TOTP_WINDOW", 1)?;
        if mfa_totp_window > crate::constants::mfa::MAX_TOTP_WINDOW {
            return Err(AppError::config("MFA_TOTP_WINDOW must be between 0 and 3"));
        }

        let admin_subs = get("ADMIN_SUBS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        Uuid::parse_str(s)
                            .map_err(|_| AppError::config(format!("ADMIN_SUBS entry '{s}' is not a UUID")))
                    })
                    .collect::<AppResult<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let issuer_mode = match get("ISSUER_MODE") {
            Some(raw) => IssuerMode::parse(&raw)
                .ok_or_else(|| AppError::config(format!("unknown ISSUER_MODE '{raw}'")))?,
            None => IssuerMode::Global,
        };

        let log_format = match get("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            fs_root: PathBuf::from(get("FS_ROOT").unwrap_or_else(|| "data".to_owned())),
            signing_master_key,
            secretbox_master_key,
            base_url,
            server_addr,
            login_url,
            register_auto_login: parse_bool(get("REGISTER_AUTO_LOGIN").as_deref()),
            fs_admin_enable: parse_bool(get("FS_ADMIN_ENABLE").as_deref()),
            mfa_totp_window,
            mfa_totp_issuer: get("MFA_TOTP_ISSUER").unwrap_or_else(|| "HelloJohn".to_owned()),
            admin_subs,
            service_version: get("SERVICE_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_owned()),
            service_commit: get("SERVICE_COMMIT").unwrap_or_else(|| "unknown".to_owned()),
            global_db_dsn: get("GLOBAL_DB_DSN"),
            default_tenant_db_dsn: get("DEFAULT_TENANT_DB_DSN"),
            cache_url: get("CACHE_URL"),
            issuer_mode,
            access_token_ttl_secs: parse_num(&get, "ACCESS_TOKEN_TTL_SECS", 900)?,
            refresh_token_ttl_secs: parse_num(&get, "REFRESH_TOKEN_TTL_SECS", 2_592_000)?,
            jwks_cache_ttl_secs: parse_num(&get, "JWKS_CACHE_TTL_SECS", 15)?,
            authorize_allow_bearer: parse_bool(get("AUTHORIZE_ALLOW_BEARER").as_deref()),
            password_blacklist_path: get("PASSWORD_BLACKLIST_PATH").map(PathBuf::from),
            log_format,
        })
    }
}

/// Accepts `1|true|yes|on`, case-insensitive
#[must_use]
pub fn parse_bool(value: Option<&str>) -> bool {
    value.is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn parse_num<T, G>(get: &G, key: &str, default: T) -> AppResult<T>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key).map_or(Ok(default), |raw| {
        raw.parse()
            .map_err(|_| AppError::config(format!("{key} must be a number, got '{raw}'")))
    })
}

/// `:8082` becomes `0.0.0.0:8082`
fn normalize_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_owned()
    }
}

/// Adapter name for a DSN scheme
#[must_use]
pub fn driver_for_dsn(dsn: &str) -> Option<&'static str> {
    if dsn.starts_with("postgres://") || dsn.starts_with("postgresql://") {
        Some("postgres")
    } else if dsn.starts_with("sqlite:") {
        Some("sqlite")
    } else {
        None
    }
}
