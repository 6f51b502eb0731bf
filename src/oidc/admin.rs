// ABOUTME: Admin API authentication: first-admin bootstrap, login, stateless JWT refresh and access checks
// ABOUTME: Admin tokens are signed with the global key and carry token_use to separate access from refresh
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::claims::AdminClaims;
use super::login::{hash_password, verify_password};
use crate::cluster::ClusterMutation;
use crate::constants::{password, ttl};
use crate::crypto::password::PasswordService;
use crate::errors::{AppError, AppResult};
use crate::keys::{Keystore, VerifyOptions};
use crate::models::{AdminAccount, KeyOwner};
use crate::storage::ControlPlane;

/// Audience of every admin token
pub const ADMIN_AUDIENCE: &str = "admin";
const USE_ACCESS: &str = "access";
const USE_REFRESH: &str = "refresh";

/// Admin login body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdminLoginRequest {
    /// Email
    pub email: String,
    /// Password
    pub password: String,
}

/// Admin token pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminTokens {
    /// Access JWT
    pub access_token: String,
    /// Refresh JWT
    pub refresh_token: String,
    /// Always `Bearer`
    pub token_type: &'static str,
    /// Access lifetime in seconds
    pub expires_in: i64,
}

/// Admin account authentication
pub struct AdminTokenService {
    control: Arc<ControlPlane>,
    keystore: Arc<Keystore>,
    passwords: Option<Arc<PasswordService>>,
    issuer: String,
}

impl AdminTokenService {
    /// Service signing as `issuer`; without a hasher, bootstrap is refused
    #[must_use]
    pub fn new(
        control: Arc<ControlPlane>,
        keystore: Arc<Keystore>,
        passwords: Option<Arc<PasswordService>>,
        issuer: &str,
    ) -> Self {
        Self {
            control,
            keystore,
            passwords,
            issuer: issuer.to_owned(),
        }
    }

    fn hasher(&self) -> AppResult<&Arc<PasswordService>> {
        self.passwords
            .as_ref()
            .ok_or_else(|| AppError::config("no password hasher configured"))
    }

    /// Create the first admin account
    ///
    /// # Errors
    ///
    /// `Config` without a hasher, `Conflict` once any admin exists,
    /// `InvalidInput` for malformed input, `NotLeader` on followers.
    pub async fn bootstrap(&self, email: &str, plain_password: &str, name: &str) -> AppResult<AdminAccount> {
        let hasher = self.hasher()?;
        let admins = self.control.admins()?;
        if !admins.list_admins().await?.is_empty() {
            return Err(AppError::conflict("admin already bootstrapped"));
        }
        let email = email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(AppError::invalid_input("invalid email address"));
        }
        if plain_password.chars().count() < password::MIN_LENGTH {
            return Err(AppError::invalid_input(format!(
                "password must be at least {} characters",
                password::MIN_LENGTH
            )));
        }
        self.control
            .cluster()
            .apply(&ClusterMutation::SaveAdmin { email: email.clone() })
            .await?;
        let admin = AdminAccount {
            id: Uuid::new_v4(),
            email,
            password_hash: hash_password(hasher, plain_password).await?,
            name: name.trim().to_owned(),
            created_at: Utc::now(),
            disabled_at: None,
        };
        admins.save_admin(&admin).await?;
        info!(admin_id = %admin.id, "admin bootstrapped");
        Ok(admin)
    }

    async fn mint(&self, admin: &AdminAccount) -> AppResult<AdminTokens> {
        let now = Utc::now().timestamp();
        let claims = |token_use: &str, ttl_secs: i64| AdminClaims {
            iss: self.issuer.clone(),
            sub: admin.id.to_string(),
            aud: ADMIN_AUDIENCE.to_owned(),
            iat: now,
            exp: now + ttl_secs,
            email: admin.email.clone(),
            token_use: token_use.to_owned(),
        };
        let (access_token, _) = self
            .keystore
            .sign(&KeyOwner::Global, &claims(USE_ACCESS, ttl::ADMIN_ACCESS_SECS))
            .await?;
        let (refresh_token, _) = self
            .keystore
            .sign(&KeyOwner::Global, &claims(USE_REFRESH, ttl::ADMIN_REFRESH_SECS))
            .await?;
        Ok(AdminTokens {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: ttl::ADMIN_ACCESS_SECS,
        })
    }

    /// Password login
    ///
    /// # Errors
    ///
    /// 401 for bad credentials, 403 for disabled accounts.
    pub async fn login(&self, req: &AdminLoginRequest) -> AppResult<AdminTokens> {
        let hasher = self.hasher()?;
        let email = req.email.trim().to_lowercase();
        let found = self.control.admins()?.get_admin_by_email(&email).await?;
        let phc = found.as_ref().map(|a| a.password_hash.clone());
        if !verify_password(hasher, &req.password, phc).await? {
            return Err(AppError::auth_invalid("invalid credentials"));
        }
        let Some(admin) = found else {
            return Err(AppError::auth_invalid("invalid credentials"));
        };
        if admin.disabled_at.is_some() {
            return Err(AppError::forbidden("admin account disabled"));
        }
        info!(admin_id = %admin.id, "admin login");
        self.mint(&admin).await
    }

    async fn verify_use(&self, token: &str, token_use: &str) -> AppResult<AdminClaims> {
        let claims: AdminClaims = self
            .keystore
            .verify(
                &KeyOwner::Global,
                token,
                VerifyOptions {
                    issuer: Some(&self.issuer),
                    audience: Some(ADMIN_AUDIENCE),
                },
            )
            .await?;
        if claims.token_use != token_use {
            return Err(AppError::invalid_token("wrong token use"));
        }
        Ok(claims)
    }

    /// Exchange an admin refresh JWT for a fresh pair
    ///
    /// # Errors
    ///
    /// `invalid_grant` for anything but a valid refresh JWT of an active admin.
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<AdminTokens> {
        let claims = self
            .verify_use(refresh_token, USE_REFRESH)
            .await
            .map_err(|e| {
                warn!(error = %e, "admin refresh rejected");
                AppError::invalid_grant("invalid refresh token")
            })?;
        let id: Uuid = claims
            .sub
            .parse()
            .map_err(|_| AppError::invalid_grant("invalid refresh token"))?;
        let admin = self
            .control
            .admins()?
            .get_admin_by_id(id)
            .await?
            .filter(|a| a.disabled_at.is_none())
            .ok_or_else(|| AppError::invalid_grant("admin account unavailable"))?;
        self.mint(&admin).await
    }

    /// Check an admin access token from an `Authorization` header value
    ///
    /// # Errors
    ///
    /// 401 for missing, invalid or refresh tokens.
    pub async fn authorize_access(&self, bearer: Option<&str>) -> AppResult<AdminClaims> {
        let token = bearer
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(AppError::auth_required)?;
        self.verify_use(token, USE_ACCESS)
            .await
            .map_err(|_| AppError::invalid_token("invalid admin token").with_challenge("Bearer realm=\"admin\""))
    }
}
