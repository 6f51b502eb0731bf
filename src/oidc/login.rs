// ABOUTME: Password login, browser session login and self-registration on the tenant data plane
// ABOUTME: Unknown accounts burn a dummy hash so timing does not reveal which emails exist
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::spawn_blocking;
use tracing::{info, warn};
use uuid::Uuid;

use super::mfa::start_challenge;
use super::session::SessionStore;
use super::token::{Grant, TokenEngine, TokenResponse};
use crate::constants::{amr, password, ttl};
use crate::crypto::hashing::sha256_hex;
use crate::crypto::password::{PasswordPolicy, PasswordService};
use crate::errors::{AppError, AppResult};
use crate::models::{Identity, MfaChallenge, OidcClient, User, PASSWORD_PROVIDER};
use crate::storage::TenantDataAccess;

/// Verify a password off the async runtime; `None` burns a dummy hash
pub async fn verify_password(
    passwords: &Arc<PasswordService>,
    candidate: &str,
    phc: Option<String>,
) -> AppResult<bool> {
    let service = Arc::clone(passwords);
    let candidate = candidate.to_owned();
    spawn_blocking(move || match phc {
        Some(phc) => service.verify(&candidate, &phc),
        None => {
            service.verify_dummy(&candidate);
            false
        }
    })
    .await
    .map_err(|e| AppError::internal(format!("password verification task failed: {e}")))
}

/// Hash a password off the async runtime
pub async fn hash_password(passwords: &Arc<PasswordService>, plain: &str) -> AppResult<String> {
    let service = Arc::clone(passwords);
    let plain = plain.to_owned();
    spawn_blocking(move || service.hash(&plain))
        .await
        .map_err(|e| AppError::internal(format!("password hashing task failed: {e}")))?
}

/// `POST /v2/auth/login` body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    /// Tenant slug or id
    pub tenant_id: String,
    /// Client id
    pub client_id: String,
    /// Email
    pub email: String,
    /// Password
    pub password: String,
}

/// Login result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LoginOutcome {
    /// Tokens issued
    Tokens(TokenResponse),
    /// Second factor required
    MfaRequired {
        /// Always `mfa_required`
        status: &'static str,
        /// Challenge handle for `/v2/mfa/totp/challenge`
        mfa_token: String,
    },
}

/// `POST /v2/auth/register` body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegisterRequest {
    /// Tenant slug or id
    pub tenant_id: String,
    /// Client id
    pub client_id: String,
    /// Email
    pub email: String,
    /// Password
    pub password: String,
    /// Display name
    pub name: Option<String>,
    /// Values for tenant-defined fields
    pub custom_fields: Map<String, Value>,
}

/// Registration result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterOutcome {
    /// New user id
    pub user_id: Uuid,
    /// Tokens when auto-login is on
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenResponse>,
}

/// Password authentication and registration
pub struct LoginService {
    tokens: Arc<TokenEngine>,
    sessions: SessionStore,
    passwords: Arc<PasswordService>,
    policy: Arc<PasswordPolicy>,
    auto_login: bool,
}

fn is_plausible_email(email: &str) -> bool {
    email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.ends_with('.'))
}

impl LoginService {
    /// Service over the token engine
    #[must_use]
    pub fn new(
        tokens: Arc<TokenEngine>,
        sessions: SessionStore,
        passwords: Arc<PasswordService>,
        policy: Arc<PasswordPolicy>,
        auto_login: bool,
    ) -> Self {
        Self {
            tokens,
            sessions,
            passwords,
            policy,
            auto_login,
        }
    }

    async fn gate(&self, tenant_key: &str, client_id: &str) -> AppResult<(TenantDataAccess, OidcClient)> {
        if tenant_key.trim().is_empty() {
            return Err(AppError::missing_field("tenant_id"));
        }
        if client_id.trim().is_empty() {
            return Err(AppError::missing_field("client_id"));
        }
        let dal = self.tokens.dal();
        let access = dal.for_tenant(tenant_key).await?;
        access.require_db()?;
        let client = dal
            .control()
            .client(access.slug(), client_id)
            .await?
            .ok_or_else(|| AppError::invalid_client("unknown client"))?;
        if !client.allows_provider(PASSWORD_PROVIDER) {
            return Err(AppError::forbidden("password login is not enabled for this client"));
        }
        Ok((access, client))
    }

    /// Resolve and check credentials without issuing anything
    ///
    /// # Errors
    ///
    /// `NoDBForTenant`, `invalid_client`, 401 for bad credentials, 403 for
    /// disabled users, disallowed providers or unverified emails.
    pub async fn authenticate(&self, req: &LoginRequest) -> AppResult<(TenantDataAccess, OidcClient, User)> {
        let (access, client) = self.gate(&req.tenant_id, &req.client_id).await?;
        let users = access.users()?;
        let email = req.email.trim().to_lowercase();
        let Some(user) = users.get_user_by_email(access.tenant().id, &email).await? else {
            verify_password(&self.passwords, &req.password, None).await?;
            return Err(AppError::auth_invalid("invalid credentials"));
        };
        if user.is_disabled(Utc::now()) {
            warn!(tenant = %access.slug(), user_id = %user.id, "login attempt on disabled user");
            return Err(AppError::forbidden("user is disabled"));
        }
        let phc = users
            .get_identity(user.id, PASSWORD_PROVIDER)
            .await?
            .and_then(|identity| identity.password_hash);
        if !verify_password(&self.passwords, &req.password, phc).await? {
            return Err(AppError::auth_invalid("invalid credentials"));
        }
        if client.require_email_verification && !user.email_verified {
            return Err(AppError::forbidden("email not verified"));
        }
        Ok((access, client, user))
    }

    /// Password login returning tokens or an MFA challenge
    ///
    /// # Errors
    ///
    /// Same as [`LoginService::authenticate`] plus token issuance failures.
    pub async fn login(&self, req: &LoginRequest, trust_cookie: Option<&str>) -> AppResult<LoginOutcome> {
        let (access, client, user) = self.authenticate(req).await?;
        let methods = vec![amr::PWD.to_owned()];
        let scopes = client.scopes.clone();

        let mfa = access.mfa()?;
        let enrolled = mfa.get_totp(user.id).await?.is_some_and(|t| t.is_confirmed());
        let trusted = match trust_cookie {
            Some(cookie) if enrolled => {
                mfa.is_trusted_device(user.id, &sha256_hex(cookie), Utc::now())
                    .await?
            }
            _ => false,
        };
        if enrolled && !trusted {
            let challenge = MfaChallenge {
                user_id: user.id,
                tenant_id: access.tenant().id,
                client_id: client.client_id.clone(),
                amr: methods,
                scopes,
                created_at: Utc::now().timestamp(),
            };
            let global = self.tokens.dal().global_cache();
            let mfa_token = start_challenge(global.as_ref(), &challenge).await?;
            info!(tenant = %access.slug(), user_id = %user.id, "login requires mfa");
            return Ok(LoginOutcome::MfaRequired {
                status: "mfa_required",
                mfa_token,
            });
        }

        let mut methods = methods;
        if trusted {
            methods.push(amr::MFA.to_owned());
        }
        let tokens = self
            .tokens
            .issue(
                &access,
                &Grant {
                    client: &client,
                    user: &user,
                    scopes: &scopes,
                    amr: &methods,
                    nonce: None,
                    auth_time: Utc::now().timestamp(),
                    id_token: false,
                },
            )
            .await?;
        info!(tenant = %access.slug(), client_id = %client.client_id, user_id = %user.id, "password login");
        Ok(LoginOutcome::Tokens(tokens))
    }

    /// Password login that opens a browser session, returning the cookie value and its lifetime
    ///
    /// # Errors
    ///
    /// Same as [`LoginService::authenticate`] plus cache failures.
    pub async fn session_login(&self, req: &LoginRequest) -> AppResult<(String, i64)> {
        let (access, _, user) = self.authenticate(req).await?;
        let lifetime = access
            .tenant()
            .settings
            .session_lifetime_seconds
            .filter(|v| *v > 0)
            .unwrap_or(ttl::SESSION_SECS);
        let cookie = self
            .sessions
            .create(user.id, access.tenant().id, vec![amr::PWD.to_owned()], lifetime)
            .await?;
        info!(tenant = %access.slug(), user_id = %user.id, "session opened");
        Ok((cookie, lifetime))
    }

    /// End a browser session
    ///
    /// # Errors
    ///
    /// Cache failures.
    pub async fn logout(&self, cookie: &str) -> AppResult<()> {
        self.sessions.destroy(cookie).await.map(|_| ())
    }

    /// Create a user with a password identity
    ///
    /// # Errors
    ///
    /// `NoDBForTenant`, `invalid_client`, 400 for invalid email or weak
    /// password, 409 when the email is taken.
    pub async fn register(&self, req: &RegisterRequest) -> AppResult<RegisterOutcome> {
        let (access, client) = self.gate(&req.tenant_id, &req.client_id).await?;
        let email = req.email.trim().to_lowercase();
        if !is_plausible_email(&email) {
            return Err(AppError::invalid_input("invalid email address"));
        }
        let length = req.password.chars().count();
        if !(password::MIN_LENGTH..=password::MAX_LENGTH).contains(&length) {
            return Err(AppError::invalid_input(format!(
                "password must be between {} and {} characters",
                password::MIN_LENGTH,
                password::MAX_LENGTH
            )));
        }
        self.policy.check(&req.password).await?;

        let users = access.users()?;
        if users.get_user_by_email(access.tenant().id, &email).await?.is_some() {
            return Err(AppError::conflict("email already registered"));
        }
        let mut user = User::new(access.tenant().id, &email);
        user.name = req.name.clone().filter(|n| !n.trim().is_empty());
        user.custom_fields = req.custom_fields.clone();
        let phc = hash_password(&self.passwords, &req.password).await?;
        let identity = Identity::password(&user, phc);
        users.create_user(&user, Some(&identity)).await?;
        info!(tenant = %access.slug(), user_id = %user.id, "user registered");

        let tokens = if self.auto_login {
            let scopes = client.scopes.clone();
            let methods = vec![amr::PWD.to_owned()];
            Some(
                self.tokens
                    .issue(
                        &access,
                        &Grant {
                            client: &client,
                            user: &user,
                            scopes: &scopes,
                            amr: &methods,
                            nonce: None,
                            auth_time: Utc::now().timestamp(),
                            id_token: false,
                        },
                    )
                    .await?,
            )
        } else {
            None
        };
        Ok(RegisterOutcome {
            user_id: user.id,
            tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(is_plausible_email("ana@example.com"));
        assert!(!is_plausible_email("ana@example"));
        assert!(!is_plausible_email("@example.com"));
        assert!(!is_plausible_email("ana.example.com"));
    }

    #[tokio::test]
    async fn blocking_helpers_round_trip() {
        let passwords = Arc::new(PasswordService::default());
        let phc = hash_password(&passwords, "correct horse").await.unwrap();
        assert!(verify_password(&passwords, "correct horse", Some(phc.clone())).await.unwrap());
        assert!(!verify_password(&passwords, "wrong", Some(phc)).await.unwrap());
        assert!(!verify_password(&passwords, "anything", None).await.unwrap());
    }
}
