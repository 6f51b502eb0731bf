// ABOUTME: Token engine: access and ID token signing, opaque refresh token rotation, code exchange, revocation
// ABOUTME: Refresh tokens are persisted only as hex SHA-256 digests and are single-use
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! # Token engine
//!
//! Access tokens are `EdDSA` JWTs signed by the tenant's active key. Refresh
//! tokens are 32 random bytes; the database keeps `sha256_hex(token)`.
//!
//! Rotation order on refresh: insert the successor row, sign the new access
//! token, then revoke the presented row. Revocation that loses a race to a
//! concurrent refresh voids the successor and fails with `invalid_grant`.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::claims::{
    acr_for, looks_like_jwt, split_scopes, sys_claims_key, AccessClaims, IdTokenClaims, SysClaims,
};
use super::pkce;
use crate::cache::take_json;
use crate::constants::cache_keys;
use crate::crypto::hashing::{constant_time_eq, random_token, sha256_b64url, sha256_hex};
use crate::errors::{AppError, AppResult};
use crate::keys::{IssuerResolver, Keystore};
use crate::models::{AuthCodePayload, ClientType, OidcClient, RefreshToken, Tenant, User};
use crate::storage::{DalFactory, TenantDataAccess};

/// Role name that grants the admin flag
const ADMIN_ROLE: &str = "admin";

/// Lifetimes and admin overrides
#[derive(Debug, Clone)]
pub struct TokenSettings {
    /// Default access token lifetime
    pub access_ttl_secs: i64,
    /// Default refresh token lifetime
    pub refresh_ttl_secs: i64,
    /// Users flagged admin without RBAC rows
    pub admin_subs: Vec<Uuid>,
}

/// Token endpoint response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Signed access token
    pub access_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    /// Opaque refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// ID token on the authorization-code grant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Granted scopes
    pub scope: String,
}

/// Everything needed to mint a token set
#[derive(Debug, Clone, Copy)]
pub struct Grant<'a> {
    /// Client
    pub client: &'a OidcClient,
    /// Subject
    pub user: &'a User,
    /// Granted scopes
    pub scopes: &'a [String],
    /// Authentication methods
    pub amr: &'a [String],
    /// OIDC nonce
    pub nonce: Option<&'a str>,
    /// Authentication time
    pub auth_time: i64,
    /// Add an ID token
    pub id_token: bool,
}

/// `grant_type=authorization_code` parameters
#[derive(Debug, Clone, Copy)]
pub struct CodeExchange<'a> {
    /// Authorization code
    pub code: &'a str,
    /// Redirect URI sent to the authorize endpoint
    pub redirect_uri: &'a str,
    /// Client id
    pub client_id: &'a str,
    /// Client secret for confidential clients
    pub client_secret: Option<&'a str>,
    /// PKCE verifier
    pub code_verifier: &'a str,
}

/// `grant_type=refresh_token` parameters
#[derive(Debug, Clone, Copy)]
pub struct RefreshExchange<'a> {
    /// Opaque refresh token
    pub refresh_token: &'a str,
    /// Client id
    pub client_id: &'a str,
    /// Client secret for confidential clients
    pub client_secret: Option<&'a str>,
}

/// Token minting and rotation
pub struct TokenEngine {
    dal: Arc<DalFactory>,
    keystore: Arc<Keystore>,
    issuer: IssuerResolver,
    settings: TokenSettings,
}

impl TokenEngine {
    /// Engine over the DAL and keystore
    #[must_use]
    pub fn new(
        dal: Arc<DalFactory>,
        keystore: Arc<Keystore>,
        issuer: IssuerResolver,
        settings: TokenSettings,
    ) -> Self {
        Self {
            dal,
            keystore,
            issuer,
            settings,
        }
    }

    /// Issuer resolver
    #[must_use]
    pub const fn issuer(&self) -> &IssuerResolver {
        &self.issuer
    }

    /// Keystore
    #[must_use]
    pub fn keystore(&self) -> &Arc<Keystore> {
        &self.keystore
    }

    /// DAL factory
    #[must_use]
    pub fn dal(&self) -> &Arc<DalFactory> {
        &self.dal
    }

    fn access_ttl(&self, tenant: &Tenant) -> i64 {
        tenant
            .settings
            .access_token_ttl_seconds
            .filter(|v| *v > 0)
            .unwrap_or(self.settings.access_ttl_secs)
    }

    fn refresh_ttl(&self, tenant: &Tenant) -> i64 {
        tenant
            .settings
            .refresh_token_ttl_seconds
            .filter(|v| *v > 0)
            .unwrap_or(self.settings.refresh_ttl_secs)
    }

    /// Client by id with secret check for confidential clients
    ///
    /// # Errors
    ///
    /// `invalid_client` for unknown clients or a wrong secret.
    pub async fn resolve_client(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> AppResult<(Tenant, OidcClient)> {
        let (tenant, client) = self
            .dal
            .find_client(client_id)
            .await?
            .ok_or_else(|| AppError::invalid_client("unknown client"))?;
        self.authenticate_client(&client, client_secret)?;
        Ok((tenant, client))
    }

    fn authenticate_client(&self, client: &OidcClient, presented: Option<&str>) -> AppResult<()> {
        if client.client_type == ClientType::Public {
            return Ok(());
        }
        let presented = presented.ok_or_else(|| AppError::invalid_client("client secret required"))?;
        let stored = self
            .dal
            .secret_box()
            .open_optional(&client.secret_enc)?
            .ok_or_else(|| AppError::invalid_client("client has no secret"))?;
        if constant_time_eq(&stored, presented) {
            Ok(())
        } else {
            Err(AppError::invalid_client("client authentication failed"))
        }
    }

    /// System claims of a user: RBAC roles and permissions plus the admin flag
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn sys_claims(&self, access: &TenantDataAccess, user_id: Uuid) -> AppResult<SysClaims> {
        let rbac = access.rbac()?;
        let roles = rbac.get_user_roles(user_id).await?;
        let perms = rbac.get_permissions(&roles).await?;
        let is_admin =
            self.settings.admin_subs.contains(&user_id) || roles.iter().any(|r| r == ADMIN_ROLE);
        Ok(SysClaims {
            roles,
            perms,
            is_admin,
        })
    }

    async fn sign_access(
        &self,
        access: &TenantDataAccess,
        client_id: &str,
        user_id: Uuid,
        scopes: &[String],
        amr: &[String],
    ) -> AppResult<(String, i64)> {
        let tenant = access.tenant();
        let iss = self.issuer.issuer_for(tenant);
        let ttl = self.access_ttl(tenant);
        let now = Utc::now().timestamp();
        let mut custom = Map::new();
        custom.insert(
            sys_claims_key(&iss),
            serde_json::to_value(self.sys_claims(access, user_id).await?)?,
        );
        let claims = AccessClaims {
            iss,
            sub: user_id.to_string(),
            aud: client_id.to_owned(),
            iat: now,
            nbf: now,
            exp: now + ttl,
            tid: tenant.id.to_string(),
            amr: amr.to_vec(),
            acr: acr_for(amr).to_owned(),
            scp: scopes.join(" "),
            custom,
        };
        let (token, kid) = self
            .keystore
            .sign(&self.issuer.key_owner(tenant), &claims)
            .await?;
        debug!(tenant = %tenant.slug, client_id, kid = %kid, "access token signed");
        Ok((token, ttl))
    }

    async fn mint_refresh(
        &self,
        access: &TenantDataAccess,
        client_id: &str,
        user_id: Uuid,
        scope: &str,
        amr: &[String],
        rotated_from: Option<Uuid>,
    ) -> AppResult<(String, RefreshToken)> {
        let raw = random_token();
        let now = Utc::now();
        let row = RefreshToken {
            id: Uuid::new_v4(),
            tenant_id: access.tenant().id,
            client_id: client_id.to_owned(),
            user_id,
            token_hash: sha256_hex(&raw),
            scope: scope.to_owned(),
            amr: amr.to_vec(),
            issued_at: now,
            expires_at: now + Duration::seconds(self.refresh_ttl(access.tenant())),
            revoked_at: None,
            rotated_from,
        };
        access.refresh_tokens()?.create_refresh_token(&row).await?;
        Ok((raw, row))
    }

    async fn sign_id_token(&self, access: &TenantDataAccess, grant: &Grant<'_>) -> AppResult<String> {
        let tenant = access.tenant();
        let now = Utc::now().timestamp();
        let with_email = grant.scopes.iter().any(|s| s == "email");
        let claims = IdTokenClaims {
            iss: self.issuer.issuer_for(tenant),
            sub: grant.user.id.to_string(),
            aud: grant.client.client_id.clone(),
            iat: now,
            exp: now + self.access_ttl(tenant),
            auth_time: grant.auth_time,
            nonce: grant.nonce.map(str::to_owned),
            tid: tenant.id.to_string(),
            amr: grant.amr.to_vec(),
            acr: acr_for(grant.amr).to_owned(),
            email: with_email.then(|| grant.user.email.clone()),
            email_verified: with_email.then_some(grant.user.email_verified),
        };
        let (token, _) = self
            .keystore
            .sign(&self.issuer.key_owner(tenant), &claims)
            .await?;
        Ok(token)
    }

    /// Mint access, refresh and optionally ID tokens
    ///
    /// # Errors
    ///
    /// `NoDBForTenant`, storage, signing failures.
    pub async fn issue(&self, access: &TenantDataAccess, grant: &Grant<'_>) -> AppResult<TokenResponse> {
        let scope = grant.scopes.join(" ");
        let (access_token, expires_in) = self
            .sign_access(access, &grant.client.client_id, grant.user.id, grant.scopes, grant.amr)
            .await?;
        let (refresh_token, _) = self
            .mint_refresh(access, &grant.client.client_id, grant.user.id, &scope, grant.amr, None)
            .await?;
        let id_token = if grant.id_token {
            Some(self.sign_id_token(access, grant).await?)
        } else {
            None
        };
        info!(
            tenant = %access.slug(),
            client_id = %grant.client.client_id,
            user_id = %grant.user.id,
            "tokens issued"
        );
        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_owned(),
            expires_in,
            refresh_token: Some(refresh_token),
            id_token,
            scope,
        })
    }

    async fn active_user(access: &TenantDataAccess, user_id: Uuid) -> AppResult<User> {
        let user = access
            .users()?
            .get_user_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::invalid_grant("user no longer exists"))?;
        if user.is_disabled(Utc::now()) {
            return Err(AppError::invalid_grant("user is disabled"));
        }
        Ok(user)
    }

    /// Redeem an authorization code
    ///
    /// The code is removed from the cache before any check runs, so a code
    /// can be presented at most once.
    ///
    /// # Errors
    ///
    /// `invalid_client`, `invalid_grant` (unknown, expired or mismatched code,
    /// failed PKCE), `NoDBForTenant`.
    pub async fn exchange_code(&self, req: &CodeExchange<'_>) -> AppResult<TokenResponse> {
        let (tenant, client) = self.resolve_client(req.client_id, req.client_secret).await?;
        let access = self.dal.open_for(tenant).await?;
        let key = format!("{}{}", cache_keys::AUTH_CODE, sha256_b64url(req.code));
        let payload: AuthCodePayload = take_json(access.cache(), &key)
            .await?
            .ok_or_else(|| AppError::invalid_grant("invalid or expired authorization code"))?;

        if payload.expires_at <= Utc::now().timestamp() {
            return Err(AppError::invalid_grant("authorization code expired"));
        }
        if payload.client_id != client.client_id || payload.tenant_id != access.tenant().id {
            warn!(client_id = %client.client_id, "authorization code presented by another client");
            return Err(AppError::invalid_grant("authorization code was issued to another client"));
        }
        if payload.redirect_uri != req.redirect_uri {
            return Err(AppError::invalid_grant("redirect_uri mismatch"));
        }
        if !pkce::verify(&payload.code_challenge_method, &payload.code_challenge, req.code_verifier) {
            return Err(AppError::invalid_grant("PKCE verification failed"));
        }

        let user = Self::active_user(&access, payload.user_id).await?;
        let scopes = split_scopes(&payload.scope);
        let id_token = scopes.iter().any(|s| s == "openid");
        self.issue(
            &access,
            &Grant {
                client: &client,
                user: &user,
                scopes: &scopes,
                amr: &payload.amr,
                nonce: payload.nonce.as_deref(),
                auth_time: payload.auth_time,
                id_token,
            },
        )
        .await
    }

    /// Rotate a refresh token
    ///
    /// # Errors
    ///
    /// `invalid_grant` for unknown, revoked, expired or foreign tokens and
    /// disabled users; `invalid_client`; `NoDBForTenant`.
    pub async fn refresh(&self, req: &RefreshExchange<'_>) -> AppResult<TokenResponse> {
        let (tenant, mut client) = self.resolve_client(req.client_id, req.client_secret).await?;
        let mut access = self.dal.open_for(tenant).await?;
        let hash = sha256_hex(req.refresh_token);
        let mut row = access
            .refresh_tokens()?
            .get_refresh_token_by_hash(&hash)
            .await?
            .ok_or_else(|| AppError::invalid_grant("invalid refresh token"))?;

        if row.client_id != client.client_id {
            warn!(client_id = %client.client_id, "refresh token presented by another client");
            return Err(AppError::invalid_grant("invalid refresh token"));
        }
        if row.tenant_id != access.tenant().id {
            // Shared data plane: re-open the owning tenant and check again there
            let control = self.dal.control();
            let owner = control
                .tenant_by_id(row.tenant_id)
                .await?
                .ok_or_else(|| AppError::invalid_grant("invalid refresh token"))?;
            client = control
                .client(&owner.slug, &row.client_id)
                .await?
                .ok_or_else(|| AppError::invalid_grant("invalid refresh token"))?;
            access = self.dal.open_for(owner).await?;
            row = access
                .refresh_tokens()?
                .get_refresh_token_by_hash(&hash)
                .await?
                .filter(|r| r.tenant_id == access.tenant().id)
                .ok_or_else(|| AppError::invalid_grant("invalid refresh token"))?;
        }

        let now = Utc::now();
        if !row.is_active(now) {
            return Err(AppError::invalid_grant("refresh token revoked or expired"));
        }
        let user = Self::active_user(&access, row.user_id).await?;

        let (refresh_token, successor) = self
            .mint_refresh(&access, &client.client_id, user.id, &row.scope, &row.amr, Some(row.id))
            .await?;
        let scopes = split_scopes(&row.scope);
        let (access_token, expires_in) = self
            .sign_access(&access, &client.client_id, user.id, &scopes, &row.amr)
            .await?;

        let repo = access.refresh_tokens()?;
        match repo.revoke_refresh_token(row.id, now).await {
            Ok(true) => {}
            Ok(false) => {
                if let Err(e) = repo.revoke_refresh_token(successor.id, now).await {
                    warn!(error = %e, "failed to void successor of a replayed refresh token");
                }
                return Err(AppError::invalid_grant("refresh token already used"));
            }
            Err(e) => warn!(error = %e, token_id = %row.id, "failed to revoke rotated refresh token"),
        }
        info!(tenant = %access.slug(), client_id = %client.client_id, user_id = %user.id, "refresh token rotated");

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_owned(),
            expires_in,
            refresh_token: Some(refresh_token),
            id_token: None,
            scope: row.scope,
        })
    }

    /// RFC 7009 revocation; unknown tokens succeed silently
    ///
    /// # Errors
    ///
    /// `invalid_client` for bad client credentials; storage failures.
    pub async fn revoke(
        &self,
        token: &str,
        client_id: Option<&str>,
        client_secret: Option<&str>,
    ) -> AppResult<()> {
        if looks_like_jwt(token) {
            debug!("access tokens are not revocable");
            return Ok(());
        }
        let Some(client_id) = client_id else {
            debug!("revocation without client_id ignored");
            return Ok(());
        };
        let (tenant, client) = self.resolve_client(client_id, client_secret).await?;
        let access = self.dal.open_for(tenant).await?;
        let repo = access.refresh_tokens()?;
        if let Some(row) = repo.get_refresh_token_by_hash(&sha256_hex(token)).await? {
            if row.client_id == client.client_id && row.revoked_at.is_none() {
                repo.revoke_refresh_token(row.id, Utc::now()).await?;
                info!(tenant = %access.slug(), client_id, "refresh token revoked");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_omits_absent_tokens() {
        let response = TokenResponse {
            access_token: "a.b.c".to_owned(),
            token_type: "Bearer".to_owned(),
            expires_in: 900,
            refresh_token: None,
            id_token: None,
            scope: "openid".to_owned(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["expires_in"], 900);
        assert!(value.get("refresh_token").is_none());
        assert!(value.get("id_token").is_none());
    }
}
