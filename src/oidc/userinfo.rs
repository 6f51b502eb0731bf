// ABOUTME: Bearer token resolution for userinfo and the MFA self-service endpoints, plus RFC 7662 introspection
// ABOUTME: The verifying tenant is picked from the unverified tid claim and then fully checked
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::claims::{looks_like_jwt, peek_tenant_id, split_scopes, AccessClaims};
use super::token::TokenEngine;
use crate::crypto::hashing::sha256_hex;
use crate::errors::{AppError, AppResult};
use crate::keys::VerifyOptions;
use crate::models::to_unix;
use crate::storage::TenantDataAccess;

/// RFC 7662 response; only `active` is present for inactive tokens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntrospectionResponse {
    /// Token is valid
    pub active: bool,
    /// `access_token` or `refresh_token`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<&'static str>,
    /// User id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Client id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Space separated scopes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Expiry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issued at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Tenant id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    /// Assurance level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,
    /// Authentication methods
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amr: Option<Vec<String>>,
    /// Roles, with `include_sys`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    /// Permissions, with `include_sys`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perms: Option<Vec<String>>,
}

impl IntrospectionResponse {
    fn inactive() -> Self {
        Self::default()
    }
}

/// 401 with an RFC 6750 `invalid_token` challenge
#[must_use]
pub fn bearer_error(description: &str) -> AppError {
    AppError::invalid_token(description.to_owned()).with_challenge(format!(
        "Bearer realm=\"userinfo\", error=\"invalid_token\", error_description=\"{description}\""
    ))
}

/// Userinfo and introspection over the token engine's keystore
pub struct UserinfoService {
    tokens: Arc<TokenEngine>,
}

impl UserinfoService {
    /// Service sharing the token engine's keys and issuer
    #[must_use]
    pub const fn new(tokens: Arc<TokenEngine>) -> Self {
        Self { tokens }
    }

    async fn verify_access(&self, token: &str) -> AppResult<(TenantDataAccess, AccessClaims)> {
        let tid = peek_tenant_id(token).ok_or_else(|| AppError::invalid_token("malformed token"))?;
        let dal = self.tokens.dal();
        let tenant = dal
            .control()
            .tenant_by_id(tid)
            .await?
            .ok_or_else(|| AppError::invalid_token("unknown tenant"))?;
        let resolver = self.tokens.issuer();
        let expected = resolver.issuer_for(&tenant);
        let claims: AccessClaims = self
            .tokens
            .keystore()
            .verify(
                &resolver.key_owner(&tenant),
                token,
                VerifyOptions {
                    issuer: Some(&expected),
                    audience: None,
                },
            )
            .await?;
        if claims.tid != tenant.id.to_string() {
            return Err(AppError::invalid_token("tenant mismatch"));
        }
        let access = dal.open_for(tenant).await?;
        Ok((access, claims))
    }

    /// Resolve a bearer access token
    ///
    /// # Errors
    ///
    /// 401 with a `WWW-Authenticate: Bearer` challenge for any token problem;
    /// `NoDBForTenant` passes through.
    pub async fn authenticate(&self, bearer: Option<&str>) -> AppResult<(TenantDataAccess, AccessClaims)> {
        let token = bearer
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| bearer_error("missing bearer token"))?;
        match self.verify_access(token).await {
            Ok(resolved) => Ok(resolved),
            Err(e) if e.code.http_status() == 401 => Err(bearer_error(&e.message)),
            Err(e) => Err(e),
        }
    }

    /// Standard claims of the token's user, projected by granted scopes
    ///
    /// # Errors
    ///
    /// Same as [`UserinfoService::authenticate`]; a deleted or disabled user
    /// is an invalid token.
    pub async fn userinfo(&self, bearer: Option<&str>) -> AppResult<Map<String, Value>> {
        let (access, claims) = self.authenticate(bearer).await?;
        let user_id = claims
            .sub
            .parse()
            .map_err(|_| bearer_error("invalid subject"))?;
        let user = access
            .users()?
            .get_user_by_id(user_id)
            .await?
            .filter(|u| !u.is_disabled(Utc::now()))
            .ok_or_else(|| bearer_error("user not found"))?;

        let scopes = claims.scopes();
        let mut out = Map::new();
        out.insert("sub".to_owned(), json!(user.id.to_string()));
        if scopes.iter().any(|s| s == "email") {
            out.insert("email".to_owned(), json!(user.email));
            out.insert("email_verified".to_owned(), json!(user.email_verified));
        }
        if scopes.iter().any(|s| s == "profile") {
            let profile = [
                ("name", &user.name),
                ("given_name", &user.given_name),
                ("family_name", &user.family_name),
                ("picture", &user.picture),
                ("locale", &user.locale),
            ];
            for (key, value) in profile {
                if let Some(value) = value {
                    out.insert(key.to_owned(), json!(value));
                }
            }
            if !user.custom_fields.is_empty() {
                out.insert("custom_fields".to_owned(), Value::Object(user.custom_fields.clone()));
            }
        }
        Ok(out)
    }

    async fn introspect_jwt(&self, token: &str, include_sys: bool) -> IntrospectionResponse {
        let (access, claims) = match self.verify_access(token).await {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!(error = %e, "introspected jwt rejected");
                return IntrospectionResponse::inactive();
            }
        };
        let mut response = IntrospectionResponse {
            active: true,
            token_type: Some("access_token"),
            sub: Some(claims.sub.clone()),
            client_id: Some(claims.aud.clone()),
            scope: Some(claims.scp.clone()),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            iss: Some(claims.iss.clone()),
            tid: Some(claims.tid.clone()),
            acr: Some(claims.acr.clone()),
            amr: Some(claims.amr.clone()),
            ..IntrospectionResponse::default()
        };
        if include_sys {
            let sys = match claims.sys() {
                Some(sys) => Some(sys),
                None => match claims.sub.parse() {
                    Ok(user_id) => self.tokens.sys_claims(&access, user_id).await.ok(),
                    Err(_) => None,
                },
            };
            if let Some(sys) = sys {
                response.roles = Some(sys.roles);
                response.perms = Some(sys.perms);
            }
        }
        response
    }

    async fn introspect_opaque(&self, token: &str, client_id: Option<&str>) -> AppResult<IntrospectionResponse> {
        let Some(client_id) = client_id.filter(|c| !c.is_empty()) else {
            return Ok(IntrospectionResponse::inactive());
        };
        let dal = self.tokens.dal();
        let Some((tenant, _)) = dal.find_client(client_id).await? else {
            return Ok(IntrospectionResponse::inactive());
        };
        let issuer = self.tokens.issuer().issuer_for(&tenant);
        let access = dal.open_for(tenant).await?;
        if !access.has_db() {
            return Ok(IntrospectionResponse::inactive());
        }
        let row = access
            .refresh_tokens()?
            .get_refresh_token_by_hash(&sha256_hex(token))
            .await?;
        let Some(row) = row.filter(|r| r.is_active(Utc::now()) && r.client_id == client_id) else {
            return Ok(IntrospectionResponse::inactive());
        };
        Ok(IntrospectionResponse {
            active: true,
            token_type: Some("refresh_token"),
            sub: Some(row.user_id.to_string()),
            client_id: Some(row.client_id.clone()),
            scope: Some(split_scopes(&row.scope).join(" ")),
            exp: Some(to_unix(row.expires_at)),
            iat: Some(to_unix(row.issued_at)),
            iss: Some(issuer),
            tid: Some(row.tenant_id.to_string()),
            acr: None,
            amr: Some(row.amr.clone()),
            roles: None,
            perms: None,
        })
    }

    /// RFC 7662 introspection; JWT access tokens first, then opaque refresh tokens
    ///
    /// # Errors
    ///
    /// Only storage failures; invalid tokens are reported as inactive.
    pub async fn introspect(
        &self,
        token: &str,
        client_id: Option<&str>,
        include_sys: bool,
    ) -> AppResult<IntrospectionResponse> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(IntrospectionResponse::inactive());
        }
        if looks_like_jwt(token) {
            return Ok(self.introspect_jwt(token, include_sys).await);
        }
        self.introspect_opaque(token, client_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_serializes_to_active_only() {
        let body = serde_json::to_value(IntrospectionResponse::inactive()).unwrap();
        assert_eq!(body, json!({"active": false}));
    }

    #[test]
    fn bearer_errors_carry_challenge() {
        let err = bearer_error("token expired");
        assert_eq!(
            err.challenge.as_deref(),
            Some("Bearer realm=\"userinfo\", error=\"invalid_token\", error_description=\"token expired\"")
        );
    }
}
