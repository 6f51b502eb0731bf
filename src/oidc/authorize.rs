// ABOUTME: Authorization endpoint state machine: validation, authentication, MFA gate, code issuance
// ABOUTME: Pre-redirect failures are JSON errors; post-redirect failures travel back to the client
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! # Authorize engine
//!
//! The engine never touches HTTP. Routes feed it the query parameters plus the
//! cookies and bearer token they found, then map the [`AuthorizeOutcome`] to
//! a 302, a JSON `mfa_required` body or a redirect to the login page.
//!
//! Until `client_id` and `redirect_uri` are validated every failure is a 400
//! JSON error. After that, errors are redirected with `error` and `state`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::claims::{split_scopes, AccessClaims};
use super::mfa::start_challenge;
use super::pkce::METHOD_S256;
use super::redirect::{is_registered, with_params};
use super::session::SessionStore;
use crate::cache::{set_json, CacheProvider};
use crate::constants::{amr, cache_keys, ttl};
use crate::crypto::hashing::{random_token, sha256_b64url, sha256_hex};
use crate::errors::{AppError, AppResult};
use crate::keys::{IssuerResolver, Keystore, VerifyOptions};
use crate::models::{AuthCodePayload, MfaChallenge, OidcClient, Tenant};
use crate::storage::{DalFactory, TenantDataAccess};

/// Query parameters of `/oauth2/authorize`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizeRequest {
    /// Must be `code`
    pub response_type: String,
    /// Client id
    pub client_id: String,
    /// Registered redirect URI
    pub redirect_uri: String,
    /// Space separated scopes, must include `openid`
    pub scope: String,
    /// Opaque client state
    pub state: Option<String>,
    /// OIDC nonce
    pub nonce: Option<String>,
    /// PKCE challenge
    pub code_challenge: String,
    /// PKCE method, must be `S256`
    pub code_challenge_method: String,
    /// `none` forbids interaction
    pub prompt: Option<String>,
}

impl AuthorizeRequest {
    fn prompt_none(&self) -> bool {
        self.prompt.as_deref().map(str::trim) == Some("none")
    }
}

/// Credentials and cookies found on the HTTP request
#[derive(Debug, Clone, Default)]
pub struct HttpState {
    /// `sid` cookie
    pub session_cookie: Option<String>,
    /// Bearer token
    pub bearer: Option<String>,
    /// `mfa_trust` cookie
    pub mfa_trust: Option<String>,
    /// Raw query string, replayed after login
    pub original_query: String,
}

/// Result of an authorization request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    /// Code issued
    Success {
        /// Validated redirect URI
        redirect_uri: String,
        /// Opaque code
        code: String,
        /// Echoed state
        state: Option<String>,
    },
    /// User must log in first
    NeedLogin {
        /// Login page carrying `return_to`
        login_url: String,
    },
    /// Second factor required
    MfaRequired {
        /// Challenge handle
        mfa_token: String,
    },
    /// Error delivered to the client's redirect URI
    Redirect {
        /// Full location
        location: String,
    },
}

impl AuthorizeOutcome {
    /// Location header for redirecting outcomes
    #[must_use]
    pub fn location(&self) -> Option<String> {
        match self {
            Self::Success {
                redirect_uri,
                code,
                state,
            } => {
                let mut params = vec![("code", code.as_str())];
                if let Some(state) = state.as_deref() {
                    params.push(("state", state));
                }
                Some(with_params(redirect_uri, &params))
            }
            Self::NeedLogin { login_url } => Some(login_url.clone()),
            Self::Redirect { location } => Some(location.clone()),
            Self::MfaRequired { .. } => None,
        }
    }
}

struct Authenticated {
    user_id: Uuid,
    amr: Vec<String>,
}

/// Authorization-code flow driver
pub struct AuthorizeEngine {
    dal: Arc<DalFactory>,
    keystore: Arc<Keystore>,
    issuer: IssuerResolver,
    sessions: SessionStore,
    login_url: String,
    allow_bearer: bool,
}

fn invalid_request(message: &str) -> AppError {
    AppError::invalid_input("invalid authorization request").with_detail(message)
}

fn error_redirect(redirect_uri: &str, error: &str, state: Option<&str>) -> AuthorizeOutcome {
    let mut params = vec![("error", error)];
    if let Some(state) = state {
        params.push(("state", state));
    }
    AuthorizeOutcome::Redirect {
        location: with_params(redirect_uri, &params),
    }
}

impl AuthorizeEngine {
    /// Engine with the login page and bearer policy
    #[must_use]
    pub fn new(
        dal: Arc<DalFactory>,
        keystore: Arc<Keystore>,
        issuer: IssuerResolver,
        sessions: SessionStore,
        login_url: String,
        allow_bearer: bool,
    ) -> Self {
        Self {
            dal,
            keystore,
            issuer,
            sessions,
            login_url,
            allow_bearer,
        }
    }

    fn validate_shape(req: &AuthorizeRequest) -> AppResult<Vec<String>> {
        if req.response_type != "code" {
            return Err(invalid_request("response_type must be code"));
        }
        if req.client_id.trim().is_empty() {
            return Err(invalid_request("client_id is required"));
        }
        if req.redirect_uri.trim().is_empty() {
            return Err(invalid_request("redirect_uri is required"));
        }
        let scopes = split_scopes(&req.scope);
        if scopes.is_empty() {
            return Err(invalid_request("scope is required"));
        }
        if !scopes.iter().any(|s| s == "openid") {
            return Err(invalid_request("scope must include openid"));
        }
        if req.code_challenge_method != METHOD_S256 || req.code_challenge.trim().is_empty() {
            return Err(invalid_request("PKCE S256 required"));
        }
        Ok(scopes)
    }

    async fn resolve_client(&self, req: &AuthorizeRequest) -> AppResult<(Tenant, OidcClient)> {
        let (tenant, client) = self
            .dal
            .find_client(&req.client_id)
            .await?
            .ok_or_else(|| {
                AppError::invalid_input("unknown client").with_oauth_error("invalid_client")
            })?;
        if !is_registered(&client, &req.redirect_uri) {
            warn!(client_id = %client.client_id, "redirect_uri not registered");
            return Err(invalid_request("redirect_uri is not registered for this client"));
        }
        Ok((tenant, client))
    }

    async fn authenticate(&self, tenant: &Tenant, http: &HttpState) -> AppResult<Option<Authenticated>> {
        if let Some(cookie) = http.session_cookie.as_deref() {
            match self.sessions.lookup(cookie).await? {
                Some(session) if session.tenant_id == tenant.id => {
                    return Ok(Some(Authenticated {
                        user_id: session.user_id,
                        amr: session.amr,
                    }));
                }
                Some(_) => debug!(tenant = %tenant.slug, "session belongs to another tenant"),
                None => debug!("session cookie unknown or expired"),
            }
        }

        if !self.allow_bearer {
            return Ok(None);
        }
        let Some(token) = http.bearer.as_deref() else {
            return Ok(None);
        };
        let iss = self.issuer.issuer_for(tenant);
        let verified = self
            .keystore
            .verify::<AccessClaims>(
                &self.issuer.key_owner(tenant),
                token,
                VerifyOptions {
                    issuer: Some(&iss),
                    audience: None,
                },
            )
            .await;
        match verified {
            Ok(claims) if claims.tid == tenant.id.to_string() => {
                Ok(Uuid::parse_str(&claims.sub).ok().map(|user_id| Authenticated {
                    user_id,
                    amr: claims.amr,
                }))
            }
            Ok(_) => {
                debug!(tenant = %tenant.slug, "bearer token minted for another tenant");
                Ok(None)
            }
            Err(e) => {
                debug!(error = %e, "bearer token rejected at authorize");
                Ok(None)
            }
        }
    }

    async fn needs_step_up(
        access: &TenantDataAccess,
        user_id: Uuid,
        methods: &[String],
        trust_cookie: Option<&str>,
    ) -> AppResult<Option<bool>> {
        if methods != [amr::PWD] || !access.has_db() {
            return Ok(None);
        }
        let mfa = access.mfa()?;
        let enrolled = mfa.get_totp(user_id).await?.is_some_and(|t| t.is_confirmed());
        if !enrolled {
            return Ok(None);
        }
        let trusted = match trust_cookie {
            Some(cookie) => {
                mfa.is_trusted_device(user_id, &sha256_hex(cookie), Utc::now())
                    .await?
            }
            None => false,
        };
        Ok(Some(trusted))
    }

    /// Drive one authorization request
    ///
    /// # Errors
    ///
    /// Pre-redirect validation failures (400), unknown client, storage and
    /// cache failures.
    pub async fn authorize(&self, req: &AuthorizeRequest, http: &HttpState) -> AppResult<AuthorizeOutcome> {
        let scopes = Self::validate_shape(req)?;
        let (tenant, client) = self.resolve_client(req).await?;
        let state = req.state.as_deref().filter(|s| !s.is_empty());

        if !client.allows_scopes(&scopes) {
            return Ok(error_redirect(&req.redirect_uri, "invalid_scope", state));
        }

        let Some(mut authenticated) = self.authenticate(&tenant, http).await? else {
            if req.prompt_none() {
                return Ok(error_redirect(&req.redirect_uri, "login_required", state));
            }
            let return_to = if http.original_query.is_empty() {
                "/oauth2/authorize".to_owned()
            } else {
                format!("/oauth2/authorize?{}", http.original_query)
            };
            return Ok(AuthorizeOutcome::NeedLogin {
                login_url: with_params(&self.login_url, &[("return_to", &return_to)]),
            });
        };

        let access = self.dal.open_for(tenant).await?;
        match Self::needs_step_up(
            &access,
            authenticated.user_id,
            &authenticated.amr,
            http.mfa_trust.as_deref(),
        )
        .await?
        {
            Some(true) => authenticated.amr.push(amr::MFA.to_owned()),
            Some(false) => {
                if req.prompt_none() {
                    return Ok(error_redirect(&req.redirect_uri, "interaction_required", state));
                }
                let mfa_token = self
                    .start_challenge(&access, &client, authenticated.user_id, authenticated.amr, scopes)
                    .await?;
                return Ok(AuthorizeOutcome::MfaRequired { mfa_token });
            }
            None => {}
        }

        let code = self
            .issue_code(&access, &client, req, &scopes, authenticated.user_id, authenticated.amr)
            .await?;
        Ok(AuthorizeOutcome::Success {
            redirect_uri: req.redirect_uri.clone(),
            code,
            state: state.map(str::to_owned),
        })
    }

    async fn start_challenge(
        &self,
        access: &TenantDataAccess,
        client: &OidcClient,
        user_id: Uuid,
        methods: Vec<String>,
        scopes: Vec<String>,
    ) -> AppResult<String> {
        let challenge = MfaChallenge {
            user_id,
            tenant_id: access.tenant().id,
            client_id: client.client_id.clone(),
            amr: methods,
            scopes,
            created_at: Utc::now().timestamp(),
        };
        let global = self.dal.global_cache();
        let mfa_token = start_challenge(global.as_ref(), &challenge).await?;
        info!(tenant = %access.slug(), client_id = %client.client_id, %user_id, "mfa step-up required");
        Ok(mfa_token)
    }

    async fn record_consent(
        access: &TenantDataAccess,
        user_id: Uuid,
        client_id: &str,
        scopes: &[String],
    ) -> AppResult<()> {
        access
            .consents()?
            .upsert_consent(user_id, client_id, scopes, Utc::now())
            .await?;
        Ok(())
    }

    async fn issue_code(
        &self,
        access: &TenantDataAccess,
        client: &OidcClient,
        req: &AuthorizeRequest,
        scopes: &[String],
        user_id: Uuid,
        methods: Vec<String>,
    ) -> AppResult<String> {
        let code = random_token();
        let now = Utc::now().timestamp();
        let payload = AuthCodePayload {
            user_id,
            tenant_id: access.tenant().id,
            client_id: client.client_id.clone(),
            redirect_uri: req.redirect_uri.clone(),
            scope: scopes.join(" "),
            nonce: req.nonce.clone().filter(|n| !n.is_empty()),
            code_challenge: req.code_challenge.clone(),
            code_challenge_method: req.code_challenge_method.clone(),
            amr: methods,
            auth_time: now,
            expires_at: now + ttl::AUTH_CODE_SECS as i64,
        };
        let cache: &dyn CacheProvider = access.cache();
        set_json(
            cache,
            &format!("{}{}", cache_keys::AUTH_CODE, sha256_b64url(&code)),
            &payload,
            Duration::from_secs(ttl::AUTH_CODE_SECS),
        )
        .await?;

        if access.has_db() {
            if let Err(e) = Self::record_consent(access, user_id, &client.client_id, scopes).await {
                warn!(error = %e, client_id = %client.client_id, "failed to record consent");
            }
        }
        info!(tenant = %access.slug(), client_id = %client.client_id, %user_id, "authorization code issued");
        Ok(code)
    }
}
