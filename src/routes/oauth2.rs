// ABOUTME: OAuth2 and OIDC protocol endpoints: authorize, token, introspect, revoke and userinfo
// ABOUTME: Token-family endpoints answer errors with the RFC 6749 body instead of the JSON envelope
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::sync::Arc;

use axum::extract::{Form, Query, RawQuery, State};
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, LOCATION, PRAGMA, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::constants::cookies;
use crate::errors::{AppError, AppResult};
use crate::oidc::token::{CodeExchange, RefreshExchange};
use crate::oidc::{AuthorizeOutcome, AuthorizeRequest, HttpState};
use crate::security::cookies::get_cookie_value;
use crate::server::ServerResources;

/// Authorization server routes
pub struct OAuth2Routes;

/// `POST /oauth2/token` form
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenForm {
    grant_type: String,
    code: String,
    redirect_uri: String,
    code_verifier: String,
    refresh_token: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

/// `POST /oauth2/introspect` and `/oauth2/revoke` form
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenRefForm {
    token: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    include_sys: Option<String>,
}

/// Client credentials from `client_secret_basic` or the form body
#[derive(Debug, Default, PartialEq, Eq)]
struct ClientCredentials {
    client_id: Option<String>,
    client_secret: Option<String>,
}

/// Decode `Authorization: Basic` per RFC 6749 §2.3.1 (both parts form-encoded)
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = raw
        .strip_prefix("Basic ")
        .or_else(|| raw.strip_prefix("basic "))?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let pair = String::from_utf8(decoded).ok()?;
    let (id, secret) = pair.split_once(':')?;
    let id = urlencoding::decode(id).ok()?.into_owned();
    let secret = urlencoding::decode(secret).ok()?.into_owned();
    Some((id, secret))
}

fn client_credentials(headers: &HeaderMap, form_id: Option<String>, form_secret: Option<String>) -> ClientCredentials {
    if let Some((id, secret)) = basic_credentials(headers) {
        return ClientCredentials {
            client_id: Some(id),
            client_secret: Some(secret).filter(|s| !s.is_empty()),
        };
    }
    ClientCredentials {
        client_id: form_id.filter(|s| !s.is_empty()),
        client_secret: form_secret.filter(|s| !s.is_empty()),
    }
}

/// RFC 6749 §5.2 error response
fn oauth_error(err: &AppError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(err.oauth_body())).into_response();
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    if let Some(challenge) = err.challenge.as_deref() {
        if let Ok(value) = HeaderValue::from_str(challenge) {
            headers.insert(WWW_AUTHENTICATE, value);
        } else {
            debug!("dropped unencodable challenge");
        }
    }
    response
}

fn found(location: &str) -> AppResult<Response> {
    let value = HeaderValue::from_str(location)
        .map_err(|_| AppError::internal("redirect location is not a valid header value"))?;
    let mut response = StatusCode::FOUND.into_response();
    response.headers_mut().insert(LOCATION, value);
    Ok(response)
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("1" | "true" | "yes"))
}

impl OAuth2Routes {
    /// Protocol endpoints
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/oauth2/authorize", get(Self::handle_authorize))
            .route("/oauth2/token", post(Self::handle_token))
            .route("/oauth2/introspect", post(Self::handle_introspect))
            .route("/oauth2/revoke", post(Self::handle_revoke))
            .route("/userinfo", get(Self::handle_userinfo).post(Self::handle_userinfo))
            .with_state(resources)
    }

    #[tracing::instrument(skip_all, fields(route = "authorize", client_id = %request.client_id))]
    async fn handle_authorize(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        RawQuery(query): RawQuery,
        Query(request): Query<AuthorizeRequest>,
    ) -> Result<Response, AppError> {
        let http = HttpState {
            session_cookie: get_cookie_value(&headers, cookies::SESSION),
            bearer: super::bearer_token(&headers).map(str::to_owned),
            mfa_trust: get_cookie_value(&headers, cookies::MFA_TRUST),
            original_query: query.unwrap_or_default(),
        };
        let outcome = resources.authorize.authorize(&request, &http).await?;
        match outcome.location() {
            Some(location) => found(&location),
            None => match outcome {
                AuthorizeOutcome::MfaRequired { mfa_token } => Ok(super::no_store(&json!({
                    "status": "mfa_required",
                    "mfa_token": mfa_token,
                }))),
                _ => Err(AppError::internal("authorization outcome without location")),
            },
        }
    }

    #[tracing::instrument(skip_all, fields(route = "token", grant_type = %form.grant_type))]
    async fn handle_token(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Form(form): Form<TokenForm>,
    ) -> Response {
        let creds = client_credentials(&headers, form.client_id, form.client_secret);
        let Some(client_id) = creds.client_id.as_deref() else {
            return oauth_error(&AppError::missing_field("client_id").with_oauth_error("invalid_request"));
        };
        let result = match form.grant_type.as_str() {
            "authorization_code" => {
                resources
                    .tokens
                    .exchange_code(&CodeExchange {
                        code: &form.code,
                        redirect_uri: &form.redirect_uri,
                        client_id,
                        client_secret: creds.client_secret.as_deref(),
                        code_verifier: &form.code_verifier,
                    })
                    .await
            }
            "refresh_token" => {
                resources
                    .tokens
                    .refresh(&RefreshExchange {
                        refresh_token: &form.refresh_token,
                        client_id,
                        client_secret: creds.client_secret.as_deref(),
                    })
                    .await
            }
            "" => Err(AppError::missing_field("grant_type").with_oauth_error("invalid_request")),
            other => {
                debug!(grant_type = other, "unsupported grant");
                Err(AppError::invalid_input("unsupported grant_type").with_oauth_error("unsupported_grant_type"))
            }
        };
        match result {
            Ok(tokens) => {
                info!(client_id, "tokens issued");
                super::no_store(&tokens)
            }
            Err(e) => oauth_error(&e),
        }
    }

    async fn handle_introspect(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Form(form): Form<TokenRefForm>,
    ) -> Response {
        let creds = client_credentials(&headers, form.client_id, form.client_secret);
        match resources
            .userinfo
            .introspect(
                &form.token,
                creds.client_id.as_deref(),
                is_truthy(form.include_sys.as_deref()),
            )
            .await
        {
            Ok(body) => super::no_store(&body),
            Err(e) => oauth_error(&e),
        }
    }

    async fn handle_revoke(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Form(form): Form<TokenRefForm>,
    ) -> Response {
        let creds = client_credentials(&headers, form.client_id, form.client_secret);
        match resources
            .tokens
            .revoke(
                form.token.trim(),
                creds.client_id.as_deref(),
                creds.client_secret.as_deref(),
            )
            .await
        {
            Ok(()) => StatusCode::OK.into_response(),
            Err(e) => oauth_error(&e),
        }
    }

    async fn handle_userinfo(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        let claims = resources.userinfo.userinfo(super::bearer_token(&headers)).await?;
        Ok(super::no_store(&claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_takes_precedence_over_form() {
        let mut headers = HeaderMap::new();
        let encoded = STANDARD.encode("web1:s%3Acret");
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        let creds = client_credentials(&headers, Some("other".to_owned()), None);
        assert_eq!(creds.client_id.as_deref(), Some("web1"));
        assert_eq!(creds.client_secret.as_deref(), Some("s:cret"));
    }

    #[test]
    fn form_credentials_ignore_empty_values() {
        let creds = client_credentials(&HeaderMap::new(), Some("web1".to_owned()), Some(String::new()));
        assert_eq!(
            creds,
            ClientCredentials {
                client_id: Some("web1".to_owned()),
                client_secret: None,
            }
        );
    }

    #[test]
    fn oauth_errors_are_not_cached() {
        let response = oauth_error(&AppError::invalid_grant("code already used"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[CACHE_CONTROL], "no-store");
    }

    #[test]
    fn redirect_is_302() {
        let response = found("https://app.acme.test/cb?code=abc&state=xyz").unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[LOCATION], "https://app.acme.test/cb?code=abc&state=xyz");
    }
}
