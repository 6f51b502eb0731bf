// ABOUTME: Password login, registration, browser sessions and email-driven account flows
// ABOUTME: Requests without an explicit tenant fall back to the hint from headers, query or subdomain
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json, Router};
use serde_json::json;

use crate::constants::cookies;
use crate::errors::AppError;
use crate::oidc::email::{EmailRequest, ResetPasswordRequest, VerifyEmailRequest};
use crate::oidc::login::{LoginRequest, RegisterRequest};
use crate::oidc::tenant_resolution::{tenant_hint_layer, TenantHint};
use crate::security::cookies::{clear_cookie, get_cookie_value, set_session_cookie};
use crate::server::ServerResources;

/// Account routes under `/v2/auth` and `/v2/session`
pub struct AuthRoutes;

fn fill_tenant(tenant_id: &mut String, hint: &TenantHint) {
    if tenant_id.trim().is_empty() {
        if let Some(found) = hint.0.as_deref() {
            found.clone_into(tenant_id);
        }
    }
}

fn accepted() -> Response {
    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))).into_response()
}

impl AuthRoutes {
    /// Account routes with tenant hint resolution
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        let hint = from_fn_with_state(Arc::clone(&resources.base_host), tenant_hint_layer);
        Router::new()
            .route("/v2/auth/login", post(Self::handle_login))
            .route("/v2/auth/register", post(Self::handle_register))
            .route("/v2/auth/forgot-password", post(Self::handle_forgot_password))
            .route("/v2/auth/reset-password", post(Self::handle_reset_password))
            .route("/v2/auth/verify-email", post(Self::handle_verify_email))
            .route("/v2/auth/verify-email/send", post(Self::handle_send_verification))
            .route("/v2/session/login", post(Self::handle_session_login))
            .route("/v2/session/logout", post(Self::handle_session_logout))
            .layer(hint)
            .with_state(resources)
    }

    #[tracing::instrument(skip_all, fields(route = "login", client_id = %request.client_id))]
    async fn handle_login(
        State(resources): State<Arc<ServerResources>>,
        Extension(hint): Extension<TenantHint>,
        headers: HeaderMap,
        Json(mut request): Json<LoginRequest>,
    ) -> Result<Response, AppError> {
        fill_tenant(&mut request.tenant_id, &hint);
        let trust = get_cookie_value(&headers, cookies::MFA_TRUST);
        let outcome = resources.login.login(&request, trust.as_deref()).await?;
        Ok(super::no_store(&outcome))
    }

    #[tracing::instrument(skip_all, fields(route = "register", client_id = %request.client_id))]
    async fn handle_register(
        State(resources): State<Arc<ServerResources>>,
        Extension(hint): Extension<TenantHint>,
        Json(mut request): Json<RegisterRequest>,
    ) -> Result<Response, AppError> {
        fill_tenant(&mut request.tenant_id, &hint);
        let outcome = resources.login.register(&request).await?;
        let mut response = super::no_store(&outcome);
        *response.status_mut() = StatusCode::CREATED;
        Ok(response)
    }

    async fn handle_forgot_password(
        State(resources): State<Arc<ServerResources>>,
        Extension(hint): Extension<TenantHint>,
        Json(mut request): Json<EmailRequest>,
    ) -> Result<Response, AppError> {
        fill_tenant(&mut request.tenant_id, &hint);
        resources.email.forgot_password(&request).await?;
        Ok(accepted())
    }

    async fn handle_send_verification(
        State(resources): State<Arc<ServerResources>>,
        Extension(hint): Extension<TenantHint>,
        Json(mut request): Json<EmailRequest>,
    ) -> Result<Response, AppError> {
        fill_tenant(&mut request.tenant_id, &hint);
        resources.email.send_verification(&request).await?;
        Ok(accepted())
    }

    async fn handle_reset_password(
        State(resources): State<Arc<ServerResources>>,
        Extension(hint): Extension<TenantHint>,
        Json(mut request): Json<ResetPasswordRequest>,
    ) -> Result<Response, AppError> {
        fill_tenant(&mut request.tenant_id, &hint);
        resources.email.reset_password(&request).await?;
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    async fn handle_verify_email(
        State(resources): State<Arc<ServerResources>>,
        Extension(hint): Extension<TenantHint>,
        Json(mut request): Json<VerifyEmailRequest>,
    ) -> Result<Response, AppError> {
        fill_tenant(&mut request.tenant_id, &hint);
        resources.email.verify_email(&request).await?;
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    #[tracing::instrument(skip_all, fields(route = "session_login"))]
    async fn handle_session_login(
        State(resources): State<Arc<ServerResources>>,
        Extension(hint): Extension<TenantHint>,
        Json(mut request): Json<LoginRequest>,
    ) -> Result<Response, AppError> {
        fill_tenant(&mut request.tenant_id, &hint);
        let (cookie, lifetime) = resources.login.session_login(&request).await?;
        let mut response = StatusCode::NO_CONTENT.into_response();
        set_session_cookie(response.headers_mut(), &cookie, lifetime, resources.secure_cookies);
        Ok(response)
    }

    async fn handle_session_logout(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        if let Some(cookie) = get_cookie_value(&headers, cookies::SESSION) {
            resources.login.logout(&cookie).await?;
        }
        let mut response = StatusCode::NO_CONTENT.into_response();
        clear_cookie(response.headers_mut(), cookies::SESSION, resources.secure_cookies);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_tenant_wins_over_hint() {
        let hint = TenantHint(Some("from-host".to_owned()));
        let mut explicit = "acme".to_owned();
        fill_tenant(&mut explicit, &hint);
        assert_eq!(explicit, "acme");

        let mut empty = String::new();
        fill_tenant(&mut empty, &hint);
        assert_eq!(empty, "from-host");

        let mut untouched = String::new();
        fill_tenant(&mut untouched, &TenantHint(None));
        assert!(untouched.is_empty());
    }
}
