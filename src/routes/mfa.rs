// ABOUTME: TOTP enrollment, verification, disable, recovery rotation and step-up challenge endpoints
// ABOUTME: Self-service calls authenticate with the user's access token; the challenge uses the mfa_token handle
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::oidc::mfa::{ChallengeRequest, SecondFactor};
use crate::oidc::userinfo::bearer_error;
use crate::security::cookies::set_mfa_trust_cookie;
use crate::server::ServerResources;
use crate::storage::TenantDataAccess;

/// Second factor routes under `/v2/mfa`
pub struct MfaRoutes;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CodeBody {
    code: String,
}

/// Password plus one factor, for destructive operations
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReauthBody {
    password: String,
    code: Option<String>,
    recovery: Option<String>,
}

impl ReauthBody {
    fn factor(&self) -> AppResult<SecondFactor> {
        if self.password.is_empty() {
            return Err(AppError::missing_field("password"));
        }
        SecondFactor::from_fields(self.code.as_deref(), self.recovery.as_deref())
    }
}

impl MfaRoutes {
    /// TOTP routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/v2/mfa/totp/enroll", post(Self::handle_enroll))
            .route("/v2/mfa/totp/verify", post(Self::handle_verify))
            .route("/v2/mfa/totp/disable", post(Self::handle_disable))
            .route("/v2/mfa/totp/challenge", post(Self::handle_challenge))
            .route("/v2/mfa/recovery/rotate", post(Self::handle_rotate_recovery))
            .with_state(resources)
    }

    async fn caller(resources: &ServerResources, headers: &HeaderMap) -> AppResult<(TenantDataAccess, Uuid)> {
        let (access, claims) = resources
            .userinfo
            .authenticate(super::bearer_token(headers))
            .await?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| bearer_error("subject is not a user id"))?;
        Ok((access, user_id))
    }

    async fn handle_enroll(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        let (access, user_id) = Self::caller(&resources, &headers).await?;
        let enrollment = resources.mfa.enroll(&access, user_id).await?;
        Ok(super::no_store(&enrollment))
    }

    async fn handle_verify(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(body): Json<CodeBody>,
    ) -> Result<Response, AppError> {
        let (access, user_id) = Self::caller(&resources, &headers).await?;
        let verification = resources.mfa.verify(&access, user_id, body.code.trim()).await?;
        Ok(super::no_store(&verification))
    }

    async fn handle_disable(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(body): Json<ReauthBody>,
    ) -> Result<Response, AppError> {
        let factor = body.factor()?;
        let (access, user_id) = Self::caller(&resources, &headers).await?;
        resources.mfa.disable(&access, user_id, &body.password, &factor).await?;
        Ok(super::no_store(&json!({ "enabled": false })))
    }

    async fn handle_rotate_recovery(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(body): Json<ReauthBody>,
    ) -> Result<Response, AppError> {
        let factor = body.factor()?;
        let (access, user_id) = Self::caller(&resources, &headers).await?;
        let codes = resources
            .mfa
            .rotate_recovery(&access, user_id, &body.password, &factor)
            .await?;
        Ok(super::no_store(&json!({ "recovery_codes": codes })))
    }

    #[tracing::instrument(skip_all, fields(route = "mfa_challenge"))]
    async fn handle_challenge(
        State(resources): State<Arc<ServerResources>>,
        Json(request): Json<ChallengeRequest>,
    ) -> Result<Response, AppError> {
        let outcome = resources.mfa.challenge(&request).await?;
        let mut response = super::no_store(&outcome.tokens);
        if let Some((value, max_age)) = outcome.trust_cookie.as_ref() {
            set_mfa_trust_cookie(response.headers_mut(), value, *max_age, resources.secure_cookies);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reauth_requires_password_and_one_factor() {
        let missing_password = ReauthBody {
            code: Some("123456".to_owned()),
            ..ReauthBody::default()
        };
        assert!(missing_password.factor().is_err());

        let both = ReauthBody {
            password: "hunter22".to_owned(),
            code: Some("123456".to_owned()),
            recovery: Some("ABCDE-FGHJK".to_owned()),
        };
        assert!(both.factor().is_err());

        let ok = ReauthBody {
            password: "hunter22".to_owned(),
            recovery: Some("ABCDE-FGHJK".to_owned()),
            ..ReauthBody::default()
        };
        assert_eq!(ok.factor().unwrap(), SecondFactor::Recovery("ABCDE-FGHJK".to_owned()));
    }
}
