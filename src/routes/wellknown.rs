// ABOUTME: OpenID discovery documents and JWKS endpoints, global and per tenant
// ABOUTME: JWKS bodies come from the short-TTL memo so repeated requests return identical bytes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::debug;

use crate::constants::ttl;
use crate::errors::AppError;
use crate::models::{KeyOwner, Tenant, SYSTEM_SCOPES};
use crate::server::ServerResources;

/// Discovery and key publication routes
pub struct WellKnownRoutes;

fn discovery_document(base: &str, issuer: &str, jwks_uri: &str, scopes: &[String]) -> Value {
    json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{base}/oauth2/authorize"),
        "token_endpoint": format!("{base}/oauth2/token"),
        "userinfo_endpoint": format!("{base}/userinfo"),
        "introspection_endpoint": format!("{base}/oauth2/introspect"),
        "revocation_endpoint": format!("{base}/oauth2/revoke"),
        "jwks_uri": jwks_uri,
        "response_types_supported": ["code"],
        "response_modes_supported": ["query"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["EdDSA"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["none", "client_secret_basic", "client_secret_post"],
        "scopes_supported": scopes,
        "claims_supported": [
            "sub", "iss", "aud", "exp", "iat", "auth_time", "nonce", "acr", "amr", "tid",
            "email", "email_verified", "name", "given_name", "family_name", "picture", "locale"
        ],
        "acr_values_supported": [crate::constants::acr::LOA1, crate::constants::acr::LOA2],
    })
}

fn jwks_response(body: &str) -> Response {
    let mut response = body.to_owned().into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

impl WellKnownRoutes {
    /// Discovery and JWKS routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/.well-known/openid-configuration", get(Self::handle_global_discovery))
            .route(
                "/t/:slug/.well-known/openid-configuration",
                get(Self::handle_tenant_discovery),
            )
            .route("/.well-known/jwks.json", get(Self::handle_global_jwks))
            .route("/.well-known/jwks/:file", get(Self::handle_tenant_jwks))
            .with_state(resources)
    }

    async fn handle_global_discovery(State(resources): State<Arc<ServerResources>>) -> Response {
        let base = resources.issuer.base();
        let scopes: Vec<String> = SYSTEM_SCOPES.iter().map(|s| (*s).to_owned()).collect();
        let body = discovery_document(base, base, &resources.issuer.jwks_uri(&KeyOwner::Global), &scopes);
        let mut response = Json(body).into_response();
        if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={}", ttl::DISCOVERY_MAX_AGE_SECS)) {
            response.headers_mut().insert(CACHE_CONTROL, value);
        }
        response
    }

    #[tracing::instrument(skip(resources), fields(route = "tenant_discovery"))]
    async fn handle_tenant_discovery(
        State(resources): State<Arc<ServerResources>>,
        Path(slug): Path<String>,
    ) -> Result<Response, AppError> {
        let control = resources.dal.control();
        let tenant = control
            .tenant_by_slug(&slug)
            .await?
            .ok_or_else(|| AppError::tenant_not_found(&slug))?;
        let mut scopes: Vec<String> = control
            .list_scopes(&tenant.slug)
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect();
        for system in SYSTEM_SCOPES.iter().copied() {
            if !scopes.iter().any(|s| s == system) {
                scopes.push(system.to_owned());
            }
        }
        let issuer = resources.issuer.issuer_for(&tenant);
        let jwks_uri = resources.issuer.jwks_uri(&resources.issuer.key_owner(&tenant));
        let body = discovery_document(resources.issuer.base(), &issuer, &jwks_uri, &scopes);
        Ok(super::no_store(&body))
    }

    async fn serve_jwks(resources: &ServerResources, owner: KeyOwner) -> Result<Response, AppError> {
        let keystore = Arc::clone(&resources.keystore);
        let cache_key = owner.to_string();
        let body = resources
            .jwks_cache
            .get_or_load(&cache_key, || async move { keystore.jwks(&owner).await })
            .await?;
        Ok(jwks_response(&body))
    }

    async fn handle_global_jwks(State(resources): State<Arc<ServerResources>>) -> Result<Response, AppError> {
        Self::serve_jwks(&resources, KeyOwner::Global).await
    }

    #[tracing::instrument(skip(resources), fields(route = "tenant_jwks"))]
    async fn handle_tenant_jwks(
        State(resources): State<Arc<ServerResources>>,
        Path(file): Path<String>,
    ) -> Result<Response, AppError> {
        let slug = file.strip_suffix(".json").unwrap_or(&file);
        if !Tenant::is_valid_slug(slug) {
            debug!(slug, "rejected jwks slug");
            return Err(AppError::invalid_input("invalid tenant slug"));
        }
        resources
            .dal
            .control()
            .tenant_by_slug(slug)
            .await?
            .ok_or_else(|| AppError::tenant_not_found(slug))?;
        Self::serve_jwks(&resources, KeyOwner::Tenant(slug.to_owned())).await
    }
}
