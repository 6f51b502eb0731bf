// ABOUTME: Admin API: bootstrap, admin tokens, tenant, client and scope management, key rotation
// ABOUTME: Every management route requires an admin access token signed by the global key
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header::{ETAG, IF_MATCH};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::models::{KeyOwner, OidcClient, Scope, TenantSettings};
use crate::oidc::admin::AdminLoginRequest;
use crate::oidc::claims::AdminClaims;
use crate::server::ServerResources;
use crate::storage::control::settings_etag;

/// Admin API routes under `/v2/admin`
pub struct AdminRoutes;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BootstrapBody {
    email: String,
    password: String,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RefreshBody {
    refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CreateTenantBody {
    slug: String,
    name: String,
    settings: TenantSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RotateBody {
    grace_seconds: i64,
}

/// Never echo client secrets, sealed or not
fn redact(mut client: OidcClient) -> OidcClient {
    client.secret.clear();
    client.secret_enc.clear();
    client
}

fn with_etag(mut response: Response, etag: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(etag) {
        response.headers_mut().insert(ETAG, value);
    }
    response
}

impl AdminRoutes {
    /// Admin routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/v2/admin/bootstrap", post(Self::handle_bootstrap))
            .route("/v2/admin/login", post(Self::handle_login))
            .route("/v2/admin/refresh", post(Self::handle_refresh))
            .route(
                "/v2/admin/tenants",
                get(Self::handle_list_tenants).post(Self::handle_create_tenant),
            )
            .route(
                "/v2/admin/tenants/:slug",
                get(Self::handle_get_tenant).delete(Self::handle_delete_tenant),
            )
            .route(
                "/v2/admin/tenants/:slug/settings",
                get(Self::handle_get_settings).put(Self::handle_put_settings),
            )
            .route(
                "/v2/admin/tenants/:slug/clients",
                get(Self::handle_list_clients).post(Self::handle_upsert_client),
            )
            .route(
                "/v2/admin/tenants/:slug/clients/:client_id",
                delete(Self::handle_delete_client),
            )
            .route(
                "/v2/admin/tenants/:slug/scopes",
                get(Self::handle_list_scopes).put(Self::handle_upsert_scope),
            )
            .route("/v2/admin/tenants/:slug/scopes/:name", delete(Self::handle_delete_scope))
            .route("/v2/admin/tenants/:slug/keys/rotate", post(Self::handle_rotate_keys))
            .route("/v2/admin/tenants/:slug/logo", get(Self::handle_logo))
            .with_state(resources)
    }

    async fn require_admin(resources: &ServerResources, headers: &HeaderMap) -> AppResult<AdminClaims> {
        resources
            .admin
            .authorize_access(super::bearer_token(headers))
            .await
    }

    /// Drop every cached view of a tenant after a control-plane write
    async fn forget_tenant(resources: &ServerResources, slug: &str) {
        let owner = KeyOwner::Tenant(slug.to_owned());
        resources.keystore.invalidate(&owner).await;
        resources.jwks_cache.invalidate(&owner.to_string());
        resources.dal.refresh_tenant(slug).await;
    }

    // ================================
    // Admin accounts
    // ================================

    async fn handle_bootstrap(
        State(resources): State<Arc<ServerResources>>,
        Json(body): Json<BootstrapBody>,
    ) -> Result<Response, AppError> {
        let admin = resources
            .admin
            .bootstrap(&body.email, &body.password, &body.name)
            .await?;
        Ok((
            StatusCode::CREATED,
            Json(json!({ "id": admin.id, "email": admin.email, "name": admin.name })),
        )
            .into_response())
    }

    async fn handle_login(
        State(resources): State<Arc<ServerResources>>,
        Json(body): Json<AdminLoginRequest>,
    ) -> Result<Response, AppError> {
        let tokens = resources.admin.login(&body).await?;
        Ok(super::no_store(&tokens))
    }

    async fn handle_refresh(
        State(resources): State<Arc<ServerResources>>,
        Json(body): Json<RefreshBody>,
    ) -> Result<Response, AppError> {
        let tokens = resources.admin.refresh(body.refresh_token.trim()).await?;
        Ok(super::no_store(&tokens))
    }

    // ================================
    // Tenants
    // ================================

    async fn handle_list_tenants(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        Self::require_admin(&resources, &headers).await?;
        let tenants = resources.dal.control().list_tenants().await?;
        Ok(Json(tenants).into_response())
    }

    async fn handle_create_tenant(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(body): Json<CreateTenantBody>,
    ) -> Result<Response, AppError> {
        let admin = Self::require_admin(&resources, &headers).await?;
        let name = if body.name.trim().is_empty() { &body.slug } else { &body.name };
        let tenant = resources
            .dal
            .control()
            .create_tenant(&body.slug, name, body.settings)
            .await?;
        info!(admin = %admin.sub, tenant = %tenant.slug, "tenant created");
        Ok((StatusCode::CREATED, Json(tenant)).into_response())
    }

    async fn handle_get_tenant(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(slug): Path<String>,
    ) -> Result<Response, AppError> {
        Self::require_admin(&resources, &headers).await?;
        let tenant = resources
            .dal
            .control()
            .tenant_by_slug(&slug)
            .await?
            .ok_or_else(|| AppError::tenant_not_found(&slug))?;
        Ok(Json(tenant).into_response())
    }

    async fn handle_delete_tenant(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(slug): Path<String>,
    ) -> Result<Response, AppError> {
        let admin = Self::require_admin(&resources, &headers).await?;
        resources.dal.control().delete_tenant(&slug).await?;
        Self::forget_tenant(&resources, &slug).await;
        info!(admin = %admin.sub, tenant = %slug, "tenant deleted");
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    async fn handle_get_settings(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(slug): Path<String>,
    ) -> Result<Response, AppError> {
        Self::require_admin(&resources, &headers).await?;
        let tenant = resources
            .dal
            .control()
            .tenant_by_slug(&slug)
            .await?
            .ok_or_else(|| AppError::tenant_not_found(&slug))?;
        let etag = settings_etag(&tenant.settings);
        Ok(with_etag(super::no_store(&tenant.settings), &etag))
    }

    async fn handle_put_settings(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(slug): Path<String>,
        Json(settings): Json<TenantSettings>,
    ) -> Result<Response, AppError> {
        let admin = Self::require_admin(&resources, &headers).await?;
        let if_match = headers.get(IF_MATCH).and_then(|v| v.to_str().ok());
        let (tenant, etag) = resources
            .dal
            .control()
            .update_tenant_settings(&slug, settings, if_match)
            .await?;
        Self::forget_tenant(&resources, &slug).await;
        info!(admin = %admin.sub, tenant = %slug, "tenant settings replaced");
        Ok(with_etag(super::no_store(&tenant.settings), &etag))
    }

    async fn handle_logo(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(slug): Path<String>,
    ) -> Result<Response, AppError> {
        Self::require_admin(&resources, &headers).await?;
        let logo = resources
            .dal
            .control()
            .tenant_logo_data_url(&slug)
            .await?
            .ok_or_else(|| AppError::not_found("logo"))?;
        Ok(Json(json!({ "logo": logo })).into_response())
    }

    // ================================
    // Clients and scopes
    // ================================

    async fn handle_list_clients(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(slug): Path<String>,
    ) -> Result<Response, AppError> {
        Self::require_admin(&resources, &headers).await?;
        let clients: Vec<OidcClient> = resources
            .dal
            .control()
            .list_clients(&slug)
            .await?
            .into_iter()
            .map(redact)
            .collect();
        Ok(Json(clients).into_response())
    }

    async fn handle_upsert_client(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(slug): Path<String>,
        Json(client): Json<OidcClient>,
    ) -> Result<Response, AppError> {
        let admin = Self::require_admin(&resources, &headers).await?;
        let client = resources.dal.control().upsert_client(&slug, client).await?;
        info!(admin = %admin.sub, tenant = %slug, client_id = %client.client_id, "client saved");
        Ok(Json(redact(client)).into_response())
    }

    async fn handle_delete_client(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path((slug, client_id)): Path<(String, String)>,
    ) -> Result<Response, AppError> {
        Self::require_admin(&resources, &headers).await?;
        resources.dal.control().delete_client(&slug, &client_id).await?;
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    async fn handle_list_scopes(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(slug): Path<String>,
    ) -> Result<Response, AppError> {
        Self::require_admin(&resources, &headers).await?;
        let scopes = resources.dal.control().list_scopes(&slug).await?;
        Ok(Json(scopes).into_response())
    }

    async fn handle_upsert_scope(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(slug): Path<String>,
        Json(scope): Json<Scope>,
    ) -> Result<Response, AppError> {
        Self::require_admin(&resources, &headers).await?;
        let scope = resources.dal.control().upsert_scope(&slug, scope).await?;
        Ok(Json(scope).into_response())
    }

    async fn handle_delete_scope(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path((slug, name)): Path<(String, String)>,
    ) -> Result<Response, AppError> {
        Self::require_admin(&resources, &headers).await?;
        resources.dal.control().delete_scope(&slug, &name).await?;
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    // ================================
    // Keys
    // ================================

    async fn handle_rotate_keys(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(slug): Path<String>,
        body: Option<Json<RotateBody>>,
    ) -> Result<Response, AppError> {
        let admin = Self::require_admin(&resources, &headers).await?;
        let grace = body.map_or(0, |Json(b)| b.grace_seconds.max(0));
        let kid = resources.keystore.rotate_for(&slug, grace).await?;
        resources
            .jwks_cache
            .invalidate(&KeyOwner::Tenant(slug.clone()).to_string());
        info!(admin = %admin.sub, tenant = %slug, %kid, grace, "signing key rotated");
        Ok(Json(json!({ "kid": kid })).into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_clears_both_secret_forms() {
        let mut client = OidcClient::new_public("web1", vec!["https://app.acme.test/cb".to_owned()]);
        client.secret = "plain".to_owned();
        client.secret_enc = "GCMV1:abc".to_owned();
        let redacted = redact(client);
        assert!(redacted.secret.is_empty());
        assert!(redacted.secret_enc.is_empty());
    }
}
