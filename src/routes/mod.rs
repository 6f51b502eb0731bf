// ABOUTME: HTTP route modules translating wire formats to protocol core operations
// ABOUTME: Assembles the full router with tracing and request-id layers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! Route modules
//!
//! Each module owns a `XRoutes` type whose `routes` function returns a
//! `Router` bound to the shared [`ServerResources`]. Handlers only parse the
//! request, call one core operation, and shape the response.

use std::sync::Arc;

use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, PRAGMA};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::Level;

use crate::server::ServerResources;

/// Tenant administration API
pub mod admin;
/// Login, registration, session and email endpoints
pub mod auth;
/// Readiness
pub mod health;
/// TOTP self-service and challenge
pub mod mfa;
/// Authorization, token, introspection, revocation and userinfo endpoints
pub mod oauth2;
/// Discovery and JWKS documents
pub mod wellknown;

pub use admin::AdminRoutes;
pub use auth::AuthRoutes;
pub use health::HealthRoutes;
pub use mfa::MfaRoutes;
pub use oauth2::OAuth2Routes;
pub use wellknown::WellKnownRoutes;

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Token from an `Authorization: Bearer` header
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// JSON body with `Cache-Control: no-store`
pub fn no_store<T: Serialize>(body: &T) -> Response {
    let mut response = Json(body).into_response();
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// Complete application router
pub fn router(resources: &Arc<ServerResources>) -> Router {
    let mut app = Router::new()
        .merge(WellKnownRoutes::routes(Arc::clone(resources)))
        .merge(OAuth2Routes::routes(Arc::clone(resources)))
        .merge(AuthRoutes::routes(Arc::clone(resources)))
        .merge(MfaRoutes::routes(Arc::clone(resources)))
        .merge(HealthRoutes::routes(Arc::clone(resources)));
    if resources.config.fs_admin_enable {
        app = app.merge(AdminRoutes::routes(Arc::clone(resources)));
    }
    app.layer(PropagateRequestIdLayer::new(REQUEST_ID))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO).include_headers(false))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .layer(SetRequestIdLayer::new(REQUEST_ID, MakeRequestUuid))
}
