// ABOUTME: Liveness and readiness endpoints
// ABOUTME: /readyz answers 503 when a critical component fails and always carries the build identity headers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::constants::headers;
use crate::server::ServerResources;

/// Probe routes
pub struct HealthRoutes;

impl HealthRoutes {
    /// `/healthz` and `/readyz`
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/healthz", get(Self::handle_liveness))
            .route("/readyz", get(Self::handle_readiness))
            .with_state(resources)
    }

    async fn handle_liveness() -> Json<serde_json::Value> {
        Json(json!({ "status": "ok" }))
    }

    async fn handle_readiness(State(resources): State<Arc<ServerResources>>) -> Response {
        let report = resources.health.readiness().await;
        let status = if report.is_ready() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        let mut response = (status, Json(&report)).into_response();
        let map = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&resources.config.service_version) {
            map.insert(headers::SERVICE_VERSION, value);
        }
        if let Ok(value) = HeaderValue::from_str(&resources.config.service_commit) {
            map.insert(headers::SERVICE_COMMIT, value);
        }
        response
    }
}
