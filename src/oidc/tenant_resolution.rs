// ABOUTME: Tenant hint extraction: JSON body, then X-Tenant-Slug / X-Tenant-ID, then query, then subdomain
// ABOUTME: The body is peeked and handed back to the handler byte-for-byte
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! Tenant resolution
//!
//! Endpoints that are not bound to a tenant by path or token accept the tenant
//! in several places. Precedence is fixed: request body field `tenant_id`
//! (or `tenant`), header `X-Tenant-Slug`, header `X-Tenant-ID`, query
//! parameter `tenant_id` (or `tenant`), and finally the left-most label of the
//! `Host` when it is a subdomain of the base host. The resulting key is either
//! a UUID or a slug; `ControlPlane::resolve_tenant` decides which.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::Value;
use url::form_urlencoded;

use crate::constants::headers;
use crate::errors::{AppError, AppResult};
use crate::models::Tenant;

/// Bodies larger than this are not peeked
const MAX_PEEK_BYTES: usize = 64 * 1024;

const BODY_FIELDS: &[&str] = &["tenant_id", "tenant"];
const QUERY_FIELDS: &[&str] = &["tenant_id", "tenant"];

/// Tenant key found for the request, inserted as a request extension
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantHint(pub Option<String>);

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

/// Tenant field of a JSON body
#[must_use]
pub fn from_body(body: &Value) -> Option<String> {
    BODY_FIELDS
        .iter()
        .find_map(|field| body.get(*field).and_then(Value::as_str).and_then(non_empty))
}

/// `X-Tenant-Slug`, then `X-Tenant-ID`
#[must_use]
pub fn from_headers(map: &HeaderMap) -> Option<String> {
    [headers::TENANT_SLUG, headers::TENANT_ID]
        .iter()
        .find_map(|name| map.get(*name).and_then(|v| v.to_str().ok()).and_then(non_empty))
}

/// Tenant parameter of a raw query string
#[must_use]
pub fn from_query(query: Option<&str>) -> Option<String> {
    let pairs: Vec<(String, String)> = form_urlencoded::parse(query?.as_bytes())
        .into_owned()
        .collect();
    QUERY_FIELDS.iter().find_map(|field| {
        pairs
            .iter()
            .find(|(k, _)| k == field)
            .and_then(|(_, v)| non_empty(v))
    })
}

/// Left-most label of `host` when it is a direct subdomain of `base_host`
#[must_use]
pub fn from_host(host: Option<&str>, base_host: &str) -> Option<String> {
    let host = host?.split(':').next()?.to_ascii_lowercase();
    let label = host.strip_suffix(base_host)?.strip_suffix('.')?;
    (!label.contains('.') && Tenant::is_valid_slug(label)).then(|| label.to_owned())
}

/// Apply the fallback chain
#[must_use]
pub fn resolve(
    body: Option<&Value>,
    map: &HeaderMap,
    query: Option<&str>,
    base_host: &str,
) -> Option<String> {
    body.and_then(from_body)
        .or_else(|| from_headers(map))
        .or_else(|| from_query(query))
        .or_else(|| {
            from_host(
                map.get(header::HOST).and_then(|v| v.to_str().ok()),
                base_host,
            )
        })
}

fn is_json(map: &HeaderMap) -> bool {
    map.get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

/// Parse a JSON body and rebuild the request with the same bytes
///
/// # Errors
///
/// `InvalidInput` when the body exceeds the peek limit or cannot be read.
pub async fn peek_json_body(request: Request) -> AppResult<(Request, Option<Value>)> {
    if !is_json(request.headers()) {
        return Ok((request, None));
    }
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_PEEK_BYTES)
        .await
        .map_err(|_| AppError::invalid_input("request body too large"))?;
    let value = serde_json::from_slice(&bytes).ok();
    Ok((Request::from_parts(parts, Body::from(bytes)), value))
}

/// Middleware inserting a [`TenantHint`] for downstream handlers
///
/// # Errors
///
/// Fails only when the body cannot be peeked.
pub async fn tenant_hint_layer(
    State(base_host): State<Arc<str>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut request, body) = peek_json_body(request).await?;
    let hint = resolve(
        body.as_ref(),
        request.headers(),
        request.uri().query(),
        &base_host,
    );
    request.extensions_mut().insert(TenantHint(hint));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use axum::routing::post;
    use axum::{Extension, Router};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn precedence() {
        let mut map = HeaderMap::new();
        map.insert(headers::TENANT_ID, HeaderValue::from_static("by-id-header"));
        map.insert(header::HOST, HeaderValue::from_static("sub.id.test:8443"));
        let body = json!({"tenant_id": "from-body"});

        assert_eq!(
            resolve(Some(&body), &map, Some("tenant=q"), "id.test").as_deref(),
            Some("from-body")
        );
        assert_eq!(
            resolve(None, &map, Some("tenant=q"), "id.test").as_deref(),
            Some("by-id-header")
        );
        map.insert(headers::TENANT_SLUG, HeaderValue::from_static("by-slug"));
        assert_eq!(resolve(None, &map, None, "id.test").as_deref(), Some("by-slug"));

        let mut bare = HeaderMap::new();
        assert_eq!(
            resolve(None, &bare, Some("a=1&tenant_id=acme"), "id.test").as_deref(),
            Some("acme")
        );
        bare.insert(header::HOST, HeaderValue::from_static("acme.id.test"));
        assert_eq!(resolve(None, &bare, None, "id.test").as_deref(), Some("acme"));
    }

    #[test]
    fn subdomain_rules() {
        assert_eq!(from_host(Some("id.test"), "id.test"), None);
        assert_eq!(from_host(Some("a.b.id.test"), "id.test"), None);
        assert_eq!(from_host(Some("evilid.test"), "id.test"), None);
        assert_eq!(from_host(Some("Acme.ID.test"), "id.test").as_deref(), Some("acme"));
    }

    #[tokio::test]
    async fn middleware_restores_body() {
        async fn echo(Extension(hint): Extension<TenantHint>, body: String) -> String {
            format!("{}|{body}", hint.0.unwrap_or_default())
        }
        let app = Router::new()
            .route("/", post(echo))
            .layer(axum::middleware::from_fn_with_state(
                Arc::<str>::from("id.test"),
                tenant_hint_layer,
            ));
        let raw = r#"{"tenant_id":"acme","email":"a@b"}"#;
        let response = app
            .oneshot(
                Request::post("/")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(raw))
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(std::str::from_utf8(&bytes).unwrap(), format!("acme|{raw}"));
    }
}
