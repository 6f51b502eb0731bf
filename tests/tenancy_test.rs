// ABOUTME: Tests of per-tenant isolation: database gating, key rotation with grace, discovery and admin settings
// ABOUTME: Uses path issuer mode so each tenant signs with its own key set
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::Request;
use common::{body_json, setup, setup_with, TestEnv, CLIENT_ID, USER_EMAIL, USER_PASSWORD};
use serde_json::{json, Value};

const ADMIN_EMAIL: &str = "ops@hellojohn.test";
const ADMIN_PASSWORD: &str = "admin-password-123";

async fn login(env: &TestEnv, tenant: &str) -> Result<axum::http::Response<Body>> {
    Ok(env
        .post_json(
            "/v2/auth/login",
            &json!({
                "tenant_id": tenant,
                "client_id": CLIENT_ID,
                "email": USER_EMAIL,
                "password": USER_PASSWORD
            }),
            None,
        )
        .await)
}

async fn admin_token(env: &TestEnv) -> Result<String> {
    let response = env
        .post_json(
            "/v2/admin/bootstrap",
            &json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD, "name": "Ops" }),
            None,
        )
        .await;
    assert_eq!(response.status(), 201);
    let response = env
        .post_json(
            "/v2/admin/login",
            &json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
    Ok(body_json(response).await?["access_token"]
        .as_str()
        .unwrap()
        .to_owned())
}

async fn userinfo_status(env: &TestEnv, token: &str) -> Result<u16> {
    let request = Request::get("/userinfo")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())?;
    Ok(env.send(request).await.status().as_u16())
}

fn kids(jwks: &Value) -> Vec<(String, String)> {
    jwks["keys"]
        .as_array()
        .unwrap()
        .iter()
        .map(|k| {
            (
                k["kid"].as_str().unwrap().to_owned(),
                k["status"].as_str().unwrap().to_owned(),
            )
        })
        .collect()
}

#[tokio::test]
async fn tenant_without_database_fails_login_with_503() -> Result<()> {
    let env = setup().await?;
    let response = login(&env, "readonly").await?;
    assert_eq!(response.status(), 503);
    let body = body_json(response).await?;
    assert_eq!(body["code"], "service_unavailable");
    assert_eq!(body["detail"], "tenant has no database configured");
    Ok(())
}

#[tokio::test]
async fn password_login_issues_tokens() -> Result<()> {
    let env = setup().await?;
    let response = login(&env, "acme").await?;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["cache-control"], "no-store");
    let tokens = body_json(response).await?;
    assert_eq!(tokens["token_type"], "Bearer");
    assert!(tokens["refresh_token"].as_str().is_some());
    Ok(())
}

#[tokio::test]
async fn rotated_key_keeps_old_tokens_valid_during_grace() -> Result<()> {
    let env = setup_with(&[("ISSUER_MODE", "path")]).await?;
    let admin = admin_token(&env).await?;

    let response = login(&env, "acme").await?;
    assert_eq!(response.status(), 200);
    let old_token = body_json(response).await?["access_token"]
        .as_str()
        .unwrap()
        .to_owned();
    let old_kid = jsonwebtoken::decode_header(&old_token)?.kid.unwrap();

    let response = env
        .post_json(
            "/v2/admin/tenants/acme/keys/rotate",
            &json!({ "grace_seconds": 3600 }),
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), 200);
    let new_kid = body_json(response).await?["kid"].as_str().unwrap().to_owned();
    assert_ne!(new_kid, old_kid);

    assert_eq!(userinfo_status(&env, &old_token).await?, 200);

    let response = env.get("/.well-known/jwks/acme.json", None).await;
    assert_eq!(response.status(), 200);
    let published = kids(&body_json(response).await?);
    assert!(published.contains(&(new_kid.clone(), "active".to_owned())));
    assert!(published.contains(&(old_kid, "grace".to_owned())));

    let response = login(&env, "acme").await?;
    let new_token = body_json(response).await?["access_token"]
        .as_str()
        .unwrap()
        .to_owned();
    assert_eq!(jsonwebtoken::decode_header(&new_token)?.kid.unwrap(), new_kid);
    Ok(())
}

#[tokio::test]
async fn rotation_without_grace_invalidates_old_tokens() -> Result<()> {
    let env = setup_with(&[("ISSUER_MODE", "path")]).await?;
    let admin = admin_token(&env).await?;
    let old_token = body_json(login(&env, "acme").await?).await?["access_token"]
        .as_str()
        .unwrap()
        .to_owned();

    let response = env
        .post_json("/v2/admin/tenants/acme/keys/rotate", &json!({}), Some(&admin))
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(userinfo_status(&env, &old_token).await?, 401);
    Ok(())
}

#[tokio::test]
async fn tenant_discovery_uses_path_issuer() -> Result<()> {
    let env = setup_with(&[("ISSUER_MODE", "path")]).await?;
    let response = env.get("/t/acme/.well-known/openid-configuration", None).await;
    assert_eq!(response.status(), 200);
    let document = body_json(response).await?;
    assert_eq!(document["issuer"], "http://localhost:8082/t/acme");
    assert_eq!(document["jwks_uri"], "http://localhost:8082/.well-known/jwks/acme.json");
    assert!(document["code_challenge_methods_supported"]
        .as_array()
        .unwrap()
        .contains(&json!("S256")));

    let response = env.get("/t/ghost/.well-known/openid-configuration", None).await;
    assert_eq!(response.status(), 404);
    let response = env.get("/.well-known/jwks/ghost.json", None).await;
    assert_eq!(response.status(), 404);
    Ok(())
}

#[tokio::test]
async fn readiness_reports_build_identity() -> Result<()> {
    let env = setup_with(&[("SERVICE_VERSION", "1.2.3"), ("SERVICE_COMMIT", "abc123")]).await?;
    let response = env.get("/readyz", None).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-service-version"], "1.2.3");
    assert_eq!(response.headers()["x-service-commit"], "abc123");

    let response = env.get("/healthz", None).await;
    assert_eq!(response.status(), 200);
    assert_eq!(body_json(response).await?["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn settings_updates_require_matching_etag() -> Result<()> {
    let env = setup().await?;
    let admin = admin_token(&env).await?;

    let request = Request::get("/v2/admin/tenants/acme/settings")
        .header("authorization", format!("Bearer {admin}"))
        .body(Body::empty())?;
    let response = env.send(request).await;
    assert_eq!(response.status(), 200);
    let etag = response.headers()["etag"].to_str()?.to_owned();
    let mut settings = body_json(response).await?;
    settings["issuerMode"] = json!("path");

    let put = |if_match: &str| {
        Request::put("/v2/admin/tenants/acme/settings")
            .header("authorization", format!("Bearer {admin}"))
            .header("content-type", "application/json")
            .header("if-match", if_match.to_owned())
            .body(Body::from(settings.to_string()))
            .unwrap()
    };

    let response = env.send(put("\"stale\"")).await;
    assert_eq!(response.status(), 412);

    let response = env.send(put(&etag)).await;
    assert_eq!(response.status(), 200);
    assert_ne!(response.headers()["etag"].to_str()?, etag);

    let response = env.send(put(&etag)).await;
    assert_eq!(response.status(), 412);
    Ok(())
}

#[tokio::test]
async fn admin_routes_require_admin_token() -> Result<()> {
    let env = setup().await?;
    let response = env.get("/v2/admin/tenants", None).await;
    assert_eq!(response.status(), 401);

    let user_token = body_json(login(&env, "acme").await?).await?["access_token"]
        .as_str()
        .unwrap()
        .to_owned();
    let request = Request::get("/v2/admin/tenants")
        .header("authorization", format!("Bearer {user_token}"))
        .body(Body::empty())?;
    assert_eq!(env.send(request).await.status(), 401);
    Ok(())
}

#[tokio::test]
async fn admin_client_listing_hides_secrets() -> Result<()> {
    let env = setup().await?;
    let admin = admin_token(&env).await?;
    let response = env
        .post_json(
            "/v2/admin/tenants/acme/clients",
            &json!({
                "clientId": "backend",
                "type": "confidential",
                "secret": "s3cr3t-value",
                "redirectUris": ["https://api.acme.test/cb"],
                "scopes": ["openid"]
            }),
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), 200);

    let request = Request::get("/v2/admin/tenants/acme/clients")
        .header("authorization", format!("Bearer {admin}"))
        .body(Body::empty())?;
    let clients = body_json(env.send(request).await).await?;
    let text = clients.to_string();
    assert!(text.contains("backend"));
    assert!(!text.contains("s3cr3t-value"));
    Ok(())
}
