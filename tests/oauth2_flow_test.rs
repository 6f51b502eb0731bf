// ABOUTME: End-to-end tests of the authorization code flow, refresh rotation, revocation and userinfo
// ABOUTME: Drives the full router in-process through tower's oneshot
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::Request;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{Duration, Utc};
use common::{body_json, location, setup, CLIENT_ID, REDIRECT_URI, VERIFIER};
use hellojohn::cache::get_json;
use hellojohn::crypto::hashing::{sha256_b64url, sha256_hex};
use hellojohn::models::{AuthCodePayload, ClientType, OidcClient, Role};

#[tokio::test]
async fn authorize_with_session_redirects_with_code_and_state() -> Result<()> {
    let env = setup().await?;
    let cookie = format!("sid={}", env.session_cookie().await?);

    let response = env.get(&env.authorize_uri("xyz"), Some(&cookie)).await;
    assert_eq!(response.status(), 302);
    let location = location(&response);
    assert!(location.starts_with("https://app.acme.test/cb?code="));
    assert!(location.ends_with("&state=xyz"));

    let url = url::Url::parse(&location)?;
    let code = url
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    let access = env.resources.dal.for_tenant("acme").await?;
    let payload: AuthCodePayload = get_json(access.cache(), &format!("code:{}", sha256_b64url(&code)))
        .await?
        .expect("code payload cached");
    assert_eq!(payload.user_id, env.user_id);
    assert_eq!(payload.client_id, CLIENT_ID);
    assert_eq!(payload.scope, "openid email");
    assert_eq!(payload.redirect_uri, REDIRECT_URI);
    Ok(())
}

#[tokio::test]
async fn authorize_without_pkce_is_rejected_before_redirect() -> Result<()> {
    let env = setup().await?;
    let cookie = format!("sid={}", env.session_cookie().await?);
    let uri = format!(
        "/oauth2/authorize?response_type=code&client_id={CLIENT_ID}&redirect_uri={}&scope=openid+email&state=xyz",
        urlencoding::encode(REDIRECT_URI)
    );

    let response = env.get(&uri, Some(&cookie)).await;
    assert_eq!(response.status(), 400);
    let body = body_json(response).await?;
    assert_eq!(body["code"], "bad_request");
    assert_eq!(body["detail"], "PKCE S256 required");
    Ok(())
}

#[tokio::test]
async fn authorize_without_session_sends_user_to_login() -> Result<()> {
    let env = setup().await?;
    let response = env.get(&env.authorize_uri("abc"), None).await;
    assert_eq!(response.status(), 302);
    let location = location(&response);
    assert!(location.starts_with("http://localhost:8082/login?return_to="));
    Ok(())
}

#[tokio::test]
async fn prompt_none_without_session_returns_login_required() -> Result<()> {
    let env = setup().await?;
    let uri = format!("{}&prompt=none", env.authorize_uri("s1"));
    let response = env.get(&uri, None).await;
    assert_eq!(response.status(), 302);
    let location = location(&response);
    assert!(location.starts_with(REDIRECT_URI));
    assert!(location.contains("error=login_required"));
    assert!(location.contains("state=s1"));
    Ok(())
}

#[tokio::test]
async fn unregistered_redirect_uri_is_not_redirected_to() -> Result<()> {
    let env = setup().await?;
    let uri = env
        .authorize_uri("xyz")
        .replace(&*urlencoding::encode(REDIRECT_URI), &urlencoding::encode("https://evil.test/cb"));
    let response = env.get(&uri, None).await;
    assert_eq!(response.status(), 400);
    Ok(())
}

#[tokio::test]
async fn code_exchange_issues_tokens_once() -> Result<()> {
    let env = setup().await?;
    let code = env.authorize_code().await?;

    let tokens = env.exchange(&code).await?;
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["expires_in"], 900);
    assert!(tokens["access_token"].as_str().is_some());
    assert!(tokens["refresh_token"].as_str().is_some());
    assert!(tokens["id_token"].as_str().is_some());

    let replay = env
        .post_form(
            "/oauth2/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", REDIRECT_URI),
                ("client_id", CLIENT_ID),
                ("code_verifier", VERIFIER),
            ],
        )
        .await;
    assert_eq!(replay.status(), 400);
    assert_eq!(body_json(replay).await?["error"], "invalid_grant");
    Ok(())
}

#[tokio::test]
async fn wrong_verifier_fails_pkce() -> Result<()> {
    let env = setup().await?;
    let code = env.authorize_code().await?;
    let response = env
        .post_form(
            "/oauth2/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", REDIRECT_URI),
                ("client_id", CLIENT_ID),
                ("code_verifier", "not-the-verifier-not-the-verifier-not-the-verifier"),
            ],
        )
        .await;
    assert_eq!(response.status(), 400);
    assert_eq!(body_json(response).await?["error"], "invalid_grant");
    Ok(())
}

#[tokio::test]
async fn refresh_rotates_and_rejects_replay() -> Result<()> {
    let env = setup().await?;
    let tokens = env.exchange(&env.authorize_code().await?).await?;
    let r1 = tokens["refresh_token"].as_str().unwrap().to_owned();

    let response = env
        .post_form(
            "/oauth2/token",
            &[("grant_type", "refresh_token"), ("refresh_token", &r1), ("client_id", CLIENT_ID)],
        )
        .await;
    assert_eq!(response.status(), 200);
    let rotated = body_json(response).await?;
    let r2 = rotated["refresh_token"].as_str().unwrap().to_owned();
    assert_ne!(r1, r2);
    assert_eq!(rotated["expires_in"], 900);

    let access = env.resources.dal.for_tenant("acme").await?;
    let repo = access.refresh_tokens()?;
    let old = repo.get_refresh_token_by_hash(&sha256_hex(&r1)).await?.unwrap();
    let new = repo.get_refresh_token_by_hash(&sha256_hex(&r2)).await?.unwrap();
    assert!(old.revoked_at.is_some());
    assert!(new.revoked_at.is_none());
    assert_eq!(new.rotated_from, Some(old.id));
    let expected = Utc::now() + Duration::days(30);
    assert!((new.expires_at - expected).num_seconds().abs() < 60);

    let replay = env
        .post_form(
            "/oauth2/token",
            &[("grant_type", "refresh_token"), ("refresh_token", &r1), ("client_id", CLIENT_ID)],
        )
        .await;
    assert_eq!(replay.status(), 400);
    assert_eq!(body_json(replay).await?["error"], "invalid_grant");
    Ok(())
}

#[tokio::test]
async fn unsupported_grant_type_is_reported() -> Result<()> {
    let env = setup().await?;
    let response = env
        .post_form("/oauth2/token", &[("grant_type", "password"), ("client_id", CLIENT_ID)])
        .await;
    assert_eq!(response.status(), 400);
    assert_eq!(body_json(response).await?["error"], "unsupported_grant_type");
    Ok(())
}

#[tokio::test]
async fn revoked_refresh_token_cannot_be_used() -> Result<()> {
    let env = setup().await?;
    let tokens = env.exchange(&env.authorize_code().await?).await?;
    let refresh = tokens["refresh_token"].as_str().unwrap();

    let revoke = env
        .post_form("/oauth2/revoke", &[("token", refresh), ("client_id", CLIENT_ID)])
        .await;
    assert_eq!(revoke.status(), 200);

    let unknown = env
        .post_form("/oauth2/revoke", &[("token", "never-issued"), ("client_id", CLIENT_ID)])
        .await;
    assert_eq!(unknown.status(), 200);

    let response = env
        .post_form(
            "/oauth2/token",
            &[("grant_type", "refresh_token"), ("refresh_token", refresh), ("client_id", CLIENT_ID)],
        )
        .await;
    assert_eq!(response.status(), 400);
    Ok(())
}

#[tokio::test]
async fn introspection_reports_active_and_inactive_tokens() -> Result<()> {
    let env = setup().await?;
    let tokens = env.exchange(&env.authorize_code().await?).await?;
    let access_token = tokens["access_token"].as_str().unwrap();

    let response = env
        .post_form("/oauth2/introspect", &[("token", access_token)])
        .await;
    assert_eq!(response.status(), 200);
    let body = body_json(response).await?;
    assert_eq!(body["active"], true);
    assert_eq!(body["sub"], env.user_id.to_string());
    assert_eq!(body["client_id"], CLIENT_ID);
    assert_eq!(body["tid"], env.acme.id.to_string());

    let refresh = tokens["refresh_token"].as_str().unwrap();
    let response = env
        .post_form("/oauth2/introspect", &[("token", refresh), ("client_id", CLIENT_ID)])
        .await;
    assert_eq!(body_json(response).await?["active"], true);

    let response = env
        .post_form("/oauth2/introspect", &[("token", "garbage")])
        .await;
    assert_eq!(body_json(response).await?["active"], false);
    Ok(())
}

#[tokio::test]
async fn userinfo_projects_claims_and_challenges_bad_tokens() -> Result<()> {
    let env = setup().await?;
    let tokens = env.exchange(&env.authorize_code().await?).await?;
    let access_token = tokens["access_token"].as_str().unwrap();

    let request = Request::get("/userinfo")
        .header("authorization", format!("Bearer {access_token}"))
        .body(Body::empty())?;
    let response = env.send(request).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["cache-control"], "no-store");
    let claims = body_json(response).await?;
    assert_eq!(claims["sub"], env.user_id.to_string());
    assert_eq!(claims["email"], common::USER_EMAIL);
    assert_eq!(claims["email_verified"], true);

    let request = Request::get("/userinfo")
        .header("authorization", "Bearer not.a.jwt")
        .body(Body::empty())?;
    let response = env.send(request).await;
    assert_eq!(response.status(), 401);
    let challenge = response.headers()["www-authenticate"].to_str()?.to_owned();
    assert!(challenge.starts_with("Bearer realm=\"userinfo\", error=\"invalid_token\""));
    Ok(())
}

#[tokio::test]
async fn access_token_carries_rbac_system_claims() -> Result<()> {
    let env = setup().await?;
    let access = env.resources.dal.for_tenant("acme").await?;
    let rbac = access.rbac()?;
    rbac.upsert_role(&Role {
        name: "admin".to_owned(),
        description: "Tenant administrators".to_owned(),
        permissions: vec!["users:read".to_owned(), "users:write".to_owned()],
    })
    .await?;
    rbac.assign_role(env.user_id, "admin").await?;

    let tokens = env.exchange(&env.authorize_code().await?).await?;
    let access_token = tokens["access_token"].as_str().unwrap();
    let payload = access_token.split('.').nth(1).unwrap();
    let claims: serde_json::Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload)?)?;
    let sys = &claims["custom"]["http://localhost:8082/claims/sys"];
    assert_eq!(sys["roles"], serde_json::json!(["admin"]));
    assert_eq!(sys["perms"], serde_json::json!(["users:read", "users:write"]));
    assert_eq!(sys["is_admin"], true);
    assert_eq!(claims["acr"], "urn:hellojohn:loa:1");

    let response = env
        .post_form("/oauth2/introspect", &[("token", access_token), ("include_sys", "true")])
        .await;
    let body = body_json(response).await?;
    assert_eq!(body["roles"], serde_json::json!(["admin"]));
    Ok(())
}

#[tokio::test]
async fn confidential_client_must_authenticate() -> Result<()> {
    let env = setup().await?;
    let mut client = OidcClient::new_public("backend", vec!["https://api.acme.test/cb".to_owned()]);
    client.client_type = ClientType::Confidential;
    client.secret = "backend-secret".to_owned();
    env.resources.dal.control().upsert_client("acme", client).await?;

    let response = env
        .post_form("/oauth2/revoke", &[("token", "opaque"), ("client_id", "backend")])
        .await;
    assert_eq!(response.status(), 401);
    assert_eq!(body_json(response).await?["error"], "invalid_client");

    let basic = STANDARD.encode("backend:backend-secret");
    let request = Request::post("/oauth2/revoke")
        .header("authorization", format!("Basic {basic}"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("token=opaque"))?;
    assert_eq!(env.send(request).await.status(), 200);

    let wrong = STANDARD.encode("backend:nope");
    let request = Request::post("/oauth2/revoke")
        .header("authorization", format!("Basic {wrong}"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("token=opaque"))?;
    assert_eq!(env.send(request).await.status(), 401);
    Ok(())
}
