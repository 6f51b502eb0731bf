// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Builds a server over a temp control plane with a seeded tenant, client and user
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]
//! Shared test utilities for `hellojohn`
//!
//! Every call to [`setup`] gets its own temporary directory holding the
//! filesystem control plane and the sqlite data plane of tenant `acme`.

use std::collections::HashMap;
use std::sync::{Arc, Once};

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::header::{CONTENT_TYPE, COOKIE};
use axum::http::{Request, Response};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use hellojohn::config::ServerConfig;
use hellojohn::crypto::password::PasswordService;
use hellojohn::models::{Identity, OidcClient, Tenant, TenantSettings, User, UserDbSettings};
use hellojohn::oidc::login::hash_password;
use hellojohn::routes;
use hellojohn::server::ServerResources;

static INIT_LOGGER: Once = Once::new();

/// RFC 7636 appendix B verifier and its S256 challenge
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
pub const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
pub const REDIRECT_URI: &str = "https://app.acme.test/cb";
pub const CLIENT_ID: &str = "web1";
pub const USER_EMAIL: &str = "u1@acme.test";
pub const USER_PASSWORD: &str = "correct-horse-battery";

/// Initialize quiet logging once per test process
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Running server state for one test
pub struct TestEnv {
    pub resources: Arc<ServerResources>,
    pub app: Router,
    pub acme: Tenant,
    pub user_id: Uuid,
    _dir: TempDir,
}

pub fn sqlite_dsn(dir: &TempDir, name: &str) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join(name).display())
}

/// Configuration over `dir` with test master keys; `extra` overrides defaults
pub fn test_config(dir: &TempDir, extra: &[(&str, &str)]) -> Result<ServerConfig> {
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert("SIGNING_MASTER_KEY".to_owned(), "11".repeat(32));
    vars.insert("SECRETBOX_MASTER_KEY".to_owned(), "22".repeat(32));
    vars.insert("FS_ROOT".to_owned(), dir.path().join("fs").display().to_string());
    vars.insert("V2_BASE_URL".to_owned(), "http://localhost:8082".to_owned());
    vars.insert("FS_ADMIN_ENABLE".to_owned(), "true".to_owned());
    for (key, value) in extra {
        vars.insert((*key).to_owned(), (*value).to_owned());
    }
    Ok(ServerConfig::from_lookup(|key| vars.get(key).cloned())?)
}

/// Server with tenant `acme` (sqlite data plane), client `web1`, user `u1`,
/// and tenant `readonly` without a database
pub async fn setup() -> Result<TestEnv> {
    setup_with(&[]).await
}

pub async fn setup_with(extra: &[(&str, &str)]) -> Result<TestEnv> {
    init_test_logging();
    let dir = tempfile::tempdir()?;
    let config = test_config(&dir, extra)?;
    let resources = Arc::new(ServerResources::build(config).await?);
    let control = resources.dal.control();

    let settings = TenantSettings {
        user_db: Some(UserDbSettings {
            driver: "sqlite".to_owned(),
            dsn: sqlite_dsn(&dir, "acme.db"),
            ..UserDbSettings::default()
        }),
        ..TenantSettings::default()
    };
    let acme = control.create_tenant("acme", "Acme", settings).await?;
    let mut client = OidcClient::new_public(CLIENT_ID, vec![REDIRECT_URI.to_owned()]);
    client.scopes = vec!["openid".to_owned(), "email".to_owned(), "profile".to_owned()];
    control.upsert_client("acme", client).await?;
    control
        .create_tenant("readonly", "Read Only", TenantSettings::default())
        .await?;

    let user_id = create_user(&resources, "acme", USER_EMAIL, USER_PASSWORD).await?;
    let app = routes::router(&resources);
    Ok(TestEnv {
        resources,
        app,
        acme,
        user_id,
        _dir: dir,
    })
}

/// Insert a user with a password identity
pub async fn create_user(resources: &ServerResources, tenant: &str, email: &str, password: &str) -> Result<Uuid> {
    let access = resources.dal.for_tenant(tenant).await?;
    let mut user = User::new(access.tenant().id, email);
    user.email_verified = true;
    let hash = hash_password(&Arc::new(PasswordService::default()), password).await?;
    let identity = Identity::password(&user, hash);
    access.users()?.create_user(&user, Some(&identity)).await?;
    Ok(user.id)
}

impl TestEnv {
    /// Browser session cookie for the seeded user
    pub async fn session_cookie(&self) -> Result<String> {
        Ok(self
            .resources
            .sessions
            .create(self.user_id, self.acme.id, vec!["pwd".to_owned()], 3600)
            .await?)
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::get(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_form(&self, uri: &str, fields: &[(&str, &str)]) -> Response<Body> {
        let body = serde_urlencoded::to_string(fields).unwrap();
        let request = Request::post(uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    pub async fn post_json(&self, uri: &str, body: &Value, bearer: Option<&str>) -> Response<Body> {
        let mut builder = Request::post(uri).header(CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// `/oauth2/authorize` query for the seeded client
    pub fn authorize_uri(&self, state: &str) -> String {
        format!(
            "/oauth2/authorize?response_type=code&client_id={CLIENT_ID}&redirect_uri={}&scope=openid+email&state={state}&code_challenge={CHALLENGE}&code_challenge_method=S256",
            urlencoding::encode(REDIRECT_URI)
        )
    }

    /// Run authorize with a fresh session and return the issued code
    pub async fn authorize_code(&self) -> Result<String> {
        let cookie = format!("sid={}", self.session_cookie().await?);
        let response = self.get(&self.authorize_uri("xyz"), Some(&cookie)).await;
        assert_eq!(response.status(), 302);
        let location = location(&response);
        let url = url::Url::parse(&location)?;
        let code = url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .expect("code parameter");
        Ok(code)
    }

    /// Exchange a code for tokens and return the JSON body
    pub async fn exchange(&self, code: &str) -> Result<Value> {
        let response = self
            .post_form(
                "/oauth2/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", REDIRECT_URI),
                    ("client_id", CLIENT_ID),
                    ("code_verifier", VERIFIER),
                ],
            )
            .await;
        assert_eq!(response.status(), 200);
        body_json(response).await
    }
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

pub async fn body_json(response: Response<Body>) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
