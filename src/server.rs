// ABOUTME: Composition root: builds the DAL, keystore and protocol engines and serves the HTTP router
// ABOUTME: ServerResources is the shared state every route module receives
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;
use url::Url;

use crate::cache::{CacheProvider, CacheProvisioner, InMemoryCache, RedisCache};
use crate::cluster::{ClusterHook, NoopClusterHook};
use crate::config::ServerConfig;
use crate::crypto::password::{PasswordPolicy, PasswordService};
use crate::crypto::SecretBox;
use crate::errors::{AppError, AppResult};
use crate::health::HealthChecker;
use crate::keys::{IssuerResolver, JwksCache, Keystore};
use crate::oidc::{
    AdminTokenService, AuthorizeEngine, EmailFlowService, LogMailer, LoginService, Mailer, MfaEngine,
    MfaSettings, SessionStore, TokenEngine, TokenSettings, UserinfoService,
};
use crate::routes;
use crate::security::cookies::secure_for;
use crate::storage::{AdapterRegistry, DalFactory};
use crate::storage::factory::DalOptions;

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared state of the running server
pub struct ServerResources {
    /// Loaded configuration
    pub config: Arc<ServerConfig>,
    /// Data access layer
    pub dal: Arc<DalFactory>,
    /// Signing keys
    pub keystore: Arc<Keystore>,
    /// `iss` computation
    pub issuer: IssuerResolver,
    /// Serialized JWKS memo
    pub jwks_cache: Arc<JwksCache>,
    /// Browser sessions
    pub sessions: SessionStore,
    /// Token endpoint core
    pub tokens: Arc<TokenEngine>,
    /// Authorization endpoint core
    pub authorize: Arc<AuthorizeEngine>,
    /// Password login and registration
    pub login: Arc<LoginService>,
    /// TOTP second factor
    pub mfa: Arc<MfaEngine>,
    /// Verification and reset emails
    pub email: Arc<EmailFlowService>,
    /// Userinfo and introspection
    pub userinfo: Arc<UserinfoService>,
    /// Admin API authentication
    pub admin: Arc<AdminTokenService>,
    /// Readiness probes
    pub health: Arc<HealthChecker>,
    /// Host of the base URL, for subdomain tenant hints
    pub base_host: Arc<str>,
    /// Whether cookies get the `Secure` attribute
    pub secure_cookies: bool,
}

async fn default_cache(config: &ServerConfig) -> AppResult<Arc<dyn CacheProvider>> {
    if let Some(url) = config.cache_url.as_deref() {
        return Ok(Arc::new(RedisCache::connect(url).await?));
    }
    let memory = Arc::new(InMemoryCache::new());
    memory.spawn_sweeper(CACHE_SWEEP_INTERVAL);
    Ok(memory)
}

impl ServerResources {
    /// Build with a single-node cluster hook and the logging mailer
    ///
    /// # Errors
    ///
    /// Fails when the control plane, cache or global database cannot be opened.
    pub async fn build(config: ServerConfig) -> AppResult<Self> {
        Self::build_with(config, Arc::new(NoopClusterHook), Arc::new(LogMailer)).await
    }

    /// Build with explicit collaborators
    ///
    /// # Errors
    ///
    /// Same as [`ServerResources::build`].
    pub async fn build_with(
        config: ServerConfig,
        cluster: Arc<dyn ClusterHook>,
        mailer: Arc<dyn Mailer>,
    ) -> AppResult<Self> {
        let config = Arc::new(config);
        let secret_box = SecretBox::new(&config.secretbox_master_key);
        let registry = Arc::new(AdapterRegistry::with_builtin());
        let cache = default_cache(&config).await?;
        let caches = Arc::new(CacheProvisioner::new(Arc::clone(&cache), secret_box.clone()));

        let dal = Arc::new(
            DalFactory::open(
                DalOptions::from_config(&config),
                registry,
                secret_box,
                caches,
                cluster,
            )
            .await?,
        );
        let keystore = Arc::new(Keystore::new(Arc::clone(dal.control()), &config.signing_master_key));
        let issuer = IssuerResolver::new(&config.base_url, config.issuer_mode);
        let jwks_cache = Arc::new(JwksCache::new(Duration::from_secs(config.jwks_cache_ttl_secs)));
        let sessions = SessionStore::new(cache);
        let passwords = Arc::new(PasswordService::default());
        let policy = Arc::new(PasswordPolicy::new(config.password_blacklist_path.clone()));

        let tokens = Arc::new(TokenEngine::new(
            Arc::clone(&dal),
            Arc::clone(&keystore),
            issuer.clone(),
            TokenSettings {
                access_ttl_secs: config.access_token_ttl_secs,
                refresh_ttl_secs: config.refresh_token_ttl_secs,
                admin_subs: config.admin_subs.clone(),
            },
        ));
        let authorize = Arc::new(AuthorizeEngine::new(
            Arc::clone(&dal),
            Arc::clone(&keystore),
            issuer.clone(),
            sessions.clone(),
            config.login_url.clone(),
            config.authorize_allow_bearer,
        ));
        let login = Arc::new(LoginService::new(
            Arc::clone(&tokens),
            sessions.clone(),
            Arc::clone(&passwords),
            Arc::clone(&policy),
            config.register_auto_login,
        ));
        let mfa = Arc::new(MfaEngine::new(
            Arc::clone(&tokens),
            Arc::clone(&passwords),
            MfaSettings {
                issuer: config.mfa_totp_issuer.clone(),
                window: config.mfa_totp_window,
            },
        ));
        let email = Arc::new(EmailFlowService::new(
            Arc::clone(&dal),
            mailer,
            Arc::clone(&passwords),
            policy,
            &config.base_url,
        ));
        let userinfo = Arc::new(UserinfoService::new(Arc::clone(&tokens)));
        let admin = Arc::new(AdminTokenService::new(
            Arc::clone(dal.control()),
            Arc::clone(&keystore),
            Some(passwords),
            issuer.base(),
        ));
        let commit = Some(config.service_commit.clone()).filter(|c| c != "unknown");
        let health = Arc::new(HealthChecker::new(
            Arc::clone(&dal),
            Arc::clone(&keystore),
            &config.service_version,
            commit,
        ));

        let base_host: Arc<str> = Url::parse(&config.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_default()
            .into();
        let secure_cookies = secure_for(&config.base_url);

        Ok(Self {
            config,
            dal,
            keystore,
            issuer,
            jwks_cache,
            sessions,
            tokens,
            authorize,
            login,
            mfa,
            email,
            userinfo,
            admin,
            health,
            base_host,
            secure_cookies,
        })
    }
}

/// HTTP server over [`ServerResources`]
pub struct HelloJohnServer {
    resources: Arc<ServerResources>,
}

impl HelloJohnServer {
    /// Server sharing `resources` with every route
    #[must_use]
    pub const fn new(resources: Arc<ServerResources>) -> Self {
        Self { resources }
    }

    /// Bind the configured address and serve until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Fails when the address is invalid or cannot be bound.
    pub async fn run<F>(&self, shutdown: F) -> AppResult<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = self
            .resources
            .config
            .server_addr
            .parse()
            .map_err(|e| AppError::config(format!("invalid V2_SERVER_ADDR: {e}")))?;
        let app = routes::router(&self.resources);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AppError::internal(format!("transport error: {e}")))?;
        info!(%addr, "hellojohn listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| AppError::internal(format!("transport error: {e}")))?;
        self.resources.dal.close().await;
        info!("server stopped");
        Ok(())
    }
}
