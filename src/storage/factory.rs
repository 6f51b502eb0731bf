// ABOUTME: DAL factory resolving a tenant key into a TenantDataAccess facade
// ABOUTME: Chooses the tenant or default data-plane DSN, runs migrations on first connect, gates by capability
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! DAL factory
//!
//! `for_tenant` resolves a slug or id against the control plane, picks the
//! data-plane configuration (the tenant's own `userDb` wins over the
//! deployment default), opens or reuses the pooled connection and provisions
//! the tenant cache. Tenants without any database still resolve; their
//! data-plane accessors fail with `NoDBForTenant`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::control::ControlPlane;
use super::errors::{DatabaseError, DatabaseResult};
use super::migrations::Migrator;
use super::mode::{Capabilities, OperationalMode};
use super::pool::{ConnectionPool, TenantConnectHook};
use super::registry::{AdapterConfig, AdapterRegistry};
use super::repositories::{
    Connection, ConsentRepository, EmailTokenRepository, MfaRepository, RbacRepository,
    RefreshTokenRepository, UserRepository,
};
use crate::cache::{CacheProvider, CacheProvisioner, TenantCache};
use crate::cluster::ClusterHook;
use crate::config::environment::driver_for_dsn;
use crate::config::ServerConfig;
use crate::crypto::SecretBox;
use crate::errors::{AppError, AppResult};
use crate::models::{OidcClient, Tenant};

/// Pool key shared by every tenant on the default data-plane DSN
const DEFAULT_POOL_KEY: &str = "_default";

/// What the factory needs from the environment
#[derive(Debug, Clone, Default)]
pub struct DalOptions {
    /// Control-plane root directory
    pub fs_root: PathBuf,
    /// Global database DSN
    pub global_db_dsn: Option<String>,
    /// Data-plane DSN for tenants without their own database
    pub default_tenant_db_dsn: Option<String>,
}

impl DalOptions {
    /// Options from the server configuration
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            fs_root: config.fs_root.clone(),
            global_db_dsn: config.global_db_dsn.clone(),
            default_tenant_db_dsn: config.default_tenant_db_dsn.clone(),
        }
    }
}

fn adapter_config_for_dsn(dsn: &str, schema: Option<String>, manual_mode: bool) -> AppResult<AdapterConfig> {
    let driver = driver_for_dsn(dsn)
        .ok_or_else(|| AppError::config("unsupported database DSN scheme"))?;
    Ok(AdapterConfig {
        driver: driver.to_owned(),
        dsn: dsn.to_owned(),
        schema,
        manual_mode,
        ..AdapterConfig::default()
    })
}

/// Runs the embedded tenant migrations on every freshly opened connection
struct MigrateOnConnect;

#[async_trait]
impl TenantConnectHook for MigrateOnConnect {
    async fn on_tenant_connect(
        &self,
        slug: &str,
        config: &AdapterConfig,
        connection: &dyn Connection,
    ) -> DatabaseResult<()> {
        if config.manual_mode {
            debug!(tenant = slug, "manual schema mode, skipping migrations");
            return Ok(());
        }
        let Some(executor) = connection.migration_executor() else {
            return Ok(());
        };
        let result = Migrator::tenant()?.run(executor).await?;
        if let Some(version) = result.failed {
            return Err(DatabaseError::MigrationError(format!(
                "migration {version} failed: {}",
                result.error.unwrap_or_default()
            )));
        }
        if !result.applied.is_empty() {
            info!(tenant = slug, applied = ?result.applied, "tenant schema migrated");
        }
        Ok(())
    }
}

/// Composes control plane, pool, caches and capabilities
pub struct DalFactory {
    mode: OperationalMode,
    control: Arc<ControlPlane>,
    global_db: Option<Arc<dyn Connection>>,
    default_tenant_db: Option<AdapterConfig>,
    pool: ConnectionPool,
    caches: Arc<CacheProvisioner>,
    secret_box: SecretBox,
}

impl DalFactory {
    /// Open the control plane and detect the operational mode
    ///
    /// # Errors
    ///
    /// Fails when the filesystem root cannot be prepared, a DSN has an
    /// unsupported scheme, or the global database is unreachable.
    pub async fn open(
        options: DalOptions,
        registry: Arc<AdapterRegistry>,
        secret_box: SecretBox,
        caches: Arc<CacheProvisioner>,
        cluster: Arc<dyn ClusterHook>,
    ) -> AppResult<Self> {
        let fs = registry.get("fs")?;
        let control_conn = fs
            .connect(&AdapterConfig {
                driver: "fs".to_owned(),
                fs_root: Some(options.fs_root.clone()),
                ..AdapterConfig::default()
            })
            .await?;

        let global_db = match options.global_db_dsn.as_deref() {
            Some(dsn) => {
                let config = adapter_config_for_dsn(dsn, None, true)?;
                let conn = registry.get(&config.driver)?.connect(&config).await?;
                conn.ping().await?;
                Some(conn)
            }
            None => None,
        };
        let default_tenant_db = options
            .default_tenant_db_dsn
            .as_deref()
            .map(|dsn| adapter_config_for_dsn(dsn, None, false))
            .transpose()?;

        let mode = OperationalMode::detect(global_db.is_some(), default_tenant_db.is_some());
        info!(%mode, fs_root = %options.fs_root.display(), "data access layer ready");

        Ok(Self {
            mode,
            control: Arc::new(ControlPlane::new(control_conn, secret_box.clone(), cluster)),
            global_db,
            default_tenant_db,
            pool: ConnectionPool::new(registry, Some(Arc::new(MigrateOnConnect))),
            caches,
            secret_box,
        })
    }

    /// Operational mode
    #[must_use]
    pub const fn mode(&self) -> OperationalMode {
        self.mode
    }

    /// Deployment-wide capabilities
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        self.mode.capabilities()
    }

    /// Control plane shared by all tenants
    #[must_use]
    pub fn control(&self) -> &Arc<ControlPlane> {
        &self.control
    }

    /// Process-wide cache for sessions and MFA challenges
    #[must_use]
    pub fn global_cache(&self) -> Arc<dyn CacheProvider> {
        self.caches.global()
    }

    /// Secret box for `*Enc` fields
    #[must_use]
    pub const fn secret_box(&self) -> &SecretBox {
        &self.secret_box
    }

    /// Resolve `key` (UUID or slug) into a data-access facade
    ///
    /// # Errors
    ///
    /// `TenantNotFound` when nothing matches; connection, migration and cache
    /// failures propagate.
    pub async fn for_tenant(&self, key: &str) -> AppResult<TenantDataAccess> {
        let tenant = self.control.resolve_tenant(key).await?;
        self.open_for(tenant).await
    }

    /// Facade for an already loaded tenant
    ///
    /// # Errors
    ///
    /// Same as [`DalFactory::for_tenant`] minus the lookup.
    pub async fn open_for(&self, tenant: Tenant) -> AppResult<TenantDataAccess> {
        let conn = match self.data_plane_config(&tenant)? {
            Some((pool_key, config)) => Some(self.pool.get_or_open(&pool_key, &config).await?),
            None => None,
        };
        let cache = self.caches.for_tenant(&tenant).await?;
        let capabilities = Capabilities::for_tenant(self.mode, conn.is_some());
        Ok(TenantDataAccess {
            tenant,
            conn,
            cache,
            capabilities,
        })
    }

    fn data_plane_config(&self, tenant: &Tenant) -> AppResult<Option<(String, AdapterConfig)>> {
        if tenant.has_user_db() {
            if let Some(db) = tenant.settings.user_db.as_ref() {
                let dsn = if db.dsn.is_empty() {
                    self.secret_box.open(&db.dsn_enc)?
                } else {
                    db.dsn.clone()
                };
                let mut config = adapter_config_for_dsn(&dsn, db.schema.clone(), db.manual_mode)?;
                if !db.driver.is_empty() && db.driver != config.driver {
                    warn!(
                        tenant = %tenant.slug,
                        declared = %db.driver,
                        detected = %config.driver,
                        "userDb driver does not match DSN, using the declared driver"
                    );
                    config.driver.clone_from(&db.driver);
                }
                return Ok(Some((tenant.slug.clone(), config)));
            }
        }
        Ok(self
            .default_tenant_db
            .clone()
            .map(|config| (DEFAULT_POOL_KEY.to_owned(), config)))
    }

    /// Owner of `client_id` across tenants
    ///
    /// # Errors
    ///
    /// Propagates control-plane failures.
    pub async fn find_client(&self, client_id: &str) -> AppResult<Option<(Tenant, OidcClient)>> {
        self.control.find_client(client_id).await
    }

    /// Drop the tenant's pooled connection and dedicated cache after a settings change
    pub async fn refresh_tenant(&self, slug: &str) -> bool {
        self.caches.invalidate(slug);
        let evicted = self.pool.evict(slug).await;
        debug!(tenant = slug, evicted, "refreshed tenant");
        evicted
    }

    /// Round-trip the control plane and the global database
    ///
    /// # Errors
    ///
    /// The first failing ping.
    pub async fn ping(&self) -> AppResult<()> {
        self.control.connection().ping().await?;
        if let Some(global) = &self.global_db {
            global.ping().await?;
        }
        Ok(())
    }

    /// Close every connection
    pub async fn close(&self) {
        self.pool.close_all().await;
        if let Some(global) = &self.global_db {
            global.close().await;
        }
        self.control.connection().close().await;
    }
}

/// Per-request view of one tenant
pub struct TenantDataAccess {
    tenant: Tenant,
    conn: Option<Arc<dyn Connection>>,
    cache: TenantCache,
    capabilities: Capabilities,
}

impl TenantDataAccess {
    /// Resolved tenant
    #[must_use]
    pub const fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    /// Tenant slug
    #[must_use]
    pub fn slug(&self) -> &str {
        &self.tenant.slug
    }

    /// Tenant cache
    #[must_use]
    pub const fn cache(&self) -> &TenantCache {
        &self.cache
    }

    /// Tenant capabilities
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Whether a data-plane connection was resolved
    #[must_use]
    pub const fn has_db(&self) -> bool {
        self.conn.is_some()
    }

    /// Pooled data-plane connection
    ///
    /// # Errors
    ///
    /// `NoDBForTenant` when the tenant has no database.
    pub fn connection(&self) -> AppResult<&Arc<dyn Connection>> {
        self.capabilities.require_data_plane()?;
        self.conn.as_ref().ok_or_else(AppError::no_db_for_tenant)
    }

    /// Fail early when the tenant has no data plane
    ///
    /// # Errors
    ///
    /// `NoDBForTenant`.
    pub fn require_db(&self) -> AppResult<()> {
        self.connection().map(|_| ())
    }

    /// Users and identities
    ///
    /// # Errors
    ///
    /// `NoDBForTenant` when absent.
    pub fn users(&self) -> AppResult<&dyn UserRepository> {
        self.connection()?.users().ok_or_else(AppError::no_db_for_tenant)
    }

    /// Refresh tokens
    ///
    /// # Errors
    ///
    /// `NoDBForTenant` when absent.
    pub fn refresh_tokens(&self) -> AppResult<&dyn RefreshTokenRepository> {
        self.connection()?
            .refresh_tokens()
            .ok_or_else(AppError::no_db_for_tenant)
    }

    /// MFA state
    ///
    /// # Errors
    ///
    /// `NoDBForTenant` when absent.
    pub fn mfa(&self) -> AppResult<&dyn MfaRepository> {
        self.connection()?.mfa().ok_or_else(AppError::no_db_for_tenant)
    }

    /// Consents
    ///
    /// # Errors
    ///
    /// `NoDBForTenant` when absent.
    pub fn consents(&self) -> AppResult<&dyn ConsentRepository> {
        self.connection()?.consents().ok_or_else(AppError::no_db_for_tenant)
    }

    /// Roles and permissions
    ///
    /// # Errors
    ///
    /// `NoDBForTenant` when absent.
    pub fn rbac(&self) -> AppResult<&dyn RbacRepository> {
        self.connection()?.rbac().ok_or_else(AppError::no_db_for_tenant)
    }

    /// Email tokens
    ///
    /// # Errors
    ///
    /// `NoDBForTenant` when absent.
    pub fn email_tokens(&self) -> AppResult<&dyn EmailTokenRepository> {
        self.connection()?
            .email_tokens()
            .ok_or_else(AppError::no_db_for_tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::cluster::NoopClusterHook;
    use crate::crypto::MasterKey;
    use crate::models::{TenantSettings, UserDbSettings};

    fn secret_box() -> SecretBox {
        SecretBox::new(&MasterKey::from_bytes([9; 32]))
    }

    async fn factory(dir: &tempfile::TempDir, default_dsn: Option<String>) -> DalFactory {
        DalFactory::open(
            DalOptions {
                fs_root: dir.path().join("fs"),
                global_db_dsn: None,
                default_tenant_db_dsn: default_dsn,
            },
            Arc::new(AdapterRegistry::with_builtin()),
            secret_box(),
            Arc::new(CacheProvisioner::new(Arc::new(InMemoryCache::new()), secret_box())),
            Arc::new(NoopClusterHook),
        )
        .await
        .unwrap()
    }

    fn sqlite_dsn(dir: &tempfile::TempDir, name: &str) -> String {
        format!("sqlite://{}?mode=rwc", dir.path().join(name).display())
    }

    #[tokio::test]
    async fn tenant_db_connection_is_pooled_until_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let dal = factory(&dir, None).await;
        assert_eq!(dal.mode(), OperationalMode::FsOnly);

        let settings = TenantSettings {
            user_db: Some(UserDbSettings {
                driver: "sqlite".to_owned(),
                dsn: sqlite_dsn(&dir, "acme.db"),
                ..UserDbSettings::default()
            }),
            ..TenantSettings::default()
        };
        let tenant = dal.control().create_tenant("acme", "Acme", settings).await.unwrap();
        assert!(tenant.settings.user_db.as_ref().unwrap().dsn.is_empty());

        let first = dal.for_tenant("acme").await.unwrap();
        let second = dal.for_tenant(&tenant.id.to_string()).await.unwrap();
        assert!(first.has_db());
        assert!(Arc::ptr_eq(first.connection().unwrap(), second.connection().unwrap()));
        assert!(first.users().is_ok());

        assert!(dal.refresh_tenant("acme").await);
        let third = dal.for_tenant("acme").await.unwrap();
        assert!(!Arc::ptr_eq(first.connection().unwrap(), third.connection().unwrap()));
        dal.close().await;
    }

    #[tokio::test]
    async fn tenant_without_db_reports_capability_error() {
        let dir = tempfile::tempdir().unwrap();
        let dal = factory(&dir, None).await;
        dal.control()
            .create_tenant("readonly", "Read Only", TenantSettings::default())
            .await
            .unwrap();

        let tda = dal.for_tenant("readonly").await.unwrap();
        assert!(!tda.has_db());
        let err = tda.users().err().unwrap();
        assert_eq!(err.http_status(), 503);
        assert_eq!(err.envelope().detail.as_deref(), Some(crate::errors::NO_DB_FOR_TENANT_DETAIL));
    }

    #[tokio::test]
    async fn default_dsn_serves_tenants_without_their_own_db() {
        let dir = tempfile::tempdir().unwrap();
        let dal = factory(&dir, Some(sqlite_dsn(&dir, "default.db"))).await;
        assert_eq!(dal.mode(), OperationalMode::FsTenantDb);
        dal.control().create_tenant("a", "A", TenantSettings::default()).await.unwrap();
        dal.control().create_tenant("b", "B", TenantSettings::default()).await.unwrap();

        let a = dal.for_tenant("a").await.unwrap();
        let b = dal.for_tenant("b").await.unwrap();
        assert!(Arc::ptr_eq(a.connection().unwrap(), b.connection().unwrap()));
        assert_ne!(a.cache().prefix(), b.cache().prefix());
    }

    #[tokio::test]
    async fn unknown_tenant_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let dal = factory(&dir, None).await;
        assert_eq!(dal.for_tenant("ghost").await.err().unwrap().http_status(), 404);
    }
}
