// ABOUTME: Resolves the cache a tenant uses: its dedicated backend or a prefixed view of the default
// ABOUTME: Dedicated backends are opened once per slug and dropped on settings refresh
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use super::{CacheProvider, InMemoryCache, RedisCache, TenantCache};
use crate::crypto::SecretBox;
use crate::errors::{AppError, AppResult};
use crate::models::{CacheSettings, Tenant};

/// Per-tenant cache provisioning
pub struct CacheProvisioner {
    default: Arc<dyn CacheProvider>,
    dedicated: DashMap<String, Arc<dyn CacheProvider>>,
    secret_box: SecretBox,
}

impl CacheProvisioner {
    /// Provisioner falling back to `default`
    #[must_use]
    pub fn new(default: Arc<dyn CacheProvider>, secret_box: SecretBox) -> Self {
        Self {
            default,
            dedicated: DashMap::new(),
            secret_box,
        }
    }

    /// Process-wide cache, not tenant-prefixed
    #[must_use]
    pub fn global(&self) -> Arc<dyn CacheProvider> {
        self.default.clone()
    }

    /// Cache for a tenant
    ///
    /// # Errors
    ///
    /// Fails when the tenant's cache settings name an unknown driver, its
    /// password cannot be decrypted, or the backend is unreachable.
    pub async fn for_tenant(&self, tenant: &Tenant) -> AppResult<TenantCache> {
        let default_prefix = format!("t:{}:", tenant.slug);
        let Some(settings) = tenant.settings.cache.as_ref().filter(|c| c.enabled) else {
            return Ok(TenantCache::new(self.default.clone(), default_prefix));
        };
        let prefix = if settings.prefix.is_empty() {
            default_prefix
        } else {
            settings.prefix.clone()
        };

        if let Some(existing) = self.dedicated.get(&tenant.slug) {
            return Ok(TenantCache::new(existing.clone(), prefix));
        }
        let backend = self.open(&tenant.slug, settings).await?;
        let backend = self
            .dedicated
            .entry(tenant.slug.clone())
            .or_insert(backend)
            .clone();
        Ok(TenantCache::new(backend, prefix))
    }

    async fn open(&self, slug: &str, settings: &CacheSettings) -> AppResult<Arc<dyn CacheProvider>> {
        match settings.driver.as_str() {
            "" | "memory" => {
                info!(tenant = slug, "provisioned dedicated in-memory cache");
                Ok(Arc::new(InMemoryCache::new()))
            }
            "redis" => {
                let password = self.secret_box.open_optional(&settings.password_enc)?;
                let url = RedisCache::url(&settings.host, settings.port, password.as_deref(), settings.db);
                let cache = RedisCache::connect(&url).await?;
                info!(tenant = slug, "provisioned dedicated redis cache");
                Ok(Arc::new(cache))
            }
            other => Err(AppError::config(format!(
                "tenant {slug}: unknown cache driver '{other}'"
            ))),
        }
    }

    /// Forget a tenant's dedicated backend
    pub fn invalidate(&self, slug: &str) {
        self.dedicated.remove(slug);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::crypto::MasterKey;

    fn provisioner() -> CacheProvisioner {
        CacheProvisioner::new(
            Arc::new(InMemoryCache::new()),
            SecretBox::new(&MasterKey::from_bytes([7; 32])),
        )
    }

    #[tokio::test]
    async fn default_view_is_prefixed_by_slug() {
        let provisioner = provisioner();
        let cache = provisioner.for_tenant(&Tenant::new("acme", "Acme")).await.unwrap();
        assert_eq!(cache.prefix(), "t:acme:");
        cache.set("k", "v", Duration::from_secs(5)).await.unwrap();
        assert!(provisioner.global().get("t:acme:k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dedicated_memory_backend_is_reused_until_invalidated() {
        let provisioner = provisioner();
        let mut tenant = Tenant::new("iso", "Isolated");
        tenant.settings.cache = Some(CacheSettings {
            enabled: true,
            driver: "memory".to_owned(),
            prefix: "iso:".to_owned(),
            ..CacheSettings::default()
        });

        let first = provisioner.for_tenant(&tenant).await.unwrap();
        first.set("k", "v", Duration::from_secs(5)).await.unwrap();
        let second = provisioner.for_tenant(&tenant).await.unwrap();
        assert_eq!(second.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(provisioner.global().get("iso:k").await.unwrap().is_none());

        provisioner.invalidate("iso");
        let third = provisioner.for_tenant(&tenant).await.unwrap();
        assert!(third.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_driver_is_config_error() {
        let provisioner = provisioner();
        let mut tenant = Tenant::new("bad", "Bad");
        tenant.settings.cache = Some(CacheSettings {
            enabled: true,
            driver: "memcached".to_owned(),
            ..CacheSettings::default()
        });
        assert!(provisioner.for_tenant(&tenant).await.is_err());
    }
}
