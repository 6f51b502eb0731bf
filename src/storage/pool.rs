// ABOUTME: Per-tenant data-plane connection cache keyed by slug
// ABOUTME: Opens are lazy and serialized per slug so concurrent first requests share one connection
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::errors::DatabaseResult;
use super::registry::{AdapterConfig, AdapterRegistry};
use super::repositories::Connection;
use crate::errors::AppResult;

/// Called once after a tenant connection opens and before it is shared
#[async_trait]
pub trait TenantConnectHook: Send + Sync {
    /// Prepare the connection; an error discards it
    async fn on_tenant_connect(
        &self,
        slug: &str,
        config: &AdapterConfig,
        connection: &dyn Connection,
    ) -> DatabaseResult<()>;
}

/// Slug-keyed connection cache
pub struct ConnectionPool {
    registry: Arc<AdapterRegistry>,
    connections: RwLock<HashMap<String, Arc<dyn Connection>>>,
    open_locks: DashMap<String, Arc<Mutex<()>>>,
    hook: Option<Arc<dyn TenantConnectHook>>,
}

impl ConnectionPool {
    /// Empty pool opening connections through `registry`
    #[must_use]
    pub fn new(registry: Arc<AdapterRegistry>, hook: Option<Arc<dyn TenantConnectHook>>) -> Self {
        Self {
            registry,
            connections: RwLock::new(HashMap::new()),
            open_locks: DashMap::new(),
            hook,
        }
    }

    /// Cached connection for `slug`, if open
    pub async fn get(&self, slug: &str) -> Option<Arc<dyn Connection>> {
        self.connections.read().await.get(slug).cloned()
    }

    /// Cached connection for `slug`, opening it with `config` on first use
    ///
    /// # Errors
    ///
    /// Fails when the adapter is unknown, the connection cannot be opened, or
    /// the connect hook rejects it. Failed opens are not cached.
    pub async fn get_or_open(&self, slug: &str, config: &AdapterConfig) -> AppResult<Arc<dyn Connection>> {
        if let Some(conn) = self.get(slug).await {
            return Ok(conn);
        }

        let lock = self.open_locks.entry(slug.to_owned()).or_default().clone();
        let _guard = lock.lock().await;

        // Another request may have finished the open while we waited
        if let Some(conn) = self.get(slug).await {
            return Ok(conn);
        }

        let adapter = self.registry.get(&config.driver)?;
        let conn = adapter.connect(config).await?;
        if let Some(hook) = &self.hook {
            if let Err(e) = hook.on_tenant_connect(slug, config, conn.as_ref()).await {
                warn!(tenant = slug, driver = %config.driver, error = %e, "tenant connect hook failed");
                conn.close().await;
                return Err(e.into());
            }
        }

        info!(tenant = slug, driver = %config.driver, "opened tenant connection");
        self.connections
            .write()
            .await
            .insert(slug.to_owned(), conn.clone());
        Ok(conn)
    }

    /// Close and forget the connection for `slug`; `true` if one was open
    pub async fn evict(&self, slug: &str) -> bool {
        let removed = self.connections.write().await.remove(slug);
        self.open_locks.remove(slug);
        match removed {
            Some(conn) => {
                debug!(tenant = slug, "evicting tenant connection");
                conn.close().await;
                true
            }
            None => false,
        }
    }

    /// Number of open tenant connections
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether no tenant connection is open
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Close every connection
    pub async fn close_all(&self) {
        let drained: Vec<(String, Arc<dyn Connection>)> =
            self.connections.write().await.drain().collect();
        self.open_locks.clear();
        for (slug, conn) in drained {
            debug!(tenant = %slug, "closing tenant connection");
            conn.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::storage::errors::DatabaseError;

    struct CountingHook {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TenantConnectHook for CountingHook {
        async fn on_tenant_connect(
            &self,
            _slug: &str,
            _config: &AdapterConfig,
            _connection: &dyn Connection,
        ) -> DatabaseResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(DatabaseError::MigrationError("boom".to_owned()))
            } else {
                Ok(())
            }
        }
    }

    fn sqlite_config(dir: &tempfile::TempDir) -> AdapterConfig {
        AdapterConfig {
            driver: "sqlite".to_owned(),
            dsn: format!("sqlite://{}?mode=rwc", dir.path().join("p.db").display()),
            ..AdapterConfig::default()
        }
    }

    #[tokio::test]
    async fn concurrent_first_use_opens_once() {
        let dir = tempfile::tempdir().unwrap();
        let hook = Arc::new(CountingHook {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let pool = Arc::new(ConnectionPool::new(
            Arc::new(AdapterRegistry::with_builtin()),
            Some(hook.clone()),
        ));
        let config = sqlite_config(&dir);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let config = config.clone();
                tokio::spawn(async move { pool.get_or_open("acme", &config).await.unwrap() })
            })
            .collect();
        let mut conns = Vec::new();
        for handle in handles {
            conns.push(handle.await.unwrap());
        }

        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
        assert!(conns.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(pool.len().await, 1);

        assert!(pool.evict("acme").await);
        assert!(!pool.evict("acme").await);
        let reopened = pool.get_or_open("acme", &config).await.unwrap();
        assert!(!Arc::ptr_eq(&reopened, &conns[0]));
        assert_eq!(hook.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_hook_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::new(
            Arc::new(AdapterRegistry::with_builtin()),
            Some(Arc::new(CountingHook {
                calls: AtomicUsize::new(0),
                fail: true,
            })),
        );
        assert!(pool.get_or_open("acme", &sqlite_config(&dir)).await.is_err());
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_driver_fails() {
        let pool = ConnectionPool::new(Arc::new(AdapterRegistry::with_builtin()), None);
        let config = AdapterConfig {
            driver: "mysql".to_owned(),
            dsn: "mysql://x".to_owned(),
            ..AdapterConfig::default()
        };
        assert!(pool.get_or_open("acme", &config).await.is_err());
    }
}
