// ABOUTME: Adapter trait and the write-once registry populated by the composition root
// ABOUTME: Registration after seal() is refused; lookups are lock-free after sealing in practice
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use super::errors::DatabaseResult;
use super::fs::FsAdapter;
use super::repositories::Connection;
use super::sql::SqlAdapter;
use crate::errors::{AppError, AppResult};

/// Connection parameters handed to an adapter
#[derive(Clone, Default)]
pub struct AdapterConfig {
    /// Adapter name
    pub driver: String,
    /// DSN for SQL adapters
    pub dsn: String,
    /// Root directory for the filesystem adapter
    pub fs_root: Option<PathBuf>,
    /// Postgres schema
    pub schema: Option<String>,
    /// Pool size for SQL adapters
    pub max_connections: u32,
    /// Schema is operator-managed; migrations are not run on connect
    pub manual_mode: bool,
}

impl fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("driver", &self.driver)
            .field("dsn", &redact_dsn(&self.dsn))
            .field("fs_root", &self.fs_root)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Replace the password part of a DSN for logging
#[must_use]
pub fn redact_dsn(dsn: &str) -> String {
    url::Url::parse(dsn).map_or_else(
        |_| dsn.split('?').next().unwrap_or_default().to_owned(),
        |mut url| {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        },
    )
}

/// Storage driver
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Registry name
    fn name(&self) -> &'static str;

    /// Validate the configuration and open a ready connection
    async fn connect(&self, config: &AdapterConfig) -> DatabaseResult<Arc<dyn Connection>>;
}

/// Named adapters
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn Adapter>>>,
    sealed: AtomicBool,
}

impl AdapterRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `fs`, `sqlite` and `postgres`, already sealed
    #[must_use]
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        let builtins: [Arc<dyn Adapter>; 3] = [
            Arc::new(FsAdapter),
            Arc::new(SqlAdapter::sqlite()),
            Arc::new(SqlAdapter::postgres()),
        ];
        for adapter in builtins {
            // Fresh registry: neither sealed nor holding duplicates
            let _ = registry.register(adapter);
        }
        registry.seal();
        registry
    }

    /// Add an adapter under its name
    ///
    /// # Errors
    ///
    /// Fails once the registry is sealed or when the name is taken.
    pub fn register(&self, adapter: Arc<dyn Adapter>) -> AppResult<()> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(AppError::internal(format!(
                "adapter registry is sealed, cannot register '{}'",
                adapter.name()
            )));
        }
        let mut adapters = self
            .adapters
            .write()
            .map_err(|_| AppError::internal("adapter registry lock poisoned"))?;
        let name = adapter.name();
        if adapters.contains_key(name) {
            return Err(AppError::conflict(format!("adapter '{name}' already registered")));
        }
        debug!(adapter = name, "registered storage adapter");
        adapters.insert(name.to_owned(), adapter);
        Ok(())
    }

    /// Refuse further registrations
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Whether registration is closed
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Adapter by name
    ///
    /// # Errors
    ///
    /// Returns a config error for unknown names.
    pub fn get(&self, name: &str) -> AppResult<Arc<dyn Adapter>> {
        self.adapters
            .read()
            .map_err(|_| AppError::internal("adapter registry lock poisoned"))?
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::config(format!("no storage adapter named '{name}'")))
    }

    /// Registered names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .adapters
            .read()
            .map(|a| a.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_is_sealed() {
        let registry = AdapterRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["fs", "postgres", "sqlite"]);
        assert!(registry.is_sealed());
        assert!(registry.register(Arc::new(FsAdapter)).is_err());
        assert!(registry.get("mysql").is_err());
    }

    #[test]
    fn duplicate_names_rejected() {
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(FsAdapter)).unwrap();
        assert!(registry.register(Arc::new(FsAdapter)).is_err());
    }

    #[test]
    fn dsn_redaction() {
        assert_eq!(
            redact_dsn("postgres://app:s3cret@db:5432/acme"),
            "postgres://app:***@db:5432/acme"
        );
        assert!(!redact_dsn("sqlite::memory:").contains("secret"));
    }
}
