// ABOUTME: Key-value cache abstraction holding short-lived protocol state
// ABOUTME: In-memory and Redis backends plus a per-tenant provisioner with key prefixing
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! Protocol cache
//!
//! Authorization codes, MFA challenges and browser sessions are state-machine
//! nodes with a TTL. Any backend offering `set` with expiry and an atomic
//! `take` (get-and-delete) can hold them.

/// In-memory backend
pub mod memory;
/// Per-tenant cache provisioning
pub mod provisioner;
/// Redis backend
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::AppResult;

pub use memory::InMemoryCache;
pub use provisioner::CacheProvisioner;
pub use self::redis::RedisCache;

/// Cache backend
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Value for `key` if present and unexpired
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Store with a TTL
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()>;

    /// Remove; `true` when something was removed
    async fn delete(&self, key: &str) -> AppResult<bool>;

    /// Atomically read and remove
    async fn take(&self, key: &str) -> AppResult<Option<String>>;

    /// Backend health
    async fn ping(&self) -> AppResult<()>;

    /// Backend name for readiness reports
    fn backend(&self) -> &'static str;
}

/// Serialize and store
///
/// # Errors
///
/// Propagates serialization and backend errors.
pub async fn set_json<T: Serialize + Sync>(
    cache: &dyn CacheProvider,
    key: &str,
    value: &T,
    ttl: Duration,
) -> AppResult<()> {
    let raw = serde_json::to_string(value)?;
    cache.set(key, &raw, ttl).await
}

/// Load and deserialize
///
/// # Errors
///
/// Propagates backend errors and malformed payloads.
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn CacheProvider,
    key: &str,
) -> AppResult<Option<T>> {
    match cache.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Take and deserialize
///
/// # Errors
///
/// Propagates backend errors and malformed payloads.
pub async fn take_json<T: DeserializeOwned>(
    cache: &dyn CacheProvider,
    key: &str,
) -> AppResult<Option<T>> {
    match cache.take(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// A cache view whose keys are prefixed for one tenant
#[derive(Clone)]
pub struct TenantCache {
    inner: Arc<dyn CacheProvider>,
    prefix: String,
}

impl TenantCache {
    /// Wrap a backend with a key prefix
    #[must_use]
    pub fn new(inner: Arc<dyn CacheProvider>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    /// Key prefix
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

#[async_trait]
impl CacheProvider for TenantCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.inner.get(&self.key(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        self.inner.set(&self.key(key), value, ttl).await
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        self.inner.delete(&self.key(key)).await
    }

    async fn take(&self, key: &str) -> AppResult<Option<String>> {
        self.inner.take(&self.key(key)).await
    }

    async fn ping(&self) -> AppResult<()> {
        self.inner.ping().await
    }

    fn backend(&self) -> &'static str {
        self.inner.backend()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        user: String,
    }

    #[tokio::test]
    async fn tenant_views_do_not_collide() {
        let shared: Arc<dyn CacheProvider> = Arc::new(InMemoryCache::new());
        let acme = TenantCache::new(shared.clone(), "t:acme:");
        let other = TenantCache::new(shared.clone(), "t:other:");

        acme.set("code:x", "1", Duration::from_secs(60)).await.unwrap();
        assert_eq!(acme.get("code:x").await.unwrap().as_deref(), Some("1"));
        assert!(other.get("code:x").await.unwrap().is_none());
        assert_eq!(shared.get("t:acme:code:x").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn json_take_is_one_shot() {
        let cache = InMemoryCache::new();
        let payload = Payload {
            user: "u1".to_owned(),
        };
        set_json(&cache, "k", &payload, Duration::from_secs(60)).await.unwrap();
        assert_eq!(get_json::<Payload>(&cache, "k").await.unwrap(), Some(payload));
        assert!(take_json::<Payload>(&cache, "k").await.unwrap().is_some());
        assert!(take_json::<Payload>(&cache, "k").await.unwrap().is_none());
    }
}
