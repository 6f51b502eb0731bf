// ABOUTME: JWK/JWKS wire types for Ed25519 keys and the short-TTL serialized JWKS memo
// ABOUTME: Cache entries are replaced wholesale so readers never wait on a refresh
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AppResult;
use crate::models::KeyStatus;

/// One published Ed25519 public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Always `OKP`
    pub kty: String,
    /// Always `Ed25519`
    pub crv: String,
    /// Key id
    pub kid: String,
    /// Always `EdDSA`
    pub alg: String,
    /// Always `sig`
    #[serde(rename = "use")]
    pub use_: String,
    /// Base64url public key
    pub x: String,
    /// Lifecycle status
    pub status: KeyStatus,
}

/// Key set document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    /// Keys, active first
    pub keys: Vec<Jwk>,
}

struct Entry {
    body: Arc<str>,
    loaded_at: Instant,
}

/// Memoized JWKS bodies keyed by owner storage name
pub struct JwksCache {
    ttl: Duration,
    entries: DashMap<String, Arc<Entry>>,
}

impl JwksCache {
    /// Cache keeping bodies for `ttl`
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Cached body for `key`, loading it when absent or stale
    ///
    /// # Errors
    ///
    /// Propagates loader failures; nothing is cached on failure.
    pub async fn get_or_load<F, Fut>(&self, key: &str, load: F) -> AppResult<Arc<str>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = AppResult<Jwks>> + Send,
    {
        if let Some(entry) = self.entries.get(key).map(|e| Arc::clone(e.value())) {
            if entry.loaded_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&entry.body));
            }
        }
        let jwks = load().await?;
        let body: Arc<str> = Arc::from(serde_json::to_string(&jwks)?);
        debug!(owner = key, keys = jwks.keys.len(), "refreshed jwks cache");
        self.entries.insert(
            key.to_owned(),
            Arc::new(Entry {
                body: Arc::clone(&body),
                loaded_at: Instant::now(),
            }),
        );
        Ok(body)
    }

    /// Drop the memo for `key`
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn sample(kid: &str) -> Jwks {
        Jwks {
            keys: vec![Jwk {
                kty: "OKP".to_owned(),
                crv: "Ed25519".to_owned(),
                kid: kid.to_owned(),
                alg: "EdDSA".to_owned(),
                use_: "sig".to_owned(),
                x: "AAAA".to_owned(),
                status: KeyStatus::Active,
            }],
        }
    }

    #[tokio::test]
    async fn bytes_are_stable_within_ttl() {
        let cache = JwksCache::new(Duration::from_secs(60));
        let loads = AtomicUsize::new(0);
        let first = cache
            .get_or_load("acme", || async {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(sample("k1"))
            })
            .await
            .unwrap();
        let second = cache
            .get_or_load("acme", || async {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(sample("k2"))
            })
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(first.contains("\"use\":\"sig\""));

        cache.invalidate("acme");
        let third = cache.get_or_load("acme", || async { Ok(sample("k2")) }).await.unwrap();
        assert!(third.contains("k2"));
    }

    #[tokio::test]
    async fn zero_ttl_always_reloads() {
        let cache = JwksCache::new(Duration::ZERO);
        cache.get_or_load("g", || async { Ok(sample("k1")) }).await.unwrap();
        let body = cache.get_or_load("g", || async { Ok(sample("k2")) }).await.unwrap();
        assert!(body.contains("k2"));
    }
}
