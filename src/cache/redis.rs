// ABOUTME: Redis cache backend over a multiplexed auto-reconnecting connection manager
// ABOUTME: One-shot reads use GETDEL so concurrent consumers cannot both win
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{info, warn};

use super::CacheProvider;
use crate::errors::{AppError, AppResult};
use crate::storage::registry::redact_dsn;

/// Redis-backed cache
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

fn cache_error(op: &'static str, err: &redis::RedisError) -> AppError {
    warn!(op, error = %err, "redis command failed");
    AppError::unavailable("cache unavailable")
}

impl RedisCache {
    /// Connect to `redis://…`
    ///
    /// # Errors
    ///
    /// Returns a config error for a malformed URL and an unavailable error
    /// when the server cannot be reached.
    pub async fn connect(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| AppError::config(format!("invalid cache URL: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| cache_error("connect", &e))?;
        info!(url = %redact_dsn(url), "connected redis cache");
        Ok(Self { manager })
    }

    /// Build a `redis://` URL from parts
    #[must_use]
    pub fn url(host: &str, port: u16, password: Option<&str>, db: u32) -> String {
        let port = if port == 0 { 6379 } else { port };
        match password.filter(|p| !p.is_empty()) {
            Some(password) => format!(
                "redis://:{}@{host}:{port}/{db}",
                urlencoding::encode(password)
            ),
            None => format!("redis://{host}:{port}/{db}"),
        }
    }
}

#[async_trait]
impl CacheProvider for RedisCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(|e| cache_error("get", &e))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds)
            .await
            .map_err(|e| cache_error("set", &e))
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn.del(key).await.map_err(|e| cache_error("del", &e))?;
        Ok(removed > 0)
    }

    async fn take(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("GETDEL")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(|e| cache_error("getdel", &e))
    }

    async fn ping(&self) -> AppResult<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| cache_error("ping", &e))
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_encodes_password() {
        assert_eq!(RedisCache::url("cache", 0, None, 2), "redis://cache:6379/2");
        assert_eq!(
            RedisCache::url("cache", 6380, Some("p@ss/w"), 0),
            "redis://:p%40ss%2Fw@cache:6380/0"
        );
    }
}
