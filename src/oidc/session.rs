// ABOUTME: Browser sessions kept in the global cache under the hash of the cookie value
// ABOUTME: The raw cookie value never reaches the cache
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::cache::{get_json, set_json, CacheProvider};
use crate::constants::cache_keys;
use crate::crypto::hashing::{random_token, sha256_b64url};
use crate::errors::AppResult;
use crate::models::SessionPayload;

/// Session store over a cache
#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn CacheProvider>,
}

fn key_for(cookie_value: &str) -> String {
    format!("{}{}", cache_keys::SESSION, sha256_b64url(cookie_value))
}

impl SessionStore {
    /// Store writing to `cache`
    #[must_use]
    pub fn new(cache: Arc<dyn CacheProvider>) -> Self {
        Self { cache }
    }

    /// Start a session, returning the cookie value
    ///
    /// # Errors
    ///
    /// Cache failures.
    pub async fn create(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        amr: Vec<String>,
        lifetime_secs: i64,
    ) -> AppResult<String> {
        let value = random_token();
        let lifetime = lifetime_secs.max(1);
        let payload = SessionPayload {
            user_id,
            tenant_id,
            expires: Utc::now().timestamp() + lifetime,
            amr,
        };
        set_json(
            self.cache.as_ref(),
            &key_for(&value),
            &payload,
            Duration::from_secs(lifetime.unsigned_abs()),
        )
        .await?;
        debug!(%user_id, %tenant_id, "session created");
        Ok(value)
    }

    /// Live session for a cookie value
    ///
    /// # Errors
    ///
    /// Cache failures.
    pub async fn lookup(&self, cookie_value: &str) -> AppResult<Option<SessionPayload>> {
        let payload: Option<SessionPayload> =
            get_json(self.cache.as_ref(), &key_for(cookie_value)).await?;
        Ok(payload.filter(|p| p.expires > Utc::now().timestamp()))
    }

    /// End a session
    ///
    /// # Errors
    ///
    /// Cache failures.
    pub async fn destroy(&self, cookie_value: &str) -> AppResult<bool> {
        self.cache.delete(&key_for(cookie_value)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;

    #[tokio::test]
    async fn stored_under_hashed_key() {
        let cache: Arc<dyn CacheProvider> = Arc::new(InMemoryCache::new());
        let store = SessionStore::new(cache.clone());
        let user = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let cookie = store.create(user, tenant, vec!["pwd".to_owned()], 60).await.unwrap();

        assert!(cache.get(&format!("sid:{cookie}")).await.unwrap().is_none());
        let hashed = format!("sid:{}", sha256_b64url(&cookie));
        assert!(cache.get(&hashed).await.unwrap().is_some());

        let session = store.lookup(&cookie).await.unwrap().unwrap();
        assert_eq!(session.user_id, user);
        assert_eq!(session.tenant_id, tenant);

        assert!(store.destroy(&cookie).await.unwrap());
        assert!(store.lookup(&cookie).await.unwrap().is_none());
    }
}
