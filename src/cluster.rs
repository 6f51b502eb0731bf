// ABOUTME: Cluster hook gating control-plane writes and key rotation behind leadership
// ABOUTME: Single-node deployments use the no-op hook; replicated ones plug in their own
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! Cluster hook
//!
//! Every control-plane mutation is described by a [`ClusterMutation`] and
//! handed to [`ClusterHook::apply`] before the local write. A hook either
//! accepts the change or fails with `NotLeader`, which callers surface as-is.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::errors::{AppError, AppResult};

/// Control-plane change submitted to the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClusterMutation {
    /// New tenant
    CreateTenant {
        /// Tenant slug
        slug: String,
    },
    /// Settings replaced
    UpdateTenantSettings {
        /// Tenant slug
        slug: String,
    },
    /// Tenant removed
    DeleteTenant {
        /// Tenant slug
        slug: String,
    },
    /// Client created or replaced
    UpsertClient {
        /// Tenant slug
        slug: String,
        /// Client id
        client_id: String,
    },
    /// Client removed
    DeleteClient {
        /// Tenant slug
        slug: String,
        /// Client id
        client_id: String,
    },
    /// Scope created or replaced
    UpsertScope {
        /// Tenant slug
        slug: String,
        /// Scope name
        name: String,
    },
    /// Scope removed
    DeleteScope {
        /// Tenant slug
        slug: String,
        /// Scope name
        name: String,
    },
    /// Signing key rotation
    RotateKeys {
        /// Key owner storage name
        owner: String,
    },
    /// Admin account written
    SaveAdmin {
        /// Admin email
        email: String,
    },
}

/// Node role reported by readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterRole {
    /// No cluster configured
    Standalone,
    /// Accepts writes
    Leader,
    /// Rejects writes
    Follower,
}

impl fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Standalone => "standalone",
            Self::Leader => "leader",
            Self::Follower => "follower",
        })
    }
}

/// Write gate
#[async_trait]
pub trait ClusterHook: Send + Sync {
    /// Accept the mutation or fail with `NotLeader`
    async fn apply(&self, mutation: &ClusterMutation) -> AppResult<()>;

    /// Whether a cluster is configured
    fn is_enabled(&self) -> bool;

    /// Current role
    fn role(&self) -> ClusterRole;
}

/// Single-node hook accepting everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopClusterHook;

#[async_trait]
impl ClusterHook for NoopClusterHook {
    async fn apply(&self, _mutation: &ClusterMutation) -> AppResult<()> {
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn role(&self) -> ClusterRole {
        ClusterRole::Standalone
    }
}

/// Hook whose leadership is set externally
#[derive(Debug, Default)]
pub struct StaticClusterHook {
    leader: AtomicBool,
}

impl StaticClusterHook {
    /// Hook starting with the given role
    #[must_use]
    pub const fn new(leader: bool) -> Self {
        Self {
            leader: AtomicBool::new(leader),
        }
    }

    /// Change role
    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::Release);
    }
}

#[async_trait]
impl ClusterHook for StaticClusterHook {
    async fn apply(&self, mutation: &ClusterMutation) -> AppResult<()> {
        if self.leader.load(Ordering::Acquire) {
            debug!(?mutation, "applied cluster mutation");
            Ok(())
        } else {
            Err(AppError::not_leader())
        }
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn role(&self) -> ClusterRole {
        if self.leader.load(Ordering::Acquire) {
            ClusterRole::Leader
        } else {
            ClusterRole::Follower
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn follower_rejects_with_not_leader() {
        let hook = StaticClusterHook::new(false);
        let mutation = ClusterMutation::RotateKeys {
            owner: "acme".to_owned(),
        };
        let err = hook.apply(&mutation).await.unwrap_err();
        assert_eq!(err.http_status(), 503);
        assert_eq!(hook.role(), ClusterRole::Follower);

        hook.set_leader(true);
        assert!(hook.apply(&mutation).await.is_ok());
        assert_eq!(hook.role(), ClusterRole::Leader);
    }

    #[tokio::test]
    async fn noop_accepts() {
        let hook = NoopClusterHook;
        assert!(hook
            .apply(&ClusterMutation::DeleteTenant {
                slug: "x".to_owned()
            })
            .await
            .is_ok());
        assert!(!hook.is_enabled());
    }
}
