// ABOUTME: Readiness checks over the control plane, default cache, keystore and cluster role
// ABOUTME: A failing critical component turns the overall status unhealthy
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! Health check probes

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::warn;

use crate::cluster::ClusterRole;
use crate::errors::AppResult;
use crate::keys::Keystore;
use crate::models::KeyOwner;
use crate::storage::DalFactory;

/// Overall or per-component status
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Operational
    Healthy,
    /// Non-critical component failing
    Degraded,
    /// Critical component failing
    Unhealthy,
}

/// One probe result
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    /// Probe result
    pub status: HealthStatus,
    /// Detail
    pub message: String,
    /// Probe duration
    pub duration_ms: u64,
}

/// Cluster section
#[derive(Debug, Clone, Serialize)]
pub struct ClusterHealth {
    /// A cluster hook is configured
    pub enabled: bool,
    /// Current role
    pub role: ClusterRole,
}

/// Build identity
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    /// Version string
    pub version: String,
    /// Commit hash
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Seconds since start
    pub uptime_seconds: u64,
}

/// `/readyz` body
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    /// Overall status
    pub status: HealthStatus,
    /// Probes by name
    pub components: BTreeMap<&'static str, ComponentHealth>,
    /// Cluster state
    pub cluster: ClusterHealth,
    /// Build identity
    pub service: ServiceInfo,
}

impl ReadinessReport {
    /// Ready to serve traffic
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

/// Readiness prober
pub struct HealthChecker {
    start_time: Instant,
    dal: Arc<DalFactory>,
    keystore: Arc<Keystore>,
    version: String,
    commit: Option<String>,
}

async fn probe<F>(critical: bool, name: &'static str, check: F) -> ComponentHealth
where
    F: Future<Output = AppResult<String>> + Send,
{
    let start = Instant::now();
    let result = check.await;
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    match result {
        Ok(message) => ComponentHealth {
            status: HealthStatus::Healthy,
            message,
            duration_ms,
        },
        Err(e) => {
            warn!(component = name, error = %e, "readiness probe failed");
            ComponentHealth {
                status: if critical {
                    HealthStatus::Unhealthy
                } else {
                    HealthStatus::Degraded
                },
                message: e.message,
                duration_ms,
            }
        }
    }
}

impl HealthChecker {
    /// Checker over the running DAL and keystore
    #[must_use]
    pub fn new(dal: Arc<DalFactory>, keystore: Arc<Keystore>, version: &str, commit: Option<String>) -> Self {
        Self {
            start_time: Instant::now(),
            dal,
            keystore,
            version: version.to_owned(),
            commit,
        }
    }

    /// Run every probe
    pub async fn readiness(&self) -> ReadinessReport {
        let mut components = BTreeMap::new();
        components.insert(
            "control_plane",
            probe(true, "control_plane", async {
                self.dal.ping().await?;
                Ok(format!("{} tenants", self.dal.control().list_tenants().await?.len()))
            })
            .await,
        );
        let cache = self.dal.global_cache();
        components.insert(
            "cache",
            probe(true, "cache", async {
                cache.ping().await?;
                Ok(cache.backend().to_owned())
            })
            .await,
        );
        components.insert(
            "keystore",
            probe(true, "keystore", async {
                let kid = self.keystore.active_kid(&KeyOwner::Global).await?;
                Ok(format!("active kid {kid}"))
            })
            .await,
        );
        components.insert(
            "mode",
            ComponentHealth {
                status: HealthStatus::Healthy,
                message: self.dal.mode().to_string(),
                duration_ms: 0,
            },
        );

        let status = if components.values().any(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if components.values().any(|c| c.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        let hook = self.dal.control().cluster();
        ReadinessReport {
            status,
            components,
            cluster: ClusterHealth {
                enabled: hook.is_enabled(),
                role: hook.role(),
            },
            service: ServiceInfo {
                version: self.version.clone(),
                commit: self.commit.clone(),
                uptime_seconds: self.start_time.elapsed().as_secs(),
            },
        }
    }
}
