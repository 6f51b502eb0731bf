// ABOUTME: Operational mode detection and the capability set consulted before data access
// ABOUTME: Four modes from (global db, default tenant db); tenants may add their own database
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::fmt;

use bitflags::bitflags;
use serde::Serialize;

use crate::errors::{AppError, AppResult};

/// Deployment mode chosen at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationalMode {
    /// Filesystem control plane only
    FsOnly,
    /// Filesystem plus a global database used for config backup
    FsGlobalDb,
    /// Filesystem plus a default tenant database
    FsTenantDb,
    /// Both databases
    Full,
}

bitflags! {
    /// What a deployment or a single tenant can do
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// Tenants, clients, scopes and keys
        const CONTROL_PLANE = 0b0000_0001;
        /// A global database is connected
        const GLOBAL_DB = 0b0000_0010;
        /// A default tenant database DSN is configured
        const DEFAULT_TENANT_DB = 0b0000_0100;
        /// Users, tokens, MFA, consents, RBAC
        const DATA_PLANE = 0b0000_1000;
        /// Control-plane documents can be mirrored to the global database
        const CONFIG_BACKUP = 0b0001_0000;
    }
}

impl OperationalMode {
    /// Pick the mode from what is configured
    #[must_use]
    pub const fn detect(has_global_db: bool, has_default_tenant_db: bool) -> Self {
        match (has_global_db, has_default_tenant_db) {
            (false, false) => Self::FsOnly,
            (true, false) => Self::FsGlobalDb,
            (false, true) => Self::FsTenantDb,
            (true, true) => Self::Full,
        }
    }

    /// Deployment-wide capabilities
    ///
    /// `DATA_PLANE` is only granted globally when a default tenant database
    /// exists; per-tenant databases add it in [`Capabilities::for_tenant`].
    #[must_use]
    pub const fn capabilities(self) -> Capabilities {
        match self {
            Self::FsOnly => Capabilities::CONTROL_PLANE,
            Self::FsGlobalDb => Capabilities::CONTROL_PLANE
                .union(Capabilities::GLOBAL_DB)
                .union(Capabilities::CONFIG_BACKUP),
            Self::FsTenantDb => Capabilities::CONTROL_PLANE
                .union(Capabilities::DEFAULT_TENANT_DB)
                .union(Capabilities::DATA_PLANE),
            Self::Full => Capabilities::all(),
        }
    }
}

impl fmt::Display for OperationalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FsOnly => "fs_only",
            Self::FsGlobalDb => "fs_global_db",
            Self::FsTenantDb => "fs_tenant_db",
            Self::Full => "full",
        })
    }
}

impl Capabilities {
    /// Capabilities of one tenant given whether it resolved a data-plane connection
    #[must_use]
    pub fn for_tenant(mode: OperationalMode, has_db: bool) -> Self {
        let mut caps = mode.capabilities();
        caps.set(Self::DATA_PLANE, has_db);
        caps
    }

    /// Fail with the capability error when `DATA_PLANE` is missing
    ///
    /// # Errors
    ///
    /// Returns the 503 `NoDBForTenant` error.
    pub fn require_data_plane(self) -> AppResult<()> {
        if self.contains(Self::DATA_PLANE) {
            Ok(())
        } else {
            Err(AppError::no_db_for_tenant())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_table() {
        assert_eq!(OperationalMode::detect(false, false), OperationalMode::FsOnly);
        assert_eq!(OperationalMode::detect(true, false), OperationalMode::FsGlobalDb);
        assert_eq!(OperationalMode::detect(false, true), OperationalMode::FsTenantDb);
        assert_eq!(OperationalMode::detect(true, true), OperationalMode::Full);
    }

    #[test]
    fn data_plane_gating() {
        assert!(!OperationalMode::FsOnly
            .capabilities()
            .contains(Capabilities::DATA_PLANE));
        assert!(!OperationalMode::FsGlobalDb
            .capabilities()
            .contains(Capabilities::DATA_PLANE));
        assert!(OperationalMode::FsGlobalDb
            .capabilities()
            .contains(Capabilities::CONFIG_BACKUP));
        assert!(OperationalMode::FsTenantDb
            .capabilities()
            .contains(Capabilities::DATA_PLANE));
    }

    #[test]
    fn tenant_db_overrides_mode() {
        let caps = Capabilities::for_tenant(OperationalMode::FsOnly, true);
        assert!(caps.require_data_plane().is_ok());

        let err = Capabilities::for_tenant(OperationalMode::Full, false)
            .require_data_plane()
            .unwrap_err();
        assert_eq!(err.http_status(), 503);
    }
}
