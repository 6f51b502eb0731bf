// ABOUTME: Data access layer composing the filesystem control plane with per-tenant data planes
// ABOUTME: Adapters, registry, repositories, migrations, pooling, capabilities and the factory
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! # Storage
//!
//! The control plane (tenants, clients, scopes, keys, admins) always lives in
//! the filesystem adapter. Each tenant may additionally resolve a data-plane
//! connection (users, refresh tokens, MFA, consents, RBAC, email tokens)
//! opened through the [`AdapterRegistry`] and cached in the
//! [`ConnectionPool`]. [`DalFactory`] is the entry point handlers use.

/// Control-plane service with validated, cluster-gated writes
pub mod control;
/// Storage error type
pub mod errors;
/// Tenant resolution into data-access facades
pub mod factory;
/// Filesystem control-plane adapter
pub mod fs;
/// Embedded tenant migrations and the migrator
pub mod migrations;
/// Operational mode and capability set
pub mod mode;
/// Per-tenant connection cache
pub mod pool;
/// Adapter trait and registry
pub mod registry;
/// Repository traits
pub mod repositories;
/// sqlx-backed data-plane adapter
pub mod sql;

pub use control::ControlPlane;
pub use errors::{DatabaseError, DatabaseResult};
pub use factory::{DalFactory, TenantDataAccess};
pub use mode::{Capabilities, OperationalMode};
pub use pool::{ConnectionPool, TenantConnectHook};
pub use registry::{Adapter, AdapterConfig, AdapterRegistry};
pub use repositories::Connection;
