// ABOUTME: Main library entry point for the HelloJohn identity provider
// ABOUTME: Wires storage, keys, protocol engines and HTTP routes into one crate
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

// Crate-level attributes:
// - recursion_limit: raised for the nested serde/json! expansions in discovery documents
// - deny(unsafe_code): no unsafe anywhere in the server
#![recursion_limit = "256"]
#![deny(unsafe_code)]

//! # `HelloJohn`
//!
//! A multi-tenant `OpenID` Connect and `OAuth2` identity provider.
//!
//! ## Features
//!
//! - **Tenancy**: tenants, clients and scopes live in a filesystem control
//!   plane; each tenant may bring its own user database and cache
//! - **Protocol**: authorization code with PKCE (S256), refresh rotation,
//!   introspection, revocation, userinfo and discovery
//! - **Keys**: `EdDSA` signing keys per tenant or global, sealed at rest,
//!   rotated with a grace window and published as JWKS
//! - **MFA**: TOTP step-up with recovery codes and trusted devices
//!
//! ## Architecture
//!
//! - **Storage**: control plane plus a lazily opened data plane per tenant
//! - **Keys**: keystore, issuer resolution and the JWKS memo
//! - **OIDC**: protocol engines independent of HTTP
//! - **Routes**: thin axum handlers over the engines
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hellojohn::config::ServerConfig;
//! use hellojohn::errors::AppResult;
//! use hellojohn::server::{HelloJohnServer, ServerResources};
//!
//! #[tokio::main]
//! async fn main() -> AppResult<()> {
//!     let config = ServerConfig::from_env()?;
//!     hellojohn::logging::init(config.log_format);
//!     let resources = Arc::new(ServerResources::build(config).await?);
//!     HelloJohnServer::new(resources)
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```

pub use hellojohn_core::{errors, models};

/// Cache abstraction with in-memory and Redis backends
pub mod cache;

/// Leader gate for control-plane writes
pub mod cluster;

/// Environment-driven configuration
pub mod config;

/// Application constants: TTLs, cache prefixes, cookie and header names
pub mod constants;

/// Master keys, sealing, digests and password hashing
pub mod crypto;

/// Readiness probes
pub mod health;

/// Signing keys, issuer resolution and JWKS publication
pub mod keys;

/// Tracing subscriber setup
pub mod logging;

/// OpenID Connect and `OAuth2` protocol engines
pub mod oidc;

/// HTTP routes
pub mod routes;

/// Cookie helpers
pub mod security;

/// Composition root and HTTP server
pub mod server;

/// Control plane, data plane and the adapter registry
pub mod storage;
