// ABOUTME: Shared domain types for the HelloJohn identity provider
// ABOUTME: Hosts tenant, client, user, token and key models plus the unified error type
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! # hellojohn-core
//!
//! Models and errors shared between the storage layer, the protocol engines
//! and the HTTP surface. Nothing in here performs IO.

/// Unified error type and HTTP mapping
pub mod errors;
/// Domain models
pub mod models;

pub use errors::{AppError, AppResult, ErrorCode};
