// ABOUTME: Configuration module index
// ABOUTME: Exposes the environment-driven server configuration
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

/// Environment variable parsing
pub mod environment;

pub use environment::ServerConfig;
