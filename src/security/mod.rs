// ABOUTME: Security helpers shared by the HTTP layer
// ABOUTME: Currently the session and trusted-device cookie utilities
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

/// Secure HTTP cookie utilities
pub mod cookies;
