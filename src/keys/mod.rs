// ABOUTME: Signing keys, JWKS publication and issuer resolution
// ABOUTME: Tenants sign with their own key set unless they share the global issuer
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

/// Effective issuer per tenant
pub mod issuer;
/// JWKS wire types and the memoized body cache
pub mod jwks;
/// Key sets, rotation, signing and verification
pub mod keystore;

pub use issuer::IssuerResolver;
pub use jwks::{Jwk, Jwks, JwksCache};
pub use keystore::{Keystore, VerifyOptions};
