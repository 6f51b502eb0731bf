// ABOUTME: Cryptographic primitives used by storage and the protocol engines
// ABOUTME: Master keys, the secret box, digests, random tokens and password hashing
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

/// SHA-256 digests, random opaque tokens and constant-time comparison
pub mod hashing;
/// Master key decoding
pub mod master_key;
/// Argon2id password hashing and the registration blacklist
pub mod password;
/// AES-256-GCM sealing of short secrets
pub mod secretbox;

pub use master_key::MasterKey;
pub use secretbox::SecretBox;
