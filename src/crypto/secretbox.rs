// ABOUTME: Authenticated encryption of short secrets under a process master key
// ABOUTME: Ciphertexts are self-describing strings: prefix + base64url(nonce || ciphertext)
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! Secret box
//!
//! AES-256-GCM with a fresh 96-bit nonce per message. The prefix is bound as
//! associated data, so a ciphertext produced for one purpose cannot be opened
//! as another.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use super::master_key::MasterKey;
use crate::errors::{AppError, AppResult};
use crate::models::{OidcClient, TenantSettings};

/// Prefix of general settings ciphertexts
pub const PREFIX_GENERAL: &str = "GCMV1:";
/// Prefix of TOTP secret ciphertexts
pub const PREFIX_MFA: &str = "GCMV1-MFA:";

const NONCE_LEN: usize = 12;

/// Seals and opens secrets
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl SecretBox {
    /// Build from a master key
    #[must_use]
    pub fn new(key: &MasterKey) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Seal with the general prefix
    ///
    /// # Errors
    ///
    /// Returns an internal error if encryption fails.
    pub fn seal(&self, plaintext: &str) -> AppResult<String> {
        self.seal_with_prefix(PREFIX_GENERAL, plaintext)
    }

    /// Open a general ciphertext
    ///
    /// # Errors
    ///
    /// Fails on a foreign prefix, malformed encoding or authentication failure.
    pub fn open(&self, ciphertext: &str) -> AppResult<String> {
        self.open_with_prefix(PREFIX_GENERAL, ciphertext)
    }

    /// Seal with an explicit prefix
    ///
    /// # Errors
    ///
    /// Returns an internal error if encryption fails.
    pub fn seal_with_prefix(&self, prefix: &str, plaintext: &str) -> AppResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: prefix.as_bytes(),
                },
            )
            .map_err(|_| AppError::internal("secret box encryption failed"))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(format!("{prefix}{}", URL_SAFE_NO_PAD.encode(blob)))
    }

    /// Open a ciphertext carrying `prefix`
    ///
    /// # Errors
    ///
    /// Fails on a foreign prefix, malformed encoding or authentication failure.
    pub fn open_with_prefix(&self, prefix: &str, ciphertext: &str) -> AppResult<String> {
        let body = ciphertext
            .strip_prefix(prefix)
            .ok_or_else(|| AppError::invalid_input("ciphertext prefix mismatch"))?;
        let blob = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| AppError::invalid_input("ciphertext is not valid base64url"))?;
        if blob.len() <= NONCE_LEN {
            return Err(AppError::invalid_input("ciphertext too short"));
        }
        let (nonce, sealed) = blob.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: prefix.as_bytes(),
                },
            )
            .map_err(|_| AppError::internal("secret box authentication failed"))?;
        String::from_utf8(plain).map_err(|_| AppError::internal("secret is not UTF-8"))
    }

    /// Seal `plaintext` into `enc` when non-empty and clear the plaintext
    ///
    /// # Errors
    ///
    /// Propagates encryption failures.
    pub fn seal_mirror(&self, plaintext: &mut String, enc: &mut String) -> AppResult<()> {
        if !plaintext.is_empty() {
            *enc = self.seal(plaintext)?;
            plaintext.clear();
        }
        Ok(())
    }

    /// Seal every plaintext mirror of a settings document
    ///
    /// # Errors
    ///
    /// Propagates encryption failures.
    pub fn seal_settings(&self, settings: &mut TenantSettings) -> AppResult<()> {
        if let Some(smtp) = settings.smtp.as_mut() {
            self.seal_mirror(&mut smtp.password, &mut smtp.password_enc)?;
        }
        if let Some(db) = settings.user_db.as_mut() {
            self.seal_mirror(&mut db.dsn, &mut db.dsn_enc)?;
        }
        if let Some(cache) = settings.cache.as_mut() {
            self.seal_mirror(&mut cache.password, &mut cache.password_enc)?;
        }
        for provider in settings.social_providers.values_mut() {
            self.seal_mirror(&mut provider.client_secret, &mut provider.client_secret_enc)?;
        }
        Ok(())
    }

    /// Seal a client secret
    ///
    /// # Errors
    ///
    /// Propagates encryption failures.
    pub fn seal_client(&self, client: &mut OidcClient) -> AppResult<()> {
        self.seal_mirror(&mut client.secret, &mut client.secret_enc)
    }

    /// Open an optional `*Enc` field, empty stays empty
    ///
    /// # Errors
    ///
    /// Propagates decryption failures.
    pub fn open_optional(&self, enc: &str) -> AppResult<Option<String>> {
        if enc.is_empty() {
            Ok(None)
        } else {
            self.open(enc).map(Some)
        }
    }
}
