// ABOUTME: Argon2id password hashing in PHC format and registration password policy
// ABOUTME: The blacklist word list is read once and shared
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::constants::password::{MAX_LENGTH, MIN_LENGTH};
use crate::errors::{AppError, AppResult};

/// PHC hash of a throwaway password, verified on unknown users to even out timing
const TIMING_DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$yD5J3ZF3qXUuLvOY3i4fuJZCqfSX3L+FxLLDgbU/AcM";

/// Hashes and verifies passwords
#[derive(Debug, Clone)]
pub struct PasswordService {
    params: Params,
}

impl Default for PasswordService {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl PasswordService {
    /// Service with explicit Argon2 cost parameters
    #[must_use]
    pub const fn with_params(params: Params) -> Self {
        Self { params }
    }

    fn hasher(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash to a PHC string
    ///
    /// # Errors
    ///
    /// Returns an internal error if hashing fails.
    pub fn hash(&self, password: &str) -> AppResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.hasher()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::internal(format!("password hashing failed: {e}")))
    }

    /// Verify against a PHC string; parameters come from the hash itself
    #[must_use]
    pub fn verify(&self, password: &str, phc: &str) -> bool {
        PasswordHash::new(phc).is_ok_and(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
    }

    /// Burn comparable time when the account does not exist
    pub fn verify_dummy(&self, password: &str) {
        let _ = self.verify(password, TIMING_DUMMY_HASH);
    }
}

/// Registration password rules
#[derive(Debug, Default)]
pub struct PasswordPolicy {
    blacklist_path: Option<PathBuf>,
    blacklist: OnceCell<Arc<HashSet<String>>>,
}

impl PasswordPolicy {
    /// Policy with an optional blacklist file
    #[must_use]
    pub fn new(blacklist_path: Option<PathBuf>) -> Self {
        Self {
            blacklist_path,
            blacklist: OnceCell::new(),
        }
    }

    /// Check length and blacklist
    ///
    /// # Errors
    ///
    /// Returns an invalid input error describing the violated rule.
    pub async fn check(&self, password: &str) -> AppResult<()> {
        let len = password.chars().count();
        if len < MIN_LENGTH {
            return Err(AppError::invalid_input(format!(
                "password must be at least {MIN_LENGTH} characters"
            )));
        }
        if len > MAX_LENGTH {
            return Err(AppError::invalid_input("password is too long"));
        }
        let words = self.words().await;
        if words.contains(&password.to_lowercase()) {
            return Err(AppError::invalid_input("password is too common"));
        }
        Ok(())
    }

    async fn words(&self) -> Arc<HashSet<String>> {
        self.blacklist
            .get_or_init(|| async {
                match self.blacklist_path.as_deref() {
                    Some(path) => Arc::new(load_word_list(path).await),
                    None => Arc::new(HashSet::new()),
                }
            })
            .await
            .clone()
    }
}

async fn load_word_list(path: &Path) -> HashSet<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let words: HashSet<String> = contents
                .lines()
                .map(|line| line.trim().to_lowercase())
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .collect();
            info!(path = %path.display(), words = words.len(), "loaded password blacklist");
            words
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "password blacklist unreadable, continuing without it");
            HashSet::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn fast() -> PasswordService {
        PasswordService::with_params(Params::new(1024, 1, 1, None).unwrap())
    }

    #[test]
    fn hash_and_verify() {
        let svc = fast();
        let phc = svc.hash("correct horse").unwrap();
        assert!(phc.starts_with("$argon2id$"));
        assert!(svc.verify("correct horse", &phc));
        assert!(!svc.verify("wrong horse", &phc));
        assert!(!svc.verify("correct horse", "not-a-phc"));
    }

    #[tokio::test]
    async fn policy_rejects_short_and_blacklisted() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# common\nPassword123\nletmein99").unwrap();
        let policy = PasswordPolicy::new(Some(file.path().to_path_buf()));

        assert!(policy.check("short").await.is_err());
        assert!(policy.check("password123").await.is_err());
        assert!(policy.check("a much better passphrase").await.is_ok());
    }
}
