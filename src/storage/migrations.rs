// ABOUTME: Versioned SQL migrations for tenant data-plane databases
// ABOUTME: Parses NNNN_name.sql files and applies the ones above the recorded watermark
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! Migrator
//!
//! Scripts are embedded at compile time. A run creates `_migrations` when
//! needed, reads the highest applied version and applies each newer script in
//! ascending order, stopping at the first failure.

use chrono::Utc;
use tracing::{error, info};

use super::errors::{DatabaseError, DatabaseResult};
use super::repositories::MigrationExecutor;

/// Embedded tenant migrations as `(file name, sql)`
pub const TENANT_MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_users.sql",
        include_str!("../../migrations/tenant/0001_users.sql"),
    ),
    (
        "0002_refresh_tokens.sql",
        include_str!("../../migrations/tenant/0002_refresh_tokens.sql"),
    ),
    (
        "0003_mfa.sql",
        include_str!("../../migrations/tenant/0003_mfa.sql"),
    ),
    (
        "0004_consent_rbac.sql",
        include_str!("../../migrations/tenant/0004_consent_rbac.sql"),
    ),
    (
        "0005_email_tokens.sql",
        include_str!("../../migrations/tenant/0005_email_tokens.sql"),
    ),
];

/// One migration script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Numeric version from the file name
    pub version: i64,
    /// Name without version and extension
    pub name: String,
    /// Script body
    pub sql: String,
}

impl Migration {
    /// Statements of the script split on `;`, skipping comment-only chunks
    ///
    /// Scripts must not contain `;` inside literals or trigger bodies.
    #[must_use]
    pub fn statements(&self) -> Vec<&str> {
        self.sql
            .split(';')
            .map(str::trim)
            .filter(|chunk| {
                chunk
                    .lines()
                    .any(|line| !line.trim().is_empty() && !line.trim_start().starts_with("--"))
            })
            .collect()
    }
}

/// Outcome of a run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationResult {
    /// Versions applied by this run
    pub applied: Vec<i64>,
    /// Versions at or below the watermark
    pub skipped: Vec<i64>,
    /// Version that failed, if any
    pub failed: Option<i64>,
    /// Failure message
    pub error: Option<String>,
}

impl MigrationResult {
    /// No failure recorded
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failed.is_none()
    }
}

/// Parse `NNNN_name.sql` files, sorted ascending by version
///
/// # Errors
///
/// Rejects names without a numeric prefix, a non-`.sql` extension, or
/// duplicate versions.
pub fn parse_migrations(files: &[(&str, &str)]) -> DatabaseResult<Vec<Migration>> {
    let mut migrations = files
        .iter()
        .map(|(file, sql)| parse_file_name(file).map(|(version, name)| Migration {
            version,
            name,
            sql: (*sql).to_owned(),
        }))
        .collect::<DatabaseResult<Vec<_>>>()?;

    migrations.sort_by_key(|m| m.version);
    if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
        return Err(DatabaseError::MigrationError(format!(
            "duplicate migration version {}",
            pair[0].version
        )));
    }
    Ok(migrations)
}

fn parse_file_name(file: &str) -> DatabaseResult<(i64, String)> {
    let stem = file
        .strip_suffix(".sql")
        .ok_or_else(|| DatabaseError::MigrationError(format!("{file}: expected .sql extension")))?;
    let (version, name) = stem
        .split_once('_')
        .ok_or_else(|| DatabaseError::MigrationError(format!("{file}: expected NNNN_name.sql")))?;
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DatabaseError::MigrationError(format!(
            "{file}: version prefix must be numeric"
        )));
    }
    let version = version
        .parse()
        .map_err(|_| DatabaseError::MigrationError(format!("{file}: version out of range")))?;
    Ok((version, name.to_owned()))
}

/// Applies migrations through an executor
pub struct Migrator {
    migrations: Vec<Migration>,
}

impl Migrator {
    /// Migrator over parsed scripts
    #[must_use]
    pub const fn new(migrations: Vec<Migration>) -> Self {
        Self { migrations }
    }

    /// Migrator over the embedded tenant scripts
    ///
    /// # Errors
    ///
    /// Fails only if an embedded file name is malformed.
    pub fn tenant() -> DatabaseResult<Self> {
        parse_migrations(TENANT_MIGRATIONS).map(Self::new)
    }

    /// Scripts in apply order
    #[must_use]
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Apply every script above the watermark
    ///
    /// A failing script stops the run; the result records it and the
    /// versions applied before it.
    ///
    /// # Errors
    ///
    /// Returns an error only when the bookkeeping table cannot be created or
    /// read. Script failures are reported in the result.
    pub async fn run(&self, executor: &dyn MigrationExecutor) -> DatabaseResult<MigrationResult> {
        executor.ensure_migrations_table().await?;
        let watermark = executor.applied_watermark().await?.unwrap_or(0);

        let mut result = MigrationResult::default();
        for migration in &self.migrations {
            if migration.version <= watermark {
                result.skipped.push(migration.version);
                continue;
            }
            match executor.apply_migration(migration, Utc::now()).await {
                Ok(()) => {
                    info!(version = migration.version, name = %migration.name, "applied migration");
                    result.applied.push(migration.version);
                }
                Err(e) => {
                    error!(version = migration.version, name = %migration.name, error = %e, "migration failed");
                    result.failed = Some(migration.version);
                    result.error = Some(e.to_string());
                    break;
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_by_version() {
        let parsed = parse_migrations(&[
            ("0010_later.sql", "SELECT 2;"),
            ("0002_first.sql", "SELECT 1;"),
        ])
        .unwrap();
        assert_eq!(parsed[0].version, 2);
        assert_eq!(parsed[0].name, "first");
        assert_eq!(parsed[1].version, 10);
    }

    #[test]
    fn rejects_bad_names() {
        assert!(parse_migrations(&[("init.sql", "")]).is_err());
        assert!(parse_migrations(&[("00a1_x.sql", "")]).is_err());
        assert!(parse_migrations(&[("0001_x.txt", "")]).is_err());
        assert!(parse_migrations(&[("0001_a.sql", ""), ("0001_b.sql", "")]).is_err());
    }

    #[test]
    fn scripts_split_into_statements() {
        let parsed = parse_migrations(&[(
            "0001_x.sql",
            "-- users\nCREATE TABLE a (id TEXT);\n\nCREATE INDEX a_id ON a (id);\n-- trailing\n",
        )])
        .unwrap();
        assert_eq!(
            parsed[0].statements(),
            vec!["-- users\nCREATE TABLE a (id TEXT)", "CREATE INDEX a_id ON a (id)"]
        );

        let migrator = Migrator::tenant().unwrap();
        assert!(migrator.migrations().iter().all(|m| !m.statements().is_empty()));
    }

    #[test]
    fn embedded_scripts_parse_in_order() {
        let migrator = Migrator::tenant().unwrap();
        let versions: Vec<i64> = migrator.migrations().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
    }
}
