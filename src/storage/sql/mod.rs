// ABOUTME: SQL adapter serving the tenant data plane through sqlx's Any driver
// ABOUTME: One implementation backs both the sqlite and postgres registry names
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! SQL data plane
//!
//! Queries use `$N` placeholders, which both sqlite and postgres accept.
//! Column conventions: UUIDs as TEXT, timestamps as BIGINT unix seconds,
//! booleans as BIGINT 0/1, string lists as JSON TEXT.

mod consent;
mod mfa;
mod tokens;
mod users;

use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Executor, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::errors::{DatabaseError, DatabaseResult};
use super::migrations::Migration;
use super::registry::{redact_dsn, Adapter, AdapterConfig};
use super::repositories::{
    Connection, ConsentRepository, EmailTokenRepository, MfaRepository, MigrationExecutor,
    RbacRepository, RefreshTokenRepository, UserRepository,
};
use crate::models::{from_unix, to_unix};

static INSTALL_DRIVERS: Once = Once::new();

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// SQL adapter registered as `sqlite` or `postgres`
pub struct SqlAdapter {
    name: &'static str,
}

impl SqlAdapter {
    /// Adapter registered as `sqlite`
    #[must_use]
    pub const fn sqlite() -> Self {
        Self { name: "sqlite" }
    }

    /// Adapter registered as `postgres`
    #[must_use]
    pub const fn postgres() -> Self {
        Self { name: "postgres" }
    }

    fn validate(&self, config: &AdapterConfig) -> DatabaseResult<()> {
        if config.dsn.is_empty() {
            return Err(DatabaseError::InvalidConfig(format!("{} adapter requires a DSN", self.name)));
        }
        let scheme_ok = match self.name {
            "sqlite" => config.dsn.starts_with("sqlite:"),
            _ => config.dsn.starts_with("postgres://") || config.dsn.starts_with("postgresql://"),
        };
        if !scheme_ok {
            return Err(DatabaseError::InvalidConfig(format!(
                "DSN {} does not match driver {}",
                redact_dsn(&config.dsn),
                self.name
            )));
        }
        if let Some(schema) = config.schema.as_deref() {
            if schema.is_empty()
                || !schema
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(DatabaseError::InvalidConfig(format!("invalid schema name '{schema}'")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Adapter for SqlAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn connect(&self, config: &AdapterConfig) -> DatabaseResult<Arc<dyn Connection>> {
        self.validate(config)?;
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);

        let max = if config.max_connections == 0 {
            DEFAULT_MAX_CONNECTIONS
        } else {
            config.max_connections
        };
        let mut options = AnyPoolOptions::new().max_connections(max);

        // Every pooled sqlite connection to `:memory:` would otherwise see its own database
        if config.dsn.contains(":memory:") {
            options = options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        if self.name == "postgres" {
            if let Some(schema) = config.schema.clone() {
                let statement = format!("SET search_path TO {schema}");
                options = options.after_connect(move |conn, _meta| {
                    let statement = statement.clone();
                    Box::pin(async move {
                        conn.execute(statement.as_str()).await?;
                        Ok(())
                    })
                });
            }
        }

        let pool = options
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.dsn)
            .await
            .map_err(|e| {
                DatabaseError::ConnectionError(format!("{}: {e}", redact_dsn(&config.dsn)))
            })?;

        info!(driver = self.name, dsn = %redact_dsn(&config.dsn), "opened sql connection pool");
        Ok(Arc::new(SqlConnection {
            pool,
            driver: self.name,
        }))
    }
}

/// Pooled SQL connection
pub struct SqlConnection {
    pool: AnyPool,
    driver: &'static str,
}

impl SqlConnection {
    /// Underlying pool
    #[must_use]
    pub const fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

#[async_trait]
impl Connection for SqlConnection {
    fn driver(&self) -> &'static str {
        self.driver
    }

    async fn ping(&self) -> DatabaseResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        debug!(driver = self.driver, "closing sql connection pool");
        self.pool.close().await;
    }

    fn users(&self) -> Option<&dyn UserRepository> {
        Some(self)
    }

    fn refresh_tokens(&self) -> Option<&dyn RefreshTokenRepository> {
        Some(self)
    }

    fn mfa(&self) -> Option<&dyn MfaRepository> {
        Some(self)
    }

    fn consents(&self) -> Option<&dyn ConsentRepository> {
        Some(self)
    }

    fn rbac(&self) -> Option<&dyn RbacRepository> {
        Some(self)
    }

    fn email_tokens(&self) -> Option<&dyn EmailTokenRepository> {
        Some(self)
    }

    fn migration_executor(&self) -> Option<&dyn MigrationExecutor> {
        Some(self)
    }
}

#[async_trait]
impl MigrationExecutor for SqlConnection {
    async fn ensure_migrations_table(&self) -> DatabaseResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS _migrations (
                version    BIGINT PRIMARY KEY,
                name       TEXT NOT NULL,
                applied_at BIGINT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn applied_watermark(&self) -> DatabaseResult<Option<i64>> {
        let row = sqlx::query("SELECT MAX(version) AS version FROM _migrations")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<Option<i64>, _>("version")?)
    }

    async fn apply_migration(&self, migration: &Migration, at: DateTime<Utc>) -> DatabaseResult<()> {
        let mut tx = self.pool.begin().await?;
        for statement in migration.statements() {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| DatabaseError::MigrationError(format!("{}: {e}", migration.version)))?;
        }
        sqlx::query("INSERT INTO _migrations (version, name, applied_at) VALUES ($1, $2, $3)")
            .bind(migration.version)
            .bind(&migration.name)
            .bind(to_unix(at))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

// ================================
// Row helpers shared by the repositories
// ================================

fn get_uuid(row: &AnyRow, column: &str) -> DatabaseResult<Uuid> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw)
        .map_err(|e| DatabaseError::SerializationError(format!("{column}: invalid uuid: {e}")))
}

fn get_opt_uuid(row: &AnyRow, column: &str) -> DatabaseResult<Option<Uuid>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| {
        Uuid::parse_str(&s)
            .map_err(|e| DatabaseError::SerializationError(format!("{column}: invalid uuid: {e}")))
    })
    .transpose()
}

fn get_ts(row: &AnyRow, column: &str) -> DatabaseResult<DateTime<Utc>> {
    Ok(from_unix(row.try_get::<i64, _>(column)?))
}

fn get_opt_ts(row: &AnyRow, column: &str) -> DatabaseResult<Option<DateTime<Utc>>> {
    Ok(row.try_get::<Option<i64>, _>(column)?.map(from_unix))
}

fn get_bool(row: &AnyRow, column: &str) -> DatabaseResult<bool> {
    Ok(row.try_get::<i64, _>(column)? != 0)
}

fn get_string_list(row: &AnyRow, column: &str) -> DatabaseResult<Vec<String>> {
    let raw: String = row.try_get(column)?;
    Ok(serde_json::from_str(&raw)?)
}

fn opt_unix(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(to_unix)
}

const fn flag(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
