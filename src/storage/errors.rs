// ABOUTME: Typed storage errors returned by adapters and repositories
// ABOUTME: Converted into AppError at the DAL boundary with driver detail logged, not surfaced
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use thiserror::Error;
use tracing::error;

use crate::errors::AppError;

/// Result alias for storage operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Storage error
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Row or document missing
    #[error("{entity_type} '{entity_id}' not found")]
    NotFound {
        /// Entity kind
        entity_type: &'static str,
        /// Lookup key
        entity_id: String,
    },

    /// Unique key violated
    #[error("{entity_type} with this {field} already exists")]
    Conflict {
        /// Entity kind
        entity_type: &'static str,
        /// Offending field
        field: &'static str,
    },

    /// Query or IO failed
    #[error("query failed: {context}")]
    QueryError {
        /// What was being done, including driver detail
        context: String,
    },

    /// Could not connect
    #[error("connection failed: {0}")]
    ConnectionError(String),

    /// Migration failed
    #[error("migration failed: {0}")]
    MigrationError(String),

    /// Document (de)serialization failed
    #[error("serialization failed: {0}")]
    SerializationError(String),

    /// Adapter configuration rejected
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
}

impl DatabaseError {
    /// Query failure with context
    #[must_use]
    pub fn query(context: impl Into<String>) -> Self {
        Self::QueryError {
            context: context.into(),
        }
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Self::Conflict {
                    entity_type: "row",
                    field: "unique key",
                };
            }
        }
        Self::query(err.to_string())
    }
}

impl From<std::io::Error> for DatabaseError {
    fn from(err: std::io::Error) -> Self {
        Self::query(format!("filesystem: {err}"))
    }
}

impl From<serde_yaml::Error> for DatabaseError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound {
                entity_type,
                entity_id,
            } => Self::not_found(format!("{entity_type} '{entity_id}'")),
            DatabaseError::Conflict { entity_type, field } => {
                Self::conflict(format!("{entity_type} with this {field} already exists"))
            }
            DatabaseError::ConnectionError(detail) => {
                error!(detail = %detail, "storage connection failed");
                Self::unavailable("storage unavailable")
            }
            DatabaseError::InvalidConfig(detail) => Self::config(detail),
            other => {
                error!(error = %other, "storage operation failed");
                Self::database(other.to_string())
            }
        }
    }
}
