// ABOUTME: Unified application error with stable codes and HTTP status mapping
// ABOUTME: Renders the JSON error envelope and OAuth2 error bodies for handlers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! Application errors
//!
//! Every fallible operation in the workspace returns [`AppResult`]. Errors carry
//! an [`ErrorCode`] that decides the HTTP status, a message, an optional public
//! `detail`, and for protocol endpoints an RFC 6749 `error` string.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the workspace
pub type AppResult<T> = Result<T, AppError>;

/// Stable error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed or semantically invalid request
    InvalidInput,
    /// A required field was absent
    MissingRequiredField,
    /// Lookup target does not exist
    ResourceNotFound,
    /// Unique constraint would be violated
    ResourceAlreadyExists,
    /// Credentials missing
    AuthRequired,
    /// Credentials present but wrong
    AuthInvalid,
    /// Credentials expired
    AuthExpired,
    /// Authenticated but not allowed
    PermissionDenied,
    /// Optimistic concurrency check failed
    PreconditionFailed,
    /// Dependency not available (database, cache, leader)
    ServiceUnavailable,
    /// Misconfiguration detected at runtime
    ConfigError,
    /// Unexpected internal failure
    InternalError,
}

impl ErrorCode {
    /// HTTP status code for this category
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::InvalidInput | Self::MissingRequiredField => 400,
            Self::AuthRequired | Self::AuthInvalid | Self::AuthExpired => 401,
            Self::PermissionDenied => 403,
            Self::ResourceNotFound => 404,
            Self::ResourceAlreadyExists => 409,
            Self::PreconditionFailed => 412,
            Self::ServiceUnavailable => 503,
            Self::ConfigError | Self::InternalError => 500,
        }
    }

    /// Short wire code placed in the `code` field of the JSON envelope
    #[must_use]
    pub const fn wire_code(self) -> &'static str {
        match self {
            Self::InvalidInput | Self::MissingRequiredField => "bad_request",
            Self::AuthRequired | Self::AuthInvalid | Self::AuthExpired => "unauthorized",
            Self::PermissionDenied => "forbidden",
            Self::ResourceNotFound => "not_found",
            Self::ResourceAlreadyExists => "conflict",
            Self::PreconditionFailed => "precondition_failed",
            Self::ServiceUnavailable => "service_unavailable",
            Self::ConfigError | Self::InternalError => "internal_error",
        }
    }

    /// Whether the message may be shown to clients verbatim
    #[must_use]
    pub const fn is_public(self) -> bool {
        !matches!(self, Self::ConfigError | Self::InternalError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_code())
    }
}

/// Detail string used when a tenant has no data-plane database
pub const NO_DB_FOR_TENANT_DETAIL: &str = "tenant has no database configured";

/// Application error
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct AppError {
    /// Error category
    pub code: ErrorCode,
    /// Human readable message
    pub message: String,
    /// Public detail string
    pub detail: Option<String>,
    /// RFC 6749 / 6750 error string for protocol endpoints
    pub oauth_error: Option<&'static str>,
    /// `WWW-Authenticate` challenge value
    pub challenge: Option<String>,
}

impl AppError {
    /// Create an error with a code and message
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            oauth_error: None,
            challenge: None,
        }
    }

    /// Attach a public detail string
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach an OAuth2 error string
    #[must_use]
    pub const fn with_oauth_error(mut self, error: &'static str) -> Self {
        self.oauth_error = Some(error);
        self
    }

    /// Attach a `WWW-Authenticate` challenge
    #[must_use]
    pub fn with_challenge(mut self, challenge: impl Into<String>) -> Self {
        self.challenge = Some(challenge.into());
        self
    }

    /// Invalid request input
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Required field missing
    #[must_use]
    pub fn missing_field(field: &str) -> Self {
        Self::new(ErrorCode::MissingRequiredField, format!("{field} is required"))
    }

    /// Resource not found
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceNotFound, format!("{} not found", what.into()))
    }

    /// Tenant lookup missed by slug and by id
    #[must_use]
    pub fn tenant_not_found(key: &str) -> Self {
        Self::not_found(format!("tenant '{key}'"))
    }

    /// Unique constraint conflict
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceAlreadyExists, message)
    }

    /// Authentication failed
    #[must_use]
    pub fn auth_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthInvalid, message)
    }

    /// Authentication required
    #[must_use]
    pub fn auth_required() -> Self {
        Self::new(ErrorCode::AuthRequired, "authentication required")
    }

    /// Permission denied
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    /// `If-Match` mismatch
    #[must_use]
    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PreconditionFailed, message)
    }

    /// Dependency unavailable
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    /// Tenant exists but has no data-plane database
    #[must_use]
    pub fn no_db_for_tenant() -> Self {
        Self::unavailable("tenant database unavailable").with_detail(NO_DB_FOR_TENANT_DETAIL)
    }

    /// Control-plane write attempted on a follower node
    #[must_use]
    pub fn not_leader() -> Self {
        Self::unavailable("not the cluster leader").with_detail("not_leader")
    }

    /// Runtime configuration problem
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    /// Internal failure
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Storage failure
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, format!("database error: {}", message.into()))
    }

    /// Dependency call failed (cache, mailer)
    #[must_use]
    pub fn external_service(service: &str, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ServiceUnavailable,
            format!("{service}: {}", message.into()),
        )
    }

    /// OAuth2 `invalid_request` (400)
    #[must_use]
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::invalid_input(description).with_oauth_error("invalid_request")
    }

    /// OAuth2 `invalid_grant` (400)
    #[must_use]
    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::invalid_input(description).with_oauth_error("invalid_grant")
    }

    /// OAuth2 `invalid_client` (401)
    #[must_use]
    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::auth_invalid(description).with_oauth_error("invalid_client")
    }

    /// RFC 6750 `invalid_token` (401)
    #[must_use]
    pub fn invalid_token(description: impl Into<String>) -> Self {
        Self::auth_invalid(description).with_oauth_error("invalid_token")
    }

    /// Wrong TOTP or recovery code (401)
    #[must_use]
    pub fn invalid_mfa_code() -> Self {
        Self::auth_invalid("invalid mfa code").with_oauth_error("invalid_mfa_code")
    }

    /// HTTP status for this error
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// JSON envelope `{code, message, detail?}`
    #[must_use]
    pub fn envelope(&self) -> ErrorEnvelope {
        let message = if self.code.is_public() {
            self.message.clone()
        } else {
            "internal server error".to_owned()
        };
        ErrorEnvelope {
            code: self
                .oauth_error
                .unwrap_or_else(|| self.code.wire_code())
                .to_owned(),
            message,
            detail: self.detail.clone(),
        }
    }

    /// RFC 6749 §5.2 body `{error, error_description}`
    #[must_use]
    pub fn oauth_body(&self) -> OAuthErrorBody {
        let error = self.oauth_error.unwrap_or(match self.code {
            ErrorCode::AuthRequired | ErrorCode::AuthInvalid | ErrorCode::AuthExpired => {
                "invalid_client"
            }
            ErrorCode::PermissionDenied => "access_denied",
            ErrorCode::ServiceUnavailable => "temporarily_unavailable",
            ErrorCode::ConfigError | ErrorCode::InternalError => "server_error",
            _ => "invalid_request",
        });
        let description = self
            .detail
            .clone()
            .or_else(|| self.code.is_public().then(|| self.message.clone()));
        OAuthErrorBody {
            error: error.to_owned(),
            error_description: description,
        }
    }
}

/// JSON error envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Wire code
    pub code: String,
    /// Message
    pub message: String,
    /// Optional public detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// OAuth2 error body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthErrorBody {
    /// RFC 6749 error code
    pub error: String,
    /// Human readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON serialization failed: {err}"))
    }
}

#[cfg(feature = "http-response")]
mod http_response {
    use axum::http::{header, HeaderValue, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::Json;
    use tracing::error;

    use super::AppError;

    impl IntoResponse for AppError {
        fn into_response(self) -> Response {
            if !self.code.is_public() {
                error!(code = %self.code, message = %self.message, "request failed");
            }
            let status =
                StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let mut response = (status, Json(self.envelope())).into_response();
            if let Some(challenge) = self.challenge.as_deref() {
                if let Ok(value) = HeaderValue::from_str(challenge) {
                    response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
                }
            }
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_db_maps_to_503_with_detail() {
        let err = AppError::no_db_for_tenant();
        assert_eq!(err.http_status(), 503);
        let env = err.envelope();
        assert_eq!(env.code, "service_unavailable");
        assert_eq!(env.detail.as_deref(), Some(NO_DB_FOR_TENANT_DETAIL));
    }

    #[test]
    fn internal_messages_are_redacted() {
        let err = AppError::database("connection refused at 10.0.0.3");
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.envelope().message, "internal server error");
        assert_eq!(err.oauth_body().error, "server_error");
        assert!(err.oauth_body().error_description.is_none());
    }

    #[test]
    fn oauth_error_overrides_wire_code() {
        let err = AppError::invalid_grant("refresh token revoked");
        assert_eq!(err.http_status(), 400);
        assert_eq!(err.oauth_body().error, "invalid_grant");
        assert_eq!(err.envelope().code, "invalid_grant");

        let mfa = AppError::invalid_mfa_code();
        assert_eq!(mfa.http_status(), 401);
        assert_eq!(mfa.envelope().code, "invalid_mfa_code");
    }

    #[test]
    fn pkce_error_keeps_bad_request_code() {
        let err = AppError::invalid_input("invalid authorization request")
            .with_detail("PKCE S256 required");
        let env = err.envelope();
        assert_eq!(env.code, "bad_request");
        assert_eq!(env.detail.as_deref(), Some("PKCE S256 required"));
    }
}
