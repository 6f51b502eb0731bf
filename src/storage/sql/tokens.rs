// ABOUTME: SQL repositories for refresh tokens and emailed one-shot tokens
// ABOUTME: Consumption is a single conditional UPDATE so a token is only accepted once
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::Row;
use uuid::Uuid;

use super::{get_opt_ts, get_opt_uuid, get_string_list, get_ts, get_uuid, opt_unix, SqlConnection};
use crate::models::{to_unix, EmailToken, EmailTokenPurpose, RefreshToken};
use crate::storage::errors::{DatabaseError, DatabaseResult};
use crate::storage::repositories::{EmailTokenRepository, RefreshTokenRepository};

fn row_to_refresh(row: &AnyRow) -> DatabaseResult<RefreshToken> {
    Ok(RefreshToken {
        id: get_uuid(row, "id")?,
        tenant_id: get_uuid(row, "tenant_id")?,
        client_id: row.try_get("client_id")?,
        user_id: get_uuid(row, "user_id")?,
        token_hash: row.try_get("token_hash")?,
        scope: row.try_get("scope")?,
        amr: get_string_list(row, "amr")?,
        issued_at: get_ts(row, "issued_at")?,
        expires_at: get_ts(row, "expires_at")?,
        revoked_at: get_opt_ts(row, "revoked_at")?,
        rotated_from: get_opt_uuid(row, "rotated_from")?,
    })
}

fn row_to_email_token(row: &AnyRow) -> DatabaseResult<EmailToken> {
    let purpose: String = row.try_get("purpose")?;
    Ok(EmailToken {
        id: get_uuid(row, "id")?,
        tenant_id: get_uuid(row, "tenant_id")?,
        user_id: get_uuid(row, "user_id")?,
        purpose: EmailTokenPurpose::parse(&purpose).ok_or_else(|| {
            DatabaseError::SerializationError(format!("unknown email token purpose '{purpose}'"))
        })?,
        token_hash: row.try_get("token_hash")?,
        expires_at: get_ts(row, "expires_at")?,
        used_at: get_opt_ts(row, "used_at")?,
        created_at: get_ts(row, "created_at")?,
    })
}

#[async_trait]
impl RefreshTokenRepository for SqlConnection {
    async fn create_refresh_token(&self, token: &RefreshToken) -> DatabaseResult<()> {
        sqlx::query(
            r"
            INSERT INTO refresh_token
                (id, tenant_id, client_id, user_id, token_hash, scope, amr, issued_at, expires_at,
                 revoked_at, rotated_from)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(token.id.to_string())
        .bind(token.tenant_id.to_string())
        .bind(&token.client_id)
        .bind(token.user_id.to_string())
        .bind(&token.token_hash)
        .bind(&token.scope)
        .bind(serde_json::to_string(&token.amr)?)
        .bind(to_unix(token.issued_at))
        .bind(to_unix(token.expires_at))
        .bind(opt_unix(token.revoked_at))
        .bind(token.rotated_from.map(|id| id.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> DatabaseResult<Option<RefreshToken>> {
        sqlx::query(
            r"
            SELECT id, tenant_id, client_id, user_id, token_hash, scope, amr, issued_at, expires_at,
                   revoked_at, rotated_from
            FROM refresh_token
            WHERE token_hash = $1
            ",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(row_to_refresh)
        .transpose()
    }

    async fn revoke_refresh_token(&self, id: Uuid, at: DateTime<Utc>) -> DatabaseResult<bool> {
        let result =
            sqlx::query("UPDATE refresh_token SET revoked_at = $2 WHERE id = $1 AND revoked_at IS NULL")
                .bind(id.to_string())
                .bind(to_unix(at))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, at: DateTime<Utc>) -> DatabaseResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_token SET revoked_at = $2 WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id.to_string())
        .bind(to_unix(at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl EmailTokenRepository for SqlConnection {
    async fn create_email_token(&self, token: &EmailToken) -> DatabaseResult<()> {
        sqlx::query(
            r"
            INSERT INTO email_token
                (id, tenant_id, user_id, purpose, token_hash, expires_at, used_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(token.id.to_string())
        .bind(token.tenant_id.to_string())
        .bind(token.user_id.to_string())
        .bind(token.purpose.as_str())
        .bind(&token.token_hash)
        .bind(to_unix(token.expires_at))
        .bind(opt_unix(token.used_at))
        .bind(to_unix(token.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn consume_email_token(
        &self,
        token_hash: &str,
        purpose: EmailTokenPurpose,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Option<EmailToken>> {
        sqlx::query(
            r"
            UPDATE email_token
            SET used_at = $3
            WHERE token_hash = $1 AND purpose = $2 AND used_at IS NULL AND expires_at > $3
            RETURNING id, tenant_id, user_id, purpose, token_hash, expires_at, used_at, created_at
            ",
        )
        .bind(token_hash)
        .bind(purpose.as_str())
        .bind(to_unix(now))
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(row_to_email_token)
        .transpose()
    }
}
