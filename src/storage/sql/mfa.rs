// ABOUTME: SQL MFA repository for TOTP enrollment, recovery codes and trusted devices
// ABOUTME: Recovery codes are stored hashed and consumed with a conditional UPDATE
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::Row;
use uuid::Uuid;

use super::{get_opt_ts, get_ts, get_uuid, SqlConnection};
use crate::models::{to_unix, MfaTotp, TrustedDevice};
use crate::storage::errors::{DatabaseError, DatabaseResult};
use crate::storage::repositories::MfaRepository;

fn row_to_totp(row: &AnyRow) -> DatabaseResult<MfaTotp> {
    Ok(MfaTotp {
        user_id: get_uuid(row, "user_id")?,
        secret_enc: row.try_get("secret_enc")?,
        confirmed_at: get_opt_ts(row, "confirmed_at")?,
        last_used_at: get_opt_ts(row, "last_used_at")?,
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

impl SqlConnection {
    async fn touch_totp(&self, sql: &str, user_id: Uuid, at: DateTime<Utc>) -> DatabaseResult<()> {
        let result = sqlx::query(sql)
            .bind(user_id.to_string())
            .bind(to_unix(at))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                entity_type: "mfa_totp",
                entity_id: user_id.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MfaRepository for SqlConnection {
    async fn get_totp(&self, user_id: Uuid) -> DatabaseResult<Option<MfaTotp>> {
        sqlx::query(
            r"
            SELECT user_id, secret_enc, confirmed_at, last_used_at, created_at, updated_at
            FROM mfa_totp
            WHERE user_id = $1
            ",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(row_to_totp)
        .transpose()
    }

    async fn upsert_totp(
        &self,
        user_id: Uuid,
        secret_enc: &str,
        at: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(
            r"
            INSERT INTO mfa_totp (user_id, secret_enc, confirmed_at, last_used_at, created_at, updated_at)
            VALUES ($1, $2, NULL, NULL, $3, $3)
            ON CONFLICT (user_id) DO UPDATE
            SET secret_enc = excluded.secret_enc,
                confirmed_at = NULL,
                last_used_at = NULL,
                updated_at = excluded.updated_at
            ",
        )
        .bind(user_id.to_string())
        .bind(secret_enc)
        .bind(to_unix(at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn confirm_totp(&self, user_id: Uuid, at: DateTime<Utc>) -> DatabaseResult<()> {
        self.touch_totp(
            "UPDATE mfa_totp SET confirmed_at = $2, updated_at = $2 WHERE user_id = $1",
            user_id,
            at,
        )
        .await
    }

    async fn mark_totp_used(&self, user_id: Uuid, at: DateTime<Utc>) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE mfa_totp
            SET last_used_at = $2, updated_at = $2
            WHERE user_id = $1 AND (last_used_at IS NULL OR last_used_at < $2)
            ",
        )
        .bind(user_id.to_string())
        .bind(to_unix(at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_totp(&self, user_id: Uuid) -> DatabaseResult<()> {
        let id = user_id.to_string();
        let mut tx = self.pool.begin().await?;
        for sql in [
            "DELETE FROM mfa_totp WHERE user_id = $1",
            "DELETE FROM mfa_recovery_code WHERE user_id = $1",
            "DELETE FROM mfa_trusted_device WHERE user_id = $1",
        ] {
            sqlx::query(sql).bind(&id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_recovery_codes(
        &self,
        user_id: Uuid,
        code_hashes: &[String],
        at: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        let id = user_id.to_string();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM mfa_recovery_code WHERE user_id = $1")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        for hash in code_hashes {
            sqlx::query(
                "INSERT INTO mfa_recovery_code (user_id, code_hash, used_at, created_at) VALUES ($1, $2, NULL, $3)",
            )
            .bind(&id)
            .bind(hash)
            .bind(to_unix(at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn consume_recovery_code(
        &self,
        user_id: Uuid,
        code_hash: &str,
        at: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE mfa_recovery_code
            SET used_at = $3
            WHERE user_id = $1 AND code_hash = $2 AND used_at IS NULL
            ",
        )
        .bind(user_id.to_string())
        .bind(code_hash)
        .bind(to_unix(at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn add_trusted_device(&self, device: &TrustedDevice) -> DatabaseResult<()> {
        sqlx::query(
            r"
            INSERT INTO mfa_trusted_device (user_id, device_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, device_hash) DO UPDATE SET expires_at = excluded.expires_at
            ",
        )
        .bind(device.user_id.to_string())
        .bind(&device.device_hash)
        .bind(to_unix(device.expires_at))
        .bind(to_unix(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_trusted_device(
        &self,
        user_id: Uuid,
        device_hash: &str,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS n
            FROM mfa_trusted_device
            WHERE user_id = $1 AND device_hash = $2 AND expires_at > $3
            ",
        )
        .bind(user_id.to_string())
        .bind(device_hash)
        .bind(to_unix(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("n")? > 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::storage::migrations::Migrator;
    use crate::storage::registry::{Adapter, AdapterConfig};
    use crate::storage::repositories::Connection;
    use crate::storage::sql::SqlAdapter;

    async fn migrated() -> (tempfile::TempDir, Arc<dyn Connection>) {
        let dir = tempfile::tempdir().unwrap();
        let conn = SqlAdapter::sqlite()
            .connect(&AdapterConfig {
                driver: "sqlite".to_owned(),
                dsn: format!("sqlite://{}?mode=rwc", dir.path().join("m.db").display()),
                ..AdapterConfig::default()
            })
            .await
            .unwrap();
        Migrator::tenant()
            .unwrap()
            .run(conn.migration_executor().unwrap())
            .await
            .unwrap();
        (dir, conn)
    }

    #[tokio::test]
    async fn re_enrolling_resets_confirmation() {
        let (_dir, conn) = migrated().await;
        let mfa = conn.mfa().unwrap();
        let user = Uuid::new_v4();
        let now = Utc::now();

        mfa.upsert_totp(user, "GCMV1-MFA:a", now).await.unwrap();
        mfa.confirm_totp(user, now).await.unwrap();
        assert!(mfa.get_totp(user).await.unwrap().unwrap().is_confirmed());

        mfa.upsert_totp(user, "GCMV1-MFA:b", now).await.unwrap();
        let row = mfa.get_totp(user).await.unwrap().unwrap();
        assert!(!row.is_confirmed());
        assert_eq!(row.secret_enc, "GCMV1-MFA:b");

        assert!(mfa.confirm_totp(Uuid::new_v4(), now).await.is_err());
    }

    #[tokio::test]
    async fn totp_use_only_moves_forward() {
        let (_dir, conn) = migrated().await;
        let mfa = conn.mfa().unwrap();
        let user = Uuid::new_v4();
        let now = Utc::now();
        mfa.upsert_totp(user, "GCMV1-MFA:a", now).await.unwrap();

        let step = now + Duration::seconds(30);
        assert!(mfa.mark_totp_used(user, step).await.unwrap());
        assert!(!mfa.mark_totp_used(user, step).await.unwrap());
        assert!(!mfa.mark_totp_used(user, now).await.unwrap());
        assert!(mfa.mark_totp_used(user, step + Duration::seconds(30)).await.unwrap());
        assert!(!mfa.mark_totp_used(Uuid::new_v4(), step).await.unwrap());
    }

    #[tokio::test]
    async fn recovery_code_consumed_once() {
        let (_dir, conn) = migrated().await;
        let mfa = conn.mfa().unwrap();
        let user = Uuid::new_v4();
        let now = Utc::now();
        mfa.replace_recovery_codes(user, &["h1".to_owned(), "h2".to_owned()], now)
            .await
            .unwrap();

        assert!(mfa.consume_recovery_code(user, "h1", now).await.unwrap());
        assert!(!mfa.consume_recovery_code(user, "h1", now).await.unwrap());
        assert!(!mfa.consume_recovery_code(user, "nope", now).await.unwrap());

        mfa.replace_recovery_codes(user, &["h3".to_owned()], now).await.unwrap();
        assert!(!mfa.consume_recovery_code(user, "h2", now).await.unwrap());
        assert!(mfa.consume_recovery_code(user, "h3", now).await.unwrap());
    }

    #[tokio::test]
    async fn trusted_device_expires_and_is_cleared() {
        let (_dir, conn) = migrated().await;
        let mfa = conn.mfa().unwrap();
        let user = Uuid::new_v4();
        let now = Utc::now();
        mfa.add_trusted_device(&TrustedDevice {
            user_id: user,
            device_hash: "dev".to_owned(),
            expires_at: now + Duration::days(30),
        })
        .await
        .unwrap();

        assert!(mfa.is_trusted_device(user, "dev", now).await.unwrap());
        assert!(!mfa
            .is_trusted_device(user, "dev", now + Duration::days(31))
            .await
            .unwrap());

        mfa.upsert_totp(user, "s", now).await.unwrap();
        mfa.delete_totp(user).await.unwrap();
        assert!(mfa.get_totp(user).await.unwrap().is_none());
        assert!(!mfa.is_trusted_device(user, "dev", now).await.unwrap());
    }
}
