// ABOUTME: SQL user repository over the app_user and identity tables
// ABOUTME: User creation and its first identity share one transaction
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::Row;
use uuid::Uuid;

use super::{flag, get_bool, get_opt_ts, get_ts, get_uuid, opt_unix, SqlConnection};
use crate::models::{to_unix, Identity, User};
use crate::storage::errors::{DatabaseError, DatabaseResult};
use crate::storage::repositories::UserRepository;

const USER_COLUMNS: &str = "id, tenant_id, email, email_verified, name, given_name, family_name, \
     picture, locale, custom_fields, disabled_at, disabled_until, disabled_reason, created_at, updated_at";

fn row_to_user(row: &AnyRow) -> DatabaseResult<User> {
    let custom: String = row.try_get("custom_fields")?;
    Ok(User {
        id: get_uuid(row, "id")?,
        tenant_id: get_uuid(row, "tenant_id")?,
        email: row.try_get("email")?,
        email_verified: get_bool(row, "email_verified")?,
        name: row.try_get("name")?,
        given_name: row.try_get("given_name")?,
        family_name: row.try_get("family_name")?,
        picture: row.try_get("picture")?,
        locale: row.try_get("locale")?,
        custom_fields: serde_json::from_str(&custom)?,
        disabled_at: get_opt_ts(row, "disabled_at")?,
        disabled_until: get_opt_ts(row, "disabled_until")?,
        disabled_reason: row.try_get("disabled_reason")?,
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

fn row_to_identity(row: &AnyRow) -> DatabaseResult<Identity> {
    Ok(Identity {
        id: get_uuid(row, "id")?,
        user_id: get_uuid(row, "user_id")?,
        provider: row.try_get("provider")?,
        provider_user_id: row.try_get("provider_user_id")?,
        email: row.try_get("email")?,
        email_verified: get_bool(row, "email_verified")?,
        password_hash: row.try_get("password_hash")?,
        created_at: get_ts(row, "created_at")?,
    })
}

#[async_trait]
impl UserRepository for SqlConnection {
    async fn create_user(&self, user: &User, identity: Option<&Identity>) -> DatabaseResult<()> {
        let custom = serde_json::to_string(&user.custom_fields)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO app_user ({USER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        ))
        .bind(user.id.to_string())
        .bind(user.tenant_id.to_string())
        .bind(&user.email)
        .bind(flag(user.email_verified))
        .bind(user.name.clone())
        .bind(user.given_name.clone())
        .bind(user.family_name.clone())
        .bind(user.picture.clone())
        .bind(user.locale.clone())
        .bind(custom)
        .bind(opt_unix(user.disabled_at))
        .bind(opt_unix(user.disabled_until))
        .bind(user.disabled_reason.clone())
        .bind(to_unix(user.created_at))
        .bind(to_unix(user.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| match DatabaseError::from(e) {
            DatabaseError::Conflict { .. } => DatabaseError::Conflict {
                entity_type: "user",
                field: "email",
            },
            other => other,
        })?;

        if let Some(identity) = identity {
            sqlx::query(
                r"
                INSERT INTO identity
                    (id, user_id, provider, provider_user_id, email, email_verified, password_hash, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ",
            )
            .bind(identity.id.to_string())
            .bind(identity.user_id.to_string())
            .bind(&identity.provider)
            .bind(&identity.provider_user_id)
            .bind(identity.email.clone())
            .bind(flag(identity.email_verified))
            .bind(identity.password_hash.clone())
            .bind(to_unix(identity.created_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_user_by_id(&self, id: Uuid) -> DatabaseResult<Option<User>> {
        sqlx::query(&format!("SELECT {USER_COLUMNS} FROM app_user WHERE id = $1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_user)
            .transpose()
    }

    async fn get_user_by_email(&self, tenant_id: Uuid, email: &str) -> DatabaseResult<Option<User>> {
        sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM app_user WHERE tenant_id = $1 AND email = $2"
        ))
        .bind(tenant_id.to_string())
        .bind(email.trim().to_lowercase())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(row_to_user)
        .transpose()
    }

    async fn update_user(&self, user: &User) -> DatabaseResult<()> {
        let custom = serde_json::to_string(&user.custom_fields)?;
        let result = sqlx::query(
            r"
            UPDATE app_user
            SET name = $2, given_name = $3, family_name = $4, picture = $5, locale = $6,
                custom_fields = $7, updated_at = $8
            WHERE id = $1
            ",
        )
        .bind(user.id.to_string())
        .bind(user.name.clone())
        .bind(user.given_name.clone())
        .bind(user.family_name.clone())
        .bind(user.picture.clone())
        .bind(user.locale.clone())
        .bind(custom)
        .bind(to_unix(Utc::now()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                entity_type: "user",
                entity_id: user.id.to_string(),
            });
        }
        Ok(())
    }

    async fn set_email_verified(&self, id: Uuid, verified: bool) -> DatabaseResult<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE app_user SET email_verified = $2, updated_at = $3 WHERE id = $1")
            .bind(id.to_string())
            .bind(flag(verified))
            .bind(to_unix(Utc::now()))
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                entity_type: "user",
                entity_id: id.to_string(),
            });
        }
        sqlx::query("UPDATE identity SET email_verified = $2 WHERE user_id = $1 AND provider = 'password'")
            .bind(id.to_string())
            .bind(flag(verified))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_disabled(
        &self,
        id: Uuid,
        disabled_at: Option<DateTime<Utc>>,
        disabled_until: Option<DateTime<Utc>>,
        reason: Option<&str>,
    ) -> DatabaseResult<()> {
        let result = sqlx::query(
            r"
            UPDATE app_user
            SET disabled_at = $2, disabled_until = $3, disabled_reason = $4, updated_at = $5
            WHERE id = $1
            ",
        )
        .bind(id.to_string())
        .bind(opt_unix(disabled_at))
        .bind(opt_unix(disabled_until))
        .bind(reason.map(str::to_owned))
        .bind(to_unix(Utc::now()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                entity_type: "user",
                entity_id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_identity(&self, user_id: Uuid, provider: &str) -> DatabaseResult<Option<Identity>> {
        sqlx::query(
            r"
            SELECT id, user_id, provider, provider_user_id, email, email_verified, password_hash, created_at
            FROM identity
            WHERE user_id = $1 AND provider = $2
            ORDER BY created_at
            LIMIT 1
            ",
        )
        .bind(user_id.to_string())
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(row_to_identity)
        .transpose()
    }

    async fn update_password_hash(&self, user_id: Uuid, password_hash: &str) -> DatabaseResult<()> {
        let result = sqlx::query(
            "UPDATE identity SET password_hash = $2 WHERE user_id = $1 AND provider = 'password'",
        )
        .bind(user_id.to_string())
        .bind(password_hash)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                entity_type: "identity",
                entity_id: user_id.to_string(),
            });
        }
        Ok(())
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
                dsn: format!("sqlite://{}?mode=rwc", dir.path().join("u.db").display()),
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
    async fn create_and_lookup_by_email() {
        let (_dir, conn) = migrated().await;
        let users = conn.users().unwrap();
        let tenant = Uuid::new_v4();
        let user = User::new(tenant, "ana@example.com");
        let identity = Identity::password(&user, "$argon2id$fake".to_owned());
        users.create_user(&user, Some(&identity)).await.unwrap();

        let found = users
            .get_user_by_email(tenant, "ANA@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, user.id);
        assert!(!found.email_verified);
        assert!(users
            .get_user_by_email(Uuid::new_v4(), "ana@example.com")
            .await
            .unwrap()
            .is_none());

        let identity = users.get_identity(user.id, "password").await.unwrap().unwrap();
        assert_eq!(identity.password_hash.as_deref(), Some("$argon2id$fake"));
    }

    #[tokio::test]
    async fn duplicate_email_is_conflict() {
        let (_dir, conn) = migrated().await;
        let users = conn.users().unwrap();
        let tenant = Uuid::new_v4();
        users
            .create_user(&User::new(tenant, "dup@example.com"), None)
            .await
            .unwrap();
        let err = users
            .create_user(&User::new(tenant, "dup@example.com"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict { .. }));
    }

    #[tokio::test]
    async fn verification_and_disable_window() {
        let (_dir, conn) = migrated().await;
        let users = conn.users().unwrap();
        let user = User::new(Uuid::new_v4(), "bo@example.com");
        let identity = Identity::password(&user, "h".to_owned());
        users.create_user(&user, Some(&identity)).await.unwrap();

        users.set_email_verified(user.id, true).await.unwrap();
        let now = Utc::now();
        users
            .set_disabled(user.id, Some(now), Some(now + Duration::hours(1)), Some("abuse"))
            .await
            .unwrap();

        let stored = users.get_user_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.email_verified);
        assert!(stored.is_disabled(now));
        assert_eq!(stored.disabled_reason.as_deref(), Some("abuse"));
        assert!(users
            .get_identity(user.id, "password")
            .await
            .unwrap()
            .unwrap()
            .email_verified);

        users.update_password_hash(user.id, "h2").await.unwrap();
        assert!(users.set_email_verified(Uuid::new_v4(), true).await.is_err());
    }
}
