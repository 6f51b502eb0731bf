// ABOUTME: SQL repositories for the consent ledger and role based access control
// ABOUTME: Consent upserts merge scopes so a grant only ever widens until revoked
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::Row;
use uuid::Uuid;

use super::{get_opt_ts, get_string_list, get_ts, get_uuid, SqlConnection};
use crate::models::{to_unix, Consent, Role};
use crate::storage::errors::{DatabaseError, DatabaseResult};
use crate::storage::repositories::{ConsentRepository, RbacRepository};

fn row_to_consent(row: &AnyRow) -> DatabaseResult<Consent> {
    Ok(Consent {
        id: get_uuid(row, "id")?,
        user_id: get_uuid(row, "user_id")?,
        client_id: row.try_get("client_id")?,
        granted_scopes: get_string_list(row, "granted_scopes")?,
        granted_at: get_ts(row, "granted_at")?,
        revoked_at: get_opt_ts(row, "revoked_at")?,
    })
}

#[async_trait]
impl ConsentRepository for SqlConnection {
    async fn upsert_consent(
        &self,
        user_id: Uuid,
        client_id: &str,
        scopes: &[String],
        at: DateTime<Utc>,
    ) -> DatabaseResult<Consent> {
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query(
            r"
            SELECT id, user_id, client_id, granted_scopes, granted_at, revoked_at
            FROM user_consent
            WHERE user_id = $1 AND client_id = $2
            ",
        )
        .bind(user_id.to_string())
        .bind(client_id)
        .fetch_optional(&mut *tx)
        .await?
        .as_ref()
        .map(row_to_consent)
        .transpose()?;

        let consent = if let Some(mut consent) = existing {
            let mut merged: BTreeSet<String> = if consent.revoked_at.is_some() {
                BTreeSet::new()
            } else {
                consent.granted_scopes.drain(..).collect()
            };
            merged.extend(scopes.iter().cloned());
            consent.granted_scopes = merged.into_iter().collect();
            consent.granted_at = at;
            consent.revoked_at = None;

            sqlx::query(
                r"
                UPDATE user_consent
                SET granted_scopes = $2, granted_at = $3, revoked_at = NULL
                WHERE id = $1
                ",
            )
            .bind(consent.id.to_string())
            .bind(serde_json::to_string(&consent.granted_scopes)?)
            .bind(to_unix(at))
            .execute(&mut *tx)
            .await?;
            consent
        } else {
            let granted: BTreeSet<String> = scopes.iter().cloned().collect();
            let consent = Consent {
                id: Uuid::new_v4(),
                user_id,
                client_id: client_id.to_owned(),
                granted_scopes: granted.into_iter().collect(),
                granted_at: at,
                revoked_at: None,
            };
            sqlx::query(
                r"
                INSERT INTO user_consent (id, user_id, client_id, granted_scopes, granted_at, revoked_at)
                VALUES ($1, $2, $3, $4, $5, NULL)
                ",
            )
            .bind(consent.id.to_string())
            .bind(user_id.to_string())
            .bind(client_id)
            .bind(serde_json::to_string(&consent.granted_scopes)?)
            .bind(to_unix(at))
            .execute(&mut *tx)
            .await?;
            consent
        };

        tx.commit().await?;
        Ok(consent)
    }

    async fn get_consent(&self, user_id: Uuid, client_id: &str) -> DatabaseResult<Option<Consent>> {
        sqlx::query(
            r"
            SELECT id, user_id, client_id, granted_scopes, granted_at, revoked_at
            FROM user_consent
            WHERE user_id = $1 AND client_id = $2
            ",
        )
        .bind(user_id.to_string())
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(row_to_consent)
        .transpose()
    }

    async fn revoke_consent(
        &self,
        user_id: Uuid,
        client_id: &str,
        at: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE user_consent
            SET revoked_at = $3
            WHERE user_id = $1 AND client_id = $2 AND revoked_at IS NULL
            ",
        )
        .bind(user_id.to_string())
        .bind(client_id)
        .bind(to_unix(at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl RbacRepository for SqlConnection {
    async fn upsert_role(&self, role: &Role) -> DatabaseResult<()> {
        sqlx::query(
            r"
            INSERT INTO rbac_role (name, description, permissions)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE
            SET description = excluded.description, permissions = excluded.permissions
            ",
        )
        .bind(&role.name)
        .bind(&role.description)
        .bind(serde_json::to_string(&role.permissions)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn assign_role(&self, user_id: Uuid, role: &str) -> DatabaseResult<()> {
        let exists = sqlx::query("SELECT COUNT(*) AS n FROM rbac_role WHERE name = $1")
            .bind(role)
            .fetch_one(&self.pool)
            .await?
            .try_get::<i64, _>("n")?
            > 0;
        if !exists {
            return Err(DatabaseError::NotFound {
                entity_type: "role",
                entity_id: role.to_owned(),
            });
        }
        sqlx::query(
            r"
            INSERT INTO rbac_user_role (user_id, role_name) VALUES ($1, $2)
            ON CONFLICT (user_id, role_name) DO NOTHING
            ",
        )
        .bind(user_id.to_string())
        .bind(role)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_role(&self, user_id: Uuid, role: &str) -> DatabaseResult<()> {
        sqlx::query("DELETE FROM rbac_user_role WHERE user_id = $1 AND role_name = $2")
            .bind(user_id.to_string())
            .bind(role)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_user_roles(&self, user_id: Uuid) -> DatabaseResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT role_name FROM rbac_user_role WHERE user_id = $1 ORDER BY role_name",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("role_name").map_err(Into::into))
            .collect()
    }

    async fn get_permissions(&self, roles: &[String]) -> DatabaseResult<Vec<String>> {
        let mut permissions = BTreeSet::new();
        for role in roles {
            let row = sqlx::query("SELECT permissions FROM rbac_role WHERE name = $1")
                .bind(role)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                permissions.extend(get_string_list(&row, "permissions")?);
            }
        }
        Ok(permissions.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

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
                dsn: format!("sqlite://{}?mode=rwc", dir.path().join("c.db").display()),
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

    fn scopes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[tokio::test]
    async fn consent_widens_until_revoked() {
        let (_dir, conn) = migrated().await;
        let consents = conn.consents().unwrap();
        let user = Uuid::new_v4();

        consents
            .upsert_consent(user, "web1", &scopes(&["openid", "email"]), Utc::now())
            .await
            .unwrap();
        let merged = consents
            .upsert_consent(user, "web1", &scopes(&["profile", "openid"]), Utc::now())
            .await
            .unwrap();
        assert_eq!(merged.granted_scopes, scopes(&["email", "openid", "profile"]));

        assert!(consents.revoke_consent(user, "web1", Utc::now()).await.unwrap());
        assert!(!consents.revoke_consent(user, "web1", Utc::now()).await.unwrap());

        let regranted = consents
            .upsert_consent(user, "web1", &scopes(&["openid"]), Utc::now())
            .await
            .unwrap();
        assert_eq!(regranted.granted_scopes, scopes(&["openid"]));
        assert!(regranted.revoked_at.is_none());
    }

    #[tokio::test]
    async fn permissions_union_over_roles() {
        let (_dir, conn) = migrated().await;
        let rbac = conn.rbac().unwrap();
        let user = Uuid::new_v4();
        rbac.upsert_role(&Role {
            name: "editor".to_owned(),
            description: String::new(),
            permissions: scopes(&["posts:write", "posts:read"]),
        })
        .await
        .unwrap();
        rbac.upsert_role(&Role {
            name: "viewer".to_owned(),
            description: String::new(),
            permissions: scopes(&["posts:read"]),
        })
        .await
        .unwrap();

        rbac.assign_role(user, "viewer").await.unwrap();
        rbac.assign_role(user, "editor").await.unwrap();
        rbac.assign_role(user, "editor").await.unwrap();
        assert!(rbac.assign_role(user, "ghost").await.is_err());

        let roles = rbac.get_user_roles(user).await.unwrap();
        assert_eq!(roles, scopes(&["editor", "viewer"]));
        assert_eq!(
            rbac.get_permissions(&roles).await.unwrap(),
            scopes(&["posts:read", "posts:write"])
        );

        rbac.remove_role(user, "editor").await.unwrap();
        assert_eq!(rbac.get_user_roles(user).await.unwrap(), scopes(&["viewer"]));
    }
}
