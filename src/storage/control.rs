// ABOUTME: Control-plane service over tenants, clients, scopes with validated, cluster-gated writes
// ABOUTME: Secrets are sealed before persistence and settings updates are guarded by ETags
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! Control plane
//!
//! Reads go straight to the control-plane connection. Writes validate their
//! input, pass through the [`ClusterHook`], seal plaintext secret mirrors and
//! only then reach the repository.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use super::repositories::{
    AdminRepository, ClientRepository, Connection, KeyRepository, ScopeRepository,
    TenantRepository,
};
use crate::cluster::{ClusterHook, ClusterMutation};
use crate::crypto::hashing::sha256_hex;
use crate::crypto::SecretBox;
use crate::errors::{AppError, AppResult};
use crate::models::{ClientType, OidcClient, Scope, Tenant, TenantSettings};
use crate::oidc::redirect::validate_redirect_uri;

/// Control-plane access shared by every tenant
pub struct ControlPlane {
    conn: Arc<dyn Connection>,
    secret_box: SecretBox,
    cluster: Arc<dyn ClusterHook>,
}

fn missing(repo: &str) -> AppError {
    AppError::internal(format!("control-plane adapter does not provide {repo}"))
}

/// Strong ETag of a stored settings document
#[must_use]
pub fn settings_etag(settings: &TenantSettings) -> String {
    let canonical = serde_json::to_string(settings).unwrap_or_default();
    format!("\"{}\"", sha256_hex(&canonical))
}

fn etag_matches(expected: &str, current: &str) -> bool {
    let expected = expected.trim();
    expected == "*" || expected.trim_matches('"') == current.trim_matches('"')
}

impl ControlPlane {
    /// Service over an open control-plane connection
    #[must_use]
    pub fn new(conn: Arc<dyn Connection>, secret_box: SecretBox, cluster: Arc<dyn ClusterHook>) -> Self {
        Self {
            conn,
            secret_box,
            cluster,
        }
    }

    /// Underlying connection
    #[must_use]
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    /// Secret box used for `*Enc` fields
    #[must_use]
    pub const fn secret_box(&self) -> &SecretBox {
        &self.secret_box
    }

    /// Cluster write gate
    #[must_use]
    pub fn cluster(&self) -> &Arc<dyn ClusterHook> {
        &self.cluster
    }

    fn tenants(&self) -> AppResult<&dyn TenantRepository> {
        self.conn.tenants().ok_or_else(|| missing("tenants"))
    }

    fn clients(&self) -> AppResult<&dyn ClientRepository> {
        self.conn.clients().ok_or_else(|| missing("clients"))
    }

    fn scopes(&self) -> AppResult<&dyn ScopeRepository> {
        self.conn.scopes().ok_or_else(|| missing("scopes"))
    }

    /// Signing key storage
    ///
    /// # Errors
    ///
    /// Fails when the adapter does not store keys.
    pub fn keys(&self) -> AppResult<&dyn KeyRepository> {
        self.conn.keys().ok_or_else(|| missing("keys"))
    }

    /// Admin account storage
    ///
    /// # Errors
    ///
    /// Fails when the adapter does not store admins.
    pub fn admins(&self) -> AppResult<&dyn AdminRepository> {
        self.conn.admins().ok_or_else(|| missing("admins"))
    }

    // ================================
    // Reads
    // ================================

    /// Every tenant
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn list_tenants(&self) -> AppResult<Vec<Tenant>> {
        Ok(self.tenants()?.list_tenants().await?)
    }

    /// Tenant by slug
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn tenant_by_slug(&self, slug: &str) -> AppResult<Option<Tenant>> {
        if !Tenant::is_valid_slug(slug) {
            return Ok(None);
        }
        Ok(self.tenants()?.get_tenant_by_slug(slug).await?)
    }

    /// Tenant by id
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn tenant_by_id(&self, id: Uuid) -> AppResult<Option<Tenant>> {
        Ok(self.tenants()?.get_tenant_by_id(id).await?)
    }

    /// Tenant by id or slug; a UUID-shaped key is looked up as an id first
    ///
    /// # Errors
    ///
    /// Returns `TenantNotFound` on a miss.
    pub async fn resolve_tenant(&self, key: &str) -> AppResult<Tenant> {
        let key = key.trim();
        if let Ok(id) = Uuid::parse_str(key) {
            if let Some(tenant) = self.tenant_by_id(id).await? {
                return Ok(tenant);
            }
        }
        self.tenant_by_slug(key)
            .await?
            .ok_or_else(|| AppError::tenant_not_found(key))
    }

    /// Clients of a tenant
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn list_clients(&self, slug: &str) -> AppResult<Vec<OidcClient>> {
        Ok(self.clients()?.list_clients(slug).await?)
    }

    /// One client of a tenant
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn client(&self, slug: &str, client_id: &str) -> AppResult<Option<OidcClient>> {
        Ok(self.clients()?.get_client(slug, client_id).await?)
    }

    /// The tenant owning `client_id`
    ///
    /// Client ids are unique across tenants; should two tenants ever hold the
    /// same id, the first in slug order wins and the violation is logged.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn find_client(&self, client_id: &str) -> AppResult<Option<(Tenant, OidcClient)>> {
        let mut found: Option<(Tenant, OidcClient)> = None;
        for tenant in self.list_tenants().await? {
            let Some(client) = self.client(&tenant.slug, client_id).await? else {
                continue;
            };
            match &found {
                Some((owner, _)) => {
                    error!(
                        invariant = "client_id_unique",
                        client_id,
                        kept = %owner.slug,
                        ignored = %tenant.slug,
                        "client_id registered in more than one tenant"
                    );
                }
                None => found = Some((tenant, client)),
            }
        }
        Ok(found)
    }

    /// Scopes of a tenant
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn list_scopes(&self, slug: &str) -> AppResult<Vec<Scope>> {
        Ok(self.scopes()?.list_scopes(slug).await?)
    }

    /// Tenant logo as a `data:` URL
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn tenant_logo_data_url(&self, slug: &str) -> AppResult<Option<String>> {
        let bytes = self.tenants()?.get_tenant_logo(slug).await?;
        Ok(bytes.map(|b| format!("data:image/png;base64,{}", STANDARD.encode(b))))
    }

    // ================================
    // Writes
    // ================================

    /// Create a tenant with sealed settings
    ///
    /// # Errors
    ///
    /// Rejects invalid slugs, duplicate slugs (`Conflict`) and non-leader
    /// nodes (`NotLeader`).
    pub async fn create_tenant(
        &self,
        slug: &str,
        name: &str,
        mut settings: TenantSettings,
    ) -> AppResult<Tenant> {
        if !Tenant::is_valid_slug(slug) {
            return Err(AppError::invalid_input(format!("invalid tenant slug '{slug}'")));
        }
        self.cluster
            .apply(&ClusterMutation::CreateTenant {
                slug: slug.to_owned(),
            })
            .await?;

        self.secret_box.seal_settings(&mut settings)?;
        let mut tenant = Tenant::new(slug, name);
        tenant.settings = settings;
        self.tenants()?.create_tenant(&tenant).await?;
        tenant.settings.strip_plaintext();
        info!(tenant = slug, "created tenant");
        Ok(tenant)
    }

    /// Replace a tenant's settings, returning the tenant and its new ETag
    ///
    /// # Errors
    ///
    /// `PreconditionFailed` when `if_match` does not match the stored ETag,
    /// `TenantNotFound` for unknown slugs, `NotLeader` on followers.
    pub async fn update_tenant_settings(
        &self,
        slug: &str,
        mut settings: TenantSettings,
        if_match: Option<&str>,
    ) -> AppResult<(Tenant, String)> {
        let mut tenant = self
            .tenant_by_slug(slug)
            .await?
            .ok_or_else(|| AppError::tenant_not_found(slug))?;
        if let Some(expected) = if_match {
            let current = settings_etag(&tenant.settings);
            if !etag_matches(expected, &current) {
                return Err(AppError::precondition_failed("settings were modified concurrently"));
            }
        }
        self.cluster
            .apply(&ClusterMutation::UpdateTenantSettings {
                slug: slug.to_owned(),
            })
            .await?;

        self.secret_box.seal_settings(&mut settings)?;
        settings.strip_plaintext();
        tenant.settings = settings;
        tenant.updated_at = Utc::now();
        self.tenants()?.update_tenant(&tenant).await?;
        let etag = settings_etag(&tenant.settings);
        info!(tenant = slug, "updated tenant settings");
        Ok((tenant, etag))
    }

    /// Delete a tenant and its key set
    ///
    /// # Errors
    ///
    /// `TenantNotFound` for unknown slugs, `NotLeader` on followers.
    pub async fn delete_tenant(&self, slug: &str) -> AppResult<()> {
        if self.tenant_by_slug(slug).await?.is_none() {
            return Err(AppError::tenant_not_found(slug));
        }
        self.cluster
            .apply(&ClusterMutation::DeleteTenant {
                slug: slug.to_owned(),
            })
            .await?;
        self.tenants()?.delete_tenant(slug).await?;
        info!(tenant = slug, "deleted tenant");
        Ok(())
    }

    /// Create or replace a client
    ///
    /// # Errors
    ///
    /// Rejects invalid redirect URIs, scope lists without `openid`,
    /// confidential clients without a secret, and a `client_id` owned by a
    /// different tenant (`Conflict`).
    pub async fn upsert_client(&self, slug: &str, mut client: OidcClient) -> AppResult<OidcClient> {
        if self.tenant_by_slug(slug).await?.is_none() {
            return Err(AppError::tenant_not_found(slug));
        }
        validate_client(&client)?;
        if let Some((owner, _)) = self.find_client(&client.client_id).await? {
            if owner.slug != slug {
                return Err(AppError::conflict(format!(
                    "client_id '{}' already exists in another tenant",
                    client.client_id
                )));
            }
        }
        self.cluster
            .apply(&ClusterMutation::UpsertClient {
                slug: slug.to_owned(),
                client_id: client.client_id.clone(),
            })
            .await?;

        self.secret_box.seal_client(&mut client)?;
        self.clients()?.upsert_client(slug, &client).await?;
        info!(tenant = slug, client_id = %client.client_id, "upserted client");
        Ok(client)
    }

    /// Delete a client
    ///
    /// # Errors
    ///
    /// `NotFound` when absent, `NotLeader` on followers.
    pub async fn delete_client(&self, slug: &str, client_id: &str) -> AppResult<()> {
        self.cluster
            .apply(&ClusterMutation::DeleteClient {
                slug: slug.to_owned(),
                client_id: client_id.to_owned(),
            })
            .await?;
        if !self.clients()?.delete_client(slug, client_id).await? {
            return Err(AppError::not_found(format!("client '{client_id}'")));
        }
        info!(tenant = slug, client_id, "deleted client");
        Ok(())
    }

    /// Create or replace a custom scope
    ///
    /// # Errors
    ///
    /// Rejects empty names and attempts to redefine a system scope.
    pub async fn upsert_scope(&self, slug: &str, mut scope: Scope) -> AppResult<Scope> {
        let name = scope.name.trim().to_owned();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(AppError::invalid_input("scope name must be a single non-empty token"));
        }
        let existing = self.list_scopes(slug).await?;
        if existing.iter().any(|s| s.name == name && s.system) {
            return Err(AppError::forbidden(format!("scope '{name}' is a system scope")));
        }
        self.cluster
            .apply(&ClusterMutation::UpsertScope {
                slug: slug.to_owned(),
                name: name.clone(),
            })
            .await?;
        scope.name = name;
        scope.system = false;
        self.scopes()?.upsert_scope(slug, &scope).await?;
        Ok(scope)
    }

    /// Delete a custom scope
    ///
    /// # Errors
    ///
    /// `Forbidden` for system scopes, `NotFound` when absent.
    pub async fn delete_scope(&self, slug: &str, name: &str) -> AppResult<()> {
        let scopes = self.list_scopes(slug).await?;
        match scopes.iter().find(|s| s.name == name) {
            None => return Err(AppError::not_found(format!("scope '{name}'"))),
            Some(scope) if scope.system => {
                return Err(AppError::forbidden(format!("scope '{name}' is a system scope")));
            }
            Some(_) => {}
        }
        self.cluster
            .apply(&ClusterMutation::DeleteScope {
                slug: slug.to_owned(),
                name: name.to_owned(),
            })
            .await?;
        self.scopes()?.delete_scope(slug, name).await?;
        Ok(())
    }
}

fn validate_client(client: &OidcClient) -> AppResult<()> {
    if client.client_id.trim().is_empty() {
        return Err(AppError::missing_field("client_id"));
    }
    if client.redirect_uris.is_empty() {
        return Err(AppError::invalid_input("at least one redirect_uri is required"));
    }
    for uri in &client.redirect_uris {
        validate_redirect_uri(uri)?;
    }
    if !client.scopes.iter().any(|s| s == "openid") {
        return Err(AppError::invalid_input("client scopes must include openid"));
    }
    let has_secret = !client.secret.is_empty() || !client.secret_enc.is_empty();
    match client.client_type {
        ClientType::Confidential if !has_secret => Err(AppError::invalid_input(
            "confidential clients require a secret",
        )),
        ClientType::Public if has_secret => {
            Err(AppError::invalid_input("public clients cannot have a secret"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{NoopClusterHook, StaticClusterHook};
    use crate::crypto::MasterKey;
    use crate::models::SmtpSettings;
    use crate::storage::fs::FsConnection;

    async fn plane(cluster: Arc<dyn ClusterHook>) -> (tempfile::TempDir, ControlPlane) {
        let dir = tempfile::tempdir().unwrap();
        let conn = FsConnection::open(dir.path().to_path_buf()).await.unwrap();
        let plane = ControlPlane::new(
            Arc::new(conn),
            SecretBox::new(&MasterKey::from_bytes([3; 32])),
            cluster,
        );
        (dir, plane)
    }

    fn web1() -> OidcClient {
        OidcClient::new_public("web1", vec!["https://app.acme.test/cb".to_owned()])
    }

    #[tokio::test]
    async fn duplicate_client_id_across_tenants_is_conflict() {
        let (_dir, plane) = plane(Arc::new(NoopClusterHook)).await;
        plane.create_tenant("acme", "Acme", TenantSettings::default()).await.unwrap();
        plane.create_tenant("other", "Other", TenantSettings::default()).await.unwrap();

        plane.upsert_client("acme", web1()).await.unwrap();
        plane.upsert_client("acme", web1()).await.unwrap();
        let err = plane.upsert_client("other", web1()).await.unwrap_err();
        assert_eq!(err.http_status(), 409);

        let (owner, _) = plane.find_client("web1").await.unwrap().unwrap();
        assert_eq!(owner.slug, "acme");
    }

    #[tokio::test]
    async fn client_validation() {
        let (_dir, plane) = plane(Arc::new(NoopClusterHook)).await;
        plane.create_tenant("acme", "Acme", TenantSettings::default()).await.unwrap();

        let mut insecure = web1();
        insecure.redirect_uris = vec!["http://app.acme.test/cb".to_owned()];
        assert!(plane.upsert_client("acme", insecure).await.is_err());

        let mut no_openid = web1();
        no_openid.scopes = vec!["email".to_owned()];
        assert!(plane.upsert_client("acme", no_openid).await.is_err());

        let mut confidential = web1();
        confidential.client_type = ClientType::Confidential;
        assert!(plane.upsert_client("acme", confidential.clone()).await.is_err());
        confidential.secret = "s3cret".to_owned();
        let stored = plane.upsert_client("acme", confidential).await.unwrap();
        assert!(stored.secret.is_empty());
        assert_eq!(plane.secret_box().open(&stored.secret_enc).unwrap(), "s3cret");
    }

    #[tokio::test]
    async fn settings_update_checks_etag_and_seals() {
        let (_dir, plane) = plane(Arc::new(NoopClusterHook)).await;
        let tenant = plane.create_tenant("acme", "Acme", TenantSettings::default()).await.unwrap();
        let etag = settings_etag(&tenant.settings);

        let settings = TenantSettings {
            smtp: Some(SmtpSettings {
                host: "smtp.acme.test".to_owned(),
                password: "pw".to_owned(),
                ..SmtpSettings::default()
            }),
            ..TenantSettings::default()
        };
        let (updated, new_etag) = plane
            .update_tenant_settings("acme", settings.clone(), Some(&etag))
            .await
            .unwrap();
        assert_ne!(etag, new_etag);
        let smtp = updated.settings.smtp.unwrap();
        assert!(smtp.password.is_empty());
        assert_eq!(plane.secret_box().open(&smtp.password_enc).unwrap(), "pw");

        let err = plane
            .update_tenant_settings("acme", settings, Some(&etag))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 412);
    }

    #[tokio::test]
    async fn system_scopes_cannot_be_deleted() {
        let (_dir, plane) = plane(Arc::new(NoopClusterHook)).await;
        plane.create_tenant("acme", "Acme", TenantSettings::default()).await.unwrap();
        assert_eq!(plane.delete_scope("acme", "openid").await.unwrap_err().http_status(), 403);

        plane
            .upsert_scope(
                "acme",
                Scope {
                    name: "billing:read".to_owned(),
                    description: String::new(),
                    system: true,
                },
            )
            .await
            .unwrap();
        plane.delete_scope("acme", "billing:read").await.unwrap();
        assert_eq!(plane.delete_scope("acme", "billing:read").await.unwrap_err().http_status(), 404);
    }

    #[tokio::test]
    async fn followers_reject_writes() {
        let (_dir, plane) = plane(Arc::new(StaticClusterHook::new(false))).await;
        let err = plane
            .create_tenant("acme", "Acme", TenantSettings::default())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 503);
        assert!(plane.tenant_by_slug("acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn uuid_keys_resolve_by_id_first() {
        let (_dir, plane) = plane(Arc::new(NoopClusterHook)).await;
        let tenant = plane.create_tenant("acme", "Acme", TenantSettings::default()).await.unwrap();
        assert_eq!(plane.resolve_tenant(&tenant.id.to_string()).await.unwrap().slug, "acme");
        assert_eq!(plane.resolve_tenant("acme").await.unwrap().id, tenant.id);
        assert_eq!(
            plane.resolve_tenant(&Uuid::new_v4().to_string()).await.unwrap_err().http_status(),
            404
        );
    }
}
