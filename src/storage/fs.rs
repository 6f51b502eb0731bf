// ABOUTME: Filesystem adapter holding the control plane as YAML documents
// ABOUTME: One directory per tenant plus key sets and admin accounts; writes are atomic renames
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! Filesystem control plane
//!
//! ```text
//! <root>/tenants/<slug>/tenant.yaml
//! <root>/tenants/<slug>/clients.yaml
//! <root>/tenants/<slug>/scopes.yaml
//! <root>/tenants/<slug>/logo.png
//! <root>/keys/<slug|global>.yaml
//! <root>/admins.yaml
//! ```
//!
//! Plaintext secret mirrors are cleared before anything is serialized.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::errors::{DatabaseError, DatabaseResult};
use super::registry::{Adapter, AdapterConfig};
use super::repositories::{
    AdminRepository, ClientRepository, Connection, KeyRepository, ScopeRepository,
    TenantRepository,
};
use crate::models::{AdminAccount, KeyOwner, OidcClient, Scope, SigningKeyRecord, Tenant};

const TENANTS_DIR: &str = "tenants";
const KEYS_DIR: &str = "keys";
const TENANT_FILE: &str = "tenant.yaml";
const CLIENTS_FILE: &str = "clients.yaml";
const SCOPES_FILE: &str = "scopes.yaml";
const LOGO_FILE: &str = "logo.png";
const ADMINS_FILE: &str = "admins.yaml";

/// `fs` adapter
pub struct FsAdapter;

#[async_trait]
impl Adapter for FsAdapter {
    fn name(&self) -> &'static str {
        "fs"
    }

    async fn connect(&self, config: &AdapterConfig) -> DatabaseResult<Arc<dyn Connection>> {
        let root = config
            .fs_root
            .clone()
            .ok_or_else(|| DatabaseError::InvalidConfig("fs adapter requires fs_root".to_owned()))?;
        let conn = FsConnection::open(root).await?;
        Ok(Arc::new(conn))
    }
}

/// Open filesystem store
pub struct FsConnection {
    root: PathBuf,
    lock: RwLock<()>,
}

impl FsConnection {
    /// Create the directory layout if absent
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub async fn open(root: PathBuf) -> DatabaseResult<Self> {
        fs::create_dir_all(root.join(TENANTS_DIR)).await?;
        fs::create_dir_all(root.join(KEYS_DIR)).await?;
        debug!(root = %root.display(), "opened filesystem control plane");
        Ok(Self {
            root,
            lock: RwLock::new(()),
        })
    }

    /// Data root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tenant_dir(&self, slug: &str) -> DatabaseResult<PathBuf> {
        if !Tenant::is_valid_slug(slug) {
            return Err(DatabaseError::InvalidConfig(format!("invalid tenant slug '{slug}'")));
        }
        Ok(self.root.join(TENANTS_DIR).join(slug))
    }

    fn key_file(&self, owner: &KeyOwner) -> DatabaseResult<PathBuf> {
        if let KeyOwner::Tenant(slug) = owner {
            if !Tenant::is_valid_slug(slug) {
                return Err(DatabaseError::InvalidConfig(format!("invalid tenant slug '{slug}'")));
            }
        }
        Ok(self
            .root
            .join(KEYS_DIR)
            .join(format!("{}.yaml", owner.storage_name())))
    }

    async fn require_tenant_dir(&self, slug: &str) -> DatabaseResult<PathBuf> {
        let dir = self.tenant_dir(slug)?;
        if fs::try_exists(dir.join(TENANT_FILE)).await? {
            Ok(dir)
        } else {
            Err(DatabaseError::NotFound {
                entity_type: "tenant",
                entity_id: slug.to_owned(),
            })
        }
    }

    async fn read_tenant_unlocked(&self, slug: &str) -> DatabaseResult<Option<Tenant>> {
        let dir = self.tenant_dir(slug)?;
        read_yaml(&dir.join(TENANT_FILE)).await
    }

    async fn list_tenants_unlocked(&self) -> DatabaseResult<Vec<Tenant>> {
        let mut tenants = Vec::new();
        let mut entries = match fs::read_dir(self.root.join(TENANTS_DIR)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(tenants),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path().join(TENANT_FILE);
            match read_yaml::<Tenant>(&path).await {
                Ok(Some(tenant)) => tenants.push(tenant),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable tenant document"),
            }
        }
        tenants.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(tenants)
    }

    async fn read_clients_unlocked(&self, slug: &str) -> DatabaseResult<Vec<OidcClient>> {
        let dir = self.require_tenant_dir(slug).await?;
        Ok(read_yaml(&dir.join(CLIENTS_FILE)).await?.unwrap_or_default())
    }

    async fn read_scopes_unlocked(&self, slug: &str) -> DatabaseResult<Vec<Scope>> {
        let dir = self.require_tenant_dir(slug).await?;
        Ok(read_yaml(&dir.join(SCOPES_FILE)).await?.unwrap_or_default())
    }

    async fn read_admins_unlocked(&self) -> DatabaseResult<Vec<AdminAccount>> {
        Ok(read_yaml(&self.root.join(ADMINS_FILE)).await?.unwrap_or_default())
    }
}

async fn read_yaml<T: DeserializeOwned>(path: &Path) -> DatabaseResult<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(serde_yaml::from_str(&contents)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write through a sibling temp file and rename into place
async fn write_yaml<T: Serialize + ?Sized>(path: &Path, value: &T) -> DatabaseResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let contents = serde_yaml::to_string(value)?;
    let tmp = path.with_extension(format!("yaml.{}.tmp", Uuid::new_v4().simple()));
    fs::write(&tmp, contents).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

fn sanitized_tenant(tenant: &Tenant) -> Tenant {
    let mut doc = tenant.clone();
    doc.settings.strip_plaintext();
    doc
}

fn sanitized_client(client: &OidcClient) -> OidcClient {
    let mut doc = client.clone();
    doc.secret.clear();
    doc
}

#[async_trait]
impl Connection for FsConnection {
    fn driver(&self) -> &'static str {
        "fs"
    }

    async fn ping(&self) -> DatabaseResult<()> {
        fs::metadata(self.root.join(TENANTS_DIR)).await?;
        Ok(())
    }

    async fn close(&self) {}

    fn tenants(&self) -> Option<&dyn TenantRepository> {
        Some(self)
    }

    fn clients(&self) -> Option<&dyn ClientRepository> {
        Some(self)
    }

    fn scopes(&self) -> Option<&dyn ScopeRepository> {
        Some(self)
    }

    fn keys(&self) -> Option<&dyn KeyRepository> {
        Some(self)
    }

    fn admins(&self) -> Option<&dyn AdminRepository> {
        Some(self)
    }
}

#[async_trait]
impl TenantRepository for FsConnection {
    async fn list_tenants(&self) -> DatabaseResult<Vec<Tenant>> {
        let _guard = self.lock.read().await;
        self.list_tenants_unlocked().await
    }

    async fn get_tenant_by_slug(&self, slug: &str) -> DatabaseResult<Option<Tenant>> {
        if !Tenant::is_valid_slug(slug) {
            return Ok(None);
        }
        let _guard = self.lock.read().await;
        self.read_tenant_unlocked(slug).await
    }

    async fn get_tenant_by_id(&self, id: Uuid) -> DatabaseResult<Option<Tenant>> {
        let _guard = self.lock.read().await;
        Ok(self
            .list_tenants_unlocked()
            .await?
            .into_iter()
            .find(|t| t.id == id))
    }

    async fn create_tenant(&self, tenant: &Tenant) -> DatabaseResult<()> {
        let dir = self.tenant_dir(&tenant.slug)?;
        let _guard = self.lock.write().await;
        if fs::try_exists(dir.join(TENANT_FILE)).await? {
            return Err(DatabaseError::Conflict {
                entity_type: "tenant",
                field: "slug",
            });
        }
        write_yaml(&dir.join(TENANT_FILE), &sanitized_tenant(tenant)).await?;
        if !fs::try_exists(dir.join(SCOPES_FILE)).await? {
            write_yaml(&dir.join(SCOPES_FILE), &Scope::system_defaults()).await?;
        }
        if !fs::try_exists(dir.join(CLIENTS_FILE)).await? {
            write_yaml(&dir.join(CLIENTS_FILE), &Vec::<OidcClient>::new()).await?;
        }
        Ok(())
    }

    async fn update_tenant(&self, tenant: &Tenant) -> DatabaseResult<()> {
        let _guard = self.lock.write().await;
        let dir = self.require_tenant_dir(&tenant.slug).await?;
        write_yaml(&dir.join(TENANT_FILE), &sanitized_tenant(tenant)).await
    }

    async fn delete_tenant(&self, slug: &str) -> DatabaseResult<()> {
        let _guard = self.lock.write().await;
        let dir = self.require_tenant_dir(slug).await?;
        fs::remove_dir_all(dir).await?;
        let keys = self.key_file(&KeyOwner::Tenant(slug.to_owned()))?;
        match fs::remove_file(keys).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn get_tenant_logo(&self, slug: &str) -> DatabaseResult<Option<Vec<u8>>> {
        let _guard = self.lock.read().await;
        let dir = self.tenant_dir(slug)?;
        match fs::read(dir.join(LOGO_FILE)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ClientRepository for FsConnection {
    async fn list_clients(&self, slug: &str) -> DatabaseResult<Vec<OidcClient>> {
        let _guard = self.lock.read().await;
        self.read_clients_unlocked(slug).await
    }

    async fn get_client(&self, slug: &str, client_id: &str) -> DatabaseResult<Option<OidcClient>> {
        let _guard = self.lock.read().await;
        Ok(self
            .read_clients_unlocked(slug)
            .await?
            .into_iter()
            .find(|c| c.client_id == client_id))
    }

    async fn upsert_client(&self, slug: &str, client: &OidcClient) -> DatabaseResult<()> {
        let _guard = self.lock.write().await;
        let mut clients = self.read_clients_unlocked(slug).await?;
        let doc = sanitized_client(client);
        match clients.iter_mut().find(|c| c.client_id == client.client_id) {
            Some(existing) => *existing = doc,
            None => clients.push(doc),
        }
        let dir = self.tenant_dir(slug)?;
        write_yaml(&dir.join(CLIENTS_FILE), &clients).await
    }

    async fn delete_client(&self, slug: &str, client_id: &str) -> DatabaseResult<bool> {
        let _guard = self.lock.write().await;
        let mut clients = self.read_clients_unlocked(slug).await?;
        let before = clients.len();
        clients.retain(|c| c.client_id != client_id);
        if clients.len() == before {
            return Ok(false);
        }
        let dir = self.tenant_dir(slug)?;
        write_yaml(&dir.join(CLIENTS_FILE), &clients).await?;
        Ok(true)
    }
}

#[async_trait]
impl ScopeRepository for FsConnection {
    async fn list_scopes(&self, slug: &str) -> DatabaseResult<Vec<Scope>> {
        let _guard = self.lock.read().await;
        self.read_scopes_unlocked(slug).await
    }

    async fn upsert_scope(&self, slug: &str, scope: &Scope) -> DatabaseResult<()> {
        let _guard = self.lock.write().await;
        let mut scopes = self.read_scopes_unlocked(slug).await?;
        match scopes.iter_mut().find(|s| s.name == scope.name) {
            Some(existing) => *existing = scope.clone(),
            None => scopes.push(scope.clone()),
        }
        let dir = self.tenant_dir(slug)?;
        write_yaml(&dir.join(SCOPES_FILE), &scopes).await
    }

    async fn delete_scope(&self, slug: &str, name: &str) -> DatabaseResult<bool> {
        let _guard = self.lock.write().await;
        let mut scopes = self.read_scopes_unlocked(slug).await?;
        let before = scopes.len();
        scopes.retain(|s| s.name != name);
        if scopes.len() == before {
            return Ok(false);
        }
        let dir = self.tenant_dir(slug)?;
        write_yaml(&dir.join(SCOPES_FILE), &scopes).await?;
        Ok(true)
    }
}

#[async_trait]
impl KeyRepository for FsConnection {
    async fn load_keys(&self, owner: &KeyOwner) -> DatabaseResult<Vec<SigningKeyRecord>> {
        let path = self.key_file(owner)?;
        let _guard = self.lock.read().await;
        Ok(read_yaml(&path).await?.unwrap_or_default())
    }

    async fn save_keys(&self, owner: &KeyOwner, keys: &[SigningKeyRecord]) -> DatabaseResult<()> {
        let path = self.key_file(owner)?;
        let _guard = self.lock.write().await;
        write_yaml(&path, keys).await
    }
}

#[async_trait]
impl AdminRepository for FsConnection {
    async fn list_admins(&self) -> DatabaseResult<Vec<AdminAccount>> {
        let _guard = self.lock.read().await;
        self.read_admins_unlocked().await
    }

    async fn get_admin_by_email(&self, email: &str) -> DatabaseResult<Option<AdminAccount>> {
        let email = email.trim().to_lowercase();
        let _guard = self.lock.read().await;
        Ok(self
            .read_admins_unlocked()
            .await?
            .into_iter()
            .find(|a| a.email == email))
    }

    async fn get_admin_by_id(&self, id: Uuid) -> DatabaseResult<Option<AdminAccount>> {
        let _guard = self.lock.read().await;
        Ok(self
            .read_admins_unlocked()
            .await?
            .into_iter()
            .find(|a| a.id == id))
    }

    async fn save_admin(&self, admin: &AdminAccount) -> DatabaseResult<()> {
        let _guard = self.lock.write().await;
        let mut admins = self.read_admins_unlocked().await?;
        if admins
            .iter()
            .any(|a| a.email == admin.email && a.id != admin.id)
        {
            return Err(DatabaseError::Conflict {
                entity_type: "admin",
                field: "email",
            });
        }
        match admins.iter_mut().find(|a| a.id == admin.id) {
            Some(existing) => *existing = admin.clone(),
            None => admins.push(admin.clone()),
        }
        write_yaml(&self.root.join(ADMINS_FILE), &admins).await
    }
}
