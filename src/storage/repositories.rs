// ABOUTME: Repository trait definitions for the control plane and the tenant data plane
// ABOUTME: Connections expose each repository as an optional handle; absent means unsupported
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::DatabaseResult;
use super::migrations::Migration;
use crate::models::{
    AdminAccount, Consent, EmailToken, EmailTokenPurpose, Identity, KeyOwner, MfaTotp, OidcClient,
    RefreshToken, Role, Scope, SigningKeyRecord, Tenant, TrustedDevice, User,
};

// ================================
// Adapter connection
// ================================

/// Live connection produced by an adapter
///
/// Repository accessors default to `None`; an adapter overrides the ones it
/// implements.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Adapter name that opened this connection
    fn driver(&self) -> &'static str;

    /// Round-trip health check
    async fn ping(&self) -> DatabaseResult<()>;

    /// Release resources; further use is an error
    async fn close(&self);

    /// Tenants
    fn tenants(&self) -> Option<&dyn TenantRepository> {
        None
    }

    /// OIDC clients
    fn clients(&self) -> Option<&dyn ClientRepository> {
        None
    }

    /// Scopes
    fn scopes(&self) -> Option<&dyn ScopeRepository> {
        None
    }

    /// Signing keys
    fn keys(&self) -> Option<&dyn KeyRepository> {
        None
    }

    /// Admin accounts
    fn admins(&self) -> Option<&dyn AdminRepository> {
        None
    }

    /// Users and identities
    fn users(&self) -> Option<&dyn UserRepository> {
        None
    }

    /// Refresh tokens
    fn refresh_tokens(&self) -> Option<&dyn RefreshTokenRepository> {
        None
    }

    /// TOTP, recovery codes, trusted devices
    fn mfa(&self) -> Option<&dyn MfaRepository> {
        None
    }

    /// Consents
    fn consents(&self) -> Option<&dyn ConsentRepository> {
        None
    }

    /// Roles and permissions
    fn rbac(&self) -> Option<&dyn RbacRepository> {
        None
    }

    /// Email verification and reset tokens
    fn email_tokens(&self) -> Option<&dyn EmailTokenRepository> {
        None
    }

    /// Schema migration hooks
    fn migration_executor(&self) -> Option<&dyn MigrationExecutor> {
        None
    }
}

// ================================
// Control plane
// ================================

/// Tenant documents
#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// All tenants ordered by slug
    async fn list_tenants(&self) -> DatabaseResult<Vec<Tenant>>;

    /// Tenant by slug
    async fn get_tenant_by_slug(&self, slug: &str) -> DatabaseResult<Option<Tenant>>;

    /// Tenant by id
    async fn get_tenant_by_id(&self, id: Uuid) -> DatabaseResult<Option<Tenant>>;

    /// Create; `Conflict` when the slug is taken
    async fn create_tenant(&self, tenant: &Tenant) -> DatabaseResult<()>;

    /// Replace; `NotFound` when missing
    async fn update_tenant(&self, tenant: &Tenant) -> DatabaseResult<()>;

    /// Remove the tenant and its documents
    async fn delete_tenant(&self, slug: &str) -> DatabaseResult<()>;

    /// Raw logo bytes when present
    async fn get_tenant_logo(&self, slug: &str) -> DatabaseResult<Option<Vec<u8>>>;
}

/// OIDC clients of a tenant
#[async_trait]
pub trait ClientRepository: Send + Sync {
    /// All clients of a tenant
    async fn list_clients(&self, slug: &str) -> DatabaseResult<Vec<OidcClient>>;

    /// One client
    async fn get_client(&self, slug: &str, client_id: &str) -> DatabaseResult<Option<OidcClient>>;

    /// Insert or replace by `client_id`
    async fn upsert_client(&self, slug: &str, client: &OidcClient) -> DatabaseResult<()>;

    /// Remove; `false` when absent
    async fn delete_client(&self, slug: &str, client_id: &str) -> DatabaseResult<bool>;
}

/// Scopes of a tenant
#[async_trait]
pub trait ScopeRepository: Send + Sync {
    /// All scopes
    async fn list_scopes(&self, slug: &str) -> DatabaseResult<Vec<Scope>>;

    /// Insert or replace by name
    async fn upsert_scope(&self, slug: &str, scope: &Scope) -> DatabaseResult<()>;

    /// Remove; `false` when absent
    async fn delete_scope(&self, slug: &str, name: &str) -> DatabaseResult<bool>;
}

/// Signing key sets
#[async_trait]
pub trait KeyRepository: Send + Sync {
    /// Every record of a key set, empty when none exist
    async fn load_keys(&self, owner: &KeyOwner) -> DatabaseResult<Vec<SigningKeyRecord>>;

    /// Replace the whole key set
    async fn save_keys(&self, owner: &KeyOwner, keys: &[SigningKeyRecord]) -> DatabaseResult<()>;
}

/// Operator accounts
#[async_trait]
pub trait AdminRepository: Send + Sync {
    /// All admins
    async fn list_admins(&self) -> DatabaseResult<Vec<AdminAccount>>;

    /// Admin by lowercase email
    async fn get_admin_by_email(&self, email: &str) -> DatabaseResult<Option<AdminAccount>>;

    /// Admin by id
    async fn get_admin_by_id(&self, id: Uuid) -> DatabaseResult<Option<AdminAccount>>;

    /// Insert or replace by id
    async fn save_admin(&self, admin: &AdminAccount) -> DatabaseResult<()>;
}

// ================================
// Data plane
// ================================

/// Users and linked identities
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user and optionally its first identity in one transaction
    async fn create_user(&self, user: &User, identity: Option<&Identity>) -> DatabaseResult<()>;

    /// User by id
    async fn get_user_by_id(&self, id: Uuid) -> DatabaseResult<Option<User>>;

    /// User by lowercase email within a tenant
    async fn get_user_by_email(&self, tenant_id: Uuid, email: &str) -> DatabaseResult<Option<User>>;

    /// Replace profile fields
    async fn update_user(&self, user: &User) -> DatabaseResult<()>;

    /// Set the verified flag on the user and its password identity
    async fn set_email_verified(&self, id: Uuid, verified: bool) -> DatabaseResult<()>;

    /// Set or clear the disable window
    async fn set_disabled(
        &self,
        id: Uuid,
        disabled_at: Option<DateTime<Utc>>,
        disabled_until: Option<DateTime<Utc>>,
        reason: Option<&str>,
    ) -> DatabaseResult<()>;

    /// Identity of a user for a provider
    async fn get_identity(&self, user_id: Uuid, provider: &str) -> DatabaseResult<Option<Identity>>;

    /// Replace the password hash of the password identity
    async fn update_password_hash(&self, user_id: Uuid, password_hash: &str) -> DatabaseResult<()>;
}

/// Opaque refresh token rows
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Insert a row
    async fn create_refresh_token(&self, token: &RefreshToken) -> DatabaseResult<()>;

    /// Row by hex hash
    async fn get_refresh_token_by_hash(&self, token_hash: &str)
        -> DatabaseResult<Option<RefreshToken>>;

    /// Set `revoked_at` if unset; `true` when this call revoked it
    async fn revoke_refresh_token(&self, id: Uuid, at: DateTime<Utc>) -> DatabaseResult<bool>;

    /// Revoke every active row of a user
    async fn revoke_all_for_user(&self, user_id: Uuid, at: DateTime<Utc>) -> DatabaseResult<u64>;
}

/// TOTP state
#[async_trait]
pub trait MfaRepository: Send + Sync {
    /// Enrollment row
    async fn get_totp(&self, user_id: Uuid) -> DatabaseResult<Option<MfaTotp>>;

    /// Insert or replace the secret, resetting confirmation and last use
    async fn upsert_totp(&self, user_id: Uuid, secret_enc: &str, at: DateTime<Utc>)
        -> DatabaseResult<()>;

    /// Mark confirmed
    async fn confirm_totp(&self, user_id: Uuid, at: DateTime<Utc>) -> DatabaseResult<()>;

    /// Advance the last accepted code time; `false` when `at` is not newer
    async fn mark_totp_used(&self, user_id: Uuid, at: DateTime<Utc>) -> DatabaseResult<bool>;

    /// Remove enrollment, recovery codes and trusted devices
    async fn delete_totp(&self, user_id: Uuid) -> DatabaseResult<()>;

    /// Replace the recovery code set
    async fn replace_recovery_codes(
        &self,
        user_id: Uuid,
        code_hashes: &[String],
        at: DateTime<Utc>,
    ) -> DatabaseResult<()>;

    /// Atomically mark an unused code as used; `true` on success
    async fn consume_recovery_code(
        &self,
        user_id: Uuid,
        code_hash: &str,
        at: DateTime<Utc>,
    ) -> DatabaseResult<bool>;

    /// Remember a device
    async fn add_trusted_device(&self, device: &TrustedDevice) -> DatabaseResult<()>;

    /// Whether an unexpired device hash exists
    async fn is_trusted_device(
        &self,
        user_id: Uuid,
        device_hash: &str,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool>;
}

/// Consent ledger
#[async_trait]
pub trait ConsentRepository: Send + Sync {
    /// Union `scopes` into the grant and clear any revocation
    async fn upsert_consent(
        &self,
        user_id: Uuid,
        client_id: &str,
        scopes: &[String],
        at: DateTime<Utc>,
    ) -> DatabaseResult<Consent>;

    /// Current grant
    async fn get_consent(&self, user_id: Uuid, client_id: &str) -> DatabaseResult<Option<Consent>>;

    /// Revoke; `false` when there was nothing active
    async fn revoke_consent(
        &self,
        user_id: Uuid,
        client_id: &str,
        at: DateTime<Utc>,
    ) -> DatabaseResult<bool>;
}

/// Roles and permissions
#[async_trait]
pub trait RbacRepository: Send + Sync {
    /// Insert or replace a role
    async fn upsert_role(&self, role: &Role) -> DatabaseResult<()>;

    /// Grant a role
    async fn assign_role(&self, user_id: Uuid, role: &str) -> DatabaseResult<()>;

    /// Withdraw a role
    async fn remove_role(&self, user_id: Uuid, role: &str) -> DatabaseResult<()>;

    /// Role names of a user, sorted
    async fn get_user_roles(&self, user_id: Uuid) -> DatabaseResult<Vec<String>>;

    /// Distinct permissions of a role set, sorted
    async fn get_permissions(&self, roles: &[String]) -> DatabaseResult<Vec<String>>;
}

/// Emailed one-shot tokens
#[async_trait]
pub trait EmailTokenRepository: Send + Sync {
    /// Insert a row
    async fn create_email_token(&self, token: &EmailToken) -> DatabaseResult<()>;

    /// Atomically consume an unused, unexpired token
    async fn consume_email_token(
        &self,
        token_hash: &str,
        purpose: EmailTokenPurpose,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Option<EmailToken>>;
}

/// Hooks the migrator drives
#[async_trait]
pub trait MigrationExecutor: Send + Sync {
    /// Create `_migrations` if missing
    async fn ensure_migrations_table(&self) -> DatabaseResult<()>;

    /// Highest applied version
    async fn applied_watermark(&self) -> DatabaseResult<Option<i64>>;

    /// Run the script and record it in one transaction
    async fn apply_migration(&self, migration: &Migration, at: DateTime<Utc>) -> DatabaseResult<()>;
}
