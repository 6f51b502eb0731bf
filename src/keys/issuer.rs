// ABOUTME: Effective issuer computation per tenant: global, path, domain, or verbatim override
// ABOUTME: Also decides which key set signs a tenant's tokens
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use url::Url;

use crate::models::{IssuerMode, KeyOwner, Tenant};

/// Builds `iss` values and related URLs
#[derive(Debug, Clone)]
pub struct IssuerResolver {
    base_url: String,
    default_mode: IssuerMode,
}

impl IssuerResolver {
    /// Resolver for a base URL and the mode used by tenants without their own
    #[must_use]
    pub fn new(base_url: &str, default_mode: IssuerMode) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            default_mode,
        }
    }

    /// Base URL without a trailing slash
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base_url
    }

    /// Issuer mode in effect for a tenant
    #[must_use]
    pub fn mode_for(&self, tenant: &Tenant) -> IssuerMode {
        tenant.settings.issuer_mode.unwrap_or(self.default_mode)
    }

    fn override_for(tenant: &Tenant) -> Option<&str> {
        tenant
            .settings
            .issuer_override
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// `iss` for tokens minted on behalf of a tenant
    #[must_use]
    pub fn issuer_for(&self, tenant: &Tenant) -> String {
        if let Some(custom) = Self::override_for(tenant) {
            return custom.to_owned();
        }
        match self.mode_for(tenant) {
            IssuerMode::Global => self.base_url.clone(),
            IssuerMode::Path => format!("{}/t/{}", self.base_url, tenant.slug),
            IssuerMode::Domain => {
                let host = Url::parse(&self.base_url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_owned))
                    .unwrap_or_default();
                format!("https://{}.{host}", tenant.slug)
            }
        }
    }

    /// Key set that signs the tenant's tokens
    #[must_use]
    pub fn key_owner(&self, tenant: &Tenant) -> KeyOwner {
        if Self::override_for(tenant).is_none() && self.mode_for(tenant) == IssuerMode::Global {
            KeyOwner::Global
        } else {
            KeyOwner::Tenant(tenant.slug.clone())
        }
    }

    /// JWKS URL publishing the keys of `owner`
    #[must_use]
    pub fn jwks_uri(&self, owner: &KeyOwner) -> String {
        match owner {
            KeyOwner::Global => format!("{}/.well-known/jwks.json", self.base_url),
            KeyOwner::Tenant(slug) => format!("{}/.well-known/jwks/{slug}.json", self.base_url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(mode: Option<IssuerMode>, custom: Option<&str>) -> Tenant {
        let mut t = Tenant::new("acme", "Acme");
        t.settings.issuer_mode = mode;
        t.settings.issuer_override = custom.map(str::to_owned);
        t
    }

    #[test]
    fn modes() {
        let resolver = IssuerResolver::new("https://id.example.com/", IssuerMode::Global);
        assert_eq!(resolver.issuer_for(&tenant(None, None)), "https://id.example.com");
        assert_eq!(
            resolver.issuer_for(&tenant(Some(IssuerMode::Path), None)),
            "https://id.example.com/t/acme"
        );
        assert_eq!(
            resolver.issuer_for(&tenant(Some(IssuerMode::Domain), None)),
            "https://acme.id.example.com"
        );
        assert_eq!(
            resolver.issuer_for(&tenant(Some(IssuerMode::Path), Some("https://login.acme.test"))),
            "https://login.acme.test"
        );
    }

    #[test]
    fn key_owner_follows_mode() {
        let resolver = IssuerResolver::new("https://id.example.com", IssuerMode::Path);
        assert_eq!(
            resolver.key_owner(&tenant(None, None)),
            KeyOwner::Tenant("acme".to_owned())
        );
        assert_eq!(
            resolver.key_owner(&tenant(Some(IssuerMode::Global), None)),
            KeyOwner::Global
        );
        assert_eq!(
            resolver.jwks_uri(&KeyOwner::Tenant("acme".to_owned())),
            "https://id.example.com/.well-known/jwks/acme.json"
        );
    }
}
