// ABOUTME: Email verification and password reset flows with one-shot hashed tokens
// ABOUTME: Unknown addresses get the same response as known ones; delivery goes through a Mailer
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::login::hash_password;
use super::redirect::with_params;
use crate::constants::{password, ttl};
use crate::crypto::hashing::{random_token, sha256_hex};
use crate::crypto::password::{PasswordPolicy, PasswordService};
use crate::errors::{AppError, AppResult};
use crate::models::{EmailToken, EmailTokenPurpose, OidcClient, Tenant, User, PASSWORD_PROVIDER};
use crate::storage::{DalFactory, TenantDataAccess};

/// Message handed to a [`Mailer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    /// Tenant slug
    pub tenant: String,
    /// Recipient
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain text body
    pub body: String,
}

/// Email delivery
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver one message
    async fn send(&self, email: OutboundEmail) -> AppResult<()>;
}

/// Mailer that only records the send in the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutboundEmail) -> AppResult<()> {
        info!(tenant = %email.tenant, to = %email.to, subject = %email.subject, "email queued");
        Ok(())
    }
}

/// `forgot-password` and `verify-email/send` body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmailRequest {
    /// Tenant slug or id
    pub tenant_id: String,
    /// Client the link returns to
    pub client_id: String,
    /// Recipient
    pub email: String,
}

/// `reset-password` body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResetPasswordRequest {
    /// Tenant slug or id
    pub tenant_id: String,
    /// Emailed token
    pub token: String,
    /// Replacement password
    pub new_password: String,
}

/// `verify-email` body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VerifyEmailRequest {
    /// Tenant slug or id
    pub tenant_id: String,
    /// Emailed token
    pub token: String,
}

fn default_template(purpose: EmailTokenPurpose) -> (&'static str, &'static str) {
    match purpose {
        EmailTokenPurpose::VerifyEmail => (
            "Verify your email for {{tenant}}",
            "Confirm your address by opening {{link}}",
        ),
        EmailTokenPurpose::PasswordReset => (
            "Reset your {{tenant}} password",
            "Choose a new password at {{link}}\nIf you did not ask for this, ignore this message.",
        ),
    }
}

/// Substitute `{{link}}` and `{{tenant}}`
#[must_use]
pub fn render_template(template: &str, link: &str, tenant: &str) -> String {
    template.replace("{{link}}", link).replace("{{tenant}}", tenant)
}

/// Verification and password reset flows
pub struct EmailFlowService {
    dal: Arc<DalFactory>,
    mailer: Arc<dyn Mailer>,
    passwords: Arc<PasswordService>,
    policy: Arc<PasswordPolicy>,
    base_url: String,
}

impl EmailFlowService {
    /// Service sending through `mailer`
    #[must_use]
    pub fn new(
        dal: Arc<DalFactory>,
        mailer: Arc<dyn Mailer>,
        passwords: Arc<PasswordService>,
        policy: Arc<PasswordPolicy>,
        base_url: &str,
    ) -> Self {
        Self {
            dal,
            mailer,
            passwords,
            policy,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    async fn gate(&self, req: &EmailRequest) -> AppResult<(TenantDataAccess, OidcClient)> {
        if req.tenant_id.trim().is_empty() {
            return Err(AppError::missing_field("tenant_id"));
        }
        if req.client_id.trim().is_empty() {
            return Err(AppError::missing_field("client_id"));
        }
        let access = self.dal.for_tenant(&req.tenant_id).await?;
        let client = self
            .dal
            .control()
            .client(access.slug(), &req.client_id)
            .await?
            .ok_or_else(|| AppError::invalid_client("unknown client"))?;
        access.require_db()?;
        Ok((access, client))
    }

    fn link_for(&self, client: &OidcClient, purpose: EmailTokenPurpose, token: &str) -> String {
        let configured = match purpose {
            EmailTokenPurpose::VerifyEmail => client.verify_email_url.as_deref(),
            EmailTokenPurpose::PasswordReset => client.reset_password_url.as_deref(),
        };
        let base = configured.filter(|u| !u.trim().is_empty()).map_or_else(
            || match purpose {
                EmailTokenPurpose::VerifyEmail => format!("{}/verify", self.base_url),
                EmailTokenPurpose::PasswordReset => format!("{}/reset", self.base_url),
            },
            str::to_owned,
        );
        with_params(&base, &[("token", token)])
    }

    async fn dispatch(
        &self,
        access: &TenantDataAccess,
        client: &OidcClient,
        user: Option<User>,
        purpose: EmailTokenPurpose,
    ) -> AppResult<()> {
        let token = random_token();
        let token_hash = sha256_hex(&token);
        let Some(user) = user else {
            debug!(tenant = %access.slug(), purpose = %purpose, "email flow for unknown address");
            return Ok(());
        };
        let now = Utc::now();
        access
            .email_tokens()?
            .create_email_token(&EmailToken {
                id: Uuid::new_v4(),
                tenant_id: access.tenant().id,
                user_id: user.id,
                purpose,
                token_hash,
                expires_at: now + Duration::seconds(ttl::EMAIL_TOKEN_SECS),
                used_at: None,
                created_at: now,
            })
            .await?;

        let tenant: &Tenant = access.tenant();
        let link = self.link_for(client, purpose, &token);
        let (subject, body) = tenant
            .settings
            .mailing
            .as_ref()
            .and_then(|m| m.template(&tenant.language, purpose.as_str()))
            .map_or_else(
                || {
                    let (s, b) = default_template(purpose);
                    (s.to_owned(), b.to_owned())
                },
                |t| (t.subject.clone(), t.body.clone()),
            );
        let email = OutboundEmail {
            tenant: tenant.slug.clone(),
            to: user.email.clone(),
            subject: render_template(&subject, &link, &tenant.name),
            body: render_template(&body, &link, &tenant.name),
        };
        if let Err(e) = self.mailer.send(email).await {
            warn!(tenant = %access.slug(), purpose = %purpose, error = %e, "email delivery failed");
        }
        Ok(())
    }

    /// Send a reset link when the address is known; always succeeds for unknown ones
    ///
    /// # Errors
    ///
    /// Tenant or client resolution and storage failures only.
    pub async fn forgot_password(&self, req: &EmailRequest) -> AppResult<()> {
        let (access, client) = self.gate(req).await?;
        let email = req.email.trim().to_lowercase();
        let user = access
            .users()?
            .get_user_by_email(access.tenant().id, &email)
            .await?
            .filter(|u| !u.is_disabled(Utc::now()));
        self.dispatch(&access, &client, user, EmailTokenPurpose::PasswordReset)
            .await
    }

    /// Send a verification link when the address is known and unverified
    ///
    /// # Errors
    ///
    /// Tenant or client resolution and storage failures only.
    pub async fn send_verification(&self, req: &EmailRequest) -> AppResult<()> {
        let (access, client) = self.gate(req).await?;
        let email = req.email.trim().to_lowercase();
        let user = access
            .users()?
            .get_user_by_email(access.tenant().id, &email)
            .await?
            .filter(|u| !u.email_verified);
        self.dispatch(&access, &client, user, EmailTokenPurpose::VerifyEmail)
            .await
    }

    async fn consume(
        &self,
        tenant_key: &str,
        token: &str,
        purpose: EmailTokenPurpose,
    ) -> AppResult<(TenantDataAccess, EmailToken)> {
        if tenant_key.trim().is_empty() {
            return Err(AppError::missing_field("tenant_id"));
        }
        if token.trim().is_empty() {
            return Err(AppError::missing_field("token"));
        }
        let access = self.dal.for_tenant(tenant_key).await?;
        let row = access
            .email_tokens()?
            .consume_email_token(&sha256_hex(token.trim()), purpose, Utc::now())
            .await?
            .ok_or_else(|| AppError::invalid_input("invalid or expired token"))?;
        Ok((access, row))
    }

    /// Set a new password and revoke every refresh token of the user
    ///
    /// # Errors
    ///
    /// 400 for unknown, used or expired tokens and rejected passwords.
    pub async fn reset_password(&self, req: &ResetPasswordRequest) -> AppResult<()> {
        let length = req.new_password.chars().count();
        if !(password::MIN_LENGTH..=password::MAX_LENGTH).contains(&length) {
            return Err(AppError::invalid_input(format!(
                "password must be between {} and {} characters",
                password::MIN_LENGTH,
                password::MAX_LENGTH
            )));
        }
        self.policy.check(&req.new_password).await?;
        let (access, row) = self
            .consume(&req.tenant_id, &req.token, EmailTokenPurpose::PasswordReset)
            .await?;
        let users = access.users()?;
        let phc = hash_password(&self.passwords, &req.new_password).await?;
        if users.get_identity(row.user_id, PASSWORD_PROVIDER).await?.is_some() {
            users.update_password_hash(row.user_id, &phc).await?;
        } else {
            return Err(AppError::invalid_input("account has no password login"));
        }
        let revoked = access
            .refresh_tokens()?
            .revoke_all_for_user(row.user_id, Utc::now())
            .await?;
        info!(tenant = %access.slug(), user_id = %row.user_id, revoked, "password reset");
        Ok(())
    }

    /// Mark the user's email verified
    ///
    /// # Errors
    ///
    /// 400 for unknown, used or expired tokens.
    pub async fn verify_email(&self, req: &VerifyEmailRequest) -> AppResult<()> {
        let (access, row) = self
            .consume(&req.tenant_id, &req.token, EmailTokenPurpose::VerifyEmail)
            .await?;
        access.users()?.set_email_verified(row.user_id, true).await?;
        info!(tenant = %access.slug(), user_id = %row.user_id, "email verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_replaced() {
        let (subject, body) = default_template(EmailTokenPurpose::PasswordReset);
        assert_eq!(render_template(subject, "x", "Acme"), "Reset your Acme password");
        assert!(render_template(body, "https://id.test/reset?token=t", "Acme")
            .starts_with("Choose a new password at https://id.test/reset?token=t"));
    }
}
