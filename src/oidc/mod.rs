// ABOUTME: OpenID Connect and OAuth2 protocol core
// ABOUTME: Authorization code + PKCE, token issuance and rotation, MFA step-up, login and introspection
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

/// Admin API authentication
pub mod admin;
/// Authorization endpoint state machine
pub mod authorize;
/// JWT claim sets
pub mod claims;
/// Verification and password reset emails
pub mod email;
/// Password login and registration
pub mod login;
/// TOTP second factor
pub mod mfa;
/// Proof Key for Code Exchange
pub mod pkce;
/// Redirect URI rules
pub mod redirect;
/// Browser sessions
pub mod session;
/// Tenant hint extraction
pub mod tenant_resolution;
/// Token endpoint core
pub mod token;
/// Userinfo and introspection
pub mod userinfo;

pub use admin::AdminTokenService;
pub use authorize::{AuthorizeEngine, AuthorizeOutcome, AuthorizeRequest, HttpState};
pub use email::{EmailFlowService, LogMailer, Mailer};
pub use login::LoginService;
pub use mfa::{MfaEngine, MfaSettings};
pub use session::SessionStore;
pub use token::{TokenEngine, TokenResponse, TokenSettings};
pub use userinfo::UserinfoService;
