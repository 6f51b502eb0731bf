// ABOUTME: Cookie helpers for the browser session and the trusted MFA device
// ABOUTME: Builds Set-Cookie values with HttpOnly, Secure and SameSite flags and parses Cookie headers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! Secure cookie utilities
//!
//! The `Secure` flag follows the scheme of the public base URL, so plain-HTTP
//! development setups still receive their cookies.

use std::fmt::Write;

use axum::http::{header, HeaderMap, HeaderValue};

use crate::constants::cookies;

/// Cookie attributes
pub struct SecureCookieConfig {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// Max-Age in seconds
    pub max_age_secs: i64,
    /// `HttpOnly` flag
    pub http_only: bool,
    /// Secure flag
    pub secure: bool,
    /// `SameSite` policy
    pub same_site: SameSitePolicy,
    /// Cookie path
    pub path: String,
}

/// `SameSite` cookie policy
#[derive(Debug, Clone, Copy)]
pub enum SameSitePolicy {
    /// First-party only
    Strict,
    /// Sent on top-level navigation
    Lax,
    /// Sent everywhere, requires Secure
    None,
}

impl SecureCookieConfig {
    /// `HttpOnly`, `SameSite=Lax`, path `/`
    #[must_use]
    pub fn new(name: &str, value: &str, max_age_secs: i64, secure: bool) -> Self {
        Self {
            name: name.to_owned(),
            value: value.to_owned(),
            max_age_secs,
            http_only: true,
            secure,
            same_site: SameSitePolicy::Lax,
            path: "/".to_owned(),
        }
    }

    /// Set-Cookie header value
    #[must_use]
    pub fn build(&self) -> String {
        let mut cookie = format!("{}={}", self.name, self.value);
        let _ = write!(cookie, "; Max-Age={}", self.max_age_secs);
        let _ = write!(cookie, "; Path={}", self.path);
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        match self.same_site {
            SameSitePolicy::Strict => cookie.push_str("; SameSite=Strict"),
            SameSitePolicy::Lax => cookie.push_str("; SameSite=Lax"),
            SameSitePolicy::None => cookie.push_str("; SameSite=None"),
        }
        cookie
    }
}

/// Whether cookies for `base_url` should carry `Secure`
#[must_use]
pub fn secure_for(base_url: &str) -> bool {
    !base_url.starts_with("http://")
}

fn append(headers: &mut HeaderMap, cookie: &SecureCookieConfig) {
    if let Ok(value) = HeaderValue::from_str(&cookie.build()) {
        headers.append(header::SET_COOKIE, value);
    }
}

/// Append the browser session cookie
pub fn set_session_cookie(headers: &mut HeaderMap, value: &str, max_age_secs: i64, secure: bool) {
    append(headers, &SecureCookieConfig::new(cookies::SESSION, value, max_age_secs, secure));
}

/// Append the trusted-device cookie
pub fn set_mfa_trust_cookie(headers: &mut HeaderMap, value: &str, max_age_secs: i64, secure: bool) {
    let mut cookie = SecureCookieConfig::new(cookies::MFA_TRUST, value, max_age_secs, secure);
    cookie.same_site = SameSitePolicy::Strict;
    append(headers, &cookie);
}

/// Expire a cookie
pub fn clear_cookie(headers: &mut HeaderMap, name: &str, secure: bool) {
    append(headers, &SecureCookieConfig::new(name, "", 0, secure));
}

/// Cookie value from request headers
#[must_use]
pub fn get_cookie_value(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .find_map(|cookie| {
            let (name, value) = cookie.trim().split_once('=')?;
            (name.trim() == cookie_name).then(|| value.trim().to_owned())
        })
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_flags() {
        let mut headers = HeaderMap::new();
        set_session_cookie(&mut headers, "abc", 3600, true);
        set_mfa_trust_cookie(&mut headers, "dev", 60, false);
        let values: Vec<_> = headers
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_owned())
            .collect();
        assert_eq!(values[0], "sid=abc; Max-Age=3600; Path=/; HttpOnly; Secure; SameSite=Lax");
        assert_eq!(values[1], "mfa_trust=dev; Max-Age=60; Path=/; HttpOnly; SameSite=Strict");
    }

    #[test]
    fn parses_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("a=1; sid=xyz=; mfa_trust="));
        assert_eq!(get_cookie_value(&headers, "sid").as_deref(), Some("xyz="));
        assert_eq!(get_cookie_value(&headers, "a").as_deref(), Some("1"));
        assert!(get_cookie_value(&headers, "mfa_trust").is_none());
        assert!(get_cookie_value(&headers, "missing").is_none());
        assert!(secure_for("https://id.test"));
        assert!(!secure_for("http://localhost:8082"));
    }
}
