// ABOUTME: Redirect URI validation and exact-match comparison against a client's allow-list
// ABOUTME: HTTPS is required unless the host is loopback; fragments are never allowed
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use url::{Host, Url};

use crate::errors::{AppError, AppResult};
use crate::models::OidcClient;

/// Whether `url` points at the local machine
#[must_use]
pub fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Parse and validate a redirect URI for registration or use
///
/// # Errors
///
/// Rejects relative URIs, fragments, and non-HTTPS schemes on non-loopback hosts.
pub fn validate_redirect_uri(raw: &str) -> AppResult<Url> {
    let url = Url::parse(raw)
        .map_err(|_| AppError::invalid_input(format!("redirect_uri '{raw}' is not an absolute URL")))?;
    if url.fragment().is_some() {
        return Err(AppError::invalid_input("redirect_uri must not contain a fragment"));
    }
    match url.scheme() {
        "https" => Ok(url),
        "http" if is_loopback(&url) => Ok(url),
        _ => Err(AppError::invalid_input(
            "redirect_uri must use https unless the host is loopback",
        )),
    }
}

/// Raw URI with only the scheme and authority lowercased
///
/// No other normalization: default ports, dot segments and percent escapes
/// stay as written.
fn comparable(raw: &str) -> Option<String> {
    let (scheme, rest) = raw.split_once("://")?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(end);
    Some(format!(
        "{}://{}{tail}",
        scheme.to_ascii_lowercase(),
        authority.to_ascii_lowercase()
    ))
}

/// Whether `candidate` is in the client's allow-list
///
/// Scheme and host compare case-insensitively, everything else byte for byte.
#[must_use]
pub fn is_registered(client: &OidcClient, candidate: &str) -> bool {
    if validate_redirect_uri(candidate).is_err() {
        return false;
    }
    let Some(candidate) = comparable(candidate) else {
        return false;
    };
    client
        .redirect_uris
        .iter()
        .map(String::as_str)
        .filter_map(comparable)
        .any(|allowed| allowed == candidate)
}

/// Append query parameters to a redirect target
#[must_use]
pub fn with_params(base: &str, params: &[(&str, &str)]) -> String {
    match Url::parse(base) {
        Ok(mut url) => {
            {
                let mut pairs = url.query_pairs_mut();
                for (key, value) in params {
                    pairs.append_pair(key, value);
                }
            }
            url.to_string()
        }
        Err(_) => base.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_or_loopback_only() {
        assert!(validate_redirect_uri("https://app.acme.test/cb").is_ok());
        assert!(validate_redirect_uri("http://localhost:3000/cb").is_ok());
        assert!(validate_redirect_uri("http://127.0.0.1/cb").is_ok());
        assert!(validate_redirect_uri("http://[::1]:8080/cb").is_ok());
        assert!(validate_redirect_uri("http://app.acme.test/cb").is_err());
        assert!(validate_redirect_uri("https://app.acme.test/cb#frag").is_err());
        assert!(validate_redirect_uri("/cb").is_err());
    }

    #[test]
    fn exact_match_with_case_insensitive_host() {
        let client = OidcClient::new_public("web1", vec!["https://app.acme.test/cb".to_owned()]);
        assert!(is_registered(&client, "https://app.acme.test/cb"));
        assert!(is_registered(&client, "HTTPS://APP.acme.test/cb"));
        assert!(!is_registered(&client, "https://app.acme.test/CB"));
        assert!(!is_registered(&client, "https://app.acme.test/cb/extra"));
        assert!(!is_registered(&client, "https://app.acme.test/cb?x=1"));
    }

    #[test]
    fn equivalent_but_different_spellings_are_rejected() {
        let client = OidcClient::new_public("web1", vec!["https://app.acme.test/cb".to_owned()]);
        assert!(!is_registered(&client, "https://app.acme.test:443/cb"));
        assert!(!is_registered(&client, "https://app.acme.test/x/../cb"));
        assert!(!is_registered(&client, "https://app.acme.test/./cb"));
        assert!(!is_registered(&client, "https://app.acme.test/%63b"));
        assert!(is_registered(&client, "HTTPS://APP.ACME.TEST/cb"));
    }

    #[test]
    fn params_are_encoded() {
        assert_eq!(
            with_params("https://app.acme.test/cb", &[("code", "a b"), ("state", "xyz")]),
            "https://app.acme.test/cb?code=a+b&state=xyz"
        );
    }
}
