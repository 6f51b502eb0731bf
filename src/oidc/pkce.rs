// ABOUTME: PKCE (RFC 7636) verifier checks for the authorization-code grant
// ABOUTME: Only the S256 method is accepted
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

use crate::crypto::hashing::{constant_time_eq, sha256_b64url};

/// The only supported challenge method
pub const METHOD_S256: &str = "S256";

const VERIFIER_MIN: usize = 43;
const VERIFIER_MAX: usize = 128;

/// RFC 7636 §4.1 verifier syntax: 43-128 unreserved characters
#[must_use]
pub fn is_valid_verifier(verifier: &str) -> bool {
    (VERIFIER_MIN..=VERIFIER_MAX).contains(&verifier.len())
        && verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Challenge for a verifier
#[must_use]
pub fn s256_challenge(verifier: &str) -> String {
    sha256_b64url(verifier)
}

/// Whether `verifier` answers `challenge` under `method`
#[must_use]
pub fn verify(method: &str, challenge: &str, verifier: &str) -> bool {
    method == METHOD_S256
        && is_valid_verifier(verifier)
        && constant_time_eq(&s256_challenge(verifier), challenge)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 appendix B
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn rfc_vector() {
        assert_eq!(s256_challenge(VERIFIER), CHALLENGE);
        assert!(verify("S256", CHALLENGE, VERIFIER));
    }

    #[test]
    fn rejects_plain_and_bad_verifiers() {
        assert!(!verify("plain", CHALLENGE, VERIFIER));
        assert!(!verify("S256", CHALLENGE, "short"));
        assert!(!verify("S256", CHALLENGE, &"a".repeat(43)));
        assert!(!is_valid_verifier(&format!("{}+", "a".repeat(43))));
    }
}
