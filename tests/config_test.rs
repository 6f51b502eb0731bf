// ABOUTME: Tests of configuration loading from the process environment
// ABOUTME: Serialized because every case mutates shared environment variables
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use std::env;

use serial_test::serial;

use hellojohn::config::environment::{driver_for_dsn, LogFormat};
use hellojohn::config::ServerConfig;
use hellojohn::models::IssuerMode;

const VARS: &[&str] = &[
    "SIGNING_MASTER_KEY",
    "SECRETBOX_MASTER_KEY",
    "EMAIL_MASTER_KEY",
    "V2_BASE_URL",
    "V2_SERVER_ADDR",
    "LOGIN_URL",
    "ISSUER_MODE",
    "MFA_TOTP_WINDOW",
    "ADMIN_SUBS",
    "LOG_FORMAT",
    "ACCESS_TOKEN_TTL_SECS",
];

const HEX_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

fn set_keys() {
    env::set_var("SIGNING_MASTER_KEY", HEX_KEY);
    env::set_var("SECRETBOX_MASTER_KEY", HEX_KEY);
}

#[test]
#[serial]
fn missing_signing_key_is_rejected() {
    clear_env();
    env::set_var("SECRETBOX_MASTER_KEY", HEX_KEY);
    let err = ServerConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("SIGNING_MASTER_KEY"));
}

#[test]
#[serial]
fn email_master_key_is_accepted_as_fallback() {
    clear_env();
    env::set_var("SIGNING_MASTER_KEY", HEX_KEY);
    env::set_var("EMAIL_MASTER_KEY", HEX_KEY);
    assert!(ServerConfig::from_env().is_ok());
}

#[test]
#[serial]
fn environment_overrides_defaults() {
    clear_env();
    set_keys();
    env::set_var("V2_BASE_URL", "https://id.example.test/");
    env::set_var("V2_SERVER_ADDR", ":9000");
    env::set_var("ISSUER_MODE", "Path");
    env::set_var("LOG_FORMAT", "json");
    env::set_var("ACCESS_TOKEN_TTL_SECS", "300");

    let cfg = ServerConfig::from_env().unwrap();
    assert_eq!(cfg.base_url, "https://id.example.test");
    assert_eq!(cfg.server_addr, "0.0.0.0:9000");
    assert_eq!(cfg.login_url, "https://id.example.test/login");
    assert_eq!(cfg.issuer_mode, IssuerMode::Path);
    assert_eq!(cfg.log_format, LogFormat::Json);
    assert_eq!(cfg.access_token_ttl_secs, 300);
    clear_env();
}

#[test]
#[serial]
fn invalid_values_are_reported() {
    clear_env();
    set_keys();
    env::set_var("MFA_TOTP_WINDOW", "7");
    assert!(ServerConfig::from_env().is_err());

    env::remove_var("MFA_TOTP_WINDOW");
    env::set_var("ADMIN_SUBS", "not-a-uuid");
    assert!(ServerConfig::from_env().is_err());

    env::remove_var("ADMIN_SUBS");
    env::set_var("ISSUER_MODE", "subdomain");
    assert!(ServerConfig::from_env().is_err());
    clear_env();
}

#[test]
fn dsn_schemes_map_to_drivers() {
    assert_eq!(driver_for_dsn("postgres://u@h/db"), Some("postgres"));
    assert_eq!(driver_for_dsn("postgresql://u@h/db"), Some("postgres"));
    assert_eq!(driver_for_dsn("sqlite:///tmp/x.db"), Some("sqlite"));
    assert_eq!(driver_for_dsn("mysql://u@h/db"), None);
}
