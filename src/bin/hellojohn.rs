// ABOUTME: HelloJohn server binary
// ABOUTME: Loads configuration from the environment, then serves or runs a one-off admin command
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 HelloJohn Contributors

//! # `HelloJohn`
//!
//! ```bash
//! # Serve with configuration from the environment
//! SIGNING_MASTER_KEY=... SECRETBOX_MASTER_KEY=... hellojohn
//!
//! # Create the first admin account
//! hellojohn bootstrap-admin --email ops@example.test --password '...'
//!
//! # Rotate a tenant's signing key, keeping the old one published for an hour
//! hellojohn rotate-keys --tenant acme --grace-seconds 3600
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use hellojohn::config::environment::LogFormat;
use hellojohn::config::ServerConfig;
use hellojohn::logging;
use hellojohn::server::{HelloJohnServer, ServerResources};

#[derive(Parser)]
#[command(
    name = "hellojohn",
    about = "HelloJohn identity provider",
    long_about = "Multi-tenant OpenID Connect and OAuth2 identity provider"
)]
struct Args {
    /// Override V2_SERVER_ADDR
    #[arg(long, env = "V2_SERVER_ADDR")]
    addr: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve HTTP (default)
    Serve,
    /// Create the first admin account
    BootstrapAdmin {
        /// Login email
        #[arg(long)]
        email: String,
        /// Password
        #[arg(long, env = "ADMIN_BOOTSTRAP_PASSWORD")]
        password: String,
        /// Display name
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Rotate a tenant's signing key
    RotateKeys {
        /// Tenant slug
        #[arg(long)]
        tenant: String,
        /// Seconds the previous key stays published
        #[arg(long, default_value_t = 0)]
        grace_seconds: i64,
    },
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = ServerConfig::from_env().context("invalid configuration")?;
    if let Some(addr) = args.addr {
        config.server_addr = addr;
    }
    if args.json_logs {
        config.log_format = LogFormat::Json;
    }
    logging::init(config.log_format);
    info!(?config, "configuration loaded");

    let resources = Arc::new(
        ServerResources::build(config)
            .await
            .context("failed to initialize server resources")?,
    );

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            HelloJohnServer::new(resources)
                .run(shutdown_signal())
                .await
                .context("server error")?;
        }
        Command::BootstrapAdmin {
            email,
            password,
            name,
        } => {
            let admin = resources.admin.bootstrap(&email, &password, &name).await?;
            info!(admin_id = %admin.id, email = %admin.email, "admin account created");
            resources.dal.close().await;
        }
        Command::RotateKeys {
            tenant,
            grace_seconds,
        } => {
            let kid = resources.keystore.rotate_for(&tenant, grace_seconds.max(0)).await?;
            info!(tenant = %tenant, %kid, "signing key rotated");
            resources.dal.close().await;
        }
    }
    Ok(())
}
