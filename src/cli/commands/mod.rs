//! Subcommands module for amtwsman CLI
//!
//! Each subcommand resolves a [`ConnectionConfig`] through the shared
//! [`CommandContext`], opens a session and prints JSON to stdout.

pub mod enumerate;
pub mod get;
pub mod identify;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use amtwsman::config::Config;
use amtwsman::connection::{ConnectionConfig, DirectConnector};
use amtwsman::session::AmtConnection;
use amtwsman::wsman::WsmanStack;

use crate::cli::Cli;

/// Common context shared between commands
pub struct CommandContext {
    pub config: Config,
    pub profile: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub fingerprint: Option<String>,
}

impl CommandContext {
    pub fn new(cli: &Cli, config: Config) -> Self {
        Self {
            config,
            profile: cli.profile.clone(),
            host: cli.host.clone(),
            port: cli.port,
            user: cli.user.clone(),
            password: cli.password.clone(),
            tls: cli.tls,
            fingerprint: cli.fingerprint.clone(),
        }
    }

    /// Profile settings with command-line overrides applied.
    pub fn connection_config(&self) -> Result<ConnectionConfig> {
        let mut resolved = match self.config.select(self.profile.as_deref())? {
            Some(profile) => profile.clone(),
            None => match &self.host {
                Some(host) => ConnectionConfig::new(host.clone()),
                None => bail!("no device given; use --host or --profile"),
            },
        };

        if let Some(host) = &self.host {
            resolved.host = host.clone();
        }
        if let Some(port) = self.port {
            resolved.port = Some(port);
        }
        if let Some(user) = &self.user {
            resolved.username = user.clone();
        }
        if let Some(password) = &self.password {
            resolved.password = password.clone();
        }
        if self.tls {
            resolved.tls = true;
        }
        if let Some(pin) = &self.fingerprint {
            resolved.tls_options.fingerprint = Some(pin.clone());
        }
        Ok(resolved)
    }

    /// Open a session to the resolved device.
    pub fn wsman(&self) -> Result<WsmanStack> {
        let config = self.connection_config()?;
        debug!(host = %config.host, port = config.port(), tls = config.uses_tls(), "opening session");
        let connection = AmtConnection::create(config, Arc::new(DirectConnector::new()), None)
            .context("Failed to start session")?;
        Ok(WsmanStack::new(connection))
    }
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", text);
    Ok(())
}

/// Common trait for command execution
#[async_trait::async_trait]
pub trait Runnable {
    /// Execute the command, returning the process exit code
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32>;
}
