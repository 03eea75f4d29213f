//! CLI module for amtwsman
//!
//! Argument parsing and subcommand dispatch. Connection settings come from a
//! named profile, overridden by whatever is given on the command line.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use amtwsman::telemetry::LogFormat;

/// amtwsman - Intel AMT WS-Management client
#[derive(Parser, Debug, Clone)]
#[command(name = "amtwsman")]
#[command(author = "amtwsman Contributors")]
#[command(version)]
#[command(about = "Query Intel AMT devices over WS-Management", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, global = true, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "AMTWSMAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Device profile from the configuration file
    #[arg(short = 'p', long, global = true)]
    pub profile: Option<String>,

    /// Device host name or address
    #[arg(short = 'H', long, global = true)]
    pub host: Option<String>,

    /// Device port (default 16992, or 16993 with --tls)
    #[arg(short = 'P', long, global = true)]
    pub port: Option<u16>,

    /// User name (`*` selects Kerberos)
    #[arg(short = 'u', long, global = true, env = "AMTWSMAN_USER")]
    pub user: Option<String>,

    /// Password
    #[arg(long, global = true, env = "AMTWSMAN_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Connect with TLS
    #[arg(long, global = true)]
    pub tls: bool,

    /// Pin the device certificate by SHA-384 fingerprint
    #[arg(long, global = true)]
    pub fingerprint: Option<String>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Send a WS-Management Identify request
    Identify(commands::identify::IdentifyArgs),

    /// Fetch one instance of a class
    Get(commands::get::GetArgs),

    /// Enumerate every instance of a class
    #[command(name = "enum")]
    Enumerate(commands::enumerate::EnumerateArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["amtwsman", "--host", "10.0.0.5", "identify"]).unwrap();
        assert!(matches!(cli.command, Commands::Identify(_)));
        assert_eq!(cli.host.as_deref(), Some("10.0.0.5"));
        assert!(!cli.tls);
    }

    #[test]
    fn test_enum_subcommand() {
        let cli = Cli::try_parse_from(["amtwsman", "enum", "CIM_Processor", "--tls", "-P", "623"])
            .unwrap();
        match cli.command {
            Commands::Enumerate(args) => assert_eq!(args.class, "CIM_Processor"),
            other => panic!("unexpected command {:?}", other),
        }
        assert!(cli.tls);
        assert_eq!(cli.port, Some(623));
    }

    #[test]
    fn test_verbosity() {
        let cli = Cli::try_parse_from(["amtwsman", "-vvvv", "identify"]).unwrap();
        assert_eq!(cli.verbosity(), 3);
    }

    #[test]
    fn test_log_format() {
        let cli =
            Cli::try_parse_from(["amtwsman", "--log-format", "json", "get", "AMT_GeneralSettings"])
                .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
