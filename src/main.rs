//! amtwsman - Intel AMT WS-Management client
//!
//! Main entry point for the amtwsman CLI.

mod cli;

use anyhow::Result;
use cli::commands::{CommandContext, Runnable};
use cli::{Cli, Commands};

use amtwsman::config::Config;
use amtwsman::telemetry::init_logging;

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbosity(), cli.log_format)?;

    if cli.verbosity() >= 2 {
        eprintln!("amtwsman v{}", VERSION);
    }

    let config = Config::load(cli.config.as_deref())?;
    let mut ctx = CommandContext::new(&cli, config);

    let exit_code = match &cli.command {
        Commands::Identify(args) => args.run(&mut ctx).await?,
        Commands::Get(args) => args.run(&mut ctx).await?,
        Commands::Enumerate(args) => args.run(&mut ctx).await?,
    };

    std::process::exit(exit_code);
}
