//! testbed CLI binary
//!
//! Entry point: parse arguments, load configuration, initialise logging
//! and dispatch to the matching command handler.

mod cli;
mod commands;
mod error;
mod logging;
mod output;

use clap::Parser;
use colored::Colorize;

use testbed_core::TestbedConfig;
use testbed_core::config::GeneralConfig;

use crate::cli::{Cli, Commands};
use crate::error::CliError;
use crate::output::OutputWriter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let writer = OutputWriter::new(cli.output);

    // `config` reports load failures itself, so it runs before the file is trusted.
    if let Commands::Config(args) = cli.command {
        logging::init_tracing(&GeneralConfig::default(), cli.log_level.as_deref())?;
        return commands::config::execute(args, &cli.config, &writer).await;
    }

    let config = TestbedConfig::load(&cli.config).await?;
    logging::init_tracing(&config.general, cli.log_level.as_deref())?;
    tracing::debug!(config = %cli.config.display(), "configuration loaded");

    match cli.command {
        Commands::RunUnit(args) => commands::run::execute(args, &config, &writer).await,
        Commands::DestroyEnv(args) => commands::destroy::execute(args, &config, &writer).await,
        Commands::InspectEnv(args) => commands::inspect::execute(args, &config, &writer).await,
        Commands::List => commands::list::execute(&config, &writer).await,
        Commands::Foundation(args) => {
            commands::foundation::execute(args, &config, &writer).await
        }
        Commands::Config(_) => Ok(()),
    }
}
