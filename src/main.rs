// ABOUTME: Entry point for the pdo CLI application.
// ABOUTME: Parses arguments, sets up logging, and dispatches to command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use pdo::config::{self, Config};
use pdo::error::Result;
use pdo::output::{Output, OutputMode};
use pdo::types::DeploymentId;
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbose flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let output = Output::new(OutputMode::from_flags(cli.quiet, cli.json));
    let mode = output.mode();

    if let Err(e) = run(cli, output).await {
        Output::new(mode).error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(cli: Cli, output: Output) -> Result<()> {
    if let Commands::Init { service, force } = &cli.command {
        let cwd = env::current_dir()?;
        config::init_config(&cwd, service.as_deref(), *force)?;
        output.success(&format!("Created {}", config::CONFIG_FILENAME));
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::discover(&env::current_dir()?)?,
    };

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Adopt {
            digest,
            color,
            replicas,
        } => commands::adopt(config, digest, color, replicas, output),
        Commands::Deploy { digest } => commands::deploy(config, digest, output).await,
        Commands::Status { id } => commands::status(config, id.map(DeploymentId::new), output),
        Commands::Abort { id } => commands::abort(config, DeploymentId::new(id), output),
        Commands::Resume => commands::resume(config, output).await,
        Commands::RetryRollback { id } => {
            commands::retry_rollback(config, DeploymentId::new(id), output).await
        }
        Commands::Prune { older_than } => commands::prune(config, older_than, output),
    }
}
