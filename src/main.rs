//! CLI entry point for the authcache tool.

use anyhow::{Context, Result};
use authcache_core::AuthCacheConfig;
use clap::Parser;
use tracing::debug;

mod cli;
mod commands;

use cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?cli, "CLI arguments parsed");

    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "loaded .env"),
        Err(error) if error.not_found() => {}
        Err(error) => return Err(error).context("failed to read .env file"),
    }

    let loaded = AuthCacheConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match &cli.command {
        Command::Status(args) => commands::run_status_command(&loaded.config, args)?,
        Command::Resolve(args) => commands::run_resolve_command(&loaded.config, args),
        Command::Clear(args) => commands::run_clear_command(&loaded.config, args)?,
        Command::Config { command } => match command {
            ConfigCommand::Show => commands::run_config_show_command(&loaded),
        },
    }

    Ok(())
}
