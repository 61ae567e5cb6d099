//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Inspect, resolve and clear cached browser-test authentication.
///
/// AuthCache keeps one captured login session per target site so browser
/// tests can skip the full login flow.
#[derive(Parser, Debug)]
#[command(name = "authcache")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (defaults to $AUTHCACHE_CONFIG, then ./authcache.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show cached auth status per site
    Status(StatusArgs),
    /// Show which site and cache files a test identifier maps to
    Resolve(ResolveArgs),
    /// Delete cached auth
    Clear(ClearArgs),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Test identifiers to report on (default: every known site)
    pub identifiers: Vec<String>,

    /// Print JSON instead of key/value lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Test identifier, e.g. "Staging_NTKPapers_SignUp"
    pub identifier: String,
}

#[derive(Args, Debug)]
pub struct ClearArgs {
    /// Test identifier whose site cache should be deleted
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub identifier: Option<String>,

    /// Delete cached auth for every known site
    #[arg(long)]
    pub all: bool,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,
}
