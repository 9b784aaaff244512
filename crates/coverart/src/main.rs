//! Coverart CLI - batch optimiser for podcast and episode artwork.
//!
//! Finds records whose artwork has not been optimised yet, publishes resized
//! PNG and WebP variants to object storage, and records the content digest on
//! each row.
//!
//! # Usage
//!
//! ```bash
//! # Process every configured table
//! coverart run
//!
//! # One table, four items in flight
//! coverart run --table podcast_episodes --parallel 4
//!
//! # Show what would be processed
//! coverart run --dry-run
//!
//! # Print the storage keys for an artwork URL
//! coverart keys "https://example.com/art.png?v=1"
//!
//! # View configuration
//! coverart config show
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;
mod logging;

/// Coverart - batch optimiser for podcast and episode artwork.
#[derive(Parser, Debug)]
#[command(name = "coverart")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "COVERART_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Optimise the artwork of every pending record
    Run(cli::run::RunArgs),

    /// Print the digest and storage keys for an artwork URL
    Keys(cli::keys::KeysArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    // Logging isn't initialized yet, so use eprintln for config warnings.
    // Commands that need a valid config load it again and fail hard.
    let config = match cli::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default logging settings. Check your config file with `coverart config path`."
            );
            coverart_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Coverart v{}", coverart_core::VERSION);

    match cli.command {
        Commands::Run(args) => cli::run::execute(args, config_path).await,
        Commands::Keys(args) => cli::keys::execute(args, config_path),
        Commands::Config(args) => cli::config::execute(args, config_path),
    }
}
