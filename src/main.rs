//! Trellis CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Cross-registry package crawler and dependency graph builder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a crawl session and build the package graph
    Crawl {
        /// Session configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Snapshot destination (overrides the config file)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seed the session with a previously saved snapshot
        #[arg(long)]
        seed: Option<PathBuf>,
    },
    /// Re-emit a saved snapshot's node and edge records on stdout
    Export {
        /// Snapshot file written by a previous crawl
        #[arg(short, long)]
        snapshot: PathBuf,
    },
    /// Probe the configured registry endpoints and report reachability
    Limits {
        /// Session configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!("trellis={}", log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Crawl {
            config,
            output,
            seed,
        } => commands::crawl(config, output, seed).await,
        Commands::Export { snapshot } => commands::export(snapshot),
        Commands::Limits { config } => commands::limits(config).await,
        Commands::Version => {
            println!("Trellis v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
