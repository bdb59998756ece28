use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use parish_config::ConfigLoader;
use parish_sync::SyncError;
use std::path::PathBuf;

mod commands;

use commands::Session;

/// Parish sync operations tool
#[derive(Parser, Debug)]
#[command(name = "parish", version)]
#[command(about = "Inspect and drive the Parish offline sync queue")]
struct Args {
    /// Configuration file (YAML or TOML)
    #[arg(short, long, env = "PARISH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show connectivity and queue state
    Status,

    /// Print the cached records of a collection
    List {
        collection: String,

        /// Print member PII unmasked
        #[arg(long)]
        raw: bool,
    },

    /// Reload a collection from the remote store
    Refresh { collection: String },

    /// Push queued mutations to the remote store
    Drain,

    /// List mutations that were given up on
    DeadLetters,

    /// Put a dead letter back in the queue
    Requeue { id: u64 },

    /// Drop a dead letter
    Discard { id: u64 },

    /// Probe the remote store and drain whenever it comes back
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let result = run(args).await;

    if let Err(err) = &result {
        if err.downcast_ref::<SyncError>().is_some_and(SyncError::is_transient) {
            eprintln!(
                "{}",
                "The remote store looks unreachable; queued changes are kept and will sync later.".yellow()
            );
        }
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    let mut config = loader.load().context("Failed to load configuration")?;

    if args.verbose {
        config.logging.log_level = "debug".to_string();
    }
    parish_logging::init(&config.logging).context("Failed to initialise logging")?;

    let session = Session::open(config).await?;
    let format = args.format;

    let outcome = match args.command {
        Command::Status => session.status(format).await,
        Command::List { collection, raw } => session.list(&collection, raw, format).await,
        Command::Refresh { collection } => session.refresh(&collection).await,
        Command::Drain => session.drain(format).await,
        Command::DeadLetters => session.dead_letters(format).await,
        Command::Requeue { id } => session.requeue(id).await,
        Command::Discard { id } => session.discard(id).await,
        Command::Watch => session.watch().await,
    };

    session.shutdown().await;
    outcome
}
