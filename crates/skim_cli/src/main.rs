//! Skim CLI
//!
//! Maintenance tools for the registry skimmer.
//!
//! # Commands
//!
//! - `checkpoint show` - Print the persisted sequence
//! - `checkpoint set` - Overwrite the persisted sequence
//! - `transform` - Skim a document offline and list its artifacts
//! - `purge` - Remove every revision of a document from a sink

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Registry skimmer maintenance tools.
#[derive(Parser)]
#[command(name = "skim")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or rewind the checkpoint file
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Skim a document offline
    Transform {
        /// Document JSON file
        document: PathBuf,

        /// Mirror registry for tarball URLs
        #[arg(short, long)]
        registry: Option<String>,

        /// Top-level readme cap in bytes
        #[arg(long)]
        max_readme_bytes: Option<usize>,
    },

    /// Delete every revision of a document from a sink database
    Purge {
        /// Sink database URL
        #[arg(short, long)]
        sink: String,

        /// Document id
        id: String,

        /// Maximum HEAD/DELETE rounds
        #[arg(long, default_value = "1000")]
        max_rounds: u32,

        /// Request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Print the persisted sequence
    Show {
        /// Checkpoint file
        #[arg(long)]
        seq_file: PathBuf,
    },

    /// Overwrite the persisted sequence
    Set {
        /// Checkpoint file
        #[arg(long)]
        seq_file: PathBuf,

        /// New sequence
        sequence: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Checkpoint { action } => match action {
            CheckpointAction::Show { seq_file } => commands::checkpoint::show(&seq_file).await?,
            CheckpointAction::Set { seq_file, sequence } => {
                commands::checkpoint::set(&seq_file, sequence).await?
            }
        },
        Commands::Transform {
            document,
            registry,
            max_readme_bytes,
        } => {
            commands::transform::run(&document, registry.as_deref(), max_readme_bytes)?;
        }
        Commands::Purge {
            sink,
            id,
            max_rounds,
            timeout,
        } => {
            commands::purge::run(&sink, &id, max_rounds, Duration::from_secs(timeout)).await?;
        }
        Commands::Version => {
            println!("skim v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
