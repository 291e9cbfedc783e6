//! Stratum Command-Line Client
//!
//! Inspects, plans, backs up and restores versioned data stores.

mod commands;
mod error;
mod formatter;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use error::CliError;
use formatter::OutputFormat;

/// Stratum Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "stratum")]
#[command(version, about = "Inspect, back up and restore versioned data stores")]
pub struct Args {
    /// Path to the store file
    #[arg(short, long)]
    pub store: PathBuf,

    /// Registered schema versions, comma separated (e.g. V1_0_0,V2_0_0)
    #[arg(long, value_delimiter = ',')]
    pub versions: Vec<String>,

    /// Destination version (defaults to the latest registered version)
    #[arg(long)]
    pub target: Option<String>,

    /// Migration config file (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Backup root directory (defaults to <store dir>/.stratum-backups)
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,

    /// Number of backups kept per store
    #[arg(long)]
    pub max_backups: Option<usize>,

    /// Output format
    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show the store version and whether a migration is required
    Status,
    /// Print the migration steps from the store version to the destination
    Plan,
    /// Take a backup of the store
    Backup,
    /// List backups of the store, newest first
    Backups,
    /// Restore a backup over the store
    Restore {
        /// Backup ID (defaults to the most recent)
        #[arg(long)]
        id: Option<String>,
    },
    /// Evict backups beyond the retention limit
    Prune,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stratum=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<String, CliError> {
    tracing::debug!(
        store = %args.store.display(),
        backup_root = %commands::backup_root(&args)?.display(),
        command = ?args.command,
        "running command"
    );

    // Store I/O stays off the runtime threads.
    tokio::task::spawn_blocking(move || {
        let formatter = formatter::create_formatter(args.format);
        commands::execute(&args, &*formatter)
    })
    .await
    .map_err(|e| CliError::Task(e.to_string()))?
}
