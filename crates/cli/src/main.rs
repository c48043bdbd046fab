//! Tandem CLI - drives the concurrency orchestration components.

mod config;
mod scenarios;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tandem_storage::FileTextSource;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::DriverConfig;

#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "Concurrency orchestration scenarios", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON config blob
    #[arg(short, long, global = true, default_value = "tandem.json")]
    config: PathBuf,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Count records per department concurrently
    Aggregate {
        /// Number of records to seed
        #[arg(long)]
        records: Option<usize>,
    },
    /// Share cached lookups between concurrent callers
    Cache {
        /// Concurrent callers per key
        #[arg(long)]
        callers: Option<usize>,
    },
    /// Run a stepwise operation and cancel it
    Cancel {
        /// Number of units of work
        #[arg(long)]
        steps: Option<usize>,
        /// Milliseconds before cancelling
        #[arg(long)]
        after_ms: Option<u64>,
    },
    /// Spawn supervised detached tasks
    Supervise {
        /// Number of tasks to spawn
        #[arg(long)]
        tasks: Option<usize>,
    },
    /// Propagate failures through nested chains
    Chain,
    /// Run every scenario in order
    All,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = DriverConfig::load(&FileTextSource::new(), &cli.config).await?;

    match cli.command {
        Commands::Aggregate { records } => {
            if let Some(records) = records {
                config.seed_records = records;
            }
            scenarios::aggregate(&config).await?;
        }
        Commands::Cache { callers } => {
            if let Some(callers) = callers {
                config.cache_callers = callers;
            }
            scenarios::cache(&config).await?;
        }
        Commands::Cancel { steps, after_ms } => {
            if let Some(steps) = steps {
                config.steps = steps;
            }
            if let Some(after_ms) = after_ms {
                config.cancel_after_ms = after_ms;
            }
            scenarios::cancel(&config).await?;
        }
        Commands::Supervise { tasks } => {
            if let Some(tasks) = tasks {
                config.detached_tasks = tasks;
            }
            scenarios::supervise(&config).await?;
        }
        Commands::Chain => {
            scenarios::chain(&config).await?;
        }
        Commands::All => {
            scenarios::aggregate(&config).await?;
            scenarios::cache(&config).await?;
            scenarios::cancel(&config).await?;
            scenarios::supervise(&config).await?;
            scenarios::chain(&config).await?;
        }
    }

    info!("Done");
    Ok(())
}
