//! Command-line interface for csv-feeder
//!
//! # Usage Examples
//!
//! ## Distributed run
//! ```bash
//! # One position map per pod, header excluded
//! csv-feeder plan --file users.csv --pods 3 --skip-header --output-dir maps/
//!
//! # Pod 2 reads its slice and checkpoints to a directory
//! csv-feeder run --config datasets.toml --threads 8 --iterations 1000 \
//!   --position-map maps/pod-2.json \
//!   --pod-number 2 --task-id run-7 --checkpoint-dir checkpoints/
//! ```
//!
//! ## Resuming through a collector
//! ```bash
//! csv-feeder collect --listen 0.0.0.0:9191 --output ledger.json
//!
//! # With no --position-map the pod asks the collector where it stopped
//! FEEDER_POD_NUMBER=2 FEEDER_TASK_ID=run-7 \
//!   csv-feeder run --config datasets.toml --checkpoint-url http://collector:9191
//! ```
//!
//! ## Data set file
//! ```toml
//! [[dataset]]
//! name = "users"
//! filename = "users.csv"
//! variable_names = "id,name"
//! share_mode = "shareMode.all"
//! recycle = false
//! stop_thread = true
//! ```

use clap::{Parser, Subcommand};
use csv_feeder::{collect, plan, run, CollectArgs, PlanArgs, RunArgs};

#[derive(Parser)]
#[command(name = "csv-feeder")]
#[command(about = "Feed CSV fixture rows to load-test threads with resumable byte ranges")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Iterate the configured data sets from worker threads
    Run(RunArgs),

    /// Split a fixture file into one position map per pod
    Plan(PlanArgs),

    /// Receive checkpoints from pods and serve their resume positions
    Collect(CollectArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run_cli().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run_cli() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let summary = run::run(args, std::io::stdout()).await?;
            tracing::info!(
                "Fed {} rows ({} threads stopped)",
                summary.rows,
                summary.stopped_threads
            );
        }
        Commands::Plan(args) => plan::plan(&args)?,
        Commands::Collect(args) => collect::collect(&args).await?,
    }
    Ok(())
}
