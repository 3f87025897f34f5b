//! The `collect` command: the checkpoint collector pods push to.

use anyhow::Result;
use checkpoint::{run_collector, CollectorConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(clap::Args, Clone, Debug)]
pub struct CollectArgs {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:9191", env = "FEEDER_COLLECTOR_LISTEN")]
    pub listen: String,

    /// JSON file the latest checkpoints are kept in across restarts
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

impl From<&CollectArgs> for CollectorConfig {
    fn from(args: &CollectArgs) -> Self {
        Self {
            listen: args.listen.clone(),
            output: args.output.clone(),
        }
    }
}

/// Serve checkpoints until Ctrl-C.
pub async fn collect(args: &CollectArgs) -> Result<()> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl-C, stopping collector");
                    cancel.cancel();
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
        });
    }
    info!("Collecting checkpoints on {}", args.listen);
    run_collector(CollectorConfig::from(args), cancel).await
}
