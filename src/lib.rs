//! csv-feeder library
//!
//! Feeds CSV fixture rows to load-test worker threads. Several pods can read
//! disjoint byte ranges of the same file, and each pod checkpoints how far it
//! got so a restarted pod resumes where it stopped.
//!
//! # Crates
//!
//! - `csv_feeder_file` - byte-range scoped file streams and the file registry
//! - `csv_feeder_partition` - memory-mapped line producers and partition queues
//! - `checkpoint` - read-position records, stores, reporter and collector
//! - `csv_feeder_dataset` - per-thread data sets and the feeder service
//!
//! # CLI Usage
//!
//! ```bash
//! # Split a fixture into one position map per pod
//! csv-feeder plan --file users.csv --pods 3 --skip-header --output-dir maps/
//!
//! # Collect checkpoints from every pod
//! csv-feeder collect --listen 0.0.0.0:9191 --output ledger.json
//!
//! # Feed 4 threads for 100 iterations, resuming from the collector
//! FEEDER_POD_NUMBER=2 FEEDER_TASK_ID=run-7 \
//!   csv-feeder run --config datasets.toml --threads 4 --iterations 100 \
//!   --checkpoint-url http://collector:9191
//! ```

use checkpoint::{CheckpointConfig, CheckpointStorage};
use clap::Parser;
use std::time::Duration;

pub mod collect;
pub mod plan;
pub mod run;

pub use collect::CollectArgs;
pub use plan::PlanArgs;
pub use run::RunArgs;

#[derive(Parser, Clone, Debug)]
pub struct CheckpointOpts {
    /// Identifier of the load-test run
    #[arg(long, default_value = "", env = "FEEDER_TASK_ID")]
    pub task_id: String,

    /// Identifier of this pod within the run
    #[arg(long, default_value = "1", env = "FEEDER_POD_NUMBER")]
    pub pod_number: String,

    /// Checkpoint collector base URL. Checkpoints are POSTed to
    /// `<url>/checkpoint` and stored positions read from
    /// `<url>/positions/<pod>`
    #[arg(long, env = "FEEDER_CHECKPOINT_URL", conflicts_with = "checkpoint_dir")]
    pub checkpoint_url: Option<String>,

    /// Directory to write checkpoint files to
    #[arg(long, env = "FEEDER_CHECKPOINT_DIR")]
    pub checkpoint_dir: Option<String>,

    /// Seconds between two checkpoint pushes
    #[arg(long, default_value = "5")]
    pub checkpoint_interval: u64,
}

impl CheckpointOpts {
    pub fn storage(&self) -> CheckpointStorage {
        match (&self.checkpoint_url, &self.checkpoint_dir) {
            (Some(url), _) => CheckpointStorage::Http { url: url.clone() },
            (None, Some(dir)) => CheckpointStorage::Filesystem { dir: dir.clone() },
            (None, None) => CheckpointStorage::Disabled,
        }
    }
}

impl From<&CheckpointOpts> for CheckpointConfig {
    fn from(opts: &CheckpointOpts) -> Self {
        Self {
            task_id: opts.task_id.clone(),
            pod_num: opts.pod_number.clone(),
            interval: Duration::from_secs(opts.checkpoint_interval.max(1)),
            storage: opts.storage(),
        }
    }
}
