//! Checkpoint configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::{CheckpointStore, FilesystemStore, HttpStore, NullStore};

/// Default period between two checkpoint pushes.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Where checkpoints go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CheckpointStorage {
    /// Checkpoints are not stored.
    #[default]
    Disabled,

    /// Latest position per range as JSON files in a directory.
    Filesystem { dir: String },

    /// POSTed to a checkpoint collector.
    Http { url: String },
}

impl CheckpointStorage {
    /// Build the store for this storage.
    pub fn build(&self) -> anyhow::Result<Arc<dyn CheckpointStore>> {
        Ok(match self {
            CheckpointStorage::Disabled => Arc::new(NullStore),
            CheckpointStorage::Filesystem { dir } => Arc::new(FilesystemStore::new(dir)),
            CheckpointStorage::Http { url } => Arc::new(HttpStore::new(url)?),
        })
    }
}

/// Identity and schedule of checkpoint reporting.
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Identifier of the load-test run.
    pub task_id: String,

    /// Identifier of this process within the run.
    pub pod_num: String,

    /// Period between two pushes for one range.
    pub interval: Duration,

    pub storage: CheckpointStorage,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            task_id: String::new(),
            pod_num: "1".to_string(),
            interval: DEFAULT_REPORT_INTERVAL,
            storage: CheckpointStorage::Disabled,
        }
    }
}

impl CheckpointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config pushing to the given storage.
    pub fn with_storage(storage: CheckpointStorage) -> Self {
        Self {
            storage,
            ..Self::default()
        }
    }

    /// Check if checkpoints go anywhere.
    pub fn should_report(&self) -> bool {
        self.storage != CheckpointStorage::Disabled
    }
}
