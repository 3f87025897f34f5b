//! Filesystem-based checkpoint storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

use crate::position::{FilePosition, PositionMap};
use crate::store::{CheckpointStore, StoredPosition};

/// Filesystem implementation of CheckpointStore trait.
///
/// Keeps the latest position of every range as one JSON file in a
/// directory, overwritten on each push.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore with the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory path.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, position: &FilePosition) -> PathBuf {
        let mut name = format!(
            "checkpoint_{}_{}_{}",
            sanitize(&position.task_id),
            sanitize(&position.pod_num),
            sanitize(&position.file_name)
        );
        if let Some(partition) = position.partition {
            name.push_str(&format!("_p{partition}"));
        }
        name.push_str(".json");
        self.dir.join(name)
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

#[async_trait]
impl CheckpointStore for FilesystemStore {
    async fn store_position(&self, position: &FilePosition) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let filename = self.path_for(position);
        let stored = StoredPosition::now(position.clone());
        std::fs::write(&filename, serde_json::to_string_pretty(&stored)?)?;
        tracing::debug!(
            "Stored checkpoint {}/{} to {}",
            position.read_position,
            position.end_position,
            filename.display()
        );
        Ok(())
    }

    async fn read_positions(&self, task_id: &str, pod_num: &str) -> Result<PositionMap> {
        let mut map = PositionMap::new();
        if !self.dir.exists() {
            return Ok(map);
        }

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let filename = entry.file_name().to_string_lossy().to_string();
            if !(filename.starts_with("checkpoint_") && filename.ends_with(".json")) {
                continue;
            }
            let content = std::fs::read_to_string(entry.path())?;
            let stored: StoredPosition = match serde_json::from_str(&content) {
                Ok(stored) => stored,
                Err(e) => {
                    tracing::warn!("Skipping unreadable checkpoint {}: {}", filename, e);
                    continue;
                }
            };
            let position = stored.position;
            if position.task_id == task_id && position.pod_num == pod_num {
                map.insert(position.map_key(), position.resume_range());
            }
        }
        Ok(map)
    }
}
