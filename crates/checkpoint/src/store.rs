//! Checkpoint storage trait and shared types.
//!
//! This module defines the CheckpointStore trait the reporter pushes
//! read positions through, plus the record kept by stores.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::position::{FilePosition, PositionMap};

/// A position as kept by a store, with the time it was received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPosition {
    pub position: FilePosition,
    pub created_at: DateTime<Utc>,
}

impl StoredPosition {
    pub fn now(position: FilePosition) -> Self {
        Self {
            position,
            created_at: Utc::now(),
        }
    }
}

/// Trait for checkpoint storage operations.
///
/// This trait abstracts where read positions go, allowing the same
/// reporter to work with:
/// - Nothing at all (`NullStore`)
/// - Filesystem storage (`FilesystemStore`)
/// - A checkpoint collector over HTTP (`HttpStore`)
///
/// Writes are best effort. The latest position for a range always
/// supersedes earlier ones.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Store the latest read position of one range.
    async fn store_position(&self, position: &FilePosition) -> Result<()>;

    /// Ranges a restarted pod should read, built from the latest stored
    /// positions of that pod.
    async fn read_positions(&self, task_id: &str, pod_num: &str) -> Result<PositionMap>;
}

/// Store that discards every position.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl CheckpointStore for NullStore {
    async fn store_position(&self, position: &FilePosition) -> Result<()> {
        tracing::trace!(
            "Discarding checkpoint for {} at {}",
            position.file_name,
            position.read_position
        );
        Ok(())
    }

    async fn read_positions(&self, _task_id: &str, _pod_num: &str) -> Result<PositionMap> {
        Ok(PositionMap::new())
    }
}
