//! Checkpoint records and position maps.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read position of one byte range, as pushed to the checkpoint store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePosition {
    pub task_id: String,
    /// Base name of the file.
    pub file_name: String,
    pub pod_num: String,
    pub start_position: u64,
    /// Offset just past the last line handed to a consumer.
    pub read_position: u64,
    pub end_position: u64,
    /// Set when the file is read by several partitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<usize>,
}

impl FilePosition {
    /// Key under which this record appears in a position map.
    pub fn map_key(&self) -> String {
        position_key(&self.file_name, self.partition)
    }

    pub fn is_complete(&self) -> bool {
        self.read_position >= self.end_position
    }

    /// The range a restarted pod should read.
    pub fn resume_range(&self) -> PositionRange {
        PositionRange {
            start: self.read_position,
            end: self.end_position,
        }
    }
}

/// `{start, end}` entry of a position map, read as `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRange {
    pub start: u64,
    pub end: u64,
}

/// File base name (or `name#partition`) to the range a pod should read.
pub type PositionMap = BTreeMap<String, PositionRange>;

/// Position map key for a file, optionally qualified by partition.
pub fn position_key(file_name: &str, partition: Option<usize>) -> String {
    match partition {
        Some(p) => format!("{file_name}#{p}"),
        None => file_name.to_string(),
    }
}

/// Parse a position map from JSON.
///
/// Entries missing either `start` or `end` are skipped rather than
/// rejecting the whole map.
pub fn parse_position_map(json: &str) -> Result<PositionMap> {
    let raw: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(json).context("Position map must be a JSON object")?;
    let mut map = PositionMap::new();
    for (name, value) in raw {
        match serde_json::from_value::<PositionRange>(value) {
            Ok(range) => {
                map.insert(name, range);
            }
            Err(e) => tracing::warn!("Ignoring position map entry '{}': {}", name, e),
        }
    }
    Ok(map)
}
