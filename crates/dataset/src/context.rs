//! Per-thread variables and identity.

use checkpoint::{parse_position_map, position_key, PositionRange};
use std::collections::HashMap;
use tracing::{info, warn};

/// Variable holding the position map injected by the engine.
pub const POSITION_MAP_VARIABLE: &str = "__ENGINE_GLOBAL_VARIABLES__";

/// What a data set sees of the worker thread calling it.
#[derive(Debug, Clone, Default)]
pub struct ThreadContext {
    thread_id: String,
    group_id: String,
    variables: HashMap<String, String>,
}

impl ThreadContext {
    pub fn new(thread_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            group_id: group_id.into(),
            variables: HashMap::new(),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn put(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn variables(&self) -> &HashMap<String, String> {
        &self.variables
    }

    /// Install a position map as JSON.
    pub fn set_position_map(&mut self, json: impl Into<String>) {
        self.put(POSITION_MAP_VARIABLE, json);
    }

    /// Resume range for `filename` (optionally one partition of it), looked
    /// up by base name in the injected position map.
    pub fn position_for(&self, filename: &str, partition: Option<usize>) -> Option<PositionRange> {
        let json = self.get(POSITION_MAP_VARIABLE)?;
        if json.trim().is_empty() {
            return None;
        }
        let map = match parse_position_map(json) {
            Ok(map) => map,
            Err(e) => {
                warn!("Ignoring position map: {:#}", e);
                return None;
            }
        };
        let key = position_key(base_name(filename), partition);
        let range = map.get(&key).copied()?;
        info!("Position for {}: [{}, {})", key, range.start, range.end);
        Some(range)
    }
}

/// File name with any directory stripped.
pub fn base_name(filename: &str) -> &str {
    let filename = filename.trim();
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
}
