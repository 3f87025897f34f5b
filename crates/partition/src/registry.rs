//! Round-robin consumption across the partitions of a file.

use crate::error::{PartitionError, Result};
use crate::queue::{pause, FeedLine, PartitionQueue, DEFAULT_CONSUMER_BACKOFF};
use crossbeam_channel::TryRecvError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct SetState {
    queues: Vec<PartitionQueue>,
    cursor: usize,
}

enum Poll {
    Line(FeedLine),
    Empty,
    Finished,
}

/// The partitions feeding one file. One cursor shared by every consumer.
#[derive(Debug, Default)]
struct PartitionSet {
    state: Mutex<SetState>,
}

impl PartitionSet {
    /// Visit each queue at most once, starting at the cursor. The cursor
    /// moves one position per visited queue.
    fn poll(&self) -> Poll {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let count = state.queues.len();
        if count == 0 {
            return Poll::Empty;
        }
        let mut disconnected = 0;
        for _ in 0..count {
            let index = state.cursor % count;
            state.cursor = (index + 1) % count;
            match state.queues[index].try_take() {
                Ok(line) => return Poll::Line(line),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => disconnected += 1,
            }
        }
        if disconnected == count {
            for queue in &state.queues {
                queue.progress().mark_exhausted();
            }
            Poll::Finished
        } else {
            Poll::Empty
        }
    }
}

/// File name to partition queues.
#[derive(Debug)]
pub struct PartitionRegistry {
    files: RwLock<HashMap<String, Arc<PartitionSet>>>,
    backoff: Duration,
}

impl Default for PartitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionRegistry {
    pub fn new() -> Self {
        Self::with_backoff(DEFAULT_CONSUMER_BACKOFF)
    }

    /// Registry whose consumers wait `backoff` when every queue is empty.
    pub fn with_backoff(backoff: Duration) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            backoff,
        }
    }

    /// Append a partition queue for `file` and return its index.
    pub fn register(&self, file: &str, queue: PartitionQueue) -> usize {
        let set = {
            let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(files.entry(file.to_string()).or_default())
        };
        let mut state = set.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.queues.push(queue);
        let index = state.queues.len() - 1;
        info!("Registered partition {} for {}", index, file);
        index
    }

    pub fn contains(&self, file: &str) -> bool {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(file)
    }

    pub fn partition_count(&self, file: &str) -> usize {
        self.set(file)
            .map(|set| {
                set.state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .queues
                    .len()
            })
            .unwrap_or(0)
    }

    fn set(&self, file: &str) -> Result<Arc<PartitionSet>> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(file)
            .cloned()
            .ok_or_else(|| PartitionError::UnknownFile(file.to_string()))
    }

    /// Next line for `file`, waiting while every partition is empty.
    ///
    /// Returns `Ok(None)` once every partition's producer has finished and
    /// its queue is drained.
    pub fn next(&self, file: &str, cancel: &CancellationToken) -> Result<Option<FeedLine>> {
        let set = self.set(file)?;
        loop {
            if cancel.is_cancelled() {
                return Err(PartitionError::Cancelled);
            }
            match set.poll() {
                Poll::Line(line) => return Ok(Some(line)),
                Poll::Finished => {
                    debug!("All partitions of {} are drained", file);
                    return Ok(None);
                }
                Poll::Empty => {
                    if !pause(cancel, self.backoff) {
                        return Err(PartitionError::Cancelled);
                    }
                }
            }
        }
    }
}
