//! Periodic checkpoint reporting.
//!
//! One reporter task runs per ranged reader. Every tick it snapshots the
//! reader's position and pushes it to the store. A failed push is logged
//! and the next tick tries again with whatever the position is by then.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::position::FilePosition;
use crate::store::CheckpointStore;

/// Something whose read position can be checkpointed.
pub trait PositionSource: Send + Sync {
    /// Current read position.
    fn snapshot(&self) -> FilePosition;

    /// True once the range is fully consumed and no more progress is
    /// possible.
    fn is_finished(&self) -> bool;
}

/// Pushes positions for one source on a fixed period.
#[derive(Clone)]
pub struct CheckpointReporter {
    store: Arc<dyn CheckpointStore>,
    interval: Duration,
}

impl CheckpointReporter {
    pub fn new(store: Arc<dyn CheckpointStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Push one position, logging instead of failing.
    pub async fn push(&self, source: &dyn PositionSource) -> bool {
        let position = source.snapshot();
        match self.store.store_position(&position).await {
            Ok(()) => {
                debug!(
                    "Checkpoint {} pod {}: {}/{}",
                    position.file_name,
                    position.pod_num,
                    position.read_position,
                    position.end_position
                );
                true
            }
            Err(e) => {
                warn!(
                    "Failed to push checkpoint for {} (pod {}): {:#}",
                    position.file_name, position.pod_num, e
                );
                false
            }
        }
    }

    /// Report `source` until it finishes or `cancel` fires. The first push
    /// happens one interval after the start. Returns the number of
    /// successful pushes.
    pub async fn run(&self, source: Arc<dyn PositionSource>, cancel: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut pushed = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Checkpoint reporter cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    if self.push(source.as_ref()).await {
                        pushed += 1;
                    }
                    if source.is_finished() {
                        info!(
                            "Range of {} fully consumed, stopping checkpoints",
                            source.snapshot().file_name
                        );
                        break;
                    }
                }
            }
        }
        pushed
    }

    /// Spawn [`run`](Self::run) on the given runtime.
    pub fn spawn(
        &self,
        handle: &tokio::runtime::Handle,
        source: Arc<dyn PositionSource>,
        cancel: CancellationToken,
    ) -> JoinHandle<u64> {
        let reporter = self.clone();
        handle.spawn(async move { reporter.run(source, cancel).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::PositionMap;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    struct Counter {
        read: AtomicU64,
        finished: AtomicBool,
    }

    impl PositionSource for Counter {
        fn snapshot(&self) -> FilePosition {
            FilePosition {
                task_id: "t".into(),
                file_name: "a.csv".into(),
                pod_num: "1".into(),
                start_position: 0,
                read_position: self.read.load(Ordering::SeqCst),
                end_position: 100,
                partition: None,
            }
        }

        fn is_finished(&self) -> bool {
            self.finished.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct Recording {
        pushed: Mutex<Vec<u64>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl CheckpointStore for Recording {
        async fn store_position(&self, position: &FilePosition) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("collector unreachable");
            }
            self.pushed.lock().unwrap().push(position.read_position);
            Ok(())
        }

        async fn read_positions(&self, _: &str, _: &str) -> anyhow::Result<PositionMap> {
            Ok(PositionMap::new())
        }
    }

    fn counter() -> Arc<Counter> {
        Arc::new(Counter {
            read: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushes_every_interval() {
        let store = Arc::new(Recording::default());
        let source = counter();
        let cancel = CancellationToken::new();
        let reporter = CheckpointReporter::new(store.clone(), Duration::from_secs(5));
        let task = tokio::spawn({
            let source: Arc<dyn PositionSource> = source.clone();
            let cancel = cancel.clone();
            async move { reporter.run(source, cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(store.pushed.lock().unwrap().is_empty());

        source.read.store(40, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        source.read.store(70, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;

        cancel.cancel();
        assert_eq!(task.await.unwrap(), 2);
        assert_eq!(*store.pushed.lock().unwrap(), vec![40, 70]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_push_is_retried_next_tick() {
        let store = Arc::new(Recording::default());
        store.fail.store(true, Ordering::SeqCst);
        let source = counter();
        let reporter = CheckpointReporter::new(store.clone(), Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let source: Arc<dyn PositionSource> = source.clone();
            let cancel = cancel.clone();
            async move { reporter.run(source, cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        store.fail.store(false, Ordering::SeqCst);
        source.read.store(10, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;

        cancel.cancel();
        assert_eq!(task.await.unwrap(), 1);
        assert_eq!(*store.pushed.lock().unwrap(), vec![10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_final_push_when_finished() {
        let store = Arc::new(Recording::default());
        let source = counter();
        source.read.store(100, Ordering::SeqCst);
        source.finished.store(true, Ordering::SeqCst);
        let reporter = CheckpointReporter::new(store.clone(), Duration::from_secs(5));

        let pushed = reporter.run(source, CancellationToken::new()).await;
        assert_eq!(pushed, 1);
        assert_eq!(*store.pushed.lock().unwrap(), vec![100]);
    }
}
