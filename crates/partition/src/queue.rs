//! Bounded line queues between one producer and many consumers.

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use csv_feeder_file::RangeProgress;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Capacity of a partition queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 120;

/// Queue length above which a producer stops reading ahead.
pub const DEFAULT_HIGH_WATER_MARK: usize = 50;

/// How long a producer pauses when its queue is above the high-water mark.
pub const DEFAULT_PRODUCER_BACKOFF: Duration = Duration::from_millis(200);

/// How long a consumer pauses when every queue of a file is empty.
pub const DEFAULT_CONSUMER_BACKOFF: Duration = Duration::from_millis(300);

const PAUSE_SLICE: Duration = Duration::from_millis(20);

/// One line handed from a producer to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedLine {
    pub text: String,
    /// Recycle lap the line was read on.
    pub lap: u64,
    /// Absolute offset just past the line and its terminator.
    pub end_offset: u64,
}

/// Consumer side of one partition.
///
/// Taking a line commits its end offset to the partition's range progress,
/// so checkpoints only ever cover lines somebody actually received.
#[derive(Debug)]
pub struct PartitionQueue {
    receiver: Receiver<FeedLine>,
    progress: Arc<RangeProgress>,
}

/// Create a bounded queue for one partition. The sender goes to the
/// partition's producer; dropping it marks the end of the partition's data.
pub fn partition_queue(
    capacity: usize,
    progress: Arc<RangeProgress>,
) -> (Sender<FeedLine>, PartitionQueue) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
    (sender, PartitionQueue { receiver, progress })
}

impl PartitionQueue {
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn progress(&self) -> &Arc<RangeProgress> {
        &self.progress
    }

    /// Take the next line without blocking.
    pub fn try_take(&self) -> Result<FeedLine, TryRecvError> {
        let line = self.receiver.try_recv()?;
        self.progress.commit(line.lap, line.end_offset);
        Ok(line)
    }
}

/// Sleep for `total` in short slices. Returns false if cancelled first.
pub fn pause(cancel: &CancellationToken, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(PAUSE_SLICE.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csv_feeder_file::ByteRange;

    fn line(text: &str, lap: u64, end_offset: u64) -> FeedLine {
        FeedLine {
            text: text.to_string(),
            lap,
            end_offset,
        }
    }

    #[test]
    fn test_take_commits_progress() {
        let progress = Arc::new(RangeProgress::new(ByteRange::new(0, 8)));
        let (sender, queue) = partition_queue(4, Arc::clone(&progress));
        sender.send(line("1,2", 0, 4)).unwrap();
        sender.send(line("3,4", 0, 8)).unwrap();

        assert_eq!(progress.read_position(), 0);
        assert_eq!(queue.try_take().unwrap().text, "1,2");
        assert_eq!(progress.read_position(), 4);
        assert_eq!(queue.len(), 1);
        queue.try_take().unwrap();
        assert_eq!(progress.long_available(), 0);
    }

    #[test]
    fn test_disconnected_after_sender_dropped() {
        let progress = Arc::new(RangeProgress::new(ByteRange::new(0, 4)));
        let (sender, queue) = partition_queue(2, progress);
        sender.send(line("x", 0, 2)).unwrap();
        drop(sender);
        assert!(queue.try_take().is_ok());
        assert_eq!(queue.try_take(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_pause_returns_early_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Instant::now();
        assert!(!pause(&cancel, Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(pause(&CancellationToken::new(), Duration::from_millis(10)));
    }
}
