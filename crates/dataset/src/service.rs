//! The feeder service shared by every data set of a run.
//!
//! One [`FeederService`] owns the file registry, the partition registry, the
//! producer threads and the checkpoint reporters of a load-test run. Data
//! sets open sources through it; nothing is process-global, so several runs
//! can live in one process.

use crate::config::DataSetConfig;
use crate::error::{FeedError, Result};
use checkpoint::{
    CheckpointConfig, CheckpointReporter, CheckpointStore, FilePosition, PositionRange,
    PositionSource,
};
use csv_feeder_file::{
    ByteRange, FileEntry, FileRegistry, RangeProgress, RangeReader, RangeSpec, Remaining,
    Reservation,
};
use csv_feeder_partition::{
    partition_queue, plan_partitions, plan_record_partitions, FeedLine, LineProducer,
    PartitionRegistry, ProducerOptions, ProducerSummary, DEFAULT_CONSUMER_BACKOFF,
    DEFAULT_MAX_SEGMENT_LEN, DEFAULT_PRODUCER_BACKOFF,
};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Settings of a feeder service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory relative filenames are resolved against.
    pub base_dir: Option<PathBuf>,
    pub checkpoint: CheckpointConfig,
    pub consumer_backoff: Duration,
    pub producer_backoff: Duration,
    pub max_segment_len: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            checkpoint: CheckpointConfig::default(),
            consumer_backoff: DEFAULT_CONSUMER_BACKOFF,
            producer_backoff: DEFAULT_PRODUCER_BACKOFF,
            max_segment_len: DEFAULT_MAX_SEGMENT_LEN,
        }
    }
}

/// Which part of a file an alias reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resume {
    /// The whole file.
    Fresh,
    /// One range from a position map.
    Range(PositionRange),
    /// One range per partition from a position map.
    Partitions(Vec<PositionRange>),
}

/// Parameters for opening an alias.
#[derive(Debug, Clone)]
pub struct OpenRequest<'a> {
    pub alias: &'a str,
    pub config: &'a DataSetConfig,
    /// Read the first line of the range as a header.
    pub has_header: bool,
    pub resume: Resume,
}

/// Checkpointed view of one range's progress.
#[derive(Debug)]
pub struct RangeCheckpoint {
    task_id: String,
    pod_num: String,
    file_name: String,
    partition: Option<usize>,
    progress: Arc<RangeProgress>,
}

impl PositionSource for RangeCheckpoint {
    fn snapshot(&self) -> FilePosition {
        let range = self.progress.range();
        FilePosition {
            task_id: self.task_id.clone(),
            file_name: self.file_name.clone(),
            pod_num: self.pod_num.clone(),
            start_position: range.start,
            read_position: self.progress.read_position(),
            end_position: range.stop,
            partition: self.partition,
        }
    }

    fn is_finished(&self) -> bool {
        self.progress.remaining() == Remaining::Exhausted
    }
}

/// An opened alias: its file entry and the progress of each partition.
#[derive(Debug)]
pub struct FeedSource {
    alias: String,
    entry: Arc<FileEntry>,
    progress: Vec<Arc<RangeProgress>>,
}

impl FeedSource {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn entry(&self) -> &Arc<FileEntry> {
        &self.entry
    }

    pub fn header(&self) -> Option<&str> {
        self.entry.header()
    }

    /// Range progress per partition, in partition order.
    pub fn progress(&self) -> &[Arc<RangeProgress>] {
        &self.progress
    }
}

pub struct FeederService {
    files: FileRegistry,
    partitions: PartitionRegistry,
    sources: Mutex<HashMap<String, Arc<FeedSource>>>,
    producers: Mutex<Vec<JoinHandle<ProducerSummary>>>,
    reporters: Mutex<Vec<tokio::task::JoinHandle<u64>>>,
    tracked: Mutex<Vec<Arc<RangeCheckpoint>>>,
    reported_files: Mutex<HashSet<String>>,
    store: Arc<dyn CheckpointStore>,
    config: ServiceConfig,
    runtime: Option<tokio::runtime::Handle>,
    cancel: CancellationToken,
}

impl FeederService {
    /// Create a service. Checkpoint reporters run on the current tokio
    /// runtime, if there is one.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let store = config
            .checkpoint
            .storage
            .build()
            .map_err(|e| FeedError::Configuration(format!("{e:#}")))?;
        Ok(Self::with_store(config, store))
    }

    /// Create a service pushing checkpoints to `store`.
    pub fn with_store(config: ServiceConfig, store: Arc<dyn CheckpointStore>) -> Self {
        let files = match &config.base_dir {
            Some(dir) => FileRegistry::with_base_dir(dir),
            None => FileRegistry::new(),
        };
        let runtime = tokio::runtime::Handle::try_current().ok();
        if runtime.is_none() {
            debug!("No tokio runtime, checkpoint reporting disabled");
        }
        Self {
            files,
            partitions: PartitionRegistry::with_backoff(config.consumer_backoff),
            sources: Mutex::new(HashMap::new()),
            producers: Mutex::new(Vec::new()),
            reporters: Mutex::new(Vec::new()),
            tracked: Mutex::new(Vec::new()),
            reported_files: Mutex::new(HashSet::new()),
            store,
            config,
            runtime,
            cancel: CancellationToken::new(),
        }
    }

    pub fn files(&self) -> &FileRegistry {
        &self.files
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn source(&self, alias: &str) -> Option<Arc<FeedSource>> {
        lock(&self.sources).get(alias).cloned()
    }

    /// Positions of every checkpointed range.
    pub fn positions(&self) -> Vec<FilePosition> {
        lock(&self.tracked).iter().map(|t| t.snapshot()).collect()
    }

    /// Open `alias`, or return it if already open.
    ///
    /// The first open reserves the file, starts one producer per partition
    /// and, for ranges from a position map, starts checkpoint reporting.
    pub fn open(&self, request: &OpenRequest<'_>) -> Result<Arc<FeedSource>> {
        let mut sources = lock(&self.sources);
        if let Some(source) = sources.get(request.alias) {
            return Ok(Arc::clone(source));
        }
        if self.cancel.is_cancelled() {
            return Err(FeedError::Cancelled);
        }

        let config = request.config;
        let (range, partition_ranges) = match &request.resume {
            Resume::Fresh => (RangeSpec::Unbounded, None),
            Resume::Range(r) => (RangeSpec::Ranged(ByteRange::new(r.start, r.end)), None),
            Resume::Partitions(ranges) => {
                let start = ranges.iter().map(|r| r.start).min().unwrap_or(0);
                let stop = ranges.iter().map(|r| r.end).max().unwrap_or(0);
                let ranges: Vec<ByteRange> =
                    ranges.iter().map(|r| ByteRange::new(r.start, r.end)).collect();
                (RangeSpec::Ranged(ByteRange::new(start, stop)), Some(ranges))
            }
        };

        let entry = self.files.reserve_entry(&Reservation {
            alias: request.alias.to_string(),
            filename: config.filename.clone(),
            encoding: config.file_encoding.clone(),
            range,
            has_header: request.has_header,
        })?;

        let partitioned = partition_ranges.is_some() || config.partitions > 1;
        let readers: Vec<RangeReaderHandle> = if partitioned {
            let ranges = match partition_ranges {
                Some(ranges) => clamp_partitions(&entry, ranges),
                None if config.quoted_data => {
                    plan_record_partitions(entry.path(), entry.data_range(), config.partitions)?
                }
                None => plan_partitions(entry.path(), entry.data_range(), config.partitions)?,
            };
            info!(
                "{}",
                csv_feeder_partition::describe_plan(entry.path(), &ranges)
            );
            ranges
                .into_iter()
                .map(|r| self.files.open_range(&entry, r).map(RangeReaderHandle::Owned))
                .collect::<csv_feeder_file::Result<_>>()?
        } else {
            vec![RangeReaderHandle::Shared(
                self.files.create_stream(&entry, false)?,
            )]
        };

        let mut progress = Vec::with_capacity(readers.len());
        for (index, reader) in readers.into_iter().enumerate() {
            let partition = partitioned.then_some(index);
            progress.push(self.start_producer(request.alias, &entry, config, partition, reader)?);
        }

        if entry.is_ranged() {
            self.track(&entry, &progress, partitioned);
        }

        let source = Arc::new(FeedSource {
            alias: request.alias.to_string(),
            entry,
            progress,
        });
        sources.insert(request.alias.to_string(), Arc::clone(&source));
        Ok(source)
    }

    fn start_producer(
        &self,
        alias: &str,
        entry: &FileEntry,
        config: &DataSetConfig,
        partition: Option<usize>,
        reader: RangeReaderHandle,
    ) -> Result<Arc<RangeProgress>> {
        let options = ProducerOptions {
            encoding: entry.encoding(),
            recycle: config.recycle,
            partition_tag: partition.filter(|_| config.tag_partitions),
            quoted: config.quoted_data,
            high_water_mark: config.high_water_mark,
            backoff: self.config.producer_backoff,
            max_segment_len: self.config.max_segment_len,
            ..ProducerOptions::default()
        };

        let (progress, producer) = reader.with(|reader| {
            let progress = reader.progress();
            let (sender, queue) = partition_queue(config.queue_capacity, Arc::clone(&progress));
            self.partitions.register(alias, queue);
            LineProducer::new(reader, sender, options, self.cancel.child_token())
                .map(|producer| (progress, producer))
        })?;
        lock(&self.producers).push(producer.spawn()?);
        Ok(progress)
    }

    fn track(&self, entry: &FileEntry, progress: &[Arc<RangeProgress>], partitioned: bool) {
        let file_name = entry.file_name();
        if !lock(&self.reported_files).insert(file_name.clone()) {
            debug!("Checkpoints for {} already reported by another alias", file_name);
            return;
        }

        let checkpoint = &self.config.checkpoint;
        let reporter = CheckpointReporter::new(Arc::clone(&self.store), checkpoint.interval);
        for (index, progress) in progress.iter().enumerate() {
            let tracked = Arc::new(RangeCheckpoint {
                task_id: checkpoint.task_id.clone(),
                pod_num: checkpoint.pod_num.clone(),
                file_name: file_name.clone(),
                partition: partitioned.then_some(index),
                progress: Arc::clone(progress),
            });
            lock(&self.tracked).push(Arc::clone(&tracked));

            match &self.runtime {
                Some(handle) if checkpoint.should_report() => {
                    let task = reporter.spawn(handle, tracked, self.cancel.child_token());
                    lock(&self.reporters).push(task);
                }
                Some(_) => {}
                None => warn!(
                    "No async runtime, not reporting checkpoints for {}",
                    file_name
                ),
            }
        }
        info!(
            "Tracking read position of {} ({} ranges)",
            file_name,
            progress.len()
        );
    }

    /// Next line of `source`, waiting while its queues are empty. `None` at
    /// end of data.
    pub fn next_line(&self, source: &FeedSource) -> Result<Option<FeedLine>> {
        Ok(self.partitions.next(&source.alias, &self.cancel)?)
    }

    /// Next record of `source`. For a quoted data set the producer has
    /// already kept every line of a multi-line record together, with its
    /// original terminators, so one queue entry is one record.
    pub fn read_record(&self, source: &FeedSource) -> Result<Option<String>> {
        Ok(self.next_line(source)?.map(|line| line.text))
    }

    /// Stop producers and reporters, push a last checkpoint for every
    /// tracked range and release all files.
    pub async fn shutdown(&self) {
        info!("Shutting down feeder service");
        self.cancel.cancel();

        let reporters = std::mem::take(&mut *lock(&self.reporters));
        for reporter in reporters {
            if let Err(e) = reporter.await {
                warn!("Checkpoint reporter failed: {}", e);
            }
        }

        let tracked = lock(&self.tracked).clone();
        if !tracked.is_empty() && self.config.checkpoint.should_report() {
            info!("Pushing final checkpoints for {} ranges", tracked.len());
            let reporter =
                CheckpointReporter::new(Arc::clone(&self.store), self.config.checkpoint.interval);
            for range in &tracked {
                reporter.push(range.as_ref()).await;
            }
        }

        let producers = std::mem::take(&mut *lock(&self.producers));
        let joined = tokio::task::spawn_blocking(move || {
            producers
                .into_iter()
                .filter_map(|handle| handle.join().ok())
                .map(|summary| summary.lines)
                .sum::<u64>()
        })
        .await;
        match joined {
            Ok(lines) => info!("Producers stopped after {} lines", lines),
            Err(e) => warn!("Failed to join producers: {}", e),
        }

        lock(&self.sources).clear();
        self.files.close_all();
    }
}

impl Drop for FeederService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A reader a producer can be built from.
enum RangeReaderHandle {
    Shared(csv_feeder_file::SharedReader),
    Owned(RangeReader),
}

impl RangeReaderHandle {
    fn with<T>(self, f: impl FnOnce(&RangeReader) -> T) -> T {
        match self {
            RangeReaderHandle::Shared(shared) => f(&lock(&shared)),
            RangeReaderHandle::Owned(reader) => f(&reader),
        }
    }
}

/// Keep stored partition ranges inside the reserved data range.
fn clamp_partitions(entry: &FileEntry, ranges: Vec<ByteRange>) -> Vec<ByteRange> {
    let data = entry.data_range();
    ranges
        .into_iter()
        .map(|r| {
            let start = r.start.clamp(data.start, data.stop);
            ByteRange::new(start, r.stop.clamp(start, data.stop))
        })
        .collect()
}
