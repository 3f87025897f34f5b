//! Memory-mapped line producer.
//!
//! A [`LineProducer`] maps its byte range in segments of at most
//! `max_segment_len` bytes, scans them in fixed-size chunks and pushes every
//! non-blank line into its partition queue. A line that straddles a chunk or
//! segment boundary is carried over and emitted once complete. With `quoted`
//! set, a line terminator inside an open quoted field is kept as data, so a
//! multi-line record reaches the queue whole. The producer
//! is the only writer to its queue and runs on its own thread.

use crate::error::Result;
use crate::queue::{pause, FeedLine, DEFAULT_HIGH_WATER_MARK, DEFAULT_PRODUCER_BACKOFF};
use crossbeam_channel::{SendTimeoutError, Sender};
use csv_feeder_file::{strip_bom, ByteRange, FileEncoding, RangeReader};
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Largest span mapped at once.
pub const DEFAULT_MAX_SEGMENT_LEN: u64 = i32::MAX as u64;

/// Bytes scanned between two backpressure checks.
pub const DEFAULT_CHUNK_LEN: usize = 64 * 1024;

const SEND_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ProducerOptions {
    pub encoding: FileEncoding,
    /// Start over from the beginning of the data once the range is done.
    pub recycle: bool,
    /// Appended to every line as `,<id>` when set.
    pub partition_tag: Option<usize>,
    /// Track `"` parity and keep terminators inside quoted fields.
    pub quoted: bool,
    pub high_water_mark: usize,
    pub backoff: Duration,
    pub max_segment_len: u64,
    pub chunk_len: usize,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            encoding: FileEncoding::Utf8,
            recycle: false,
            partition_tag: None,
            quoted: false,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            backoff: DEFAULT_PRODUCER_BACKOFF,
            max_segment_len: DEFAULT_MAX_SEGMENT_LEN,
            chunk_len: DEFAULT_CHUNK_LEN,
        }
    }
}

/// What a producer did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerSummary {
    pub lines: u64,
    /// Completed passes over the range.
    pub laps: u64,
    pub cancelled: bool,
}

enum Scan {
    Completed(u64),
    Stopped(u64),
}

/// Split `range` into consecutive segments of at most `max_len` bytes.
///
/// Each segment starts where the previous one stopped and the last one stops
/// at `range.stop`. An empty range has no segments.
pub fn segments(range: ByteRange, max_len: u64) -> Vec<ByteRange> {
    let max_len = max_len.max(1);
    let mut segments = Vec::new();
    let mut start = range.start;
    while start < range.stop {
        let stop = range.stop.min(start.saturating_add(max_len));
        segments.push(ByteRange::new(start, stop));
        start = stop;
    }
    segments
}

pub struct LineProducer {
    path: PathBuf,
    file: File,
    data: ByteRange,
    options: ProducerOptions,
    sender: Sender<FeedLine>,
    cancel: CancellationToken,
}

impl LineProducer {
    /// Producer over what is left of `reader`'s range, from its current
    /// position to the end.
    pub fn new(
        reader: &RangeReader,
        sender: Sender<FeedLine>,
        options: ProducerOptions,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            path: reader.path().to_path_buf(),
            file: reader.file().try_clone()?,
            data: ByteRange::new(reader.position(), reader.range().stop),
            options,
            sender,
            cancel,
        })
    }

    pub fn data_range(&self) -> ByteRange {
        self.data
    }

    /// Run on a dedicated named thread.
    pub fn spawn(self) -> Result<JoinHandle<ProducerSummary>> {
        let name = match self.options.partition_tag {
            Some(id) => format!("feeder-producer-{id}"),
            None => "feeder-producer".to_string(),
        };
        Ok(std::thread::Builder::new()
            .name(name)
            .spawn(move || self.run())?)
    }

    /// Produce lines until the range is done (and not recycling), the queue
    /// is dropped, or the producer is cancelled.
    pub fn run(self) -> ProducerSummary {
        info!(
            "Starting producer for {} range {} (partition {:?}, recycle {})",
            self.path.display(),
            self.data,
            self.options.partition_tag,
            self.options.recycle
        );
        let mut summary = ProducerSummary::default();
        let mut lap = 0u64;
        loop {
            match self.scan(lap) {
                Scan::Completed(lines) => {
                    summary.lines += lines;
                    summary.laps += 1;
                    if !self.options.recycle {
                        break;
                    }
                    if lines == 0 {
                        warn!(
                            "No lines in {} range {}, not recycling",
                            self.path.display(),
                            self.data
                        );
                        break;
                    }
                    lap += 1;
                    debug!("Recycling {} (lap {})", self.path.display(), lap);
                }
                Scan::Stopped(lines) => {
                    summary.lines += lines;
                    summary.cancelled = true;
                    break;
                }
            }
        }
        info!(
            "Producer for {} finished: {} lines over {} laps",
            self.path.display(),
            summary.lines,
            summary.laps
        );
        summary
    }

    fn scan(&self, lap: u64) -> Scan {
        let mut pending: Vec<u8> = Vec::new();
        let mut line_start = self.data.start;
        let mut emitted = 0u64;
        let mut in_quote = false;
        let chunk_len = self.options.chunk_len.max(1);

        for segment in segments(self.data, self.options.max_segment_len) {
            let map = match self.map(segment) {
                Ok(map) => map,
                Err(e) => {
                    error!(
                        "Failed to map {} of {}: {}",
                        segment,
                        self.path.display(),
                        e
                    );
                    pending.clear();
                    in_quote = false;
                    line_start = segment.stop;
                    continue;
                }
            };

            for (chunk_index, chunk) in map.chunks(chunk_len).enumerate() {
                if !self.wait_for_room() {
                    return Scan::Stopped(emitted);
                }
                let chunk_start = segment.start + (chunk_index * chunk_len) as u64;
                for (i, &byte) in chunk.iter().enumerate() {
                    if self.options.quoted && byte == b'"' {
                        in_quote = !in_quote;
                    }
                    if (byte != b'\n' && byte != b'\r') || in_quote {
                        pending.push(byte);
                        continue;
                    }
                    let end_offset = chunk_start + i as u64 + 1;
                    if !pending.is_empty() {
                        match self.emit(&pending, line_start, lap, end_offset) {
                            Some(true) => emitted += 1,
                            Some(false) => {}
                            None => return Scan::Stopped(emitted),
                        }
                        pending.clear();
                    }
                    line_start = end_offset;
                }
            }
        }

        if !pending.is_empty() {
            match self.emit(&pending, line_start, lap, self.data.stop) {
                Some(true) => emitted += 1,
                Some(false) => {}
                None => return Scan::Stopped(emitted),
            }
        }
        Scan::Completed(emitted)
    }

    fn map(&self, segment: ByteRange) -> std::io::Result<Mmap> {
        let len = usize::try_from(segment.len())
            .map_err(|_| std::io::Error::other("segment larger than address space"))?;
        // SAFETY: the mapping is read-only and fixture files are not written
        // while a run is reading them.
        unsafe {
            MmapOptions::new()
                .offset(segment.start)
                .len(len)
                .map(&self.file)
        }
    }

    /// Block while the queue is above the high-water mark.
    fn wait_for_room(&self) -> bool {
        while self.sender.len() > self.options.high_water_mark {
            if !pause(&self.cancel, self.options.backoff) {
                return false;
            }
        }
        !self.cancel.is_cancelled()
    }

    /// Decode and send one line. `Some(false)` for a blank line, `None` when
    /// the producer has to stop.
    fn emit(&self, bytes: &[u8], line_start: u64, lap: u64, end_offset: u64) -> Option<bool> {
        let bytes = if line_start == 0 { strip_bom(bytes) } else { bytes };
        let mut text = self.options.encoding.decode(bytes);
        if text.trim().is_empty() {
            return Some(false);
        }
        if let Some(id) = self.options.partition_tag {
            text.push(',');
            text.push_str(&id.to_string());
        }
        let mut line = FeedLine {
            text,
            lap,
            end_offset,
        };
        loop {
            match self.sender.send_timeout(line, SEND_POLL) {
                Ok(()) => return Some(true),
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.cancel.is_cancelled() {
                        return None;
                    }
                    line = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    debug!("Queue for {} dropped", self.path.display());
                    return None;
                }
            }
        }
    }
}
