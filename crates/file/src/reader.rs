//! A file stream bounded to one byte range.
//!
//! [`RangeReader`] reads like a normal file but stops at the end of its
//! assigned range even when the underlying file continues, because the range
//! is usually a slice of a larger file shared by several pods. The bytes left
//! in the range are tracked by a [`RangeProgress`] that can be shared with a
//! checkpoint timer and with queue consumers committing what they took.

use crate::error::{FileError, Result};
use crate::range::ByteRange;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Bytes left in a range.
///
/// `Bytes(0)` means every byte of the range was consumed but nobody has
/// observed the end of the stream yet; `Exhausted` means a read did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Bytes(u64),
    Exhausted,
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    lap: u64,
    position: u64,
    exhausted: bool,
}

/// Consumption state of one byte range.
#[derive(Debug)]
pub struct RangeProgress {
    range: ByteRange,
    cursor: Mutex<Cursor>,
}

impl RangeProgress {
    pub fn new(range: ByteRange) -> Self {
        Self {
            range,
            cursor: Mutex::new(Cursor {
                lap: 0,
                position: range.start,
                exhausted: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn range(&self) -> ByteRange {
        self.range
    }

    /// Absolute offset of the next unconsumed byte.
    pub fn position(&self) -> u64 {
        self.lock().position
    }

    /// Number of times the range has been recycled.
    pub fn lap(&self) -> u64 {
        self.lock().lap
    }

    pub fn remaining(&self) -> Remaining {
        let cursor = self.lock();
        if cursor.exhausted {
            Remaining::Exhausted
        } else {
            Remaining::Bytes(self.range.stop.saturating_sub(cursor.position))
        }
    }

    /// True 64-bit count of bytes left in the range.
    pub fn long_available(&self) -> u64 {
        match self.remaining() {
            Remaining::Bytes(n) => n,
            Remaining::Exhausted => 0,
        }
    }

    /// Bytes left, clamped to a 32-bit signed count.
    pub fn available(&self) -> i32 {
        i32::try_from(self.long_available()).unwrap_or(i32::MAX)
    }

    /// Offset reported in checkpoints: `stop - long_available()`.
    pub fn read_position(&self) -> u64 {
        self.range.stop - self.long_available()
    }

    /// Account for `n` bytes returned by the underlying stream and return how
    /// many of them were inside the range. Over-reads exhaust the range.
    pub fn record_read(&self, n: u64) -> u64 {
        let mut cursor = self.lock();
        if cursor.exhausted {
            return 0;
        }
        let remaining = self.range.stop.saturating_sub(cursor.position);
        if n > remaining {
            cursor.position = self.range.stop;
            cursor.exhausted = true;
            remaining
        } else {
            cursor.position += n;
            n
        }
    }

    /// Advance by up to `n` bytes, never past the end of the range.
    pub fn skip(&self, n: u64) -> u64 {
        let mut cursor = self.lock();
        if cursor.exhausted {
            return 0;
        }
        let skipped = n.min(self.range.stop.saturating_sub(cursor.position));
        cursor.position += skipped;
        skipped
    }

    pub fn mark_exhausted(&self) {
        let mut cursor = self.lock();
        cursor.position = self.range.stop;
        cursor.exhausted = true;
    }

    /// Record that everything up to `offset` on lap `lap` has been handed
    /// out. Commits from older laps are ignored and offsets only move forward
    /// within a lap.
    pub fn commit(&self, lap: u64, offset: u64) {
        let offset = offset.clamp(self.range.start, self.range.stop);
        let mut cursor = self.lock();
        if lap > cursor.lap {
            cursor.lap = lap;
            cursor.position = offset;
            cursor.exhausted = false;
        } else if lap == cursor.lap && offset > cursor.position {
            cursor.position = offset;
        }
    }

    fn unread(&self, n: u64) {
        let mut cursor = self.lock();
        cursor.position = cursor.position.saturating_sub(n).max(self.range.start);
        cursor.exhausted = false;
    }
}

/// File stream scoped to `[start, stop)`.
#[derive(Debug)]
pub struct RangeReader {
    path: PathBuf,
    file: File,
    progress: Arc<RangeProgress>,
}

impl RangeReader {
    /// Open `path` and position the stream at `range.start`.
    pub fn open(path: impl AsRef<Path>, range: ByteRange) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|e| FileError::io(&path, e))?;
        let at = file
            .seek(SeekFrom::Start(range.start))
            .map_err(|e| FileError::io(&path, e))?;
        if at != range.start {
            return Err(FileError::InvalidRange {
                path,
                start: range.start,
                stop: range.stop,
            });
        }
        Ok(Self {
            path,
            file,
            progress: Arc::new(RangeProgress::new(range)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn range(&self) -> ByteRange {
        self.progress.range()
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Shared handle on the consumption state of this reader.
    pub fn progress(&self) -> Arc<RangeProgress> {
        Arc::clone(&self.progress)
    }

    pub fn position(&self) -> u64 {
        self.progress.position()
    }

    pub fn remaining(&self) -> Remaining {
        self.progress.remaining()
    }

    pub fn available(&self) -> i32 {
        self.progress.available()
    }

    pub fn long_available(&self) -> u64 {
        self.progress.long_available()
    }

    /// Skip up to `n` bytes and return how many were skipped.
    pub fn skip(&mut self, n: u64) -> io::Result<u64> {
        let skipped = self.progress.skip(n);
        if skipped > 0 {
            self.file.seek(SeekFrom::Current(skipped as i64))?;
        }
        Ok(skipped)
    }

    /// Read one line terminated by `\n`, `\r` or `\r\n`, without the
    /// terminator. Returns `None` at the end of the range.
    pub fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if self.read(&mut byte)? == 0 {
                return Ok(if line.is_empty() { None } else { Some(line) });
            }
            match byte[0] {
                b'\n' => return Ok(Some(line)),
                b'\r' => {
                    if self.read(&mut byte)? == 1 && byte[0] != b'\n' {
                        self.file.seek(SeekFrom::Current(-1))?;
                        self.progress.unread(1);
                    }
                    return Ok(Some(line));
                }
                b => line.push(b),
            }
        }
    }
}

impl Read for RangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = match self.progress.remaining() {
            Remaining::Exhausted => return Ok(0),
            Remaining::Bytes(0) => {
                self.progress.mark_exhausted();
                return Ok(0);
            }
            Remaining::Bytes(n) => n,
        };
        if buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = self.file.read(&mut buf[..want])?;
        if n == 0 {
            // Underlying file ended before the range did.
            self.progress.mark_exhausted();
            return Ok(0);
        }
        Ok(self.progress.record_read(n as u64) as usize)
    }
}
