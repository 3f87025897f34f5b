//! Byte ranges and the fresh-vs-resume range specification.

use crate::error::{FileError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Half-open byte range `[start, stop)` within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub stop: u64,
}

impl ByteRange {
    pub fn new(start: u64, stop: u64) -> Self {
        Self { start, stop }
    }

    /// The range covering a whole file of `size` bytes.
    pub fn whole(size: u64) -> Self {
        Self {
            start: 0,
            stop: size,
        }
    }

    pub fn len(&self) -> u64 {
        self.stop.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.stop
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

/// How a reservation picks its byte range.
///
/// `Unbounded` is the fresh case and always covers `[0, fileSize)`.
/// `Ranged` is the resume case, taken from an external position map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    Unbounded,
    Ranged(ByteRange),
}

impl RangeSpec {
    /// Whether the end of the range is known up front. Only ranged
    /// reservations report checkpoints.
    pub fn is_ranged(&self) -> bool {
        matches!(self, RangeSpec::Ranged(_))
    }

    /// Resolve against the actual file size.
    ///
    /// A stop beyond the end of the file is clamped; a start past the stop
    /// is rejected.
    pub fn resolve(&self, path: &Path, file_size: u64) -> Result<ByteRange> {
        match *self {
            RangeSpec::Unbounded => Ok(ByteRange::whole(file_size)),
            RangeSpec::Ranged(range) => {
                if range.start > range.stop {
                    return Err(FileError::InvalidRange {
                        path: path.to_path_buf(),
                        start: range.start,
                        stop: range.stop,
                    });
                }
                if range.stop > file_size {
                    tracing::warn!(
                        "Range {} exceeds size of {} ({} bytes), clamping",
                        range,
                        path.display(),
                        file_size
                    );
                }
                let stop = range.stop.min(file_size);
                Ok(ByteRange::new(range.start.min(stop), stop))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_len() {
        assert_eq!(ByteRange::new(10, 40).len(), 30);
        assert!(ByteRange::new(7, 7).is_empty());
        assert!(ByteRange::new(0, 3).contains(2));
        assert!(!ByteRange::new(0, 3).contains(3));
    }

    #[test]
    fn test_unbounded_resolves_to_whole_file() {
        let range = RangeSpec::Unbounded
            .resolve(Path::new("a.csv"), 128)
            .unwrap();
        assert_eq!(range, ByteRange::new(0, 128));
    }

    #[test]
    fn test_ranged_clamps_stop() {
        let range = RangeSpec::Ranged(ByteRange::new(10, 500))
            .resolve(Path::new("a.csv"), 100)
            .unwrap();
        assert_eq!(range, ByteRange::new(10, 100));
    }

    #[test]
    fn test_ranged_rejects_inverted_range() {
        let result = RangeSpec::Ranged(ByteRange::new(50, 10)).resolve(Path::new("a.csv"), 100);
        assert!(matches!(result, Err(FileError::InvalidRange { .. })));
    }
}
