//! Alias-keyed registry of reserved fixture files.
//!
//! The first reservation of an alias opens the file, resolves its byte range
//! and reads the header line when asked to. Later reservations of the same
//! alias return the stored entry untouched: they do not reopen the file and
//! do not rewind the stream.

use crate::encoding::{strip_bom, FileEncoding};
use crate::error::{FileError, Result};
use crate::range::{ByteRange, RangeSpec};
use crate::reader::RangeReader;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// A range reader shared between the registry and whoever drives it.
pub type SharedReader = Arc<Mutex<RangeReader>>;

/// Request to reserve a file under an alias.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub alias: String,
    pub filename: String,
    pub encoding: Option<String>,
    pub range: RangeSpec,
    pub has_header: bool,
}

/// A reserved file. Immutable once created.
#[derive(Debug)]
pub struct FileEntry {
    alias: String,
    path: PathBuf,
    encoding: FileEncoding,
    range: ByteRange,
    data_start: u64,
    header: Option<String>,
    ranged: bool,
}

impl FileEntry {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Base name of the file, the key used by position maps and checkpoints.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn encoding(&self) -> FileEncoding {
        self.encoding
    }

    /// The full reserved range, header included.
    pub fn range(&self) -> ByteRange {
        self.range
    }

    /// The part of the range after the header line.
    pub fn data_range(&self) -> ByteRange {
        ByteRange::new(self.data_start, self.range.stop)
    }

    pub fn header(&self) -> Option<&str> {
        self.header.as_deref()
    }

    /// Whether the range came from an external position map.
    pub fn is_ranged(&self) -> bool {
        self.ranged
    }
}

/// Process-local file registry owned by one feeder service.
#[derive(Debug, Default)]
pub struct FileRegistry {
    base_dir: Option<PathBuf>,
    entries: Mutex<HashMap<String, Arc<FileEntry>>>,
    streams: Mutex<HashMap<String, SharedReader>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative filenames against `base_dir`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
            ..Self::default()
        }
    }

    pub fn resolve_path(&self, filename: &str) -> PathBuf {
        let path = PathBuf::from(filename);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }

    /// Reserve a file and return its header line, if one was requested.
    pub fn reserve(&self, request: &Reservation) -> Result<Option<String>> {
        self.reserve_entry(request)
            .map(|entry| entry.header.clone())
    }

    /// Reserve a file and return the stored entry.
    pub fn reserve_entry(&self, request: &Reservation) -> Result<Arc<FileEntry>> {
        if request.filename.trim().is_empty() {
            return Err(FileError::EmptyFilename);
        }

        // Held for the whole reservation so each alias is opened exactly once.
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get(&request.alias) {
            if request.has_header && entry.header.is_none() {
                return Err(FileError::MissingHeader {
                    path: entry.path.clone(),
                    alias: entry.alias.clone(),
                });
            }
            debug!("Alias {} already reserved", request.alias);
            return Ok(Arc::clone(entry));
        }

        let path = self.resolve_path(request.filename.trim());
        let not_readable = || FileError::NotReadable {
            path: path.clone(),
            alias: request.alias.clone(),
        };
        let metadata = std::fs::metadata(&path).map_err(|_| not_readable())?;
        if !metadata.is_file() {
            return Err(not_readable());
        }

        let encoding = FileEncoding::parse(request.encoding.as_deref())?;
        let range = request.range.resolve(&path, metadata.len())?;
        let mut reader = RangeReader::open(&path, range)?;

        let header = if request.has_header {
            let line = reader
                .read_line()
                .map_err(|e| FileError::io(&path, e))?
                .ok_or_else(|| FileError::MissingHeader {
                    path: path.clone(),
                    alias: request.alias.clone(),
                })?;
            let bytes = if range.start == 0 && encoding == FileEncoding::Utf8 {
                strip_bom(&line)
            } else {
                &line
            };
            Some(encoding.decode(bytes))
        } else {
            None
        };

        let entry = Arc::new(FileEntry {
            alias: request.alias.clone(),
            path: path.clone(),
            encoding,
            range,
            data_start: reader.position(),
            header,
            ranged: request.range.is_ranged(),
        });

        if request.filename.trim() == request.alias {
            info!("Stored: {} range {}", path.display(), range);
        } else {
            info!(
                "Stored: {} Alias: {} range {}",
                path.display(),
                request.alias,
                range
            );
        }

        entries.insert(request.alias.clone(), Arc::clone(&entry));
        lock(&self.streams).insert(request.alias.clone(), Arc::new(Mutex::new(reader)));
        Ok(entry)
    }

    pub fn entry(&self, alias: &str) -> Option<Arc<FileEntry>> {
        lock(&self.entries).get(alias).cloned()
    }

    /// Stream over the entry's range.
    ///
    /// Without `recycle` the cached reader for the alias is returned, so its
    /// position carries on from the header read. With `recycle` a fresh
    /// reader over the data range replaces it.
    pub fn create_stream(&self, entry: &FileEntry, recycle: bool) -> Result<SharedReader> {
        let mut streams = lock(&self.streams);
        if !recycle {
            if let Some(reader) = streams.get(entry.alias()) {
                return Ok(Arc::clone(reader));
            }
        }
        let reader = Arc::new(Mutex::new(RangeReader::open(
            entry.path(),
            entry.data_range(),
        )?));
        streams.insert(entry.alias().to_string(), Arc::clone(&reader));
        Ok(reader)
    }

    /// Uncached reader over a sub-range of the entry, for partitions.
    pub fn open_range(&self, entry: &FileEntry, range: ByteRange) -> Result<RangeReader> {
        debug!("Opening {} for {}", range, entry.alias());
        RangeReader::open(entry.path(), range)
    }

    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = lock(&self.entries).keys().cloned().collect();
        aliases.sort();
        aliases
    }

    /// Forget every reservation and cached stream.
    pub fn close_all(&self) {
        let mut entries = lock(&self.entries);
        let mut streams = lock(&self.streams);
        info!("Closing {} reserved files", entries.len());
        entries.clear();
        streams.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn reservation(alias: &str, filename: &str, has_header: bool) -> Reservation {
        Reservation {
            alias: alias.to_string(),
            filename: filename.to_string(),
            encoding: None,
            range: RangeSpec::Unbounded,
            has_header,
        }
    }

    fn fixture(dir: &TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_reserve_reads_header_once() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "a.csv", "h1,h2\n1,2\n3,4\n");
        let registry = FileRegistry::new();

        let header = registry.reserve(&reservation(&path, &path, true)).unwrap();
        assert_eq!(header.as_deref(), Some("h1,h2"));

        let again = registry.reserve(&reservation(&path, &path, true)).unwrap();
        assert_eq!(again.as_deref(), Some("h1,h2"));

        let entry = registry.entry(&path).unwrap();
        assert_eq!(entry.data_range(), ByteRange::new(6, 14));
        let stream = registry.create_stream(&entry, false).unwrap();
        assert_eq!(stream.lock().unwrap().position(), 6);
    }

    #[test]
    fn test_reserve_does_not_rewind_stream() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "a.csv", "h1,h2\n1,2\n3,4\n");
        let registry = FileRegistry::new();
        let entry = registry
            .reserve_entry(&reservation("shared", &path, true))
            .unwrap();

        let stream = registry.create_stream(&entry, false).unwrap();
        let mut buf = [0u8; 4];
        stream.lock().unwrap().read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"1,2\n");

        registry
            .reserve_entry(&reservation("shared", &path, true))
            .unwrap();
        let same = registry.create_stream(&entry, false).unwrap();
        assert!(Arc::ptr_eq(&stream, &same));
        assert_eq!(same.lock().unwrap().position(), 10);
    }

    #[test]
    fn test_recycle_hint_opens_fresh_stream() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "a.csv", "h1,h2\n1,2\n");
        let registry = FileRegistry::new();
        let entry = registry
            .reserve_entry(&reservation("a", &path, true))
            .unwrap();
        let cached = registry.create_stream(&entry, false).unwrap();
        let fresh = registry.create_stream(&entry, true).unwrap();
        assert!(!Arc::ptr_eq(&cached, &fresh));
        assert_eq!(fresh.lock().unwrap().position(), 6);
    }

    #[test]
    fn test_header_on_empty_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "empty.csv", "");
        let registry = FileRegistry::new();
        let result = registry.reserve(&reservation("empty", &path, true));
        assert!(matches!(result, Err(FileError::MissingHeader { .. })));
    }

    #[test]
    fn test_missing_file_names_alias() {
        let registry = FileRegistry::new();
        let err = registry
            .reserve(&reservation("missing@1", "/nonexistent/missing.csv", false))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("missing.csv"));
        assert!(message.contains("missing@1"));
    }

    #[test]
    fn test_header_is_read_from_resumed_range() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "a.csv", "h1,h2\n1,2\n3,4\n");
        let registry = FileRegistry::new();
        let mut request = reservation("a", &path, true);
        request.range = RangeSpec::Ranged(ByteRange::new(6, 14));
        let header = registry.reserve(&request).unwrap();
        assert_eq!(header.as_deref(), Some("1,2"));
        assert!(registry.entry("a").unwrap().is_ranged());
    }

    #[test]
    fn test_bom_is_stripped_from_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bom.csv");
        std::fs::write(&path, b"\xEF\xBB\xBFid,name\n1,a\n").unwrap();
        let registry = FileRegistry::new();
        let path = path.display().to_string();
        let header = registry.reserve(&reservation("bom", &path, true)).unwrap();
        assert_eq!(header.as_deref(), Some("id,name"));
    }

    #[test]
    fn test_relative_path_uses_base_dir() {
        let dir = TempDir::new().unwrap();
        fixture(&dir, "rel.csv", "x\n");
        let registry = FileRegistry::with_base_dir(dir.path());
        registry
            .reserve(&reservation("rel.csv", "rel.csv", false))
            .unwrap();
        assert_eq!(
            registry.entry("rel.csv").unwrap().file_name(),
            "rel.csv".to_string()
        );
        registry.close_all();
        assert!(registry.aliases().is_empty());
    }

    #[test]
    fn test_concurrent_reservations_open_once() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "a.csv", "h1,h2\n1,2\n");
        let registry = Arc::new(FileRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let path = path.clone();
                std::thread::spawn(move || {
                    registry
                        .reserve_entry(&reservation("a", &path, true))
                        .unwrap()
                })
            })
            .collect();
        let entries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(entries.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
