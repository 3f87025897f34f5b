//! Error types for file reservation and ranged reads.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reserving or reading a fixture file.
#[derive(Error, Debug)]
pub enum FileError {
    /// Underlying I/O failure, tagged with the file it happened on.
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Filename must be non-empty.
    #[error("Filename must not be null or empty")]
    EmptyFilename,

    /// File is missing, unreadable, or not a regular file.
    #[error("File {path} (alias {alias}) must exist and be readable")]
    NotReadable { path: PathBuf, alias: String },

    /// Byte range does not describe a slice of the file.
    #[error("Invalid byte range [{start}, {stop}) for {path}")]
    InvalidRange {
        path: PathBuf,
        start: u64,
        stop: u64,
    },

    /// A header was requested but the range holds no line.
    #[error("Could not read file header line for file {path} (alias {alias})")]
    MissingHeader { path: PathBuf, alias: String },

    /// Configured charset is not one we decode.
    #[error("Unsupported file encoding '{0}'")]
    UnsupportedEncoding(String),
}

impl FileError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FileError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, FileError>;
