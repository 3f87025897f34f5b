//! Error types for partition queues and producers.

use csv_feeder_file::FileError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PartitionError {
    /// No partition was ever registered under this file name.
    #[error("No partitions registered for file '{0}'")]
    UnknownFile(String),

    /// The wait was abandoned because the run is shutting down.
    #[error("Cancelled while waiting for lines")]
    Cancelled,

    #[error("Partition count must be at least 1")]
    NoPartitions,

    #[error(transparent)]
    File(#[from] FileError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PartitionError>;
