//! Error types for data set iteration.

use csv_feeder_file::FileError;
use csv_feeder_partition::PartitionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    /// Bad header, variable names or data set settings. Fatal at setup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// End of data with `stop_thread` set. The calling worker must stop.
    #[error("{0}")]
    StopThread(String),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Partition(PartitionError),

    /// The feeder service is shutting down.
    #[error("Feeder service is shutting down")]
    Cancelled,
}

impl From<PartitionError> for FeedError {
    fn from(e: PartitionError) -> Self {
        match e {
            PartitionError::Cancelled => FeedError::Cancelled,
            PartitionError::File(e) => FeedError::File(e),
            other => FeedError::Partition(other),
        }
    }
}

impl FeedError {
    pub fn is_stop_thread(&self) -> bool {
        matches!(self, FeedError::StopThread(_))
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
