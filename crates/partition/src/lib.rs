//! Partitioned line production for the CSV feeder.
//!
//! Each partition of a file is a contiguous, line-aligned byte range served
//! by one [`LineProducer`] thread writing into one bounded queue. Consumers
//! pull from a [`PartitionRegistry`], which walks the partitions of a file
//! round-robin and skips empty queues. Taking a line commits its end offset
//! to the partition's range progress.

mod error;
mod plan;
mod producer;
mod queue;
mod registry;

pub use error::{PartitionError, Result};
pub use plan::{describe_plan, plan_partitions, plan_record_partitions};
pub use producer::{
    segments, LineProducer, ProducerOptions, ProducerSummary, DEFAULT_CHUNK_LEN,
    DEFAULT_MAX_SEGMENT_LEN,
};
pub use queue::{
    partition_queue, pause, FeedLine, PartitionQueue, DEFAULT_CONSUMER_BACKOFF,
    DEFAULT_HIGH_WATER_MARK, DEFAULT_PRODUCER_BACKOFF, DEFAULT_QUEUE_CAPACITY,
};
pub use registry::PartitionRegistry;
