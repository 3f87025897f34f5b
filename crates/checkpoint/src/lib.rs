//! Read-position checkpoints for csv-feeder
//!
//! Every ranged reader of a fixture file periodically reports how far into
//! its byte range consumers have got. A restarted pod asks for the latest
//! positions and resumes each file from `[readPosition, end)`.
//!
//! # Architecture
//!
//! - `FilePosition` is the record pushed for one range
//! - `CheckpointStore` abstracts where records go
//! - `CheckpointReporter` pushes a `PositionSource` on a fixed period
//! - `CheckpointCollector` is the HTTP endpoint pods push to
//!
//! ## Storage Backends
//!
//! - `NullStore` - Discards checkpoints
//! - `FilesystemStore` - Latest checkpoint per range as JSON files
//! - `HttpStore` - POSTs checkpoints to a collector

mod collector;
mod config;
mod filesystem;
mod http;
mod position;
mod reporter;
pub mod store;


// Re-export config types
pub use config::{CheckpointConfig, CheckpointStorage, DEFAULT_REPORT_INTERVAL};

// Re-export record types
pub use position::{parse_position_map, position_key, FilePosition, PositionMap, PositionRange};

// Re-export store trait and types
pub use store::{CheckpointStore, NullStore, StoredPosition};

// Re-export storage implementations
pub use filesystem::FilesystemStore;
pub use http::HttpStore;

// Re-export reporting and collection
pub use collector::{run_collector, CheckpointCollector, CheckpointLedger, CollectorConfig};
pub use reporter::{CheckpointReporter, PositionSource};
