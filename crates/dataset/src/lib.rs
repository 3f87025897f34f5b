//! CSV data sets for load-test worker threads.
//!
//! A [`FeederService`] is created once per run. Each worker thread builds a
//! [`CsvDataSet`] per configured data set and calls
//! [`CsvDataSet::iteration_start`] before every iteration, which binds the
//! next record's fields to the thread's [`ThreadContext`] variables.
//!
//! Threads reading the same alias (see [`ShareMode`]) share one position in
//! the file, so every line is delivered to at most one of them per lap.
//! When the position map injected into the context holds a range for the
//! file, only that range is read and its progress is checkpointed.

mod config;
mod context;
mod dataset;
mod error;
mod service;
mod tokenizer;

pub use config::{DataSetConfig, ShareMode, DEFAULT_EOF_VALUE};
pub use context::{base_name, ThreadContext, POSITION_MAP_VARIABLE};
pub use dataset::{CsvDataSet, IterationOutcome};
pub use error::{FeedError, Result};
pub use service::{
    FeedSource, FeederService, OpenRequest, RangeCheckpoint, Resume, ServiceConfig,
};
pub use tokenizer::Tokenizer;
