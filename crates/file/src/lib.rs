//! Byte-range scoped file streams for the CSV feeder.
//!
//! A fixture file is reserved once per alias in a [`FileRegistry`]. The
//! reservation fixes the byte range the alias may read: the whole file on a
//! fresh run, or a `[start, stop)` slice taken from a position map when a
//! load test resumes. Reads through a [`RangeReader`] never cross `stop`, and
//! the reader's [`RangeProgress`] is what checkpoints are built from.
//!
//! ```ignore
//! use csv_feeder_file::{FileRegistry, RangeSpec, Reservation};
//!
//! let registry = FileRegistry::new();
//! let header = registry.reserve(&Reservation {
//!     alias: "users.csv".into(),
//!     filename: "users.csv".into(),
//!     encoding: None,
//!     range: RangeSpec::Unbounded,
//!     has_header: true,
//! })?;
//! ```

mod encoding;
mod error;
mod range;
mod reader;
mod registry;

pub use encoding::{strip_bom, FileEncoding};
pub use error::{FileError, Result};
pub use range::{ByteRange, RangeSpec};
pub use reader::{RangeProgress, RangeReader, Remaining};
pub use registry::{FileEntry, FileRegistry, Reservation, SharedReader};
