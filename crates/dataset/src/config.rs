//! Data set configuration.

use crate::context::ThreadContext;
use csv_feeder_partition::{DEFAULT_HIGH_WATER_MARK, DEFAULT_QUEUE_CAPACITY};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Sentinel bound to every variable at end of data.
pub const DEFAULT_EOF_VALUE: &str = "<EOF>";

/// Which readers share one file position.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum ShareMode {
    /// Every thread in the process.
    #[default]
    AllThreads,
    /// Threads of the same thread group.
    ThreadGroup,
    /// Each thread on its own.
    Thread,
    /// Every data set configured with the same key.
    CustomKey(String),
}

impl ShareMode {
    /// Sharing alias for `filename` as seen from `context`.
    pub fn alias(&self, filename: &str, context: &ThreadContext) -> String {
        match self {
            ShareMode::AllThreads => filename.to_string(),
            ShareMode::ThreadGroup => format!("{}@{}", filename, context.group_id()),
            ShareMode::Thread => format!("{}@{}", filename, context.thread_id()),
            ShareMode::CustomKey(key) => format!("{filename}@{key}"),
        }
    }
}

impl FromStr for ShareMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "shareMode.all" | "all" => Ok(ShareMode::AllThreads),
            "shareMode.group" | "group" => Ok(ShareMode::ThreadGroup),
            "shareMode.thread" | "thread" => Ok(ShareMode::Thread),
            key => Ok(ShareMode::CustomKey(key.to_string())),
        }
    }
}

impl TryFrom<String> for ShareMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ShareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareMode::AllThreads => write!(f, "shareMode.all"),
            ShareMode::ThreadGroup => write!(f, "shareMode.group"),
            ShareMode::Thread => write!(f, "shareMode.thread"),
            ShareMode::CustomKey(key) => write!(f, "{key}"),
        }
    }
}

/// Settings of one CSV data set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataSetConfig {
    /// Name used in log and stop messages.
    pub name: String,

    pub filename: String,

    /// Charset name. Blank means UTF-8.
    pub file_encoding: Option<String>,

    /// Comma-separated variable names. When empty the first line of the
    /// range is the header and names come from it.
    pub variable_names: String,

    /// Skip the first line when explicit variable names are given.
    pub ignore_first_line: bool,

    /// Single delimiter character. `\t` means tab, empty means `,`.
    pub delimiter: String,

    /// Quote-aware tokenizing.
    pub quoted_data: bool,

    /// Start over at end of data.
    pub recycle: bool,

    /// Stop the thread at end of data.
    pub stop_thread: bool,

    pub share_mode: ShareMode,

    pub eof_value: String,

    /// Producers reading the file in parallel.
    pub partitions: usize,

    /// Append `,<partition>` to every line of a partitioned file.
    pub tag_partitions: bool,

    pub queue_capacity: usize,

    pub high_water_mark: usize,
}

impl Default for DataSetConfig {
    fn default() -> Self {
        Self {
            name: "CSV Data Set Config".to_string(),
            filename: String::new(),
            file_encoding: None,
            variable_names: String::new(),
            ignore_first_line: false,
            delimiter: ",".to_string(),
            quoted_data: false,
            recycle: true,
            stop_thread: false,
            share_mode: ShareMode::AllThreads,
            eof_value: DEFAULT_EOF_VALUE.to_string(),
            partitions: 1,
            tag_partitions: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }
}

impl DataSetConfig {
    /// Config reading `filename` with default settings.
    pub fn for_file(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::default()
        }
    }

    /// The effective delimiter byte.
    pub fn delimiter_byte(&self) -> crate::Result<u8> {
        match self.delimiter.as_str() {
            "\\t" => Ok(b'\t'),
            "" => {
                tracing::debug!("Empty delimiter, will use ','");
                Ok(b',')
            }
            d => {
                let first = d.chars().next().unwrap_or(',');
                u8::try_from(first)
                    .ok()
                    .filter(u8::is_ascii)
                    .ok_or_else(|| {
                        crate::FeedError::Configuration(format!(
                            "Delimiter '{d}' must be a single ASCII character"
                        ))
                    })
            }
        }
    }

    /// Explicit variable names, trimmed. Empty when none are configured.
    pub fn explicit_names(&self) -> Vec<String> {
        if self.variable_names.trim().is_empty() {
            return Vec::new();
        }
        self.variable_names
            .split(',')
            .map(|name| name.trim().to_string())
            .collect()
    }
}
