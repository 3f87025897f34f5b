//! Splitting lines into field values.

use crate::error::{FeedError, Result};

/// Splits one record into fields, quote-aware or not.
#[derive(Debug, Clone, Copy)]
pub struct Tokenizer {
    delimiter: u8,
    quoted: bool,
}

impl Tokenizer {
    pub fn new(delimiter: u8, quoted: bool) -> Self {
        Self { delimiter, quoted }
    }

    /// Fields of `record`. Plain mode splits on every delimiter; quoted
    /// mode honours `"` quoting with `""` as an escaped quote.
    pub fn split(&self, record: &str) -> Result<Vec<String>> {
        if !self.quoted {
            let delimiter = self.delimiter as char;
            return Ok(record.split(delimiter).map(str::to_string).collect());
        }
        self.split_quoted(record)
    }

    /// Header fields. Always quote-aware, since a header may quote names.
    pub fn split_header(&self, header: &str) -> Result<Vec<String>> {
        self.split_quoted(header)
    }

    fn split_quoted(&self, record: &str) -> Result<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(record.as_bytes());
        let mut fields = csv::StringRecord::new();
        match reader.read_record(&mut fields) {
            Ok(true) => Ok(fields.iter().map(str::to_string).collect()),
            Ok(false) => Ok(vec![String::new()]),
            Err(e) => Err(FeedError::Configuration(format!(
                "Could not split CSV line '{record}': {e}"
            ))),
        }
    }
}
