//! Per-thread CSV data set.
//!
//! Each worker thread owns one [`CsvDataSet`] per configured data set and
//! calls [`CsvDataSet::iteration_start`] once per loop iteration. The first
//! call resolves the sharing alias, picks a resume range from the thread's
//! position map and opens the alias on the shared [`FeederService`]. Every
//! call then binds one record's fields to the configured variables.

use crate::config::DataSetConfig;
use crate::context::{base_name, ThreadContext};
use crate::error::{FeedError, Result};
use crate::service::{FeedSource, FeederService, OpenRequest, Resume};
use crate::tokenizer::Tokenizer;
use std::sync::Arc;
use tracing::{debug, error, info};

/// What one iteration produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// A record was bound to the variables.
    Row,
    /// End of data; every variable holds the EOF value.
    EndOfData,
}

struct Bound {
    source: Arc<FeedSource>,
    names: Vec<String>,
}

pub struct CsvDataSet {
    config: DataSetConfig,
    service: Arc<FeederService>,
    tokenizer: Tokenizer,
    bound: Option<Bound>,
}

impl CsvDataSet {
    pub fn new(config: DataSetConfig, service: Arc<FeederService>) -> Result<Self> {
        if config.filename.trim().is_empty() {
            return Err(FeedError::Configuration(format!(
                "Data set '{}' has no filename",
                config.name
            )));
        }
        let tokenizer = Tokenizer::new(config.delimiter_byte()?, config.quoted_data);
        Ok(Self {
            config,
            service,
            tokenizer,
            bound: None,
        })
    }

    pub fn config(&self) -> &DataSetConfig {
        &self.config
    }

    /// Variable names, once the first iteration has resolved them.
    pub fn variable_names(&self) -> Option<&[String]> {
        self.bound.as_ref().map(|b| b.names.as_slice())
    }

    pub fn alias(&self) -> Option<&str> {
        self.bound.as_ref().map(|b| b.source.alias())
    }

    /// Bind the next record to the thread's variables.
    ///
    /// At end of data this fails with [`FeedError::StopThread`] when the data
    /// set is configured to stop the thread, and otherwise binds the EOF
    /// value to every variable.
    pub fn iteration_start(&mut self, context: &mut ThreadContext) -> Result<IterationOutcome> {
        if self.bound.is_none() {
            self.bound = Some(self.bind(context)?);
        }
        let Some(bound) = self.bound.as_ref() else {
            return Err(FeedError::Configuration("data set is not bound".into()));
        };

        let values = match self.service.read_record(&bound.source) {
            Ok(Some(record)) => match self.tokenizer.split(&record) {
                Ok(values) => values,
                // Treated the same as end of data
                Err(e) => {
                    error!("{}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(FeedError::File(e)) => {
                error!("{}", e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        for (name, value) in bound.names.iter().zip(values.iter()) {
            context.put(name.as_str(), value.as_str());
        }

        if values.is_empty() {
            if self.config.stop_thread {
                return Err(FeedError::StopThread(format!(
                    "End of file:{} detected for CSV DataSet:{} configured with stopThread:{}, recycle:{}",
                    self.config.filename,
                    self.config.name,
                    self.config.stop_thread,
                    self.config.recycle
                )));
            }
            for name in &bound.names {
                context.put(name.as_str(), self.config.eof_value.as_str());
            }
            return Ok(IterationOutcome::EndOfData);
        }
        Ok(IterationOutcome::Row)
    }

    fn bind(&self, context: &ThreadContext) -> Result<Bound> {
        let filename = self.config.filename.trim();
        let alias = self.config.share_mode.alias(filename, context);
        let resume = self.resume_for(context, filename);
        let explicit = self.config.explicit_names();
        let has_header = explicit.is_empty() || self.config.ignore_first_line;

        let source = self.service.open(&OpenRequest {
            alias: &alias,
            config: &self.config,
            has_header,
            resume,
        })?;

        let names = if explicit.is_empty() {
            let header = source.header().ok_or_else(|| {
                FeedError::Configuration(format!(
                    "Could not read file header line for file {filename}"
                ))
            })?;
            self.tokenizer
                .split_header(header)
                .map_err(|e| {
                    FeedError::Configuration(format!(
                        "Could not split CSV header line from file:{filename}: {e}"
                    ))
                })?
                .into_iter()
                .map(|name| name.trim().to_string())
                .collect()
        } else {
            explicit
        };

        debug!("Data set {} bound to {} with {:?}", self.config.name, alias, names);
        Ok(Bound { source, names })
    }

    fn resume_for(&self, context: &ThreadContext, filename: &str) -> Resume {
        let partitions = self.config.partitions.max(1);
        if partitions > 1 {
            let ranges: Option<Vec<_>> = (0..partitions)
                .map(|p| context.position_for(filename, Some(p)))
                .collect();
            if let Some(ranges) = ranges {
                info!(
                    "Resuming {} from {} stored partition ranges",
                    base_name(filename),
                    ranges.len()
                );
                return Resume::Partitions(ranges);
            }
        }
        match context.position_for(filename, None) {
            Some(range) => Resume::Range(range),
            None => Resume::Fresh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    fn service() -> Arc<FeederService> {
        Arc::new(FeederService::with_store(
            ServiceConfig {
                consumer_backoff: Duration::from_millis(5),
                producer_backoff: Duration::from_millis(5),
                ..ServiceConfig::default()
            },
            Arc::new(checkpoint::NullStore),
        ))
    }

    fn fixture(dir: &TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_header_names_are_trimmed() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "a.csv", " id , name \n1,ann\n");
        let mut config = DataSetConfig::for_file(path);
        config.recycle = false;
        let mut data_set = CsvDataSet::new(config, service()).unwrap();
        let mut ctx = ThreadContext::new("t1", "g1");

        assert_eq!(data_set.iteration_start(&mut ctx).unwrap(), IterationOutcome::Row);
        assert_eq!(data_set.variable_names().unwrap(), ["id", "name"]);
        assert_eq!(ctx.get("name"), Some("ann"));
    }

    #[test]
    fn test_missing_tokens_keep_previous_binding() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "a.csv", "1,ann\n2\n");
        let mut config = DataSetConfig::for_file(path);
        config.variable_names = "id,name".into();
        config.recycle = false;
        let mut data_set = CsvDataSet::new(config, service()).unwrap();
        let mut ctx = ThreadContext::new("t1", "g1");

        data_set.iteration_start(&mut ctx).unwrap();
        data_set.iteration_start(&mut ctx).unwrap();
        assert_eq!(ctx.get("id"), Some("2"));
        assert_eq!(ctx.get("name"), Some("ann"));
    }

    #[test]
    fn test_ignore_first_line_with_explicit_names() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "a.csv", "h1,h2\n1,2\n");
        let mut config = DataSetConfig::for_file(path);
        config.variable_names = "x,y".into();
        config.ignore_first_line = true;
        config.recycle = false;
        let mut data_set = CsvDataSet::new(config, service()).unwrap();
        let mut ctx = ThreadContext::new("t1", "g1");

        data_set.iteration_start(&mut ctx).unwrap();
        assert_eq!(ctx.get("x"), Some("1"));
        assert_eq!(
            data_set.iteration_start(&mut ctx).unwrap(),
            IterationOutcome::EndOfData
        );
    }

    #[test]
    fn test_custom_eof_value() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "a.csv", "v\n");
        let mut config = DataSetConfig::for_file(path);
        config.recycle = false;
        config.eof_value = "DONE".into();
        let mut data_set = CsvDataSet::new(config, service()).unwrap();
        let mut ctx = ThreadContext::new("t1", "g1");

        assert_eq!(
            data_set.iteration_start(&mut ctx).unwrap(),
            IterationOutcome::EndOfData
        );
        assert_eq!(ctx.get("v"), Some("DONE"));
    }

    #[test]
    fn test_quoted_record_spanning_lines() {
        let dir = TempDir::new().unwrap();
        let path = fixture(&dir, "q.csv", "id,note\n1,\"line one\nline two\"\n2,plain\n");
        let mut config = DataSetConfig::for_file(path);
        config.quoted_data = true;
        config.recycle = false;
        let mut data_set = CsvDataSet::new(config, service()).unwrap();
        let mut ctx = ThreadContext::new("t1", "g1");

        data_set.iteration_start(&mut ctx).unwrap();
        assert_eq!(ctx.get("note"), Some("line one\nline two"));
        data_set.iteration_start(&mut ctx).unwrap();
        assert_eq!(ctx.get("id"), Some("2"));
    }

    #[test]
    fn test_quoted_field_keeps_blank_lines_and_crlf() {
        let dir = TempDir::new().unwrap();
        let contents = "id,note\r\n1,\"para one\n\npara two\"\r\n\r\n2,\"a\r\nb\"\r\n";
        let path = fixture(&dir, "q.csv", contents);
        let mut config = DataSetConfig::for_file(path);
        config.quoted_data = true;
        config.recycle = false;
        let mut data_set = CsvDataSet::new(config, service()).unwrap();
        let mut ctx = ThreadContext::new("t1", "g1");

        data_set.iteration_start(&mut ctx).unwrap();
        assert_eq!(ctx.get("note"), Some("para one\n\npara two"));
        data_set.iteration_start(&mut ctx).unwrap();
        assert_eq!(ctx.get("id"), Some("2"));
        assert_eq!(ctx.get("note"), Some("a\r\nb"));
        assert_eq!(
            data_set.iteration_start(&mut ctx).unwrap(),
            IterationOutcome::EndOfData
        );
    }

    #[test]
    fn test_empty_filename_is_configuration_error() {
        let result = CsvDataSet::new(DataSetConfig::default(), service());
        assert!(matches!(result, Err(FeedError::Configuration(_))));
    }

    #[test]
    fn test_missing_file_fails_fast() {
        let mut data_set =
            CsvDataSet::new(DataSetConfig::for_file("/nonexistent/x.csv"), service()).unwrap();
        let err = data_set
            .iteration_start(&mut ThreadContext::new("t", "g"))
            .unwrap_err();
        assert!(err.to_string().contains("x.csv"));
    }
}
