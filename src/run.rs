//! The `run` command: worker threads iterating the configured data sets.

use crate::CheckpointOpts;
use anyhow::{Context, Result};
use checkpoint::CheckpointConfig;
use csv_feeder_dataset::{
    CsvDataSet, DataSetConfig, FeedError, FeederService, IterationOutcome, ServiceConfig,
    ThreadContext,
};
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

#[derive(clap::Args, Clone, Debug)]
pub struct RunArgs {
    /// TOML file with one `[[dataset]]` table per data set
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,

    /// Number of worker threads
    #[arg(long, default_value = "1")]
    pub threads: usize,

    /// Iterations per thread
    #[arg(long, default_value = "10")]
    pub iterations: u64,

    /// Stop a thread once every data set has reached end of data
    #[arg(long)]
    pub until_eof: bool,

    /// Thread group name
    #[arg(long, default_value = "Thread Group")]
    pub group: String,

    /// Directory relative fixture paths are resolved against
    /// (default: the directory of the config file)
    #[arg(long, env = "FEEDER_BASE_DIR")]
    pub base_dir: Option<PathBuf>,

    /// Position map as JSON, or a path to a JSON file
    #[arg(long, env = "FEEDER_POSITION_MAP")]
    pub position_map: Option<String>,

    #[command(flatten)]
    pub checkpoint: CheckpointOpts,
}

#[derive(Debug, Deserialize)]
struct RunFile {
    #[serde(default, rename = "dataset")]
    datasets: Vec<DataSetConfig>,
}

/// Counts from a finished run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub rows: u64,
    pub stopped_threads: usize,
}

pub fn load_datasets(path: &Path) -> Result<Vec<DataSetConfig>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: RunFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse data sets in {}", path.display()))?;
    if file.datasets.is_empty() {
        anyhow::bail!("No [[dataset]] defined in {}", path.display());
    }
    Ok(file.datasets)
}

fn read_position_map(value: &str) -> Result<String> {
    let value = value.trim();
    if value.starts_with('{') {
        return Ok(value.to_string());
    }
    std::fs::read_to_string(value).with_context(|| format!("Failed to read position map {value}"))
}

/// Position map for this pod: the one given on the command line, else the
/// latest positions held by the checkpoint store.
async fn resolve_position_map(args: &RunArgs, config: &CheckpointConfig) -> Result<Option<String>> {
    if let Some(value) = &args.position_map {
        return read_position_map(value).map(Some);
    }
    if !config.should_report() || config.task_id.is_empty() {
        return Ok(None);
    }
    let store = config.storage.build()?;
    match store.read_positions(&config.task_id, &config.pod_num).await {
        Ok(map) if map.is_empty() => {
            info!("No stored positions for pod {}, starting fresh", config.pod_num);
            Ok(None)
        }
        Ok(map) => {
            info!("Resuming pod {} from {} stored positions", config.pod_num, map.len());
            Ok(Some(serde_json::to_string(&map)?))
        }
        Err(e) => {
            warn!("Failed to read stored positions, starting fresh: {:#}", e);
            Ok(None)
        }
    }
}

/// Run the worker threads, writing one JSON line per row to `out`.
pub async fn run<W: Write + Send + 'static>(args: RunArgs, out: W) -> Result<RunSummary> {
    let datasets = load_datasets(&args.config)?;
    let base_dir = args.base_dir.clone().or_else(|| {
        args.config
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
    });

    let checkpoint = CheckpointConfig::from(&args.checkpoint);
    let position_map = resolve_position_map(&args, &checkpoint).await?;
    let service = Arc::new(
        FeederService::new(ServiceConfig {
            base_dir,
            checkpoint,
            ..ServiceConfig::default()
        })
        .context("Failed to start feeder service")?,
    );

    info!(
        "Starting {} threads over {} data sets",
        args.threads,
        datasets.len()
    );
    let out = Arc::new(Mutex::new(out));
    let mut workers = Vec::new();
    for n in 1..=args.threads.max(1) {
        let worker = Worker {
            thread_id: format!("{} 1-{}", args.group, n),
            group_id: args.group.clone(),
            iterations: args.iterations,
            until_eof: args.until_eof,
            position_map: position_map.clone(),
        };
        let datasets = datasets.clone();
        let service = Arc::clone(&service);
        let out = Arc::clone(&out);
        workers.push(tokio::task::spawn_blocking(move || {
            worker.run(datasets, service, out)
        }));
    }

    let mut summary = RunSummary::default();
    let mut failure = None;
    for worker in workers {
        match worker.await.context("Worker thread panicked")? {
            Ok(outcome) => {
                summary.rows += outcome.rows;
                if outcome.stopped {
                    summary.stopped_threads += 1;
                }
            }
            Err(e) => failure = Some(e),
        }
    }
    service.shutdown().await;

    if let Some(e) = failure {
        return Err(e);
    }
    info!(
        "Run finished: {} rows, {} threads stopped at end of data",
        summary.rows, summary.stopped_threads
    );
    Ok(summary)
}

struct Worker {
    thread_id: String,
    group_id: String,
    iterations: u64,
    until_eof: bool,
    position_map: Option<String>,
}

struct WorkerOutcome {
    rows: u64,
    stopped: bool,
}

impl Worker {
    fn run<W: Write>(
        self,
        configs: Vec<DataSetConfig>,
        service: Arc<FeederService>,
        out: Arc<Mutex<W>>,
    ) -> Result<WorkerOutcome> {
        let mut data_sets = configs
            .into_iter()
            .map(|config| CsvDataSet::new(config, Arc::clone(&service)))
            .collect::<csv_feeder_dataset::Result<Vec<_>>>()?;
        let mut ctx = ThreadContext::new(&self.thread_id, &self.group_id);
        if let Some(map) = &self.position_map {
            ctx.set_position_map(map.as_str());
        }

        let mut rows = 0;
        for iteration in 0..self.iterations {
            let mut values = serde_json::Map::new();
            let mut ended = 0;
            for data_set in &mut data_sets {
                match data_set.iteration_start(&mut ctx) {
                    Ok(IterationOutcome::Row) => {}
                    Ok(IterationOutcome::EndOfData) => ended += 1,
                    Err(FeedError::StopThread(message)) => {
                        info!("{}: {}", self.thread_id, message);
                        return Ok(WorkerOutcome {
                            rows,
                            stopped: true,
                        });
                    }
                    Err(e) => {
                        return Err(e).with_context(|| {
                            format!(
                                "{} failed on data set {}",
                                self.thread_id,
                                data_set.config().name
                            )
                        })
                    }
                }
                for name in data_set.variable_names().unwrap_or_default() {
                    let value = ctx.get(name).unwrap_or_default();
                    values.insert(name.clone(), value.into());
                }
            }

            if self.until_eof && ended == data_sets.len() {
                debug!("{}: every data set at end of data", self.thread_id);
                break;
            }

            let line = serde_json::json!({
                "thread": self.thread_id,
                "iteration": iteration,
                "values": values,
            });
            let mut out = out.lock().unwrap_or_else(PoisonError::into_inner);
            writeln!(out, "{line}").context("Failed to write row")?;
            rows += 1;
        }
        Ok(WorkerOutcome {
            rows,
            stopped: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_datasets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("datasets.toml");
        std::fs::write(
            &path,
            r#"
[[dataset]]
name = "users"
filename = "users.csv"
share_mode = "shareMode.group"
recycle = false

[[dataset]]
filename = "orders.csv"
variable_names = "id,total"
delimiter = ";"
"#,
        )
        .unwrap();

        let datasets = load_datasets(&path).unwrap();
        assert_eq!(datasets.len(), 2);
        assert_eq!(datasets[0].name, "users");
        assert_eq!(
            datasets[0].share_mode,
            csv_feeder_dataset::ShareMode::ThreadGroup
        );
        assert!(!datasets[0].recycle);
        assert!(datasets[1].recycle);
        assert_eq!(datasets[1].delimiter_byte().unwrap(), b';');
    }

    #[test]
    fn test_empty_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("datasets.toml");
        std::fs::write(&path, "").unwrap();
        assert!(load_datasets(&path).is_err());
    }

    #[test]
    fn test_position_map_inline_or_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("map.json");
        std::fs::write(&path, r#"{"a.csv":{"start":0,"end":4}}"#).unwrap();
        assert_eq!(
            read_position_map(&path.display().to_string()).unwrap(),
            r#"{"a.csv":{"start":0,"end":4}}"#
        );
        assert_eq!(read_position_map(" {} ").unwrap(), "{}");
        assert!(read_position_map("/nonexistent/map.json").is_err());
    }
}
