//! HTTP checkpoint collector.
//!
//! Pods POST their read positions to `/checkpoint`. The collector keeps the
//! latest record per (task, file, pod, partition) and serves the position map
//! a restarted pod resumes from at `/positions/<pod>`.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::position::{FilePosition, PositionMap};
use crate::store::StoredPosition;

type LedgerKey = (String, String, String, Option<usize>);

/// Latest position of every range reported to the collector.
#[derive(Debug, Default)]
pub struct CheckpointLedger {
    records: BTreeMap<LedgerKey, StoredPosition>,
}

impl CheckpointLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger seeded from a previously persisted output file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let mut ledger = Self::new();
        if !path.exists() {
            return Ok(ledger);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let records: Vec<StoredPosition> = serde_json::from_str(&content)
            .with_context(|| format!("Invalid checkpoint ledger {}", path.display()))?;
        for record in records {
            ledger.insert(record);
        }
        Ok(ledger)
    }

    fn insert(&mut self, record: StoredPosition) {
        let p = &record.position;
        let key = (
            p.task_id.clone(),
            p.file_name.clone(),
            p.pod_num.clone(),
            p.partition,
        );
        self.records.insert(key, record);
    }

    /// Record a position, replacing the previous one for the same range.
    pub fn record(&mut self, position: FilePosition) {
        self.insert(StoredPosition::now(position));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> Vec<StoredPosition> {
        self.records.values().cloned().collect()
    }

    /// Resume ranges for one pod, optionally restricted to one task.
    pub fn positions_for(&self, pod_num: &str, task_id: Option<&str>) -> PositionMap {
        self.records
            .values()
            .map(|r| &r.position)
            .filter(|p| p.pod_num == pod_num)
            .filter(|p| match task_id {
                Some(t) if !t.is_empty() => p.task_id == t,
                _ => true,
            })
            .map(|p| (p.map_key(), p.resume_range()))
            .collect()
    }

    pub fn persist(&self, path: &std::path::Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.records())?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// Collector settings.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub listen: String,
    /// Ledger file, loaded at start and rewritten on every checkpoint.
    pub output: Option<PathBuf>,
}

/// A bound collector, ready to serve.
pub struct CheckpointCollector {
    listener: TcpListener,
    ledger: Arc<Mutex<CheckpointLedger>>,
    output: Option<PathBuf>,
}

impl CheckpointCollector {
    pub fn bind(config: &CollectorConfig) -> Result<Self> {
        let ledger = match &config.output {
            Some(path) => CheckpointLedger::load(path)?,
            None => CheckpointLedger::new(),
        };
        let listener = TcpListener::bind(&config.listen)
            .with_context(|| format!("Failed to bind to {}", config.listen))?;

        // Set non-blocking so we can check for cancellation
        listener
            .set_nonblocking(true)
            .context("Failed to set non-blocking mode")?;

        Ok(Self {
            listener,
            ledger: Arc::new(Mutex::new(ledger)),
            output: config.output.clone(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn ledger(&self) -> Arc<Mutex<CheckpointLedger>> {
        Arc::clone(&self.ledger)
    }

    /// Serve until `cancel` fires. Blocks the calling thread.
    pub fn serve(&self, cancel: &CancellationToken) -> Result<()> {
        info!(
            "Checkpoint collector listening on {}",
            self.local_addr()?
        );
        while !cancel.is_cancelled() {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = self.handle_connection(stream) {
                        error!("Error handling connection from {}: {}", addr, e);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    // No connection ready, sleep briefly
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
        let ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        info!("Checkpoint collector stopped with {} ranges", ledger.len());
        Ok(())
    }

    fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(Duration::from_secs(30)))?;
        stream.set_write_timeout(Some(Duration::from_secs(30)))?;

        let mut reader = BufReader::new(stream.try_clone()?);

        let mut request_line = String::new();
        if reader.read_line(&mut request_line)? == 0 {
            anyhow::bail!("Empty request");
        }

        // Parse headers to get Content-Length
        let mut content_length: usize = 0;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }

        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default();
        let target = parts.next().unwrap_or_default();
        let (path, query) = target.split_once('?').unwrap_or((target, ""));

        let (status, body) = match (method, path) {
            ("POST", "/checkpoint") => {
                let mut body_bytes = vec![0u8; content_length];
                reader.read_exact(&mut body_bytes)?;
                self.accept_checkpoint(&body_bytes)
            }
            ("GET", "/health") => ("200 OK", r#"{"status":"healthy"}"#.to_string()),
            ("GET", "/checkpoints") => {
                let ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
                ("200 OK", serde_json::to_string(&ledger.records())?)
            }
            ("GET", p) if p.starts_with("/positions/") => {
                let pod = &p["/positions/".len()..];
                let task = query_param(query, "taskId");
                let ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
                (
                    "200 OK",
                    serde_json::to_string(&ledger.positions_for(pod, task))?,
                )
            }
            _ => ("404 Not Found", r#"{"error":"not found"}"#.to_string()),
        };

        // Send response
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes())?;
        stream.flush()?;

        Ok(())
    }

    fn accept_checkpoint(&self, body: &[u8]) -> (&'static str, String) {
        match serde_json::from_slice::<FilePosition>(body) {
            Ok(position) => {
                info!(
                    "Checkpoint from pod {} for {}: {}/{}",
                    position.pod_num,
                    position.map_key(),
                    position.read_position,
                    position.end_position
                );
                let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
                ledger.record(position);
                if let Some(path) = &self.output {
                    if let Err(e) = ledger.persist(path) {
                        warn!("Failed to persist checkpoint ledger: {:#}", e);
                    }
                }
                ("200 OK", r#"{"status":"ok"}"#.to_string())
            }
            Err(e) => {
                error!("Failed to parse checkpoint: {e}");
                (
                    "400 Bad Request",
                    format!(r#"{{"error":"invalid json: {e}"}}"#),
                )
            }
        }
    }
}

fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Run the collector until `cancel` fires.
pub async fn run_collector(config: CollectorConfig, cancel: CancellationToken) -> Result<()> {
    let collector = CheckpointCollector::bind(&config)?;
    tokio::task::spawn_blocking(move || collector.serve(&cancel))
        .await
        .context("Collector task panicked")?
}
