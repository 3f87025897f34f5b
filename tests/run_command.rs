//! The `run` command end to end: TOML data sets, worker threads, JSON rows.

use csv_feeder::run::{run, RunArgs};
use csv_feeder::CheckpointOpts;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn rows(&self) -> Vec<serde_json::Value> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

fn checkpoint_opts(dir: Option<String>) -> CheckpointOpts {
    CheckpointOpts {
        task_id: "run-1".into(),
        pod_number: "1".into(),
        checkpoint_url: None,
        checkpoint_dir: dir,
        checkpoint_interval: 1,
    }
}

fn args(config: std::path::PathBuf, threads: usize, iterations: u64) -> RunArgs {
    RunArgs {
        config,
        threads,
        iterations,
        until_eof: false,
        group: "Thread Group".into(),
        base_dir: None,
        position_map: None,
        checkpoint: checkpoint_opts(None),
    }
}

fn setup(dir: &TempDir, rows: usize, dataset: &str) -> std::path::PathBuf {
    let mut csv = String::from("id,name\n");
    for i in 0..rows {
        csv.push_str(&format!("{i},user{i}\n"));
    }
    std::fs::write(dir.path().join("users.csv"), csv).unwrap();
    let config = dir.path().join("datasets.toml");
    std::fs::write(&config, dataset).unwrap();
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_threads_stop_at_end_of_data() {
    let dir = TempDir::new().unwrap();
    let config = setup(
        &dir,
        50,
        r#"
[[dataset]]
name = "users"
filename = "users.csv"
recycle = false
stop_thread = true
"#,
    );

    let out = SharedBuf::default();
    let summary = run(args(config, 3, 1000), out.clone()).await.unwrap();
    assert_eq!(summary.rows, 50);
    assert_eq!(summary.stopped_threads, 3);

    let mut ids: Vec<u64> = out
        .rows()
        .iter()
        .map(|row| row["values"]["id"].as_str().unwrap().parse().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..50).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_position_map_and_checkpoint_dir() {
    let dir = TempDir::new().unwrap();
    // Rows are 8 bytes long up to id 9; the header is 8 bytes.
    let config = setup(
        &dir,
        10,
        r#"
[[dataset]]
filename = "users.csv"
variable_names = "id,name"
recycle = false
"#,
    );
    let checkpoints = dir.path().join("checkpoints");

    let mut run_args = args(config, 1, 3);
    run_args.position_map = Some(r#"{"users.csv":{"start":24,"end":88}}"#.into());
    run_args.checkpoint = checkpoint_opts(Some(checkpoints.display().to_string()));
    let out = SharedBuf::default();
    let summary = run(run_args, out.clone()).await.unwrap();
    assert_eq!(summary.rows, 3);

    let rows = out.rows();
    assert_eq!(rows[0]["values"]["id"], "2");
    assert_eq!(rows[2]["values"]["name"], "user4");
    assert_eq!(rows[0]["thread"], "Thread Group 1-1");

    // A second run with no explicit map resumes from the stored checkpoint.
    let mut resumed = args(dir.path().join("datasets.toml"), 1, 100);
    resumed.until_eof = true;
    resumed.checkpoint = checkpoint_opts(Some(checkpoints.display().to_string()));
    let out = SharedBuf::default();
    let summary = run(resumed, out.clone()).await.unwrap();
    assert_eq!(summary.rows, 5);
    assert_eq!(out.rows()[0]["values"]["id"], "5");
}

#[tokio::test]
async fn test_missing_config_fails() {
    let dir = TempDir::new().unwrap();
    let result = run(args(dir.path().join("missing.toml"), 1, 1), SharedBuf::default()).await;
    assert!(result.is_err());
}
