//! Pods push checkpoints over HTTP and read back their resume ranges.

use checkpoint::{
    CheckpointCollector, CheckpointLedger, CheckpointStore, CollectorConfig, FilePosition,
    HttpStore, PositionRange,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn position(pod: &str, read: u64, partition: Option<usize>) -> FilePosition {
    FilePosition {
        task_id: "run-1".to_string(),
        file_name: "orders.csv".to_string(),
        pod_num: pod.to_string(),
        start_position: 0,
        read_position: read,
        end_position: 4096,
        partition,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_push_then_read_positions() {
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("ledger.json");
    let collector = CheckpointCollector::bind(&CollectorConfig {
        listen: "127.0.0.1:0".to_string(),
        output: Some(output.clone()),
    })
    .unwrap();
    let addr = collector.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server = {
        let cancel = cancel.clone();
        std::thread::spawn(move || collector.serve(&cancel))
    };

    let store = HttpStore::new(format!("http://{addr}/")).unwrap();
    assert_eq!(store.base_url(), format!("http://{addr}"));

    store.store_position(&position("1", 512, None)).await.unwrap();
    store.store_position(&position("1", 1024, None)).await.unwrap();
    store.store_position(&position("2", 64, None)).await.unwrap();
    store.store_position(&position("1", 8, Some(0))).await.unwrap();

    let pod1 = store.read_positions("run-1", "1").await.unwrap();
    assert_eq!(pod1.len(), 2);
    assert_eq!(
        pod1["orders.csv"],
        PositionRange {
            start: 1024,
            end: 4096
        }
    );
    assert_eq!(pod1["orders.csv#0"].start, 8);

    let pod2 = store.read_positions("run-1", "2").await.unwrap();
    assert_eq!(pod2["orders.csv"].start, 64);
    assert!(store.read_positions("run-2", "1").await.unwrap().is_empty());

    cancel.cancel();
    server.join().unwrap().unwrap();

    // The ledger survives a collector restart.
    let reloaded = CheckpointLedger::load(&output).unwrap();
    assert_eq!(reloaded.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_collector_is_an_error() {
    let store = HttpStore::new("http://127.0.0.1:9").unwrap();
    assert!(store.store_position(&position("1", 1, None)).await.is_err());
}
