//! Integration tests for snapshot file persistence
//!
//! These tests verify that:
//! - A flushed snapshot restores into an equal set of records
//! - Synchronous mode writes before the update returns
//! - Failed batches keep the applied prefix, in memory and on disk
//! - A rejected non-finite gauge never makes the snapshot unreadable

use std::time::Duration;

use metric_store::storage::{FileStore, MetricRecord, Repository};
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

#[tokio::test]
async fn test_flush_and_restore_round_trip() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("metrics.json");
    let token = CancellationToken::new();

    let written = vec![
        MetricRecord::counter("PollCount", 42),
        MetricRecord::counter("Negative", -7),
        MetricRecord::gauge("Alloc", 123456.0),
        MetricRecord::gauge("RandomValue", 0.375),
        MetricRecord::gauge("GCCPUFraction", 0.0009765625),
    ];

    let store = FileStore::open(
        file_options(&path, Duration::from_secs(3600), false),
        token.clone(),
    )
    .await
    .unwrap();
    store.batch_update(&written).await.unwrap();
    store.flush().await.unwrap();
    token.cancel();
    drop(store);

    let restored = FileStore::open(
        file_options(&path, Duration::from_secs(3600), true),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(
        sorted(restored.metrics().await.unwrap()),
        sorted(written)
    );
}

#[tokio::test]
async fn test_rejected_infinite_gauge_keeps_snapshot_restorable() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("metrics.json");

    {
        let store = FileStore::open(
            file_options(&path, Duration::ZERO, false),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        store.update_gauge("g", 1.5).await.unwrap();
        assert!(store.update_gauge("g", f64::INFINITY).await.is_err());
    }

    assert!(!std::fs::read_to_string(&path).unwrap().contains("null"));

    let restored = FileStore::open(
        file_options(&path, Duration::ZERO, true),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(restored.get_gauge("g").await.unwrap(), 1.5);
}

#[tokio::test]
async fn test_restored_counter_keeps_accumulating() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("metrics.json");

    {
        let store = FileStore::open(
            file_options(&path, Duration::ZERO, false),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        store.update_counter("PollCount", 10).await.unwrap();
    }

    let store = FileStore::open(
        file_options(&path, Duration::ZERO, true),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(store.update_counter("PollCount", 5).await.unwrap(), 15);
}

#[tokio::test]
async fn test_without_restore_starts_empty() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("metrics.json");
    std::fs::write(&path, "{\"id\":\"PollCount\",\"type\":\"counter\",\"delta\":9}\n").unwrap();

    let store = FileStore::open(
        file_options(&path, Duration::ZERO, false),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(store.get_counter("PollCount").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_sync_mode_line_on_disk_after_update() {
    let temp_dir = tempdir().unwrap();
    let store = create_sync_file_store(temp_dir.path()).await;

    store.update_gauge("RandomValue", 12.5).await.unwrap();

    let content = std::fs::read_to_string(store.path()).unwrap();
    let lines: Vec<MetricRecord> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines, vec![MetricRecord::gauge("RandomValue", 12.5)]);
}

#[tokio::test]
async fn test_snapshot_is_rewritten_not_appended() {
    let temp_dir = tempdir().unwrap();
    let store = create_sync_file_store(temp_dir.path()).await;

    for _ in 0..5 {
        store.update_counter("PollCount", 1).await.unwrap();
    }

    let content = std::fs::read_to_string(store.path()).unwrap();
    assert_eq!(
        content,
        "{\"id\":\"PollCount\",\"type\":\"counter\",\"delta\":5}\n"
    );
}

#[tokio::test]
async fn test_failed_batch_keeps_prefix_on_disk() {
    let temp_dir = tempdir().unwrap();
    let store = create_sync_file_store(temp_dir.path()).await;

    let err = store
        .batch_update(&[
            MetricRecord::counter("first", 1),
            invalid_record("broken"),
            MetricRecord::counter("last", 1),
        ])
        .await
        .unwrap_err();
    assert!(err.is_bad_request());

    assert_eq!(store.get_counter("first").await.unwrap(), 1);
    assert!(store.get_counter("last").await.unwrap_err().is_not_found());

    let content = std::fs::read_to_string(store.path()).unwrap();
    assert!(content.contains("\"first\""));
    assert!(!content.contains("\"last\""));
}

#[tokio::test]
async fn test_periodic_flush_stops_after_cancel() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("metrics.json");
    let token = CancellationToken::new();

    let store = FileStore::open(
        file_options(&path, Duration::from_millis(20), false),
        token.clone(),
    )
    .await
    .unwrap();

    store.update_counter("PollCount", 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(std::fs::read_to_string(&path).unwrap().contains("\"delta\":1"));

    token.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;

    store.update_counter("PollCount", 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(std::fs::read_to_string(&path).unwrap().contains("\"delta\":1"));
}
