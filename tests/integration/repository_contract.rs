//! Behaviour every backend shares
//!
//! These tests verify that:
//! - Counters accumulate and gauges overwrite on every backend
//! - Unknown names are reported as NotFound
//! - Batches accumulate repeated names
//! - Invalid records are rejected with BadRequest
//! - Non-finite gauges are rejected and never reach storage

use metric_store::storage::MetricRecord;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::*;

#[tokio::test]
async fn test_counter_sums_deltas_on_every_backend() {
    let temp_dir = tempdir().unwrap();

    for (name, backend) in all_backends(temp_dir.path()).await {
        backend.update_counter("PollCount", 17).await.unwrap();
        let total = backend.update_counter("PollCount", -5).await.unwrap();

        assert_eq!(total, 12, "{name}: returned total");
        assert_eq!(
            backend.get_counter("PollCount").await.unwrap(),
            12,
            "{name}: stored total"
        );
    }
}

#[tokio::test]
async fn test_poll_count_scenario() {
    let temp_dir = tempdir().unwrap();

    for (name, backend) in all_backends(temp_dir.path()).await {
        for _ in 0..3 {
            backend.update_counter("PollCount", 1).await.unwrap();
        }
        assert_eq!(backend.get_counter("PollCount").await.unwrap(), 3, "{name}");
    }
}

#[tokio::test]
async fn test_gauge_last_write_wins_on_every_backend() {
    let temp_dir = tempdir().unwrap();

    for (name, backend) in all_backends(temp_dir.path()).await {
        backend.update_gauge("RandomValue", 12.5).await.unwrap();
        let stored = backend.update_gauge("RandomValue", 7.25).await.unwrap();

        assert_eq!(stored, 7.25, "{name}: returned value");
        assert_eq!(
            backend.get_gauge("RandomValue").await.unwrap(),
            7.25,
            "{name}: stored value"
        );
    }
}

#[tokio::test]
async fn test_unknown_names_not_found_on_every_backend() {
    let temp_dir = tempdir().unwrap();

    for (name, backend) in all_backends(temp_dir.path()).await {
        let counter = backend.get_counter("NeverWritten").await.unwrap_err();
        let gauge = backend.get_gauge("NeverWritten").await.unwrap_err();

        assert!(counter.is_not_found(), "{name}: {counter}");
        assert!(gauge.is_not_found(), "{name}: {gauge}");
    }
}

#[tokio::test]
async fn test_batch_accumulates_same_name_on_every_backend() {
    let temp_dir = tempdir().unwrap();

    for (name, backend) in all_backends(temp_dir.path()).await {
        backend
            .batch_update(&[
                MetricRecord::counter("a", 5),
                MetricRecord::counter("a", 3),
                MetricRecord::gauge("Alloc", 1024.0),
            ])
            .await
            .unwrap();

        assert_eq!(backend.get_counter("a").await.unwrap(), 8, "{name}");
        assert_eq!(backend.get_gauge("Alloc").await.unwrap(), 1024.0, "{name}");
    }
}

#[tokio::test]
async fn test_invalid_record_is_bad_request_on_every_backend() {
    let temp_dir = tempdir().unwrap();

    for (name, backend) in all_backends(temp_dir.path()).await {
        let err = backend
            .batch_update(&[invalid_record("broken")])
            .await
            .unwrap_err();

        assert!(err.is_bad_request(), "{name}: {err}");
    }
}

#[tokio::test]
async fn test_non_finite_gauge_rejected_on_every_backend() {
    let temp_dir = tempdir().unwrap();

    for (name, backend) in all_backends(temp_dir.path()).await {
        backend.update_gauge("Alloc", 2.5).await.unwrap();

        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = backend.update_gauge("Alloc", value).await.unwrap_err();
            assert!(err.is_bad_request(), "{name}: {err}");

            let err = backend
                .batch_update(&[MetricRecord::gauge("Fresh", value)])
                .await
                .unwrap_err();
            assert!(err.is_bad_request(), "{name}: {err}");
        }

        assert_eq!(backend.get_gauge("Alloc").await.unwrap(), 2.5, "{name}");
        assert_eq!(
            sorted(backend.metrics().await.unwrap()),
            vec![MetricRecord::gauge("Alloc", 2.5)],
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_metrics_snapshot_on_every_backend() {
    let temp_dir = tempdir().unwrap();

    for (name, backend) in all_backends(temp_dir.path()).await {
        backend.update_counter("PollCount", 2).await.unwrap();
        backend.update_gauge("Alloc", 0.5).await.unwrap();
        backend.update_gauge("HeapInuse", 42.0).await.unwrap();

        assert_eq!(
            sorted(backend.metrics().await.unwrap()),
            vec![
                MetricRecord::gauge("Alloc", 0.5),
                MetricRecord::gauge("HeapInuse", 42.0),
                MetricRecord::counter("PollCount", 2),
            ],
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_empty_batch_is_noop() {
    let temp_dir = tempdir().unwrap();

    for (name, backend) in all_backends(temp_dir.path()).await {
        backend.batch_update(&[]).await.unwrap();
        assert!(backend.metrics().await.unwrap().is_empty(), "{name}");
    }
}
