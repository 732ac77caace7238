//! Backend selection through `open_repository`

use assert_matches::assert_matches;
use metric_store::config::StorageSettings;
use metric_store::storage::{StorageError, open_repository};
use metric_store::{MetricRecord, MetricService};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_memory_fallback() {
    let repository = open_repository(&StorageSettings::default(), CancellationToken::new())
        .await
        .unwrap();

    repository.update_counter("PollCount", 1).await.unwrap();
    assert_matches!(repository.ping().await, Err(StorageError::Unsupported(_)));
}

#[tokio::test]
async fn test_file_backend_selected() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("metrics.json");
    let settings = StorageSettings {
        file_storage_path: Some(path.clone()),
        store_interval: 0,
        ..Default::default()
    };

    let repository = open_repository(&settings, CancellationToken::new())
        .await
        .unwrap();
    repository.update_gauge("Alloc", 2.5).await.unwrap();

    assert!(std::fs::read_to_string(&path).unwrap().contains("\"Alloc\""));
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_database_wins_over_file() {
    let temp_dir = tempdir().unwrap();
    let file_path = temp_dir.path().join("metrics.json");
    let settings = StorageSettings {
        database_dsn: Some(format!(
            "sqlite://{}",
            temp_dir.path().join("metrics.db").display()
        )),
        file_storage_path: Some(file_path.clone()),
        store_interval: 0,
        ..Default::default()
    };

    let repository = open_repository(&settings, CancellationToken::new())
        .await
        .unwrap();
    let service = MetricService::new(repository);

    let mut metric = MetricRecord::counter("PollCount", 4);
    service.update_metric(&mut metric).await.unwrap();

    assert!(service.ping().await.is_ok());
    assert!(!file_path.exists());
}
