//! Storage backends for metric persistence
//!
//! This module provides a trait-based abstraction for storing the current
//! value of every metric in one of several backends.
//!
//! ## Design
//!
//! - **Trait-based**: `Repository` trait allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio
//! - **Two kinds**: Counters accumulate deltas, gauges keep the last value
//!
//! ## Backends
//!
//! - **SQLite** (`storage-sqlite` feature): Transactional, upserts aggregate
//!   counters inside the database
//! - **File**: In-memory state plus a JSON-lines snapshot file
//! - **In-Memory** (fallback): No persistence, for testing
//!
//! ## Usage
//!
//! ```no_run
//! use metric_store::config::StorageSettings;
//! use metric_store::storage::open_repository;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = StorageSettings::default();
//!     let repository = open_repository(&settings, CancellationToken::new()).await?;
//!     repository.update_counter("PollCount", 1).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{BackendKind, StorageSettings};

pub mod backend;
pub mod error;
pub mod file;
pub mod memory;
pub mod retry;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::Repository;
pub use error::{StorageError, StorageResult};
pub use file::{FileStore, FileStoreOptions};
pub use memory::MemoryStore;
pub use retry::{Cancelled, RetryPolicy};
pub use schema::{MetricKind, MetricRecord, MetricValue, check_gauge};

/// Open the backend selected by `settings`
///
/// A database connection string wins over a snapshot file, which wins over
/// the in-memory fallback. `shutdown` stops the file flusher and aborts SQL
/// retries.
pub async fn open_repository(
    settings: &StorageSettings,
    shutdown: CancellationToken,
) -> StorageResult<Arc<dyn Repository>> {
    match settings.backend() {
        #[cfg(feature = "storage-sqlite")]
        BackendKind::Sql(dsn) => {
            info!("using SQL storage");
            let store = sqlite::SqlStore::connect(&dsn, settings.retry_policy(), shutdown).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        BackendKind::Sql(_) => Err(StorageError::ConnectionFailed(
            "built without the storage-sqlite feature".to_string(),
        )),
        BackendKind::File(path) => {
            info!("using file storage at {}", path.display());
            let store = FileStore::open(
                FileStoreOptions {
                    path,
                    store_interval: settings.store_interval(),
                    restore: settings.restore,
                },
                shutdown,
            )
            .await?;
            Ok(Arc::new(store))
        }
        BackendKind::Memory => {
            info!("using in-memory storage");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
