//! Snapshot file storage backend
//!
//! Wraps a [`MemoryStore`] and periodically writes its complete state to a
//! file, one JSON record per line.
//!
//! ## Flush modes
//!
//! - **Synchronous** (`store_interval == 0`): every update rewrites the file
//!   before returning
//! - **Periodic** (`store_interval > 0`): a background task rewrites the file
//!   on every tick, writers never wait for disk I/O
//!
//! ## Limitations
//!
//! - **Not an append log**: each flush truncates the file first, a crash
//!   halfway through a flush loses the previous snapshot too
//! - **No final flush**: cancelling the flusher (or dropping the store) does
//!   not write pending changes, call [`FileStore::flush`] first

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use super::backend::Repository;
use super::error::{StorageError, StorageResult};
use super::memory::MemoryStore;
use super::schema::MetricRecord;

/// Options for opening a [`FileStore`]
#[derive(Debug, Clone)]
pub struct FileStoreOptions {
    /// Snapshot file location
    pub path: PathBuf,

    /// Flush period, zero means flush on every write
    pub store_interval: Duration,

    /// Load the existing snapshot into memory on startup
    pub restore: bool,
}

/// File snapshot storage backend
pub struct FileStore {
    memory: Arc<MemoryStore>,
    snapshot: Arc<SnapshotFile>,
    sync_save: bool,
    flusher: Option<JoinHandle<()>>,
}

/// The durable copy. The mutex serializes flushes.
struct SnapshotFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SnapshotFile {
    async fn write(&self, memory: &MemoryStore) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        // Taken under the flush lock so a later flush never writes an older
        // state over a newer one.
        let records = memory.snapshot();

        debug!("writing {} metrics to {}", records.len(), self.path.display());

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await?;
        let mut writer = BufWriter::new(file);

        for record in &records {
            let mut line = serde_json::to_vec(record).map_err(|e| {
                StorageError::Internal(format!("failed to encode metric {}: {}", record.id, e))
            })?;
            line.push(b'\n');
            writer.write_all(&line).await?;
        }

        writer.flush().await?;
        writer.get_ref().sync_data().await?;

        debug!("snapshot written to {}", self.path.display());
        Ok(())
    }

    async fn read_into(&self, memory: &MemoryStore) -> StorageResult<usize> {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no snapshot at {}, starting empty", self.path.display());
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let mut lines = BufReader::new(file).lines();
        let mut restored = 0;
        let mut line_no = 0;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            let record: MetricRecord = serde_json::from_str(&line).map_err(|e| {
                StorageError::Internal(format!(
                    "failed to decode {} line {}: {}",
                    self.path.display(),
                    line_no,
                    e
                ))
            })?;
            memory.store_raw(&record).map_err(|e| {
                StorageError::Internal(format!(
                    "invalid metric in {} line {}: {}",
                    self.path.display(),
                    line_no,
                    e
                ))
            })?;
            restored += 1;
        }

        Ok(restored)
    }
}

impl FileStore {
    /// Open a file backend over a fresh in-memory store
    ///
    /// With `restore` set, the existing snapshot is loaded first; a corrupt
    /// snapshot fails construction. In periodic mode the flusher task runs
    /// until `shutdown` is cancelled or the store is dropped.
    #[instrument(skip_all, fields(path = %options.path.display()))]
    pub async fn open(options: FileStoreOptions, shutdown: CancellationToken) -> StorageResult<Self> {
        Self::with_memory(Arc::new(MemoryStore::new()), options, shutdown).await
    }

    /// Like [`FileStore::open`] but on top of an existing memory store
    pub async fn with_memory(
        memory: Arc<MemoryStore>,
        options: FileStoreOptions,
        shutdown: CancellationToken,
    ) -> StorageResult<Self> {
        let snapshot = Arc::new(SnapshotFile {
            path: options.path,
            lock: Mutex::new(()),
        });

        if options.restore {
            let restored = snapshot
                .read_into(&memory)
                .await
                .map_err(StorageError::into_internal)?;
            info!(
                "restored {} metrics from {}",
                restored,
                snapshot.path.display()
            );
        }

        let sync_save = options.store_interval.is_zero();
        let flusher = if sync_save {
            info!("file storage in synchronous mode");
            None
        } else {
            info!(
                "file storage flushing every {:?}",
                options.store_interval
            );
            Some(tokio::spawn(run_flusher(
                memory.clone(),
                snapshot.clone(),
                options.store_interval,
                shutdown,
            )))
        };

        Ok(Self {
            memory,
            snapshot,
            sync_save,
            flusher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.snapshot.path
    }

    pub fn is_synchronous(&self) -> bool {
        self.sync_save
    }

    /// Rewrite the snapshot file from the current in-memory state
    pub async fn flush(&self) -> StorageResult<()> {
        self.snapshot
            .write(&self.memory)
            .await
            .map_err(StorageError::into_internal)
    }

    async fn flush_if_sync(&self) -> StorageResult<()> {
        if self.sync_save {
            self.flush().await?;
        }
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if let Some(flusher) = self.flusher.take() {
            flusher.abort();
        }
    }
}

async fn run_flusher(
    memory: Arc<MemoryStore>,
    snapshot: Arc<SnapshotFile>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = time::interval(period);
    // The first tick completes immediately, nothing to write yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("snapshot flusher received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = snapshot.write(&memory).await {
                    error!("error writing periodic snapshot: {}", e);
                }
            }
        }
    }

    debug!("snapshot flusher stopped");
}

#[async_trait]
impl Repository for FileStore {
    #[instrument(skip(self))]
    async fn update_gauge(&self, name: &str, value: f64) -> StorageResult<f64> {
        let stored = self.memory.update_gauge(name, value).await?;
        self.flush_if_sync().await?;
        Ok(stored)
    }

    async fn get_gauge(&self, name: &str) -> StorageResult<f64> {
        self.memory.get_gauge(name).await
    }

    #[instrument(skip(self))]
    async fn update_counter(&self, name: &str, delta: i64) -> StorageResult<i64> {
        let total = self.memory.update_counter(name, delta).await?;
        self.flush_if_sync().await?;
        Ok(total)
    }

    async fn get_counter(&self, name: &str) -> StorageResult<i64> {
        self.memory.get_counter(name).await
    }

    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn batch_update(&self, records: &[MetricRecord]) -> StorageResult<()> {
        if !self.sync_save {
            return self.memory.batch_update(records).await;
        }

        // Same fail-fast semantics as the memory store, with one snapshot
        // per applied record.
        for record in records {
            self.memory.apply(record)?;
            self.flush().await?;
        }
        Ok(())
    }

    async fn metrics(&self) -> StorageResult<Vec<MetricRecord>> {
        self.memory.metrics().await
    }

    async fn ping(&self) -> StorageResult<()> {
        Err(StorageError::Unsupported("ping"))
    }
}
