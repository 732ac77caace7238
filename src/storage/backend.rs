//! Repository trait definition
//!
//! This module defines the `Repository` trait that all metric storage
//! implementations must implement.

use async_trait::async_trait;

use super::error::StorageResult;
use super::schema::MetricRecord;

/// Trait for metric repositories
///
/// Every backend (in-memory, file snapshot, SQL) implements the same
/// accumulate-or-overwrite contract:
///
/// - **Counters** accumulate: each update adds its delta to the stored total
/// - **Gauges** overwrite: the last written value wins
///
/// A metric comes into existence with its first update. There is no delete.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared across async
/// tasks (usually behind an `Arc<dyn Repository>`).
///
/// ## Batches
///
/// `batch_update` atomicity is **not** uniform: the memory and file
/// backends stop at the first invalid record and keep what was already
/// applied, the SQL backend rolls the whole batch back.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Overwrite a gauge and return the stored value
    async fn update_gauge(&self, name: &str, value: f64) -> StorageResult<f64>;

    /// Read a gauge, `NotFound` if absent
    async fn get_gauge(&self, name: &str) -> StorageResult<f64>;

    /// Add `delta` to a counter (starting from 0) and return the new total
    async fn update_counter(&self, name: &str, delta: i64) -> StorageResult<i64>;

    /// Read a counter, `NotFound` if absent
    async fn get_counter(&self, name: &str) -> StorageResult<i64>;

    /// Apply every record through the per-kind update path
    ///
    /// Fails with `BadRequest` on a record whose payload does not match its
    /// kind.
    async fn batch_update(&self, records: &[MetricRecord]) -> StorageResult<()>;

    /// Snapshot of every stored record, in no particular order
    async fn metrics(&self) -> StorageResult<Vec<MetricRecord>>;

    /// Check backend liveness
    ///
    /// Backends without an external dependency return
    /// `StorageError::Unsupported`.
    async fn ping(&self) -> StorageResult<()>;
}
