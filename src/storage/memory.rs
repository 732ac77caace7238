//! In-memory storage backend (no persistence)
//!
//! This backend keeps the current value of every metric in two hash maps,
//! one for counters and one for gauges. It's useful for:
//! - Testing without database dependencies
//! - The default when neither a database nor a snapshot file is configured
//! - The live state behind the file backend
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Separate keyspaces**: The same name can hold a counter and a gauge

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::backend::Repository;
use super::error::{StorageError, StorageResult};
use super::schema::{MetricRecord, MetricValue, check_gauge};

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: RwLock<HashMap<String, i64>>,
    gauges: RwLock<HashMap<String, f64>>,
}

impl MemoryStore {
    /// Create a new, empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a record verbatim, replacing whatever is stored.
    ///
    /// Unlike `update_counter` this does not accumulate. Used to restore
    /// snapshots.
    pub fn store_raw(&self, record: &MetricRecord) -> StorageResult<()> {
        match record.payload()? {
            MetricValue::Counter(delta) => {
                self.counters.write().insert(record.id.clone(), delta);
            }
            MetricValue::Gauge(value) => {
                self.gauges.write().insert(record.id.clone(), value);
            }
        }
        Ok(())
    }

    pub(crate) fn set_gauge(&self, name: &str, value: f64) -> f64 {
        self.gauges.write().insert(name.to_string(), value);
        value
    }

    pub(crate) fn add_counter(&self, name: &str, delta: i64) -> i64 {
        let mut counters = self.counters.write();
        let total = counters.entry(name.to_string()).or_insert(0);
        *total = total.wrapping_add(delta);
        *total
    }

    pub(crate) fn apply(&self, record: &MetricRecord) -> StorageResult<()> {
        match record.payload()? {
            MetricValue::Counter(delta) => {
                self.add_counter(&record.id, delta);
            }
            MetricValue::Gauge(value) => {
                self.set_gauge(&record.id, value);
            }
        }
        Ok(())
    }

    /// Current state of both keyspaces. Locks are released on return.
    pub fn snapshot(&self) -> Vec<MetricRecord> {
        let counters = self.counters.read();
        let gauges = self.gauges.read();

        let mut records = Vec::with_capacity(counters.len() + gauges.len());
        records.extend(
            counters
                .iter()
                .map(|(name, delta)| MetricRecord::counter(name.clone(), *delta)),
        );
        records.extend(
            gauges
                .iter()
                .map(|(name, value)| MetricRecord::gauge(name.clone(), *value)),
        );
        records
    }

    pub fn len(&self) -> usize {
        self.counters.read().len() + self.gauges.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Repository for MemoryStore {
    async fn update_gauge(&self, name: &str, value: f64) -> StorageResult<f64> {
        let value = check_gauge(name, value)?;
        trace!("gauge {} = {}", name, value);
        Ok(self.set_gauge(name, value))
    }

    async fn get_gauge(&self, name: &str) -> StorageResult<f64> {
        self.gauges
            .read()
            .get(name)
            .copied()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    async fn update_counter(&self, name: &str, delta: i64) -> StorageResult<i64> {
        let total = self.add_counter(name, delta);
        trace!("counter {} += {} -> {}", name, delta, total);
        Ok(total)
    }

    async fn get_counter(&self, name: &str) -> StorageResult<i64> {
        self.counters
            .read()
            .get(name)
            .copied()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    async fn batch_update(&self, records: &[MetricRecord]) -> StorageResult<()> {
        debug!("applying batch of {} metrics in memory", records.len());
        // Fail fast, records before the bad one stay applied.
        for record in records {
            self.apply(record)?;
        }
        Ok(())
    }

    async fn metrics(&self) -> StorageResult<Vec<MetricRecord>> {
        Ok(self.snapshot())
    }

    async fn ping(&self) -> StorageResult<()> {
        Err(StorageError::Unsupported("ping"))
    }
}
