//! Request-level access to a repository
//!
//! Handlers work with whole [`MetricRecord`]s: they fill in `id` and `kind`,
//! the service reads or writes the store and puts the resulting value back
//! into the record. Store errors are normalised to the three classes
//! handlers map to responses: `NotFound`, `BadRequest` and `Internal`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::storage::{
    MetricKind, MetricRecord, MetricValue, Repository, StorageError, StorageResult,
};

#[derive(Clone)]
pub struct MetricService {
    store: Arc<dyn Repository>,
}

impl MetricService {
    pub fn new(store: Arc<dyn Repository>) -> Self {
        Self { store }
    }

    /// Fill `delta` or `value` of `metric` from the store
    pub async fn get_metric(&self, metric: &mut MetricRecord) -> StorageResult<()> {
        if metric.id.is_empty() {
            return Err(StorageError::NotFound(String::new()));
        }

        match metric.kind {
            MetricKind::Gauge => {
                let value = self.store.get_gauge(&metric.id).await.map_err(not_found)?;
                metric.value = Some(value);
                metric.delta = None;
            }
            MetricKind::Counter => {
                let delta = self
                    .store
                    .get_counter(&metric.id)
                    .await
                    .map_err(not_found)?;
                metric.delta = Some(delta);
                metric.value = None;
            }
        }
        Ok(())
    }

    /// Apply `metric` and replace its payload with the stored result
    ///
    /// For counters that is the new total, not the submitted delta.
    pub async fn update_metric(&self, metric: &mut MetricRecord) -> StorageResult<()> {
        if metric.id.is_empty() {
            return Err(StorageError::NotFound(String::new()));
        }

        let stored = match metric.payload()? {
            MetricValue::Gauge(value) => self
                .store
                .update_gauge(&metric.id, value)
                .await
                .map(MetricValue::Gauge),
            MetricValue::Counter(delta) => self
                .store
                .update_counter(&metric.id, delta)
                .await
                .map(MetricValue::Counter),
        }
        .map_err(internal)?;

        debug!("updated {} {}", metric.kind, metric.id);
        *metric = MetricRecord::from_value(metric.id.clone(), stored);
        Ok(())
    }

    pub async fn batch_update(&self, metrics: &[MetricRecord]) -> StorageResult<()> {
        self.store.batch_update(metrics).await.map_err(|e| {
            if e.is_bad_request() {
                e
            } else {
                internal(e)
            }
        })
    }

    pub async fn metrics(&self) -> StorageResult<Vec<MetricRecord>> {
        self.store.metrics().await
    }

    /// `(name, value)` pairs sorted by name, for listings
    pub async fn listing(&self) -> StorageResult<Vec<(String, String)>> {
        let mut rows: Vec<(String, String)> = self
            .store
            .metrics()
            .await?
            .into_iter()
            .map(|metric| {
                let value = metric.display_value();
                (metric.id, value)
            })
            .collect();
        rows.sort();
        Ok(rows)
    }

    pub async fn ping(&self) -> StorageResult<()> {
        self.store.ping().await
    }
}

fn not_found(err: StorageError) -> StorageError {
    match err {
        StorageError::NotFound(_) => err,
        other => {
            warn!("metric read failed: {}", other);
            StorageError::NotFound(other.to_string())
        }
    }
}

fn internal(err: StorageError) -> StorageError {
    match err {
        StorageError::Internal(_) => err,
        other => StorageError::Internal(other.to_string()),
    }
}
