//! Metric record definitions shared by all backends
//!
//! A metric is either a **counter** (deltas accumulate) or a **gauge**
//! (last write wins). On the wire and in snapshot files a record looks like:
//!
//! ```text
//! {"id":"PollCount","type":"counter","delta":3}
//! {"id":"RandomValue","type":"gauge","value":7.25}
//! ```
//!
//! Exactly one of `delta` / `value` is present and it has to match `type`.
//! Gauge values are finite: JSON has no NaN or infinity and SQLite stores
//! NaN as NULL.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};

/// Kind of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Additive accumulation of `i64` deltas
    Counter,

    /// Last-write-wins `f64` value
    Gauge,
}

impl MetricKind {
    /// Discriminant stored in the `mtype` column
    pub fn as_db(self) -> i16 {
        match self {
            MetricKind::Counter => 1,
            MetricKind::Gauge => 2,
        }
    }

    pub fn from_db(value: i16) -> StorageResult<Self> {
        match value {
            1 => Ok(MetricKind::Counter),
            2 => Ok(MetricKind::Gauge),
            other => Err(StorageError::BadRequest(format!(
                "unrecognized metric type discriminant {}",
                other
            ))),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Gauge => write!(f, "gauge"),
        }
    }
}

impl FromStr for MetricKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            other => Err(StorageError::BadRequest(format!(
                "unrecognized metric type {}",
                other
            ))),
        }
    }
}

/// Reject gauge values no backend can store faithfully.
pub fn check_gauge(name: &str, value: f64) -> StorageResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(StorageError::BadRequest(format!(
            "gauge {} has non-finite value {}",
            name, value
        )))
    }
}

/// Strongly typed payload of a validated record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Counter(i64),
    Gauge(f64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
        }
    }
}

/// A single metric as exchanged with collaborators and written to snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Metric name
    pub id: String,

    #[serde(rename = "type")]
    pub kind: MetricKind,

    /// Present only for counters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,

    /// Present only for gauges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricRecord {
    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    /// Build a record from loose parts, rejecting a payload that does not
    /// match `kind`.
    pub fn new(
        id: impl Into<String>,
        kind: MetricKind,
        delta: Option<i64>,
        value: Option<f64>,
    ) -> StorageResult<Self> {
        let record = Self {
            id: id.into(),
            kind,
            delta,
            value,
        };
        record.payload()?;
        Ok(record)
    }

    pub fn from_value(id: impl Into<String>, value: MetricValue) -> Self {
        match value {
            MetricValue::Counter(delta) => Self::counter(id, delta),
            MetricValue::Gauge(value) => Self::gauge(id, value),
        }
    }

    /// Validated payload of this record.
    ///
    /// Fields are public for (de)serialization, so every write path goes
    /// through here instead of trusting `kind`.
    pub fn payload(&self) -> StorageResult<MetricValue> {
        match (self.kind, self.delta, self.value) {
            (MetricKind::Counter, Some(delta), None) => Ok(MetricValue::Counter(delta)),
            (MetricKind::Gauge, None, Some(value)) => {
                check_gauge(&self.id, value).map(MetricValue::Gauge)
            }
            (kind, delta, value) => Err(StorageError::BadRequest(format!(
                "metric {} of type {} has invalid payload (delta: {:?}, value: {:?})",
                self.id, kind, delta, value
            ))),
        }
    }

    /// Human readable value: counters as integers, gauges with five decimals.
    pub fn display_value(&self) -> String {
        match (self.delta, self.value) {
            (Some(delta), _) if self.kind == MetricKind::Counter => delta.to_string(),
            (_, Some(value)) if self.kind == MetricKind::Gauge => format!("{:.5}", value),
            _ => String::new(),
        }
    }
}
