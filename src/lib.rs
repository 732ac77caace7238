pub mod config;
pub mod service;
pub mod storage;

pub use service::MetricService;
pub use storage::{MetricKind, MetricRecord, Repository, StorageError, StorageResult};
