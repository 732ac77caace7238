use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::storage::RetryPolicy;

const DATABASE_DSN: &str = "DATABASE_DSN";
const FILE_STORAGE_PATH: &str = "FILE_STORAGE_PATH";
const STORE_INTERVAL: &str = "STORE_INTERVAL";
const RESTORE: &str = "RESTORE";
const RETRY_ATTEMPTS: &str = "RETRY_ATTEMPTS";
const RETRY_STEP: &str = "RETRY_STEP";

/// Storage configuration
///
/// Example config file:
///
/// ```json
/// {
///     "database_dsn": "sqlite://./metrics.db",
///     "store_file": "/tmp/metrics.json",
///     "store_interval": 300,
///     "restore": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct StorageSettings {
    /// Database connection string, takes precedence over everything else
    #[serde(default)]
    pub database_dsn: Option<String>,

    /// Snapshot file for the file backend
    #[serde(default, rename = "store_file")]
    pub file_storage_path: Option<PathBuf>,

    /// Snapshot period in seconds, 0 writes on every update
    #[serde(default = "default_store_interval")]
    pub store_interval: u64,

    /// Load the snapshot file on startup
    #[serde(default = "default_restore")]
    pub restore: bool,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Backoff step in seconds
    #[serde(default = "default_retry_step")]
    pub retry_step: u64,
}

/// Backend chosen by [`StorageSettings::backend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    Sql(String),
    File(PathBuf),
    Memory,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_dsn: None,
            file_storage_path: None,
            store_interval: default_store_interval(),
            restore: default_restore(),
            retry_attempts: default_retry_attempts(),
            retry_step: default_retry_step(),
        }
    }
}

fn default_store_interval() -> u64 {
    300
}

fn default_restore() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_step() -> u64 {
    2
}

impl StorageSettings {
    /// Database > file > memory. Empty strings count as unset.
    pub fn backend(&self) -> BackendKind {
        if let Some(dsn) = self.database_dsn.as_ref().filter(|dsn| !dsn.is_empty()) {
            return BackendKind::Sql(dsn.clone());
        }

        if let Some(path) = self
            .file_storage_path
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty())
        {
            return BackendKind::File(path.clone());
        }

        BackendKind::Memory
    }

    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.store_interval)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Duration::from_secs(self.retry_step))
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Unset keys leave the current value alone, unparsable values are an
    /// error.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dsn) = lookup(DATABASE_DSN) {
            self.database_dsn = Some(dsn);
        }
        if let Some(path) = lookup(FILE_STORAGE_PATH) {
            self.file_storage_path = Some(PathBuf::from(path));
        }
        if let Some(interval) = lookup(STORE_INTERVAL) {
            self.store_interval = parse_seconds(STORE_INTERVAL, &interval)?;
        }
        if let Some(restore) = lookup(RESTORE) {
            self.restore = restore
                .parse()
                .map_err(|_| anyhow::anyhow!("{RESTORE} must be true or false, got {restore}"))?;
        }
        if let Some(attempts) = lookup(RETRY_ATTEMPTS) {
            self.retry_attempts = attempts
                .parse()
                .map_err(|_| anyhow::anyhow!("{RETRY_ATTEMPTS} must be a number, got {attempts}"))?;
        }
        if let Some(step) = lookup(RETRY_STEP) {
            self.retry_step = parse_seconds(RETRY_STEP, &step)?;
        }

        trace!("storage settings after overrides: {self:?}");
        Ok(())
    }
}

/// Accepts `300` as well as `300s`
fn parse_seconds(key: &str, value: &str) -> anyhow::Result<u64> {
    value
        .trim()
        .trim_end_matches('s')
        .parse()
        .map_err(|_| anyhow::anyhow!("{key} must be a number of seconds, got {value}"))
}

pub fn read_config_file(path: &str) -> anyhow::Result<StorageSettings> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
