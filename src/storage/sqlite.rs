//! SQLite storage backend implementation
//!
//! This module provides a SQL implementation of the `Repository` trait.
//!
//! ## Features
//!
//! - **Upserts**: Counters are aggregated by the database itself
//!   (`delta = metric.delta + excluded.delta`), so concurrent writers in
//!   different processes never lose an increment
//! - **Transactions**: Every write runs in its own transaction; a batch is a
//!   single transaction and is rolled back as a whole on any failure
//! - **Retries**: Transient failures (busy database, I/O, pool timeouts) are
//!   retried from scratch according to a [`RetryPolicy`]
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Limitations
//!
//! - **One row per name**: A name holds either a counter or a gauge; writing
//!   the other kind replaces the row

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::{Pool, Sqlite, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use super::backend::Repository;
use super::error::{StorageError, StorageResult};
use super::retry::RetryPolicy;
use super::schema::{MetricKind, MetricRecord, MetricValue, check_gauge};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const GAUGE_UPSERT: &str = r#"
    INSERT INTO metric (id, mtype, delta, value, updts)
    VALUES (?1, ?2, NULL, ?3, ?4)
    ON CONFLICT (id) DO UPDATE SET
        mtype = excluded.mtype,
        delta = NULL,
        value = excluded.value,
        updts = excluded.updts
    RETURNING value
"#;

// A gauge row turned counter starts again from the incoming delta. SQLite
// would silently turn an overflowing sum into REAL, so the update is skipped
// instead and no row comes back.
const COUNTER_UPSERT: &str = r#"
    INSERT INTO metric (id, mtype, delta, value, updts)
    VALUES (?1, ?2, ?3, NULL, ?4)
    ON CONFLICT (id) DO UPDATE SET
        delta = CASE
            WHEN metric.mtype = excluded.mtype THEN metric.delta + excluded.delta
            ELSE excluded.delta
        END,
        mtype = excluded.mtype,
        value = NULL,
        updts = excluded.updts
    WHERE metric.mtype <> excluded.mtype
        OR (excluded.delta >= 0 AND metric.delta <= 9223372036854775807 - excluded.delta)
        OR (excluded.delta < 0 AND metric.delta >= (-9223372036854775807 - 1) - excluded.delta)
    RETURNING delta
"#;

/// SQL storage backend
///
/// Independent of the in-memory store: all state lives in the `metric`
/// table.
pub struct SqlStore {
    pool: Pool<Sqlite>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl SqlStore {
    /// Connect to the database and run pending migrations
    ///
    /// `dsn` is either a `sqlite://` URL or a plain file path. The database
    /// file is created if missing. Migration failures are fatal.
    ///
    /// `cancel` aborts retries of in-flight operations once cancelled.
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use metric_store::storage::{RetryPolicy, sqlite::SqlStore};
    /// # use tokio_util::sync::CancellationToken;
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = SqlStore::connect(
    ///     "sqlite://./metrics.db",
    ///     RetryPolicy::default(),
    ///     CancellationToken::new(),
    /// )
    /// .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(
        dsn: &str,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> StorageResult<Self> {
        Self::connect_with_busy_timeout(dsn, DEFAULT_BUSY_TIMEOUT, retry, cancel).await
    }

    /// Like [`SqlStore::connect`] with an explicit wait for locks held by
    /// other writers. Once it elapses the statement fails with `SQLITE_BUSY`
    /// and the whole transaction goes through the retry policy.
    #[instrument(skip_all)]
    pub async fn connect_with_busy_timeout(
        dsn: &str,
        busy_timeout: Duration,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> StorageResult<Self> {
        info!("initializing SQL backend at: {}", dsn);

        let options = SqliteConnectOptions::from_str(dsn)
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal) // concurrent readers during writes
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        info!("SQL connection pool created");

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            retry,
            cancel,
        })
    }

    /// Close the pool, waiting for checked out connections
    pub async fn close(&self) {
        info!("closing SQL backend");
        self.pool.close().await;
    }

    async fn upsert_tx(&self, id: &str, value: MetricValue) -> StorageResult<MetricValue> {
        let mut tx = self.pool.begin().await?;

        match upsert(&mut tx, id, value, Utc::now()).await {
            Ok(stored) => {
                tx.commit().await?;
                Ok(stored)
            }
            Err(e) => {
                rollback(tx).await;
                Err(e)
            }
        }
    }

    async fn batch_tx(&self, records: &[MetricRecord]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        for record in records {
            let applied = match record.payload() {
                Ok(value) => upsert(&mut tx, &record.id, value, now).await,
                Err(e) => Err(e),
            };

            if let Err(e) = applied {
                debug!("rolling back batch at metric {}: {}", record.id, e);
                rollback(tx).await;
                return Err(e);
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Upsert in a fresh transaction, retried as a whole
    async fn write(&self, id: &str, value: MetricValue) -> StorageResult<MetricValue> {
        self.retry
            .run(
                &self.cancel,
                move || self.upsert_tx(id, value),
                StorageError::is_transient,
            )
            .await
            .map_err(StorageError::into_internal)
    }
}

async fn upsert(
    conn: &mut SqliteConnection,
    id: &str,
    value: MetricValue,
    now: DateTime<Utc>,
) -> StorageResult<MetricValue> {
    let kind = value.kind().as_db();

    match value {
        MetricValue::Gauge(value) => {
            let stored: f64 = sqlx::query_scalar(GAUGE_UPSERT)
                .bind(id)
                .bind(kind)
                .bind(value)
                .bind(now)
                .fetch_one(&mut *conn)
                .await?;
            Ok(MetricValue::Gauge(stored))
        }
        MetricValue::Counter(delta) => {
            let total: Option<i64> = sqlx::query_scalar(COUNTER_UPSERT)
                .bind(id)
                .bind(kind)
                .bind(delta)
                .bind(now)
                .fetch_optional(&mut *conn)
                .await?;

            match total {
                Some(total) => Ok(MetricValue::Counter(total)),
                None => Err(StorageError::BadRequest(format!(
                    "counter {} would overflow adding {}",
                    id, delta
                ))),
            }
        }
    }
}

async fn rollback(tx: Transaction<'_, Sqlite>) {
    if let Err(e) = tx.rollback().await {
        error!("error while rolling back transaction: {}", e);
    }
}

fn read_error(e: sqlx::Error) -> StorageError {
    StorageError::Database(e).into_internal()
}

#[async_trait]
impl Repository for SqlStore {
    #[instrument(skip(self))]
    async fn update_gauge(&self, name: &str, value: f64) -> StorageResult<f64> {
        let value = check_gauge(name, value)?;
        match self.write(name, MetricValue::Gauge(value)).await? {
            MetricValue::Gauge(stored) => Ok(stored),
            other => Err(StorageError::Internal(format!(
                "upsert of gauge {} returned {:?}",
                name, other
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn get_gauge(&self, name: &str) -> StorageResult<f64> {
        let value: Option<Option<f64>> =
            sqlx::query_scalar("SELECT value FROM metric WHERE id = ?1 AND mtype = ?2")
                .bind(name)
                .bind(MetricKind::Gauge.as_db())
                .fetch_optional(&self.pool)
                .await
                .map_err(read_error)?;

        match value {
            Some(Some(value)) => Ok(value),
            Some(None) => Err(StorageError::Internal(format!(
                "gauge {} has no value",
                name
            ))),
            None => Err(StorageError::NotFound(name.to_string())),
        }
    }

    #[instrument(skip(self))]
    async fn update_counter(&self, name: &str, delta: i64) -> StorageResult<i64> {
        match self.write(name, MetricValue::Counter(delta)).await? {
            MetricValue::Counter(total) => Ok(total),
            other => Err(StorageError::Internal(format!(
                "upsert of counter {} returned {:?}",
                name, other
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn get_counter(&self, name: &str) -> StorageResult<i64> {
        let delta: Option<Option<i64>> =
            sqlx::query_scalar("SELECT delta FROM metric WHERE id = ?1 AND mtype = ?2")
                .bind(name)
                .bind(MetricKind::Counter.as_db())
                .fetch_optional(&self.pool)
                .await
                .map_err(read_error)?;

        match delta {
            Some(Some(delta)) => Ok(delta),
            Some(None) => Err(StorageError::Internal(format!(
                "counter {} has no delta",
                name
            ))),
            None => Err(StorageError::NotFound(name.to_string())),
        }
    }

    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn batch_update(&self, records: &[MetricRecord]) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        info!("writing batch of {} metrics to database", records.len());

        self.retry
            .run(
                &self.cancel,
                move || self.batch_tx(records),
                StorageError::is_transient,
            )
            .await
            .map_err(StorageError::into_internal)?;

        debug!("batch write complete");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn metrics(&self) -> StorageResult<Vec<MetricRecord>> {
        let rows: Vec<(String, i16, Option<i64>, Option<f64>)> =
            sqlx::query_as("SELECT id, mtype, delta, value FROM metric")
                .fetch_all(&self.pool)
                .await
                .map_err(read_error)?;

        let records = rows
            .into_iter()
            .map(|(id, mtype, delta, value)| {
                let kind = MetricKind::from_db(mtype)
                    .map_err(|e| StorageError::Internal(e.to_string()))?;
                MetricRecord::new(id, kind, delta, value)
                    .map_err(|e| StorageError::Internal(e.to_string()))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        debug!("read {} metrics from database", records.len());
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn ping(&self) -> StorageResult<()> {
        let pool = &self.pool;
        self.retry
            .run(
                &self.cancel,
                move || async move {
                    sqlx::query("SELECT 1")
                        .execute(pool)
                        .await
                        .map(|_| ())
                        .map_err(StorageError::from)
                },
                StorageError::is_transient,
            )
            .await
            .map_err(StorageError::into_internal)
    }
}
