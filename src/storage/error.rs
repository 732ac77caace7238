//! Error types for storage operations

use std::fmt;

use super::retry::Cancelled;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
///
/// Callers usually only care about the class of an error, see
/// [`StorageError::is_not_found`], [`StorageError::is_bad_request`] and
/// [`StorageError::is_internal`].
#[derive(Debug)]
pub enum StorageError {
    /// No record of the requested kind exists for this name
    NotFound(String),

    /// Unknown kind, missing payload or payload of the wrong kind
    BadRequest(String),

    /// Backend failure after all recovery options were exhausted
    Internal(String),

    /// I/O error (snapshot file access, etc.)
    IoError(std::io::Error),

    /// Database connection failed
    ConnectionFailed(String),

    /// Migration failed
    MigrationFailed(String),

    /// Raw database error from inside a transaction attempt.
    ///
    /// Only lives long enough for the retry policy to classify it, backends
    /// convert it to `Internal` before returning.
    #[cfg(feature = "storage-sqlite")]
    Database(sqlx::Error),

    /// The backend has no way to answer this operation
    Unsupported(&'static str),

    /// The operation was cancelled before it could run
    Cancelled,
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self, StorageError::BadRequest(_))
    }

    /// I/O, connectivity and transaction failures
    pub fn is_internal(&self) -> bool {
        match self {
            StorageError::Internal(_)
            | StorageError::IoError(_)
            | StorageError::ConnectionFailed(_)
            | StorageError::MigrationFailed(_) => true,
            #[cfg(feature = "storage-sqlite")]
            StorageError::Database(_) => true,
            _ => false,
        }
    }

    /// Whether repeating the whole operation might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::IoError(_) => true,
            #[cfg(feature = "storage-sqlite")]
            StorageError::Database(err) => is_transient_sqlx(err),
            _ => false,
        }
    }

    /// Collapse backend specific errors into the `Internal` class.
    ///
    /// NotFound, BadRequest and Cancelled keep their identity.
    pub fn into_internal(self) -> Self {
        match self {
            StorageError::IoError(_)
            | StorageError::ConnectionFailed(_)
            | StorageError::MigrationFailed(_) => StorageError::Internal(self.to_string()),
            #[cfg(feature = "storage-sqlite")]
            StorageError::Database(_) => StorageError::Internal(self.to_string()),
            other => other,
        }
    }
}

#[cfg(feature = "storage-sqlite")]
fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        // SQLITE_BUSY (5), SQLITE_LOCKED (6) and their extended codes
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, 5 | 6)),
        _ => false,
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound(name) => write!(f, "metric not found: {}", name),
            StorageError::BadRequest(msg) => write!(f, "bad metric request: {}", msg),
            StorageError::Internal(msg) => write!(f, "internal storage error: {}", msg),
            StorageError::IoError(err) => write!(f, "I/O error: {}", err),
            StorageError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to storage backend: {}", msg)
            }
            StorageError::MigrationFailed(msg) => write!(f, "database migration failed: {}", msg),
            #[cfg(feature = "storage-sqlite")]
            StorageError::Database(err) => write!(f, "database error: {}", err),
            StorageError::Unsupported(op) => write!(f, "{} not supported", op),
            StorageError::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::IoError(err) => Some(err),
            #[cfg(feature = "storage-sqlite")]
            StorageError::Database(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::IoError(err)
    }
}

impl From<Cancelled> for StorageError {
    fn from(_: Cancelled) -> Self {
        StorageError::Cancelled
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err)
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::MigrationFailed(err.to_string())
    }
}
