//! Error taxonomy shared by every catalog cache component.

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// SQLite primary result codes that mean another connection holds the lock.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// The identifier cannot be mapped under the requested mode.
    #[error("cannot resolve identifier: {0}")]
    Resolution(String),

    /// The catalog API answered with an error envelope or a malformed body.
    #[error("catalog API returned an error response: {0}")]
    RemoteApi(String),

    /// The request never produced a response (DNS, TLS, connection reset...).
    #[error("catalog request failed: {0}")]
    Transport(String),

    /// The on-disk store could not be locked within the busy timeout.
    #[error("record store is busy: {0}")]
    StorageBusy(String),

    /// A stored payload or mapping file could not be decoded.
    #[error("stored data for `{key}` is unusable: {reason}")]
    StorageCorruption { key: String, reason: String },

    #[error("database error: {0}")]
    Database(libsql::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CatalogError {
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution(message.into())
    }

    pub fn corruption(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::StorageCorruption {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` when retrying the whole operation later might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageBusy(_) | Self::Transport(_))
    }
}

impl From<libsql::Error> for CatalogError {
    fn from(err: libsql::Error) -> Self {
        if is_busy(&err) {
            Self::StorageBusy(err.to_string())
        } else {
            Self::Database(err)
        }
    }
}

fn is_busy(err: &libsql::Error) -> bool {
    if let libsql::Error::SqliteFailure(code, _) = err {
        let primary = code & 0xff;
        if primary == SQLITE_BUSY || primary == SQLITE_LOCKED {
            return true;
        }
    }
    err.to_string().contains("database is locked")
}
