//! Unified error types for offgrid.
//!
//! Every variant renders with an upper-case code prefix so callers on the
//! other side of the stdio transport can branch without parsing prose.

use tokio_rusqlite::rusqlite;

/// Unified error types for the offgrid agent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input (e.g., malformed message payload).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid URL or URL outside the agent origin.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Network attempt failed before a response was obtained.
    #[error("NETWORK_ERROR: {0}")]
    Network(String),

    /// Network returned a response that cannot be cached.
    #[error("HTTP_ERROR: status {0}")]
    HttpStatus(u16),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Stored entry could not be decoded.
    #[error("CACHE_ERROR: corrupt entry: {0}")]
    CorruptEntry(String),

    /// Store name does not exist.
    #[error("STORE_MISSING: {0}")]
    StoreMissing(String),

    /// A required manifest asset could not be cached.
    #[error("INSTALL_FAILED: {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    /// Response body exceeds the capture limit and will not be stored.
    #[error("TOO_LARGE: {url}: {bytes} bytes exceeds {limit}")]
    TooLarge { url: String, bytes: usize, limit: usize },

    /// Lifecycle transition not allowed from the current state.
    #[error("INVALID_STATE: cannot {action} while {state}")]
    InvalidState { action: &'static str, state: String },
}

impl Error {
    /// The bare error code, without the message.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::Network(_) => "NETWORK_ERROR",
            Error::HttpStatus(_) => "HTTP_ERROR",
            Error::Database(_) | Error::MigrationFailed(_) | Error::CorruptEntry(_) => "CACHE_ERROR",
            Error::StoreMissing(_) => "STORE_MISSING",
            Error::InstallFailed { .. } => "INSTALL_FAILED",
            Error::TooLarge { .. } => "TOO_LARGE",
            Error::InvalidState { .. } => "INVALID_STATE",
        }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(err.to_string())
    }
}
