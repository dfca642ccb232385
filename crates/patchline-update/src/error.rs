//! Error taxonomy for the update pipeline

use camino::{Utf8Path, Utf8PathBuf};
use patchline_core::retry::RetryError;
use std::io;
use thiserror::Error;

/// Errors raised by any stage of an update session
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("timed out during {operation}")]
    Timeout { operation: String },

    #[error("malformed {what} {input:?}: {reason}")]
    Format {
        what: &'static str,
        input: String,
        reason: String,
    },

    #[error("disk error at {path}: {source}")]
    Disk {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("permission denied at {path}: {source}")]
    Permission {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("size mismatch: expected {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("corrupt archive {path}: {reason}")]
    CorruptArchive { path: Utf8PathBuf, reason: String },

    #[error("load order update failed: {message}")]
    Apply { message: String },

    #[error("an update session is already active")]
    SessionBusy,

    #[error("update cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(#[from] patchline_core::Error),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl UpdateError {
    pub fn network(message: impl Into<String>) -> Self {
        UpdateError::Network {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        UpdateError::Timeout {
            operation: operation.into(),
        }
    }

    pub fn format(what: &'static str, input: impl Into<String>, reason: impl Into<String>) -> Self {
        UpdateError::Format {
            what,
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn corrupt(path: impl Into<Utf8PathBuf>, reason: impl Into<String>) -> Self {
        UpdateError::CorruptArchive {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn apply(message: impl Into<String>) -> Self {
        UpdateError::Apply {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        UpdateError::Internal {
            message: message.into(),
        }
    }

    /// Classify a filesystem error. `PermissionDenied` becomes `Permission`,
    /// everything else is a `Disk` error.
    pub fn from_io(path: impl AsRef<Utf8Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == io::ErrorKind::PermissionDenied {
            UpdateError::Permission { path, source }
        } else {
            UpdateError::Disk { path, source }
        }
    }

    /// Whether the owning stage may retry after this error
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpdateError::Network { .. }
                | UpdateError::Timeout { .. }
                | UpdateError::SizeMismatch { .. }
                | UpdateError::ChecksumMismatch { .. }
                | UpdateError::CorruptArchive { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, UpdateError::Cancelled)
    }

    /// Stable name of the error kind, used in machine-readable output
    pub fn code(&self) -> &'static str {
        match self {
            UpdateError::Network { .. } => "NetworkError",
            UpdateError::Timeout { .. } => "TimeoutError",
            UpdateError::Format { .. } => "FormatError",
            UpdateError::Disk { .. } => "DiskError",
            UpdateError::Permission { .. } => "PermissionError",
            UpdateError::SizeMismatch { .. } => "SizeMismatchError",
            UpdateError::ChecksumMismatch { .. } => "ChecksumMismatchError",
            UpdateError::CorruptArchive { .. } => "CorruptArchiveError",
            UpdateError::Apply { .. } => "ApplyError",
            UpdateError::SessionBusy => "SessionBusyError",
            UpdateError::Cancelled => "CancelledError",
            UpdateError::Config(_) => "ConfigError",
            UpdateError::Internal { .. } => "InternalError",
        }
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return UpdateError::timeout("http request");
        }
        match err.url() {
            Some(url) => UpdateError::network(format!("{} ({})", err, url)),
            None => UpdateError::network(err.to_string()),
        }
    }
}

impl From<RetryError<UpdateError>> for UpdateError {
    fn from(err: RetryError<UpdateError>) -> Self {
        match err {
            RetryError::Exhausted { source, .. } => source,
            RetryError::NonRetryable(source) => source,
            RetryError::Cancelled { .. } => UpdateError::Cancelled,
        }
    }
}

/// Result type for update operations
pub type Result<T> = std::result::Result<T, UpdateError>;
