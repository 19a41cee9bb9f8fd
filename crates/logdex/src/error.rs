//! Error types for indexing and search.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::FileId;

/// Errors that can occur while indexing or querying logs.
#[derive(Debug, Error)]
pub enum IndexError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A metadata store could not be read or written.
    #[error("metadata store error: {0}")]
    Store(#[from] logdex_store::StoreError),

    /// The document index engine failed.
    #[error("document index error: {0}")]
    Engine(#[from] tantivy::TantivyError),

    /// The filesystem watcher failed.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// A configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// The document index is absent or a rebuild never completed.
    #[error("document index missing or incomplete at {}", .0.display())]
    MissingIndex(PathBuf),

    /// A rebuild request or shutdown interrupted the operation.
    #[error("operation interrupted")]
    Interrupted,

    /// A pagination cursor could not be decoded.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// No file is registered under the given id.
    #[error("unknown file id: {0}")]
    UnknownFile(FileId),

    /// No entry starts at the given offset.
    #[error("no log entry at offset {entry_id} in {file}")]
    EntryNotFound {
        /// File name that was searched.
        file: String,
        /// Byte offset that was requested.
        entry_id: u64,
    },

    /// The index was opened for searching only.
    #[error("index opened read-only")]
    ReadOnly,

    /// The indexing worker thread panicked.
    #[error("indexing worker panicked")]
    WorkerPanicked,
}

impl IndexError {
    /// Returns true if this error is the cooperative cancellation signal.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

/// Error returned when a string names no known log level.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log level: {0}")]
pub struct UnknownLevel(pub String);

/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = IndexError::MissingIndex(PathBuf::from("/var/index/documents"));
        assert_eq!(
            err.to_string(),
            "document index missing or incomplete at /var/index/documents"
        );

        let err = IndexError::Interrupted;
        assert_eq!(err.to_string(), "operation interrupted");

        let err = IndexError::UnknownFile(FileId(7));
        assert_eq!(err.to_string(), "unknown file id: 7");

        let err = IndexError::EntryNotFound {
            file: "server.log".to_string(),
            entry_id: 120,
        };
        assert_eq!(err.to_string(), "no log entry at offset 120 in server.log");
    }

    #[test]
    fn error_conversions() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: IndexError = io_err.into();
        assert!(err.to_string().starts_with("I/O error"));

        let store_err = logdex_store::StoreError::DuplicateKey;
        let err: IndexError = store_err.into();
        assert!(err.to_string().starts_with("metadata store error"));
    }

    #[test]
    fn interrupted_is_recognized() {
        assert!(IndexError::Interrupted.is_interrupted());
        assert!(!IndexError::WorkerPanicked.is_interrupted());
    }

    #[test]
    fn unknown_level_display() {
        assert_eq!(
            UnknownLevel("NOTICE".to_string()).to_string(),
            "unknown log level: NOTICE"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<IndexError>();
    }
}
