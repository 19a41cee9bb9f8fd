//! CLI error types.

use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// The index service failed.
    #[error(transparent)]
    Index(#[from] logdex::IndexError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// No file of that name is indexed.
    #[error("file not indexed: {0}")]
    FileNotFound(String),

    /// Indexing stopped in the error state.
    #[error("indexing failed; see the log output, then run `logdex rebuild`")]
    IndexingFailed,

    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
