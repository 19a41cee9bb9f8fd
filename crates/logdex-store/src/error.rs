//! Error types for the metadata stores.

use thiserror::Error;

/// Errors that can occur while encoding, decoding or mutating a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A string record did not hold valid UTF-8.
    #[error("invalid UTF-8 in string record: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A length or count prefix could not describe a valid record.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The key is already bound to a different value.
    #[error("duplicate key in bidirectional map")]
    DuplicateKey,

    /// The value is already bound to a different key.
    #[error("duplicate value in bidirectional map")]
    DuplicateValue,

    /// No further dense keys fit in the key type.
    #[error("key space exhausted after {0} entries")]
    KeySpaceExhausted(usize),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
