//! Core types for indexed log data.
//!
//! This module provides:
//! - [`LogLevel`]: the closed set of severities with stable numeric ids
//! - [`LogEntry`]: one parsed, immutable log entry
//! - [`FileId`] and [`NameId`]: dense ids issued by the metadata stores
//! - [`IndexState`]: the service-wide indexing state
//! - [`IndexTask`] and [`TaskKind`]: work items produced by the watcher

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{self, Read, Write};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use logdex_store::{BinaryCodec, DenseKey};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::UnknownLevel;

static EXCEPTION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w+Exception\w*)").unwrap_or_else(|_| unreachable!()));

/// Severity of a log entry.
///
/// The numeric ids are persisted in metadata stores and in the document
/// index, so they must never be renumbered. Level filtering enumerates
/// [`LogLevel::ALL`]; a variant missing from that list can never be
/// excluded by a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Informational messages.
    Info,
    /// Debugging information.
    Debug,
    /// Warning conditions.
    Warn,
    /// Error conditions.
    Error,
    /// Fine-grained tracing.
    Trace,
    /// Unrecoverable failures.
    Fatal,
}

impl LogLevel {
    /// Every level, in id order.
    pub const ALL: [Self; 6] = [
        Self::Info,
        Self::Debug,
        Self::Warn,
        Self::Error,
        Self::Trace,
        Self::Fatal,
    ];

    /// Returns the persisted numeric id.
    #[must_use]
    pub const fn id(self) -> u8 {
        match self {
            Self::Info => 1,
            Self::Debug => 2,
            Self::Warn => 3,
            Self::Error => 4,
            Self::Trace => 5,
            Self::Fatal => 6,
        }
    }

    /// Looks a level up by its persisted id.
    #[must_use]
    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::Info),
            2 => Some(Self::Debug),
            3 => Some(Self::Warn),
            4 => Some(Self::Error),
            5 => Some(Self::Trace),
            6 => Some(Self::Fatal),
            _ => None,
        }
    }

    /// Returns the canonical upper-case token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Trace => "TRACE",
            Self::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownLevel(s.to_string()))
    }
}

/// Dense id of an indexed log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub i16);

/// Dense id of a module, class or exception name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameId(pub i32);

macro_rules! dense_id {
    ($name:ident, $inner:ty) => {
        impl $name {
            /// Returns the id as an unsigned document field value.
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0 as u64
            }

            /// Recovers an id from a document field value.
            #[must_use]
            pub fn from_u64(value: u64) -> Option<Self> {
                <$inner>::try_from(value).ok().map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl DenseKey for $name {
            fn from_index(index: usize) -> Option<Self> {
                <$inner>::from_index(index).map(Self)
            }
        }

        impl BinaryCodec for $name {
            fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<u64> {
                self.0.encode(writer)
            }

            fn decode<R: Read + ?Sized>(reader: &mut R) -> logdex_store::Result<(Self, u64)> {
                let (inner, read) = <$inner>::decode(reader)?;
                Ok((Self(inner), read))
            }
        }
    };
}

dense_id!(FileId, i16);
dense_id!(NameId, i32);

/// One parsed log entry.
///
/// `entry_id` is the byte offset at which the entry starts inside its
/// source file, which makes it unique per file and increasing in file
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Byte offset of the entry's first line.
    pub entry_id: u64,
    /// Milliseconds since the Unix epoch, UTC.
    pub timestamp: i64,
    /// Severity.
    pub level: LogLevel,
    /// Module name from the `[...]` block.
    pub module: String,
    /// Emitting class name.
    pub class_name: String,
    /// Message text, possibly spanning several lines.
    pub message: String,
}

impl LogEntry {
    /// Returns the first exception name mentioned in the message.
    #[must_use]
    pub fn exception(&self) -> Option<&str> {
        EXCEPTION_NAME
            .captures(&self.message)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    /// Returns the timestamp as a UTC date-time.
    #[must_use]
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

/// Aggregate state of the indexing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexState {
    /// No worker has started yet.
    NotReady,
    /// The worker is parsing files or rebuilding.
    Indexing,
    /// The index reflects every file seen so far.
    Ready,
    /// A fatal failure halted the worker.
    Error,
    /// A rebuild request interrupted the worker.
    Interrupted,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotReady => "NOT_READY",
            Self::Indexing => "INDEXING",
            Self::Ready => "READY",
            Self::Error => "ERROR",
            Self::Interrupted => "INTERRUPTED",
        };
        f.write_str(s)
    }
}

/// What happened to a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// The file appeared.
    Created,
    /// The file grew or was rewritten.
    Appended,
    /// The file was removed.
    Deleted,
}

/// A unit of work for the indexing worker.
///
/// Two tasks are equal when they name the same file, whatever their kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexTask {
    /// File name relative to the watched directory.
    pub file_name: String,
    /// Kind of change observed.
    pub kind: TaskKind,
}

impl IndexTask {
    /// Creates a task for `file_name`.
    #[must_use]
    pub fn new(file_name: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            file_name: file_name.into(),
            kind,
        }
    }
}

impl PartialEq for IndexTask {
    fn eq(&self, other: &Self) -> bool {
        self.file_name == other.file_name
    }
}

impl Eq for IndexTask {}

impl Hash for IndexTask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.file_name.hash(state);
    }
}

/// Returns true if `file_name` follows the log file naming convention.
#[must_use]
pub fn is_log_file_name(file_name: &str) -> bool {
    file_name.contains(".log")
}
