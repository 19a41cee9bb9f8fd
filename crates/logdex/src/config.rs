//! Service configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How often to retry a file that another process holds locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts before deferring to the next change event.
    pub attempts: u32,
    /// Pause between attempts, in milliseconds.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 100,
            backoff_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Returns the pause between attempts.
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// How the log directory is watched for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WatchMode {
    /// Native filesystem notifications.
    #[default]
    Native,
    /// Periodic directory scans.
    Poll {
        /// Scan interval in milliseconds.
        interval_ms: u64,
    },
}

/// Configuration for an [`IndexService`](crate::IndexService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory holding the log files to index.
    pub log_dir: PathBuf,
    /// Directory holding the metadata stores and document index.
    pub index_dir: PathBuf,
    /// Lock-conflict retry policy.
    pub retry: RetryPolicy,
    /// Change notification mode.
    pub watch: WatchMode,
    /// Memory budget for the document index writer, in bytes.
    pub writer_heap_bytes: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            index_dir: PathBuf::from("index"),
            retry: RetryPolicy::default(),
            watch: WatchMode::default(),
            writer_heap_bytes: 50 * 1024 * 1024, // 50 MB
        }
    }
}

impl IndexConfig {
    /// Creates a config for the given log and index directories.
    #[must_use]
    pub fn new(log_dir: impl Into<PathBuf>, index_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            index_dir: index_dir.into(),
            ..Default::default()
        }
    }

    /// Loads a config from a JSON file; omitted fields take defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the watch mode.
    #[must_use]
    pub const fn with_watch(mut self, watch: WatchMode) -> Self {
        self.watch = watch;
        self
    }

    /// Sets the document index writer memory budget.
    #[must_use]
    pub const fn with_writer_heap_bytes(mut self, bytes: usize) -> Self {
        self.writer_heap_bytes = bytes;
        self
    }
}
