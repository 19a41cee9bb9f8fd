//! # logdex
//!
//! Incremental indexing and search over a directory of multi-line log files.
//!
//! This crate provides:
//!
//! - [`IndexService`]: watches a log directory, indexes it in the background
//!   and answers queries
//! - [`Filter`]: what to search for, translated into a [`LogQuery`]
//! - [`LogEntry`] and [`LogLevel`]: parsed log records
//! - [`IndexConfig`]: directories, retry policy, watch mode
//! - [`parser`]: resumable parsing of the log format
//! - [`DocumentIndex`]: the tantivy-backed document store
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use logdex::{Filter, IndexConfig, IndexService, IndexState, LogLevel};
//!
//! # fn main() -> logdex::Result<()> {
//! let service = IndexService::open(IndexConfig::new("/var/log/app", "/var/lib/logdex"))?;
//! service.start()?;
//! service.wait_for_state_change_from(IndexState::Indexing, Duration::from_secs(30));
//!
//! let errors = Filter::default().with_level(LogLevel::Error).with_level(LogLevel::Fatal);
//! for file in service.search(&errors)? {
//!     println!("{}: {} matches", file.file_name, file.entry_ids.len());
//! }
//! service.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod parser;
pub mod query;
pub mod queue;
pub mod retry;
pub mod service;
pub mod state;
pub mod store;
pub mod types;
pub mod watcher;
mod worker;

// Re-export main types
pub use config::{IndexConfig, RetryPolicy, WatchMode};
pub use engine::{Cursor, DocumentIndex, Hit, Page};
pub use error::{IndexError, Result, UnknownLevel};
pub use logdex_store::TimeRange;
pub use parser::{FileReader, LogReader, ParseError, ParseOutcome};
pub use query::{Filter, LogQuery};
pub use queue::TaskQueue;
pub use retry::{is_lock_conflict, retry_on_lock_conflict};
pub use service::{FileHits, IndexService, REBUILD_MARKER};
pub use state::{StateCell, StateChange};
pub use store::{EncodedMetadata, IndexMetadata};
pub use types::{FileId, IndexState, IndexTask, LogEntry, LogLevel, NameId, TaskKind};
pub use watcher::{ChangeSource, NotifyWatcher};
