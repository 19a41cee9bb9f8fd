//! The index service: coordinator state, worker lifecycle and queries.
//!
//! [`IndexService`] owns everything one indexed log directory needs:
//!
//! - the metadata stores and the document index
//! - the [`TaskQueue`] and the [`ChangeSource`] feeding it
//! - the background worker thread and the [`StateCell`] it reports through
//!
//! Queries may run from any thread at any time. They see the metadata as
//! of the last processed file and the documents as of the last commit.
//! The worker holds the metadata lock only while resolving name ids and
//! while applying a committed file's records, never across parsing,
//! document submission or store file I/O.
//!
//! [`IndexService::open_read_only`] serves queries over an index that
//! another process may be writing.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use logdex_store::TimeRange;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::engine::{Cursor, DocumentIndex, ENGINE_DIR, GroupField, Page};
use crate::error::{IndexError, Result};
use crate::parser::{self, FileReader, LogReader};
use crate::query::{Filter, LogQuery, translate};
use crate::queue::TaskQueue;
use crate::state::{StateCell, StateChange};
use crate::store::IndexMetadata;
use crate::types::{FileId, IndexState, LogEntry, LogLevel};
use crate::watcher::{ChangeSource, NotifyWatcher};
use crate::worker::Worker;

/// Marker file present while a rebuild is in progress.
pub const REBUILD_MARKER: &str = "rebuild.marker";

const WORKER_THREAD: &str = "logdex-indexer";

/// Matches of one file, as returned by [`IndexService::search`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileHits {
    /// File id.
    pub file_id: FileId,
    /// File name relative to the log directory.
    pub file_name: String,
    /// Earliest matching timestamp.
    pub first: i64,
    /// Latest matching timestamp.
    pub last: i64,
    /// Levels among the matches.
    pub levels: BTreeSet<LogLevel>,
    /// Offsets of the matching entries, ascending.
    pub entry_ids: Vec<u64>,
}

/// State shared between the service handle and its worker.
pub(crate) struct Shared {
    pub(crate) config: RwLock<IndexConfig>,
    pub(crate) state: StateCell,
    pub(crate) metadata: RwLock<IndexMetadata>,
    pub(crate) engine: DocumentIndex,
    pub(crate) queue: Arc<TaskQueue>,
    pub(crate) watcher: Mutex<Box<dyn ChangeSource>>,
    pub(crate) reader: Box<dyn LogReader>,
    pub(crate) redo: AtomicBool,
    pub(crate) shutdown: AtomicBool,
    engine_present: AtomicBool,
    read_only: bool,
    save_serial: Mutex<()>,
}

impl Shared {
    pub(crate) fn log_dir(&self) -> PathBuf {
        self.config.read().log_dir.clone()
    }

    pub(crate) fn index_dir(&self) -> PathBuf {
        self.config.read().index_dir.clone()
    }

    pub(crate) fn marker_path(&self) -> PathBuf {
        self.index_dir().join(REBUILD_MARKER)
    }

    /// Returns true if a rebuild or shutdown is pending.
    pub(crate) fn interrupt_pending(&self) -> bool {
        self.redo.load(Ordering::SeqCst) || self.shutdown.load(Ordering::SeqCst)
    }

    /// Returns [`IndexError::Interrupted`] if a rebuild or shutdown is pending.
    pub(crate) fn check_interrupt(&self) -> Result<()> {
        if self.interrupt_pending() {
            return Err(IndexError::Interrupted);
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(IndexError::ReadOnly);
        }
        Ok(())
    }

    pub(crate) fn mark_engine_present(&self) {
        self.engine_present.store(true, Ordering::SeqCst);
    }

    /// Encodes the stores under a short lock, then writes them unlocked.
    pub(crate) fn save(&self) -> Result<()> {
        self.check_writable()?;
        let _serial = self.save_serial.lock();
        let encoded = self.metadata.write().encode()?;
        encoded.write(&self.index_dir())
    }

    pub(crate) fn load(&self) -> Result<()> {
        let dir = self.index_dir();
        let engine_dir = dir.join(ENGINE_DIR);
        if !self.engine_present.load(Ordering::SeqCst) || dir.join(REBUILD_MARKER).exists() {
            return Err(IndexError::MissingIndex(engine_dir));
        }
        let stores_missing = IndexMetadata::store_paths(&dir).iter().any(|p| !p.exists());
        if stores_missing && self.engine.num_docs() > 0 {
            return Err(IndexError::MissingIndex(dir));
        }
        let metadata = IndexMetadata::load(&dir)?;
        self.engine.reload()?;
        *self.metadata.write() = metadata;
        Ok(())
    }
}

/// Indexes one log directory in the background and answers queries over it.
pub struct IndexService {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for IndexService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexService")
            .field("log_dir", &self.shared.log_dir())
            .field("index_dir", &self.shared.index_dir())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl IndexService {
    /// Opens the index under `config.index_dir`, watching with `notify`.
    ///
    /// Nothing is indexed until [`start`](Self::start).
    pub fn open(config: IndexConfig) -> Result<Self> {
        let queue = Arc::new(TaskQueue::new());
        let watcher = NotifyWatcher::new(config.watch, Arc::clone(&queue));
        Self::with_change_source(config, queue, Box::new(watcher))
    }

    /// Opens the index with a caller-supplied change source feeding `queue`.
    pub fn with_change_source(
        config: IndexConfig,
        queue: Arc<TaskQueue>,
        source: Box<dyn ChangeSource>,
    ) -> Result<Self> {
        Self::with_sources(config, queue, source, Box::new(FileReader))
    }

    /// Opens the index with caller-supplied change and log sources.
    pub fn with_sources(
        config: IndexConfig,
        queue: Arc<TaskQueue>,
        source: Box<dyn ChangeSource>,
        reader: Box<dyn LogReader>,
    ) -> Result<Self> {
        fs::create_dir_all(&config.index_dir)?;
        let engine_dir = config.index_dir.join(ENGINE_DIR);
        let engine_present = engine_dir.is_dir();
        let engine = DocumentIndex::open(&engine_dir, config.writer_heap_bytes)?;

        let marker = config.index_dir.join(REBUILD_MARKER).exists();
        let metadata = if engine_present && !marker {
            IndexMetadata::load(&config.index_dir).unwrap_or_else(|e| {
                warn!(error = %e, "metadata unreadable, starting empty");
                IndexMetadata::new()
            })
        } else {
            IndexMetadata::new()
        };
        info!(
            index_dir = %config.index_dir.display(),
            engine_present,
            docs = engine.num_docs(),
            "opened index"
        );

        let shared = Shared {
            config: RwLock::new(config),
            state: StateCell::default(),
            metadata: RwLock::new(metadata),
            engine,
            queue,
            watcher: Mutex::new(source),
            reader,
            redo: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            engine_present: AtomicBool::new(engine_present),
            read_only: false,
            save_serial: Mutex::new(()),
        };
        Ok(Self {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
        })
    }

    /// Opens a committed index for queries only.
    ///
    /// Takes no writer lock, so it works while another process indexes the
    /// same directory. The service cannot be started; call
    /// [`load`](Self::load) to pick up the writer's later commits.
    pub fn open_read_only(config: IndexConfig) -> Result<Self> {
        let engine_dir = config.index_dir.join(ENGINE_DIR);
        if config.index_dir.join(REBUILD_MARKER).exists() {
            return Err(IndexError::MissingIndex(engine_dir));
        }
        let engine = DocumentIndex::open_existing(&engine_dir)?;
        let metadata = IndexMetadata::load(&config.index_dir)?;
        info!(
            index_dir = %config.index_dir.display(),
            docs = engine.num_docs(),
            "opened index read-only"
        );

        let queue = Arc::new(TaskQueue::new());
        let watcher = NotifyWatcher::new(config.watch, Arc::clone(&queue));
        let shared = Shared {
            config: RwLock::new(config),
            state: StateCell::default(),
            metadata: RwLock::new(metadata),
            engine,
            queue,
            watcher: Mutex::new(Box::new(watcher)),
            reader: Box::new(FileReader),
            redo: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            engine_present: AtomicBool::new(true),
            read_only: true,
            save_serial: Mutex::new(()),
        };
        Ok(Self {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
        })
    }

    /// Returns true if this service only answers queries.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.shared.read_only
    }

    // ----- lifecycle -----

    /// Subscribes the watcher and spawns the worker; a no-op while running.
    pub fn start(&self) -> Result<()> {
        self.shared.check_writable()?;
        let mut worker = self.worker.lock();
        if let Some(handle) = worker.take() {
            // a worker in Error is already on its way out
            if !handle.is_finished() && self.state() != IndexState::Error {
                *worker = Some(handle);
                return Ok(());
            }
            handle.join().map_err(|_| IndexError::WorkerPanicked)?;
        }
        self.shared.shutdown.store(false, Ordering::SeqCst);
        {
            let mut watcher = self.shared.watcher.lock();
            if watcher.directory().is_none() {
                watcher.subscribe(&self.shared.log_dir())?;
            }
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(WORKER_THREAD.to_string())
            .spawn(move || Worker::new(shared).run())?;
        *worker = Some(handle);
        debug!("indexing worker started");
        Ok(())
    }

    /// Discards all indexed state and reindexes the log directory.
    ///
    /// A worker halted in [`IndexState::Error`] is restarted.
    pub fn request_rebuild(&self) -> Result<()> {
        self.shared.check_writable()?;
        info!("rebuild requested");
        self.shared.redo.store(true, Ordering::SeqCst);
        self.shared
            .state
            .set_if(&[IndexState::Ready, IndexState::Indexing], IndexState::Interrupted);
        self.shared.queue.interrupt();

        let halted = self.state() == IndexState::Error
            || self.worker.lock().as_ref().is_some_and(JoinHandle::is_finished);
        if halted {
            self.start()?;
        }
        Ok(())
    }

    /// Points the service at another log directory and rebuilds.
    pub fn switch_directory(&self, log_dir: impl Into<PathBuf>) -> Result<()> {
        self.shared.check_writable()?;
        let log_dir = log_dir.into();
        info!(dir = %log_dir.display(), "switching log directory");
        self.shared.config.write().log_dir = log_dir;
        self.request_rebuild()
    }

    /// Stops the watcher and joins the worker.
    pub fn shutdown(&self) -> Result<()> {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.queue.interrupt();
        self.shared.watcher.lock().unsubscribe();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| IndexError::WorkerPanicked)?;
            info!("indexing worker stopped");
        }
        Ok(())
    }

    /// Writes the metadata stores to the index directory.
    pub fn save(&self) -> Result<()> {
        self.shared.save()
    }

    /// Reloads the metadata stores from the index directory.
    ///
    /// Fails with [`IndexError::MissingIndex`] when the document index was
    /// absent at open time or a rebuild never finished.
    pub fn load(&self) -> Result<()> {
        self.shared.load()
    }

    // ----- state -----

    /// Current pipeline state.
    #[must_use]
    pub fn state(&self) -> IndexState {
        self.shared.state.get()
    }

    /// Waits up to `timeout` for the next state transition.
    pub fn wait_for_state_change(&self, timeout: Duration) -> StateChange {
        self.shared.state.wait_for_change(timeout)
    }

    /// Waits up to `timeout` for the state to differ from `observed`.
    pub fn wait_for_state_change_from(&self, observed: IndexState, timeout: Duration) -> StateChange {
        self.shared.state.wait_for_change_from(observed, timeout)
    }

    /// Calls `observer` with the new state on every transition.
    pub fn attach_observer<F>(&self, observer: F)
    where
        F: Fn(IndexState) + Send + Sync + 'static,
    {
        self.shared.state.attach_observer(observer);
    }

    // ----- metadata -----

    /// Directory being indexed.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.shared.log_dir()
    }

    /// Name of file `id`.
    #[must_use]
    pub fn file_name(&self, id: FileId) -> Option<String> {
        self.shared.metadata.read().file_name(id).map(str::to_string)
    }

    /// Id of the file called `name`.
    #[must_use]
    pub fn file_id(&self, name: &str) -> Option<FileId> {
        self.shared.metadata.read().file_id(name)
    }

    /// Every known file, by id.
    #[must_use]
    pub fn list_files(&self) -> Vec<(FileId, String)> {
        self.shared.metadata.read().files()
    }

    /// Levels that occur in file `id`.
    #[must_use]
    pub fn levels_of_file(&self, id: FileId) -> BTreeSet<LogLevel> {
        self.shared.metadata.read().levels(id)
    }

    /// Time span covered by file `id`.
    #[must_use]
    pub fn date_range(&self, id: FileId) -> Option<TimeRange> {
        self.shared.metadata.read().date_range(id)
    }

    /// Bytes of file `id` already indexed.
    #[must_use]
    pub fn bytes_indexed(&self, id: FileId) -> u64 {
        self.shared.metadata.read().bytes_indexed(id)
    }

    /// Every module name seen, sorted.
    #[must_use]
    pub fn modules(&self) -> Vec<String> {
        self.shared.metadata.read().module_names()
    }

    /// Every class name seen, sorted.
    #[must_use]
    pub fn classes(&self) -> Vec<String> {
        self.shared.metadata.read().class_names()
    }

    /// Every exception name seen, sorted.
    #[must_use]
    pub fn exceptions(&self) -> Vec<String> {
        self.shared.metadata.read().exception_names()
    }

    /// Number of committed documents.
    #[must_use]
    pub fn num_docs(&self) -> u64 {
        self.shared.engine.num_docs()
    }

    // ----- entries -----

    fn file_path(&self, id: FileId) -> Result<(String, PathBuf)> {
        let name = self.file_name(id).ok_or(IndexError::UnknownFile(id))?;
        let path = self.shared.log_dir().join(&name);
        Ok((name, path))
    }

    /// Reads the full entry at `entry_id` of file `id`.
    pub fn entry(&self, id: FileId, entry_id: u64) -> Result<LogEntry> {
        let (file, path) = self.file_path(id)?;
        parser::read_entry_at(&path, entry_id)?.ok_or(IndexError::EntryNotFound { file, entry_id })
    }

    /// Reads the entries of file `id` starting within `byte_range` of `entry_id`.
    pub fn nearby_entries(&self, id: FileId, entry_id: u64, byte_range: u64) -> Result<Vec<LogEntry>> {
        let (_, path) = self.file_path(id)?;
        Ok(parser::nearby_entries(&path, entry_id, byte_range)?)
    }

    // ----- queries -----

    fn translate(&self, filter: &Filter) -> LogQuery {
        translate(filter, &self.shared.metadata.read())
    }

    /// Matches grouped by file, in file id order.
    pub fn search(&self, filter: &Filter) -> Result<Vec<FileHits>> {
        let hits = self.shared.engine.search(&self.translate(filter))?;
        let metadata = self.shared.metadata.read();
        let mut grouped: Vec<FileHits> = Vec::new();
        for hit in hits {
            match grouped.last_mut() {
                Some(group) if group.file_id == hit.file_id => {
                    group.first = group.first.min(hit.timestamp);
                    group.last = group.last.max(hit.timestamp);
                    group.levels.insert(hit.level);
                    group.entry_ids.push(hit.entry_id);
                }
                _ => grouped.push(FileHits {
                    file_id: hit.file_id,
                    file_name: metadata.file_name(hit.file_id).unwrap_or_default().to_string(),
                    first: hit.timestamp,
                    last: hit.timestamp,
                    levels: BTreeSet::from([hit.level]),
                    entry_ids: vec![hit.entry_id],
                }),
            }
        }
        Ok(grouped)
    }

    /// Full matching entries ordered by timestamp, at most `limit` of them.
    ///
    /// Entries whose file has since vanished are skipped.
    pub fn sorted_search(&self, filter: &Filter, limit: Option<usize>) -> Result<Vec<(FileId, LogEntry)>> {
        let hits = self.shared.engine.sorted_search(&self.translate(filter), limit)?;
        let log_dir = self.shared.log_dir();
        let names: BTreeMap<FileId, String> = self.list_files().into_iter().collect();

        let mut entries = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(name) = names.get(&hit.file_id) else {
                continue;
            };
            match parser::read_entry_at(&log_dir.join(name), hit.entry_id) {
                Ok(Some(entry)) => entries.push((hit.file_id, entry)),
                Ok(None) => debug!(file = %name, entry_id = hit.entry_id, "indexed entry no longer parses"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(file = %name, "indexed file vanished");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(entries)
    }

    /// Number of matches per level.
    pub fn level_histogram(&self, filter: &Filter) -> Result<BTreeMap<LogLevel, u64>> {
        let groups = self
            .shared
            .engine
            .group_by(&self.translate(filter), GroupField::Level, None)?;
        Ok(groups
            .into_iter()
            .filter_map(|group| {
                let level = u8::try_from(group.key).ok().and_then(LogLevel::from_id)?;
                Some((level, group.count))
            })
            .collect())
    }

    /// Levels among the matches of each file.
    pub fn levels_per_file(&self, filter: &Filter) -> Result<BTreeMap<FileId, BTreeSet<LogLevel>>> {
        let groups = self
            .shared
            .engine
            .group_by(&self.translate(filter), GroupField::FileLevel, None)?;
        let mut per_file: BTreeMap<FileId, BTreeSet<LogLevel>> = BTreeMap::new();
        for (file, level) in groups.iter().filter_map(|group| GroupField::split_file_level(group.key)) {
            per_file.entry(file).or_default().insert(level);
        }
        Ok(per_file)
    }

    /// Up to `limit` matches after `cursor`, in (file, offset) order.
    ///
    /// `cursor` is the `next` value of a previous page, in string form.
    pub fn search_page(&self, filter: &Filter, cursor: Option<&str>, limit: usize) -> Result<Page> {
        let after = cursor.map(str::parse::<Cursor>).transpose()?;
        self.shared
            .engine
            .search_after(&self.translate(filter), after, limit)
    }

    /// Ids of the files with at least one match, in id order.
    pub fn files_matching(&self, filter: &Filter) -> Result<Vec<FileId>> {
        let (query, candidates) = {
            let metadata = self.shared.metadata.read();
            let ids: Vec<FileId> = metadata.files().into_iter().map(|(id, _)| id).collect();
            (translate(filter, &metadata), ids)
        };
        self.shared.engine.files_with_matches(&query, &candidates)
    }

    /// Index directory in use.
    #[must_use]
    pub fn index_dir(&self) -> PathBuf {
        self.shared.index_dir()
    }
}

impl Drop for IndexService {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "index service did not shut down cleanly");
        }
    }
}
