//! The single indexing worker.
//!
//! The worker is the only writer of the metadata stores and the document
//! index. It drains the [`TaskQueue`](crate::TaskQueue), parses each file
//! from its checkpoint and commits after every file, so a crash loses at
//! most the file in flight. Pending rebuilds and shutdowns are noticed
//! between files, between entries and between lock retries.
//!
//! A file's levels, date range and checkpoint are recorded only after its
//! documents are committed. Name ids are resolved ahead of submission in
//! batches of `ID_BATCH` entries, one short metadata lock per batch.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use logdex_store::TimeRange;
use tracing::{debug, error, info, warn};

use crate::engine::LogDocument;
use crate::error::{IndexError, Result};
use crate::retry::retry_on_lock_conflict;
use crate::service::Shared;
use crate::store::IndexMetadata;
use crate::types::{IndexState, IndexTask, LogEntry, NameId, TaskKind, is_log_file_name};

/// Entries whose name ids are resolved under one metadata lock.
const ID_BATCH: usize = 1024;

/// Module, class and exception ids of one entry.
type EntryNames = (NameId, NameId, Option<NameId>);

/// Names of the eligible log files in `dir`, sorted.
pub(crate) fn eligible_files(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str().filter(|n| is_log_file_name(n)) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// What to do after a unit of work.
enum Outcome {
    Continue,
    Halt,
}

pub(crate) struct Worker {
    shared: Arc<Shared>,
}

impl Worker {
    pub(crate) const fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn run(self) {
        match self.shared.engine.acquire_writer() {
            Ok(()) => self.drive(),
            Err(e) => {
                self.settle(Err(e));
            }
        }
        self.shared.engine.release_writer();
    }

    fn drive(&self) {
        if !self.shared.redo.load(Ordering::SeqCst) {
            self.shared.state.set(IndexState::Indexing);
            let startup = self.startup();
            if let Outcome::Halt = self.settle(startup) {
                return;
            }
        }

        loop {
            if self.shared.shutdown.load(Ordering::SeqCst) {
                debug!("worker shutting down");
                return;
            }
            if self.shared.redo.swap(false, Ordering::SeqCst) {
                self.shared.state.set(IndexState::Indexing);
                let rebuilt = self.rebuild();
                if let Outcome::Halt = self.settle(rebuilt) {
                    return;
                }
                continue;
            }
            match self.shared.queue.pop() {
                Ok(task) => {
                    self.shared.state.set(IndexState::Indexing);
                    let processed = self.process(&task);
                    if let Outcome::Halt = self.settle(processed) {
                        return;
                    }
                }
                Err(_) => continue,
            }
        }
    }

    fn startup(&self) -> Result<()> {
        match self.shared.load() {
            Ok(()) => {
                info!(files = self.shared.metadata.read().files().len(), "resuming index");
                self.update_all()
            }
            Err(e @ (IndexError::MissingIndex(_) | IndexError::Store(_))) => {
                info!(reason = %e, "index unusable, rebuilding");
                self.rebuild()
            }
            Err(e) => Err(e),
        }
    }

    /// Turns the result of a unit of work into the next state.
    fn settle(&self, result: Result<()>) -> Outcome {
        match result {
            Ok(()) => {
                let idle = self.shared.queue.is_empty() && !self.shared.redo.load(Ordering::SeqCst);
                if idle {
                    self.shared.state.set(IndexState::Ready);
                }
                Outcome::Continue
            }
            Err(IndexError::Interrupted) => {
                debug!("indexing interrupted");
                if let Err(e) = self.shared.engine.rollback() {
                    warn!(error = %e, "rollback after interrupt failed");
                }
                Outcome::Continue
            }
            Err(e) => {
                error!(error = %e, "indexing failed, worker halting");
                self.shared.state.set(IndexState::Error);
                Outcome::Halt
            }
        }
    }

    fn process(&self, task: &IndexTask) -> Result<()> {
        match task.kind {
            TaskKind::Deleted => {
                info!(file = %task.file_name, "log file removed, keeping its entries until rebuild");
                Ok(())
            }
            TaskKind::Created | TaskKind::Appended => self.index_file(&task.file_name),
        }
    }

    /// Brings every eligible file up to date from its checkpoint.
    fn update_all(&self) -> Result<()> {
        let log_dir = self.shared.log_dir();
        for name in eligible_files(&log_dir)? {
            self.shared.check_interrupt()?;
            self.index_file(&name)?;
        }
        Ok(())
    }

    /// Deletes every persisted trace of the index and rescans the directory.
    fn rebuild(&self) -> Result<()> {
        let index_dir = self.shared.index_dir();
        let log_dir = self.shared.log_dir();
        info!(log_dir = %log_dir.display(), "rebuilding index");

        fs::create_dir_all(&index_dir)?;
        fs::write(self.shared.marker_path(), b"")?;
        IndexMetadata::delete_files(&index_dir)?;
        self.shared.metadata.write().clear();
        self.shared.engine.delete_all()?;
        self.shared.mark_engine_present();
        self.shared.queue.clear();
        self.shared.watcher.lock().resubscribe(&log_dir)?;

        let files = eligible_files(&log_dir)?;
        for name in &files {
            self.shared.check_interrupt()?;
            self.index_file(name)?;
        }

        self.shared.save()?;
        fs::remove_file(self.shared.marker_path())?;
        info!(
            files = files.len(),
            docs = self.shared.engine.num_docs(),
            "rebuild complete"
        );
        Ok(())
    }

    /// Parses `name` from its checkpoint and indexes the new entries.
    fn index_file(&self, name: &str) -> Result<()> {
        let path = self.shared.log_dir().join(name);
        let retry = self.shared.config.read().retry;
        let known = {
            let metadata = self.shared.metadata.read();
            metadata.file_id(name).map(|id| (id, metadata.bytes_indexed(id)))
        };
        let offset = known.map_or(0, |(_, offset)| offset);

        let parsed = retry_on_lock_conflict(
            &retry,
            || self.shared.interrupt_pending(),
            || self.shared.reader.parse(&path, offset),
        );
        let outcome = match parsed {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return self.shared.check_interrupt(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(file = %name, "log file gone before indexing");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let id = match known {
            Some((id, _)) => id,
            None => self.shared.metadata.write().register_file(name)?,
        };
        if outcome.entries.is_empty() {
            return Ok(());
        }

        let mut levels = BTreeSet::new();
        let mut span: Option<TimeRange> = None;
        for batch in outcome.entries.chunks(ID_BATCH) {
            let names = self.resolve_names(batch)?;
            for (entry, (module, class, exception)) in batch.iter().zip(names) {
                self.shared.check_interrupt()?;
                levels.insert(entry.level);
                let at = TimeRange::new(entry.timestamp, entry.timestamp);
                span = Some(span.map_or(at, |span| span.merge(at)));
                self.shared.engine.add_document(&LogDocument {
                    entry_id: entry.entry_id,
                    file_id: id,
                    level: entry.level,
                    module,
                    class,
                    exception,
                    timestamp: entry.timestamp,
                    message: &entry.message,
                })?;
            }
        }
        self.shared.engine.commit()?;

        {
            let mut metadata = self.shared.metadata.write();
            for level in levels {
                metadata.record_level(id, level);
            }
            if let Some(span) = span {
                metadata.merge_date_range(id, span);
            }
            metadata.advance_checkpoint(id, outcome.bytes_consumed);
        }
        self.shared.save()?;
        debug!(
            file = %name,
            entries = outcome.entries.len(),
            bytes = outcome.bytes_consumed,
            "indexed log file"
        );
        Ok(())
    }

    /// Interns the names of `batch` under one short metadata lock.
    fn resolve_names(&self, batch: &[LogEntry]) -> Result<Vec<EntryNames>> {
        let mut metadata = self.shared.metadata.write();
        batch
            .iter()
            .map(|entry| {
                let module = metadata.intern_module(&entry.module)?;
                let class = metadata.intern_class(&entry.class_name)?;
                let exception = entry
                    .exception()
                    .map(|name| metadata.intern_exception(name))
                    .transpose()?;
                Ok((module, class, exception))
            })
            .collect()
    }
}
