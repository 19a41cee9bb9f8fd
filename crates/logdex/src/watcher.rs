//! Directory change notifications feeding the [`TaskQueue`].
//!
//! - [`ChangeSource`]: anything that can watch one directory at a time.
//! - [`NotifyWatcher`]: the `notify`-backed source, native or polling.
//! - [`tasks_for_event`]: maps a raw event onto [`IndexTask`]s.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::config::WatchMode;
use crate::error::Result;
use crate::queue::TaskQueue;
use crate::types::{is_log_file_name, IndexTask, TaskKind};

/// A source of change notifications for one directory.
pub trait ChangeSource: Send {
    /// Starts watching `dir`.
    fn subscribe(&mut self, dir: &Path) -> Result<()>;

    /// Stops watching the current directory and starts watching `dir`.
    fn resubscribe(&mut self, dir: &Path) -> Result<()> {
        self.unsubscribe();
        self.subscribe(dir)
    }

    /// Stops watching; a no-op when not subscribed.
    fn unsubscribe(&mut self);

    /// Directory currently watched, if any.
    fn directory(&self) -> Option<&Path>;
}

/// Translates one notification into tasks for the log files it names.
///
/// Rescan requests carry no reliable paths and yield nothing.
#[must_use]
pub fn tasks_for_event(event: &Event) -> Vec<IndexTask> {
    if event.need_rescan() {
        warn!(paths = event.paths.len(), "watcher requested a rescan, ignoring");
        return Vec::new();
    }
    let kinds: Vec<TaskKind> = match event.kind {
        EventKind::Create(_) => vec![TaskKind::Created; event.paths.len()],
        EventKind::Remove(_) => vec![TaskKind::Deleted; event.paths.len()],
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => vec![TaskKind::Deleted],
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => vec![TaskKind::Created],
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            vec![TaskKind::Deleted, TaskKind::Created]
        }
        EventKind::Modify(_) => vec![TaskKind::Appended; event.paths.len()],
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };
    event
        .paths
        .iter()
        .zip(kinds)
        .filter_map(|(path, kind)| {
            let name = path.file_name()?.to_str()?;
            is_log_file_name(name).then(|| IndexTask::new(name, kind))
        })
        .collect()
}

/// Watches a directory with `notify` and pushes tasks onto a queue.
pub struct NotifyWatcher {
    mode: WatchMode,
    queue: Arc<TaskQueue>,
    watcher: Option<Box<dyn Watcher + Send>>,
    dir: Option<PathBuf>,
}

impl std::fmt::Debug for NotifyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyWatcher")
            .field("mode", &self.mode)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl NotifyWatcher {
    /// Creates an unsubscribed watcher feeding `queue`.
    #[must_use]
    pub fn new(mode: WatchMode, queue: Arc<TaskQueue>) -> Self {
        Self {
            mode,
            queue,
            watcher: None,
            dir: None,
        }
    }

    fn build(&self) -> Result<Box<dyn Watcher + Send>> {
        let queue = Arc::clone(&self.queue);
        let handler = move |result: notify::Result<Event>| match result {
            Ok(event) => {
                for task in tasks_for_event(&event) {
                    debug!(file = %task.file_name, kind = ?task.kind, "queueing index task");
                    queue.push(task);
                }
            }
            Err(e) => warn!(error = %e, "watcher error"),
        };
        Ok(match self.mode {
            WatchMode::Native => Box::new(notify::recommended_watcher(handler)?),
            WatchMode::Poll { interval_ms } => {
                let config =
                    notify::Config::default().with_poll_interval(Duration::from_millis(interval_ms));
                Box::new(PollWatcher::new(handler, config)?)
            }
        })
    }
}

impl ChangeSource for NotifyWatcher {
    fn subscribe(&mut self, dir: &Path) -> Result<()> {
        let mut watcher = self.build()?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), mode = ?self.mode, "watching log directory");
        self.watcher = Some(watcher);
        self.dir = Some(dir.to_path_buf());
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let (Some(mut watcher), Some(dir)) = (self.watcher.take(), self.dir.take()) {
            if let Err(e) = watcher.unwatch(&dir) {
                debug!(dir = %dir.display(), error = %e, "unwatch failed");
            }
            info!(dir = %dir.display(), "stopped watching log directory");
        }
    }

    fn directory(&self) -> Option<&Path> {
        self.dir.as_deref()
    }
}

impl Drop for NotifyWatcher {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
