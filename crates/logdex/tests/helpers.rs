//! Test helpers for the end-to-end indexing tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use logdex::parser::parse_file;
use logdex::{
    ChangeSource, IndexConfig, IndexService, IndexState, LogReader, ParseOutcome, RetryPolicy,
    TaskQueue, WatchMode,
};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Default test timeout.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Midnight UTC, 4 July 2022, in ms.
pub const DAY_ONE: i64 = 1_656_892_800_000;
/// Midnight UTC, 5 July 2022, in ms.
pub const DAY_TWO: i64 = 1_656_979_200_000;
/// Midnight UTC, 6 July 2022, in ms.
pub const DAY_THREE: i64 = 1_657_065_600_000;

/// A change source that never fires; tests push tasks by hand.
#[derive(Debug, Default)]
pub struct ManualSource {
    dir: Option<PathBuf>,
}

impl ChangeSource for ManualSource {
    fn subscribe(&mut self, dir: &Path) -> logdex::Result<()> {
        self.dir = Some(dir.to_path_buf());
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.dir = None;
    }

    fn directory(&self) -> Option<&Path> {
        self.dir.as_deref()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_string()
}

/// A reader that reports a lock conflict for the named files.
#[derive(Debug, Clone, Default)]
pub struct LockedReader {
    locked: Arc<Mutex<HashSet<String>>>,
    conflicts: Arc<AtomicUsize>,
}

impl LockedReader {
    pub fn lock(&self, name: &str) {
        self.locked.lock().insert(name.to_string());
    }

    pub fn unlock(&self, name: &str) {
        self.locked.lock().remove(name);
    }

    /// Lock conflicts reported so far.
    pub fn conflicts(&self) -> usize {
        self.conflicts.load(Ordering::SeqCst)
    }
}

impl LogReader for LockedReader {
    fn parse(&self, path: &Path, offset: u64) -> io::Result<ParseOutcome> {
        if self.locked.lock().contains(&file_name(path)) {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "locked"));
        }
        parse_file(path, offset)
    }
}

/// A reader that parks its first parse until the test releases it.
///
/// The test and the reader meet twice: once when the file has been parsed,
/// and again to let the worker go on.
#[derive(Debug, Clone)]
pub struct GatedReader {
    gate: Arc<Barrier>,
    armed: Arc<AtomicBool>,
}

impl GatedReader {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Barrier::new(2)),
            armed: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Blocks until the reader has parsed its first file.
    pub fn wait_parsed(&self) {
        self.gate.wait();
    }

    /// Lets the parked parse return.
    pub fn release(&self) {
        self.gate.wait();
    }
}

impl LogReader for GatedReader {
    fn parse(&self, path: &Path, offset: u64) -> io::Result<ParseOutcome> {
        let outcome = parse_file(path, offset);
        if self.armed.swap(false, Ordering::SeqCst) {
            self.gate.wait();
            self.gate.wait();
        }
        outcome
    }
}

/// Formats one log line.
pub fn line(date: &str, level: &str, module: &str, class: &str, message: &str) -> String {
    format!("{date} {level:<5} [{module}] {class}:? - {message}\n")
}

/// A log directory and an index directory that live as long as the test.
pub struct Fixture {
    pub logs: TempDir,
    pub index: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            logs: TempDir::new().expect("create log dir"),
            index: TempDir::new().expect("create index dir"),
        }
    }

    pub fn config(&self) -> IndexConfig {
        IndexConfig::new(self.logs.path(), self.index.path())
            .with_retry(RetryPolicy {
                attempts: 3,
                backoff_ms: 1,
            })
            .with_watch(WatchMode::Poll { interval_ms: 50 })
            .with_writer_heap_bytes(20_000_000)
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        self.logs.path().join(name)
    }

    pub fn write(&self, name: &str, contents: &str) {
        fs::write(self.log_path(name), contents).expect("write log file");
    }

    pub fn append(&self, name: &str, contents: &str) {
        let mut file = OpenOptions::new()
            .append(true)
            .open(self.log_path(name))
            .expect("open log file");
        file.write_all(contents.as_bytes()).expect("append log file");
    }

    /// Opens a service whose tasks come only from the returned queue.
    pub fn open_manual(&self) -> (IndexService, Arc<TaskQueue>) {
        let queue = Arc::new(TaskQueue::new());
        let service = IndexService::with_change_source(
            self.config(),
            Arc::clone(&queue),
            Box::new(ManualSource::default()),
        )
        .expect("open service");
        (service, queue)
    }

    /// Opens a manual service that reads log files through `reader`.
    pub fn open_with_reader(
        &self,
        config: IndexConfig,
        reader: impl LogReader + 'static,
    ) -> (IndexService, Arc<TaskQueue>) {
        let queue = Arc::new(TaskQueue::new());
        let service = IndexService::with_sources(
            config,
            Arc::clone(&queue),
            Box::new(ManualSource::default()),
            Box::new(reader),
        )
        .expect("open service");
        (service, queue)
    }

    /// Opens and starts a manual service, waiting until it is ready.
    pub fn start_manual(&self) -> (IndexService, Arc<TaskQueue>) {
        let (service, queue) = self.open_manual();
        service.start().expect("start service");
        wait_for_state(&service, IndexState::Ready);
        (service, queue)
    }
}

/// Blocks until the service reaches `target`.
pub fn wait_for_state(service: &IndexService, target: IndexState) {
    let deadline = Instant::now() + TEST_TIMEOUT;
    loop {
        let current = service.state();
        if current == target {
            return;
        }
        let now = Instant::now();
        assert!(now < deadline, "timed out waiting for {target}, still {current}");
        service.wait_for_state_change_from(current, deadline - now);
    }
}

/// Polls `condition` until it holds.
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(20));
    }
}
