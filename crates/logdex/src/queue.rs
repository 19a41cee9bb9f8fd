//! Blocking task queue between the watcher and the indexing worker.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{IndexError, Result};
use crate::types::IndexTask;

#[derive(Debug, Default)]
struct QueueState {
    tasks: VecDeque<IndexTask>,
    interrupted: bool,
}

/// A thread-safe FIFO of [`IndexTask`]s.
///
/// Tasks are keyed by file name: pushing a task for a file that is already
/// queued updates the queued task's kind in place.
#[derive(Debug, Default)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl TaskQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `task` without blocking.
    pub fn push(&self, task: IndexTask) {
        let mut state = self.state.lock();
        if let Some(queued) = state.tasks.iter_mut().find(|queued| **queued == task) {
            queued.kind = task.kind;
            return;
        }
        state.tasks.push_back(task);
        drop(state);
        self.available.notify_one();
    }

    /// Blocks until a task is available.
    ///
    /// Returns [`IndexError::Interrupted`] if [`interrupt`](Self::interrupt)
    /// was called since the last pop, consuming the interrupt.
    pub fn pop(&self) -> Result<IndexTask> {
        let mut state = self.state.lock();
        loop {
            if state.interrupted {
                state.interrupted = false;
                return Err(IndexError::Interrupted);
            }
            if let Some(task) = state.tasks.pop_front() {
                return Ok(task);
            }
            self.available.wait(&mut state);
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<IndexTask>> {
        let mut state = self.state.lock();
        if !state.interrupted && state.tasks.is_empty() {
            self.available
                .wait_while_for(&mut state, |s| !s.interrupted && s.tasks.is_empty(), timeout);
        }
        if state.interrupted {
            state.interrupted = false;
            return Err(IndexError::Interrupted);
        }
        Ok(state.tasks.pop_front())
    }

    /// Removes the next task without blocking.
    pub fn try_pop(&self) -> Option<IndexTask> {
        self.state.lock().tasks.pop_front()
    }

    /// Wakes the consumer; its current or next pop reports an interrupt.
    pub fn interrupt(&self) {
        self.state.lock().interrupted = true;
        self.available.notify_all();
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Returns true if no task is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().tasks.is_empty()
    }

    /// Drops every queued task.
    pub fn clear(&self) {
        self.state.lock().tasks.clear();
    }
}
