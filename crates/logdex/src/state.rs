//! Observable indexing state with timed waits.

use std::fmt;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::info;

use crate::types::IndexState;

/// Outcome of waiting for the state to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    /// The timeout elapsed with no transition.
    Timeout,
    /// The state moved to the contained value.
    Changed(IndexState),
}

type Observer = Box<dyn Fn(IndexState) + Send + Sync>;

#[derive(Debug)]
struct Current {
    state: IndexState,
    transitions: u64,
}

/// Holds the [`IndexState`] and broadcasts every transition.
///
/// Observers run before waiting threads are woken, so anything a timed
/// wait can see has already been delivered to every observer. Observers
/// must not call [`set`](Self::set).
pub struct StateCell {
    current: Mutex<Current>,
    changed: Condvar,
    observers: RwLock<Vec<Observer>>,
    transition: Mutex<()>,
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("state", &self.get())
            .field("observers", &self.observers.read().len())
            .finish_non_exhaustive()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(IndexState::NotReady)
    }
}

impl StateCell {
    /// Creates a cell holding `initial`.
    #[must_use]
    pub fn new(initial: IndexState) -> Self {
        Self {
            current: Mutex::new(Current {
                state: initial,
                transitions: 0,
            }),
            changed: Condvar::new(),
            observers: RwLock::new(Vec::new()),
            transition: Mutex::new(()),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn get(&self) -> IndexState {
        self.current.lock().state
    }

    /// Moves to `next`; a no-op if already there.
    ///
    /// Returns true if a transition happened.
    pub fn set(&self, next: IndexState) -> bool {
        let _serial = self.transition.lock();
        self.apply(next)
    }

    /// Moves to `next` only if the current state is one of `from`.
    ///
    /// The check and the move happen under the same serialization as
    /// [`set`](Self::set), so no transition can slip in between.
    pub fn set_if(&self, from: &[IndexState], next: IndexState) -> bool {
        let _serial = self.transition.lock();
        if !from.contains(&self.get()) {
            return false;
        }
        self.apply(next)
    }

    /// Performs a transition; the caller holds `transition`.
    fn apply(&self, next: IndexState) -> bool {
        let previous = self.get();
        if previous == next {
            return false;
        }
        for observer in self.observers.read().iter() {
            observer(next);
        }
        {
            let mut current = self.current.lock();
            current.state = next;
            current.transitions += 1;
        }
        self.changed.notify_all();
        info!(from = %previous, to = %next, "index state changed");
        true
    }

    /// Registers `observer` for every future transition.
    pub fn attach_observer<F>(&self, observer: F)
    where
        F: Fn(IndexState) + Send + Sync + 'static,
    {
        self.observers.write().push(Box::new(observer));
    }

    /// Waits up to `timeout` for the next transition after this call.
    pub fn wait_for_change(&self, timeout: Duration) -> StateChange {
        let mut current = self.current.lock();
        let seen = current.transitions;
        let result = self
            .changed
            .wait_while_for(&mut current, |c| c.transitions == seen, timeout);
        if result.timed_out() && current.transitions == seen {
            StateChange::Timeout
        } else {
            StateChange::Changed(current.state)
        }
    }

    /// Waits up to `timeout` for the state to differ from `observed`.
    ///
    /// Returns immediately if it already does.
    pub fn wait_for_change_from(&self, observed: IndexState, timeout: Duration) -> StateChange {
        let mut current = self.current.lock();
        let result = self
            .changed
            .wait_while_for(&mut current, |c| c.state == observed, timeout);
        if result.timed_out() && current.state == observed {
            StateChange::Timeout
        } else {
            StateChange::Changed(current.state)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn starts_not_ready() {
        assert_eq!(StateCell::default().get(), IndexState::NotReady);
    }

    #[test]
    fn set_reports_transitions() {
        let cell = StateCell::default();
        assert!(cell.set(IndexState::Indexing));
        assert!(!cell.set(IndexState::Indexing));
        assert_eq!(cell.get(), IndexState::Indexing);
    }

    #[test]
    fn set_if_guards_source_state() {
        let cell = StateCell::new(IndexState::Error);
        assert!(!cell.set_if(&[IndexState::Ready, IndexState::Indexing], IndexState::Interrupted));
        assert_eq!(cell.get(), IndexState::Error);

        cell.set(IndexState::Ready);
        assert!(cell.set_if(&[IndexState::Ready, IndexState::Indexing], IndexState::Interrupted));
        assert_eq!(cell.get(), IndexState::Interrupted);
    }

    #[test]
    fn set_if_never_overwrites_a_racing_error() {
        for _ in 0..200 {
            let cell = Arc::new(StateCell::new(IndexState::Indexing));
            let barrier = Arc::new(std::sync::Barrier::new(2));
            let failing = {
                let cell = Arc::clone(&cell);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cell.set(IndexState::Error);
                })
            };
            barrier.wait();
            cell.set_if(&[IndexState::Ready, IndexState::Indexing], IndexState::Interrupted);
            failing.join().expect("join");
            // whichever ran first, Error is the last word
            assert_eq!(cell.get(), IndexState::Error);
        }
    }

    #[test]
    fn observers_see_every_transition_in_order() {
        let cell = StateCell::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            cell.attach_observer(move |state| seen.lock().push(state));
        }
        cell.set(IndexState::Indexing);
        cell.set(IndexState::Indexing);
        cell.set(IndexState::Ready);
        assert_eq!(*seen.lock(), vec![IndexState::Indexing, IndexState::Ready]);
    }

    #[test]
    fn observers_may_read_the_state() {
        let cell = Arc::new(StateCell::default());
        let reads = Arc::new(Mutex::new(Vec::new()));
        {
            let reader = Arc::clone(&cell);
            let reads = Arc::clone(&reads);
            cell.attach_observer(move |_| reads.lock().push(reader.get()));
        }
        cell.set(IndexState::Indexing);
        // observers run before the new state is published
        assert_eq!(*reads.lock(), vec![IndexState::NotReady]);
    }

    #[test]
    fn wait_times_out_without_transition() {
        let cell = StateCell::default();
        let start = Instant::now();
        assert_eq!(cell.wait_for_change(Duration::from_millis(30)), StateChange::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wait_returns_new_state() {
        let cell = Arc::new(StateCell::default());
        let waiter = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || cell.wait_for_change(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(50));
        cell.set(IndexState::Indexing);
        assert_eq!(
            waiter.join().expect("join"),
            StateChange::Changed(IndexState::Indexing)
        );
    }

    #[test]
    fn wait_from_returns_immediately_when_already_different() {
        let cell = StateCell::new(IndexState::Ready);
        assert_eq!(
            cell.wait_for_change_from(IndexState::Indexing, Duration::from_secs(5)),
            StateChange::Changed(IndexState::Ready)
        );
    }

    #[test]
    fn observer_runs_before_waiter_wakes() {
        let cell = Arc::new(StateCell::default());
        let observed = Arc::new(Mutex::new(None));
        {
            let observed = Arc::clone(&observed);
            cell.attach_observer(move |state| *observed.lock() = Some(state));
        }
        let waiter = {
            let cell = Arc::clone(&cell);
            let observed = Arc::clone(&observed);
            thread::spawn(move || {
                let change = cell.wait_for_change(Duration::from_secs(5));
                (change, *observed.lock())
            })
        };
        thread::sleep(Duration::from_millis(50));
        cell.set(IndexState::Ready);
        let (change, observed) = waiter.join().expect("join");
        assert_eq!(change, StateChange::Changed(IndexState::Ready));
        assert_eq!(observed, Some(IndexState::Ready));
    }
}
