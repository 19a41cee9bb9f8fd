//! Bounded retry for files another process holds locked.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::RetryPolicy;

// ERROR_SHARING_VIOLATION and ERROR_LOCK_VIOLATION
const SHARING_VIOLATION: i32 = 32;
const LOCK_VIOLATION: i32 = 33;

/// Returns true if `err` means the file is temporarily locked elsewhere.
#[must_use]
pub fn is_lock_conflict(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::ResourceBusy => true,
        _ => cfg!(windows)
            && matches!(err.raw_os_error(), Some(SHARING_VIOLATION | LOCK_VIOLATION)),
    }
}

/// Longest uninterrupted sleep while backing off.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

/// Runs `op` until it succeeds, fails for another reason, or the policy runs out.
///
/// Returns `Ok(None)` when every attempt hit a lock conflict, or as soon as
/// `interrupted` reports true between attempts. Any other error is
/// returned immediately.
pub fn retry_on_lock_conflict<T, F, I>(
    policy: &RetryPolicy,
    interrupted: I,
    mut op: F,
) -> io::Result<Option<T>>
where
    F: FnMut() -> io::Result<T>,
    I: Fn() -> bool,
{
    for attempt in 1..=policy.attempts {
        match op() {
            Ok(value) => return Ok(Some(value)),
            Err(e) if is_lock_conflict(&e) => {
                debug!(attempt, error = %e, "file locked, backing off");
                if attempt < policy.attempts && pause_unless(policy.backoff(), &interrupted) {
                    debug!(attempt, "lock retry abandoned");
                    return Ok(None);
                }
            }
            Err(e) => return Err(e),
        }
    }
    warn!(attempts = policy.attempts, "file still locked, deferring");
    Ok(None)
}

/// Sleeps for `pause`; returns true early once `interrupted` holds.
fn pause_unless<I: Fn() -> bool>(pause: Duration, interrupted: &I) -> bool {
    let deadline = Instant::now() + pause;
    loop {
        if interrupted() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep((deadline - now).min(INTERRUPT_POLL));
    }
}
