//! Counting semaphore with an atomic fast path.
//!
//! Uncontended `post` and `wait` are a single read-modify-write on the
//! counter; blocking is delegated to a mutex/condvar pair that hands out
//! explicit wakeup tokens so that no `post` is ever lost, no matter how the
//! posting and waiting sides interleave.

use core::sync::atomic::Ordering::{Acquire, Release};

use crate::loom_exports::sync::atomic::AtomicIsize;
use crate::loom_exports::sync::{Condvar, Mutex};

/// Error returned by [`Semaphore::wait`] when the slow-path mutex was
/// poisoned by a panicking waiter.
#[derive(Debug)]
pub(crate) struct WaitError;

/// A counting semaphore.
///
/// `count` is the number of available permits; a negative value is the
/// number of waiters currently blocked (or about to block) on the slow
/// path. `tokens` counts wakeups that have been posted but not yet claimed
/// by a waiter.
pub(crate) struct Semaphore {
    count: AtomicIsize,
    tokens: Mutex<usize>,
    cvar: Condvar,
}

impl Semaphore {
    pub(crate) fn new(permits: usize) -> Self {
        Semaphore {
            count: AtomicIsize::new(permits as isize),
            tokens: Mutex::new(0),
            cvar: Condvar::new(),
        }
    }

    /// Adds one permit, waking one blocked waiter if there is any.
    ///
    /// Never blocks beyond the internal mutex, which is only ever held for
    /// a token increment.
    pub(crate) fn post(&self) {
        if self.count.fetch_add(1, Release) < 0 {
            // A waiter is on the slow path: hand over a wakeup token. The
            // token must be deposited even if the mutex was poisoned,
            // otherwise that waiter would sleep forever.
            let mut tokens = match self.tokens.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *tokens += 1;
            self.cvar.notify_one();
        }
    }

    /// Takes one permit, blocking while none is available.
    ///
    /// # Errors
    ///
    /// Fails only if the slow-path mutex was poisoned; the counter has
    /// already been decremented at that point and a matching `post` will
    /// still deposit its token, so the semaphore state stays consistent.
    pub(crate) fn wait(&self) -> Result<(), WaitError> {
        if self.count.fetch_sub(1, Acquire) > 0 {
            return Ok(());
        }

        let mut tokens = self.tokens.lock().map_err(|_| WaitError)?;
        while *tokens == 0 {
            tokens = self.cvar.wait(tokens).map_err(|_| WaitError)?;
        }
        *tokens -= 1;
        Ok(())
    }
}
