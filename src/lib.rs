//! # Ringpool — a bounded lock-free MPMC job queue and worker pool
//!
//! The heart of this crate is [`MpmcQueue`], a fixed-capacity
//! multi-producer/multi-consumer ring buffer in which every slot carries a
//! monotonically advancing sequence number (Vyukov's algorithm). Producers
//! and consumers reserve positions with a single compare-and-swap and never
//! take a lock on the fast path; a counting semaphore lets consumers block
//! while the queue is empty instead of spinning.
//!
//! [`ThreadPool`] rides on top of the queue: a fixed set of worker threads
//! drains it and runs submitted closures, with a shutdown protocol that
//! delivers one poison pill per worker so that no admitted job is lost and
//! no worker is left hanging.
//!
//! ## Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use ringpool::ThreadPool;
//!
//! let mut pool = ThreadPool::new(4, 256);
//! let counter = Arc::new(AtomicUsize::new(0));
//!
//! for _ in 0..16 {
//!     let counter = counter.clone();
//!     pool.submit(move || {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     })
//!     .unwrap();
//! }
//!
//! // Wait until every submitted job has run to completion.
//! pool.wait();
//! assert_eq!(counter.load(Ordering::Relaxed), 16);
//!
//! // Finish remaining work (there is none here) and join the workers.
//! pool.shutdown(true);
//! ```

#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]

use std::fmt;

mod loom_exports;
pub mod pool;
pub mod queue;
mod sem;

pub use pool::ThreadPool;
pub use queue::MpmcQueue;

/// Error returned when a blocking dequeue fails transiently.
///
/// The only source of this error is the queue's internal semaphore being
/// poisoned by a thread that panicked while blocked on it. The queue itself
/// is left intact and the call may simply be retried; an empty queue is
/// never reported as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopError;

impl fmt::Display for PopError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "wait for a queued item failed: semaphore poisoned")
    }
}

/// Error returned when a job cannot be submitted to a [`ThreadPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The pool has entered shutdown and no longer admits jobs.
    Rejected,
    /// The job queue is at capacity.
    Full,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SubmitError::Rejected => write!(f, "pool is shutting down and rejects new jobs"),
            SubmitError::Full => write!(f, "job queue is full"),
        }
    }
}
