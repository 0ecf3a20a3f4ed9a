//! Worker pool draining a bounded MPMC job queue.
//!
//! A fixed set of worker threads is spawned at construction and runs until
//! shutdown. Submitted closures are executed at most once, in queue order;
//! shutdown delivers one poison pill per worker so that every job admitted
//! before shutdown still runs and every worker exits.
//!
//! ## Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use ringpool::ThreadPool;
//!
//! let mut pool = ThreadPool::new(2, 16);
//! let counter = Arc::new(AtomicUsize::new(0));
//!
//! let c = counter.clone();
//! pool.submit(move || {
//!     c.fetch_add(1, Ordering::Relaxed);
//! })
//! .unwrap();
//!
//! pool.wait();
//! assert_eq!(counter.load(Ordering::Relaxed), 1);
//! pool.shutdown(true);
//! ```

use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::loom_exports::sync::atomic::{AtomicBool, AtomicUsize};
use crate::queue::{Backoff, MpmcQueue};
use crate::SubmitError;

/// A submitted unit of work.
type Job = Box<dyn FnOnce() + Send + 'static>;

/// Queue element seen by the workers.
///
/// `Stop` is the poison pill: a worker that dequeues one exits its loop.
/// Pills are only ever enqueued by [`ThreadPool::shutdown`], exactly one per
/// worker, behind any still-queued jobs.
enum Message {
    Run(Job),
    Stop,
}

/// State shared between the pool handle and its workers.
struct Shared {
    queue: MpmcQueue<Message>,

    /// Acceptance gate: cleared on shutdown entry, after which submissions
    /// are rejected.
    accepting: AtomicBool,

    /// Cleared once all poison pills are enqueued; only consulted by a
    /// worker whose dequeue failed transiently.
    running: AtomicBool,

    /// Jobs admitted to the queue and not yet retired. Incremented after a
    /// successful enqueue, decremented by the worker after the job ran.
    queued: AtomicUsize,

    /// Workers currently inside a user callable.
    busy: AtomicUsize,
}

/// A fixed-size worker pool over a bounded lock-free job queue.
///
/// All submission operations and [`wait`](ThreadPool::wait) may be called
/// concurrently from any number of threads. Jobs must not panic: a panic
/// unwinds the worker thread it runs on and the pool's accounting stops
/// retiring, so a subsequent `wait` or draining shutdown will not return.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    num_threads: usize,
}

impl ThreadPool {
    /// Creates a pool with `num_threads` workers and a job queue holding at
    /// least `capacity` jobs (rounded up to a power of two, minimum 2).
    ///
    /// Workers are running as soon as this returns.
    ///
    /// # Panics
    ///
    /// Panics if `num_threads` is zero or a worker thread cannot be
    /// spawned.
    pub fn new(num_threads: usize, capacity: usize) -> Self {
        assert!(num_threads >= 1, "a pool needs at least one worker thread");

        let shared = Arc::new(Shared {
            queue: MpmcQueue::new(capacity),
            accepting: AtomicBool::new(true),
            running: AtomicBool::new(true),
            queued: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
        });

        let workers = (0..num_threads)
            .map(|id| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("ringpool-worker-{id}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        ThreadPool {
            shared,
            workers,
            num_threads,
        }
    }

    /// Returns the number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Submits a job without blocking.
    ///
    /// # Errors
    ///
    /// Fails with [`SubmitError::Rejected`] once shutdown has begun and
    /// with [`SubmitError::Full`] when the job queue is at capacity; in
    /// both cases the job is dropped without running.
    pub fn submit<F>(&self, job: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.shared.accepting.load(Acquire) {
            return Err(SubmitError::Rejected);
        }

        match self.shared.queue.push(Message::Run(Box::new(job))) {
            Ok(()) => {
                // A worker may retire the job before this lands, making the
                // counter transiently wrap; `wait` keeps spinning until the
                // increment rebalances it.
                self.shared.queued.fetch_add(1, Relaxed);
                Ok(())
            }
            Err(_) => Err(SubmitError::Full),
        }
    }

    /// Submits a job, spinning while the queue is full.
    ///
    /// # Errors
    ///
    /// Fails only with [`SubmitError::Rejected`], once shutdown has begun.
    pub fn submit_blocking<F>(&self, job: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.shared.accepting.load(Acquire) {
            return Err(SubmitError::Rejected);
        }

        self.shared.queue.push_blocking(Message::Run(Box::new(job)));
        self.shared.queued.fetch_add(1, Relaxed);
        Ok(())
    }

    /// Waits until no job is queued and no worker is inside a callable.
    ///
    /// Intended for a controlling thread that has stopped submitting; jobs
    /// submitted concurrently with the wait may or may not be covered by
    /// it.
    pub fn wait(&self) {
        let mut backoff = Backoff::new();
        while self.shared.queued.load(Acquire) != 0 || self.shared.busy.load(Acquire) != 0 {
            backoff.snooze();
        }
    }

    /// Shuts the pool down and joins all workers.
    ///
    /// Closes the acceptance gate, optionally waits for already-admitted
    /// jobs to finish, then delivers one poison pill per worker. Jobs still
    /// queued at this point run before their worker reaches a pill, so no
    /// admitted job is ever lost. Subsequent submissions are rejected;
    /// calling `shutdown` again is a no-op.
    pub fn shutdown(&mut self, wait_for_jobs: bool) {
        if self.workers.is_empty() {
            return;
        }

        self.shared.accepting.store(false, Release);

        if wait_for_jobs {
            self.wait();
        }

        // Blocking pushes: a momentarily full queue is drained by the
        // workers until every pill lands.
        for _ in 0..self.workers.len() {
            self.shared.queue.push_blocking(Message::Stop);
        }

        self.shared.running.store(false, Release);

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("num_threads", &self.num_threads)
            .field("queued", &self.shared.queued.load(Relaxed))
            .field("busy", &self.shared.busy.load(Relaxed))
            .finish_non_exhaustive()
    }
}

/// Worker body: drain the queue until a poison pill arrives.
fn worker_loop(shared: &Shared) {
    loop {
        let message = match shared.queue.pop() {
            Ok(message) => message,
            Err(_) => {
                // Transient wakeup without a job; exit only if shutdown has
                // already delivered the pills.
                if !shared.running.load(Acquire) {
                    break;
                }
                continue;
            }
        };

        match message {
            Message::Run(job) => {
                shared.busy.fetch_add(1, AcqRel);
                job();
                shared.queued.fetch_sub(1, Release);
                shared.busy.fetch_sub(1, Release);
            }
            Message::Stop => break,
        }
    }
}
