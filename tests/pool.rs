use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use ringpool::{SubmitError, ThreadPool};

/// Parks the pool's single worker on a channel so that subsequent
/// submissions land in the queue deterministically. Returns the sender that
/// releases the worker.
fn park_worker(pool: &ThreadPool) -> mpsc::Sender<()> {
    let (release, gate) = mpsc::channel::<()>();
    let started = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&started);
    pool.submit(move || {
        flag.store(true, Ordering::Release);
        let _ = gate.recv();
    })
    .unwrap();

    while !started.load(Ordering::Acquire) {
        thread::yield_now();
    }

    release
}

#[test]
fn pool_create_and_shutdown() {
    let mut pool = ThreadPool::new(4, 16);
    assert_eq!(pool.num_threads(), 4);
    pool.shutdown(false);
}

#[test]
fn pool_single_job() {
    let mut pool = ThreadPool::new(2, 16);
    let counter = Arc::new(AtomicUsize::new(0));

    let c = Arc::clone(&counter);
    pool.submit(move || {
        c.fetch_add(1, Ordering::Relaxed);
    })
    .unwrap();

    pool.wait();
    assert_eq!(counter.load(Ordering::Relaxed), 1);
    pool.shutdown(true);
}

#[test]
fn pool_many_jobs() {
    const JOBS: usize = if cfg!(miri) { 20 } else { 100 };

    let mut pool = ThreadPool::new(4, 32);
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..JOBS {
        // The queue may momentarily fill while the workers catch up.
        loop {
            let c = Arc::clone(&counter);
            match pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            }) {
                Ok(()) => break,
                Err(SubmitError::Full) => thread::yield_now(),
                Err(error) => panic!("unexpected submit failure: {}", error),
            }
        }
    }

    pool.wait();
    assert_eq!(counter.load(Ordering::Relaxed), JOBS);
    pool.shutdown(true);
}

#[test]
fn pool_full_queue_rejects_nonblocking_submit() {
    let mut pool = ThreadPool::new(1, 4);
    let counter = Arc::new(AtomicUsize::new(0));

    let release = park_worker(&pool);

    // The worker is parked, so exactly `capacity` submissions fit.
    for _ in 0..4 {
        let c = Arc::clone(&counter);
        pool.submit(move || {
            c.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
    }

    let c = Arc::clone(&counter);
    assert_eq!(
        pool.submit(move || {
            c.fetch_add(1, Ordering::Relaxed);
        }),
        Err(SubmitError::Full)
    );

    release.send(()).unwrap();
    pool.wait();
    assert_eq!(counter.load(Ordering::Relaxed), 4);
    pool.shutdown(true);
}

#[test]
fn pool_blocking_submit_past_capacity() {
    let mut pool = ThreadPool::new(1, 2);
    let counter = Arc::new(AtomicUsize::new(0));

    let release = park_worker(&pool);

    for _ in 0..2 {
        let c = Arc::clone(&counter);
        pool.submit(move || {
            c.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
    }

    thread::scope(|scope| {
        let submitter = scope.spawn(|| {
            let c = Arc::clone(&counter);
            pool.submit_blocking(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        });

        // Give the submitter a moment to actually hit the full queue.
        thread::sleep(Duration::from_millis(20));
        release.send(()).unwrap();
        submitter.join().unwrap();
    });

    pool.wait();
    assert_eq!(counter.load(Ordering::Relaxed), 3);
    pool.shutdown(true);
}

#[test]
fn pool_rejects_submissions_after_shutdown() {
    let mut pool = ThreadPool::new(2, 8);
    pool.shutdown(true);

    assert_eq!(pool.submit(|| {}), Err(SubmitError::Rejected));
    assert_eq!(pool.submit_blocking(|| {}), Err(SubmitError::Rejected));
}

#[test]
fn pool_concurrent_producers() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = if cfg!(miri) { 25 } else { 100 };

    let mut pool = ThreadPool::new(4, 64);
    let counter = Arc::new(AtomicUsize::new(0));

    thread::scope(|scope| {
        for _ in 0..PRODUCERS {
            let pool = &pool;
            let counter = Arc::clone(&counter);

            scope.spawn(move || {
                for _ in 0..PER_PRODUCER {
                    loop {
                        let c = Arc::clone(&counter);
                        match pool.submit(move || {
                            c.fetch_add(1, Ordering::Relaxed);
                        }) {
                            Ok(()) => break,
                            Err(SubmitError::Full) => thread::yield_now(),
                            Err(error) => panic!("unexpected submit failure: {}", error),
                        }
                    }
                }
            });
        }
    });

    pool.wait();
    assert_eq!(counter.load(Ordering::Relaxed), PRODUCERS * PER_PRODUCER);
    pool.shutdown(true);
}

#[test]
fn pool_wait_then_resubmit() {
    let mut pool = ThreadPool::new(2, 16);
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
        let c = Arc::clone(&counter);
        pool.submit(move || {
            c.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
    }
    pool.wait();
    assert_eq!(counter.load(Ordering::Relaxed), 5);

    for _ in 0..5 {
        let c = Arc::clone(&counter);
        pool.submit(move || {
            c.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
    }
    pool.wait();
    assert_eq!(counter.load(Ordering::Relaxed), 10);

    pool.shutdown(true);
}

#[test]
fn pool_shutdown_without_wait() {
    let mut pool = ThreadPool::new(2, 16);
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let c = Arc::clone(&counter);
        pool.submit(move || {
            c.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
    }

    // Workers drain whatever is still queued before reaching a pill, so
    // nothing crashes and nothing runs twice.
    pool.shutdown(false);
    assert!(counter.load(Ordering::Relaxed) <= 10);
}

#[test]
fn pool_drop_joins_and_drains() {
    let counter = Arc::new(AtomicUsize::new(0));

    {
        let pool = ThreadPool::new(2, 32);
        for _ in 0..20 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }
    }

    // Drop waits for quiescence before delivering the pills.
    assert_eq!(counter.load(Ordering::Relaxed), 20);
}
