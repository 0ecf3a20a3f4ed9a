use std::thread;

use criterion::{criterion_group, criterion_main, Criterion};

use ringpool::{MpmcQueue, ThreadPool};

// Single-threaded enqueue/dequeue throughput.
//
// `N` items are pushed and then popped from the queue.
fn push_pop<const N: usize>(name: &str, capacity: usize, c: &mut Criterion) {
    let queue = MpmcQueue::new(capacity);
    c.bench_function(&format!("push_pop-{}", name), |b| {
        b.iter(|| {
            for i in 0..N {
                let _ = queue.push(i);
            }
            for _ in 0..N {
                let _ = queue.pop();
            }
        })
    });
}

fn push_pop_small_batch(c: &mut Criterion) {
    push_pop::<64>("small_batch", 256, c);
}

fn push_pop_large_batch(c: &mut Criterion) {
    push_pop::<1024>("large_batch", 1024, c);
}

// Submission-to-quiescence latency of a burst of trivial jobs across all
// cores.
fn pool_submit_wait_burst(c: &mut Criterion) {
    let pool = ThreadPool::new(num_cpus::get(), 1024);
    c.bench_function("pool-submit_wait-256", |b| {
        b.iter(|| {
            for _ in 0..256 {
                while pool.submit(|| {}).is_err() {
                    thread::yield_now();
                }
            }
            pool.wait();
        })
    });
}

criterion_group!(
    benches,
    push_pop_small_batch,
    push_pop_large_batch,
    pool_submit_wait_burst
);
criterion_main!(benches);
