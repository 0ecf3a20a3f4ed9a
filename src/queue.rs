//! Bounded, lock-free MPMC queue.
//!
//! Any number of producers and consumers may operate on the queue
//! concurrently. Enqueueing and the slot-acquisition half of dequeueing are
//! lock-free; a consumer that finds the queue empty blocks on a counting
//! semaphore instead of spinning.
//!
//! ## Example
//!
//! ```
//! use ringpool::MpmcQueue;
//!
//! let queue = MpmcQueue::new(4);
//! queue.push("a").unwrap();
//! queue.push("b").unwrap();
//!
//! assert_eq!(queue.pop(), Ok("a"));
//! assert_eq!(queue.pop(), Ok("b"));
//! ```

use core::mem::MaybeUninit;
use core::panic::{RefUnwindSafe, UnwindSafe};
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::fmt;

use cache_padded::CachePadded;

use crate::loom_exports::cell::UnsafeCell;
use crate::loom_exports::sync::atomic::AtomicUsize;
use crate::loom_exports::{debug_or_loom_assert, relax};
use crate::sem::Semaphore;
use crate::PopError;

/// Number of exponential spin rounds before a contended loop starts yielding
/// to the scheduler.
const SPIN_LIMIT: u32 = 6;

/// Exponential backoff for loops that may spin for more than a few
/// iterations.
pub(crate) struct Backoff {
    step: u32,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Backoff { step: 0 }
    }

    /// Spins with exponentially increasing strength, switching to scheduler
    /// yields once the spin budget is exhausted.
    pub(crate) fn snooze(&mut self) {
        if self.step <= SPIN_LIMIT {
            for _ in 0..1u32 << self.step {
                relax::spin_loop();
            }
            self.step += 1;
        } else {
            relax::yield_now();
        }
    }
}

/// A single queue cell.
///
/// `seq` is the only synchronization variable of the slot: relative to a
/// position `p` mapping to this slot, `seq == p` means writable this round,
/// `seq == p + 1` means readable this round, and `seq == p + capacity` means
/// writable next round. The payload is published by the release store on
/// `seq` and consumed under the matching acquire load.
struct Slot<T> {
    seq: AtomicUsize,
    item: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded MPMC queue with per-slot sequence numbers.
///
/// The queue tracks enqueue and dequeue positions with wrap-around `usize`
/// counters whose least significant bits select the buffer index. Both
/// counters only ever move forward; correctness depends only on the
/// difference between a slot's sequence number and the position that mapped
/// to it, so counter wrap-around is a benign, expected event.
pub struct MpmcQueue<T> {
    /// Position of the next enqueue.
    enqueue_pos: CachePadded<AtomicUsize>,

    /// Position of the next dequeue.
    dequeue_pos: CachePadded<AtomicUsize>,

    /// Slot buffer (capacity entries).
    buffer: Box<[Slot<T>]>,

    /// Mask for the buffer index.
    mask: usize,

    /// Counts items enqueued but not yet dequeued.
    available: Semaphore,
}

impl<T> MpmcQueue<T> {
    /// Creates a queue with at least the requested capacity.
    ///
    /// **The capacity of a queue is always a power of two.** It is set to
    /// the smallest power of two greater than or equal to
    /// `max(min_capacity, 2)`.
    ///
    /// # Panics
    ///
    /// This method will panic if the requested capacity is greater than
    /// 2<sup>`usize::BITS` − 2</sup>.
    pub fn new(min_capacity: usize) -> Self {
        // Sequence/position differences are interpreted as signed; keeping
        // the capacity well below `isize::MAX` keeps them unambiguous.
        const MAX_CAPACITY: usize = 1 << (usize::BITS - 2);

        assert!(
            min_capacity <= MAX_CAPACITY,
            "the capacity of the queue cannot exceed {}",
            MAX_CAPACITY
        );

        let capacity = min_capacity.max(2).next_power_of_two();

        let buffer: Box<[Slot<T>]> = (0..capacity)
            .map(|i| Slot {
                seq: AtomicUsize::new(i),
                item: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        MpmcQueue {
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
            buffer,
            mask: capacity - 1,
            available: Semaphore::new(0),
        }
    }

    /// Returns the capacity of the queue.
    pub fn capacity(&self) -> usize {
        self.mask.wrapping_add(1)
    }

    /// Attempts to push one item at the tail of the queue.
    ///
    /// # Errors
    ///
    /// This will fail if the queue is full, in which case the item is
    /// returned as the error field.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Relaxed);

        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.seq.load(Acquire);
            let diff = seq.wrapping_sub(pos) as isize;

            if diff == 0 {
                // The slot is writable this round: try to claim the
                // position. Relaxed is enough since publication goes
                // through the release store on `seq` below.
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Relaxed,
                    Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: the successful claim of `pos` makes this
                        // thread the only writer of the slot this round, and
                        // the slot holds no live item.
                        unsafe { self.write_at(pos, item) };
                        slot.seq.store(pos.wrapping_add(1), Release);
                        self.available.post();
                        return Ok(());
                    }
                    // We lost the race to another producer or the CAS
                    // failed spuriously; try again at the observed position.
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // The slot still holds the item enqueued one full lap ago:
                // the queue is full. Any other stale observation is
                // transient and handled by the rereads below.
                return Err(item);
            } else {
                // Another producer already claimed this position.
                relax::spin_loop();
                pos = self.enqueue_pos.load(Relaxed);
            }
        }
    }

    /// Pushes one item at the tail of the queue, spinning while it is full.
    ///
    /// Backs off with a CPU relaxation hint first and degrades to scheduler
    /// yields under sustained contention. Unlike [`push`](MpmcQueue::push),
    /// this never fails.
    pub fn push_blocking(&self, mut item: T) {
        let mut backoff = Backoff::new();
        loop {
            match self.push(item) {
                Ok(()) => return,
                Err(rejected) => item = rejected,
            }
            backoff.snooze();
        }
    }

    /// Pops the item at the head of the queue, blocking while it is empty.
    ///
    /// An empty queue is never reported as an error: the semaphore admits a
    /// consumer only once a matching push has been published.
    ///
    /// # Errors
    ///
    /// Fails only on a transient semaphore failure (see [`PopError`]); the
    /// call may be retried.
    pub fn pop(&self) -> Result<T, PopError> {
        if self.available.wait().is_err() {
            return Err(PopError);
        }

        let mut pos = self.dequeue_pos.load(Relaxed);

        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.seq.load(Acquire);
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as isize;

            if diff == 0 {
                // The slot is readable this round: try to claim the
                // position.
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Relaxed,
                    Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: the successful claim of `pos` makes this
                        // thread the only reader of the slot this round, and
                        // the acquire load on `seq` paired with the
                        // producer's release store makes the item visible.
                        let item = unsafe { self.read_at(pos) };
                        slot.seq.store(pos.wrapping_add(self.capacity()), Release);
                        return Ok(item);
                    }
                    // We lost the race to another consumer or the CAS
                    // failed spuriously; try again at the observed position.
                    Err(current) => pos = current,
                }
            } else {
                // Either a concurrent consumer just claimed this position,
                // or the winning producer has claimed the slot but not yet
                // published it.
                relax::spin_loop();
                pos = self.dequeue_pos.load(Relaxed);
            }
        }
    }

    /// Writes an item at the given position.
    ///
    /// The position is automatically mapped to a valid buffer index.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that the slot at this position holds no
    /// live item and cannot be read or written to concurrently.
    #[inline]
    unsafe fn write_at(&self, position: usize, item: T) {
        let index = position & self.mask;
        self.buffer[index]
            .item
            .with_mut(|slot| slot.write(MaybeUninit::new(item)));
    }

    /// Reads the item at the given position.
    ///
    /// The position is automatically mapped to a valid buffer index.
    ///
    /// # Safety
    ///
    /// The item at the given position must have been initialized before and
    /// cannot have been moved out. The caller must guarantee that the item
    /// at this position cannot be written to or moved out concurrently.
    #[inline]
    unsafe fn read_at(&self, position: usize) -> T {
        let index = position & self.mask;
        self.buffer[index].item.with(|slot| slot.read().assume_init())
    }
}

impl<T> Drop for MpmcQueue<T> {
    fn drop(&mut self) {
        let head = self.dequeue_pos.load(Relaxed);
        let tail = self.enqueue_pos.load(Relaxed);

        let count = tail.wrapping_sub(head);
        debug_or_loom_assert!(count <= self.capacity());

        for offset in 0..count {
            drop(unsafe { self.read_at(head.wrapping_add(offset)) })
        }
    }
}

impl<T> fmt::Debug for MpmcQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MpmcQueue")
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

impl<T> UnwindSafe for MpmcQueue<T> {}
impl<T> RefUnwindSafe for MpmcQueue<T> {}
unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}
