//! # Ordered Work Queue
//!
//! A bounded-parallel executor that runs submitted closures on a shared
//! `rayon` pool but yields their results strictly in submission order,
//! regardless of completion order. This is the primitive three stages of
//! the pipeline are built on: PBZX chunk decode, CPIO's consumption of that
//! chunk stream, and per-block LZFSE encoding.
//!
//! ## Contract
//!
//! - `submit` never loses a task and never starts more than `batch_size`
//!   closures concurrently.
//! - `recv` returns results in the order they were submitted, not the order
//!   they complete.
//! - When the result buffer already holds `batch_size` completed-but-unread
//!   entries, `submit` blocks the caller until `recv` drains one. This is
//!   the queue's only form of backpressure; there is no unbounded growth.
//!
//! See also [`crate::work_pool`] for the sibling *unordered* primitive used
//! by the extraction scheduler, which shares the same admission semantics
//! but drops the resequencing buffer.

use std::collections::BinaryHeap;
use std::cmp::Reverse;
use std::sync::{Arc, Condvar, Mutex};

struct Slots<T> {
    next_submit: usize,
    next_emit: usize,
    finished_at: Option<usize>,
    buffer: BinaryHeap<Reverse<(usize, Seq<T>)>>,
}

/// Wrapper so `T` doesn't need to implement `Ord` for the heap to compare by index.
struct Seq<T>(T);
impl<T> PartialEq for Seq<T> {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}
impl<T> Eq for Seq<T> {}
impl<T> PartialOrd for Seq<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Seq<T> {
    fn cmp(&self, _other: &Self) -> std::cmp::Ordering {
        std::cmp::Ordering::Equal
    }
}

struct Shared<T> {
    slots: Mutex<Slots<T>>,
    not_full: Condvar,
    ready: Condvar,
}

/// Bounded-parallel, order-preserving task queue.
///
/// `T` is the result type produced by submitted closures. Construct with
/// [`OrderedQueue::new`], feed it closures with [`OrderedQueue::submit`],
/// and drain results with [`OrderedQueue::recv`] (or by using it as an
/// [`Iterator`]-like pull loop; see [`OrderedQueueIter`]).
pub struct OrderedQueue<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    pool: Arc<rayon::ThreadPool>,
    batch_size: usize,
}

/// Cheap: clones share the same backing queue and pool, they're just
/// another handle onto it. Used to hand a producer its own submit-side
/// handle while the original is turned into a consuming iterator.
impl<T: Send + 'static> Clone for OrderedQueue<T> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone(), pool: self.pool.clone(), batch_size: self.batch_size }
    }
}

impl<T: Send + 'static> OrderedQueue<T> {
    /// Create a queue with the given pool and `batch_size` (max concurrent
    /// in-flight closures / result-buffer depth).
    pub fn with_pool(pool: Arc<rayon::ThreadPool>, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        Self {
            shared: Arc::new(Shared {
                slots: Mutex::new(Slots {
                    next_submit: 0,
                    next_emit: 0,
                    finished_at: None,
                    buffer: BinaryHeap::new(),
                }),
                not_full: Condvar::new(),
                ready: Condvar::new(),
            }),
            pool,
            batch_size,
        }
    }

    /// Create a queue backed by a fresh pool sized to `batch_size` threads.
    pub fn new(batch_size: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(batch_size)
            .build()
            .expect("failed to build ordered-queue thread pool");
        Self::with_pool(Arc::new(pool), batch_size)
    }

    /// Submit a closure for execution. Blocks the caller if the result
    /// buffer already holds `batch_size` unread completions.
    pub fn submit<F>(&self, f: F)
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let seq = {
            let mut slots = self.shared.slots.lock().unwrap();
            while slots.next_submit - slots.next_emit >= self.batch_size {
                slots = self.shared.not_full.wait(slots).unwrap();
            }
            let seq = slots.next_submit;
            slots.next_submit += 1;
            seq
        };

        let shared = self.shared.clone();
        self.pool.spawn(move || {
            let result = f();
            let mut slots = shared.slots.lock().unwrap();
            slots.buffer.push(Reverse((seq, Seq(result))));
            shared.ready.notify_all();
        });
    }

    /// Mark that no further tasks will be submitted, once `submit` has been
    /// called for every task. `recv` returns `None` once every submitted
    /// task up to this point has been emitted.
    pub fn finish(&self) {
        let mut slots = self.shared.slots.lock().unwrap();
        slots.finished_at = Some(slots.next_submit);
        self.shared.ready.notify_all();
    }

    /// Block until the next in-order result is ready, or return `None` once
    /// `finish` has been called and every submitted result has been emitted.
    pub fn recv(&self) -> Option<T> {
        let mut slots = self.shared.slots.lock().unwrap();
        loop {
            if let Some(Reverse((idx, _))) = slots.buffer.peek() {
                if *idx == slots.next_emit {
                    let Reverse((_, Seq(value))) = slots.buffer.pop().unwrap();
                    slots.next_emit += 1;
                    self.shared.not_full.notify_all();
                    return Some(value);
                }
            }
            if let Some(end) = slots.finished_at {
                if slots.next_emit >= end {
                    return None;
                }
            }
            slots = self.shared.ready.wait(slots).unwrap();
        }
    }

    /// Turn this queue into a blocking iterator over its in-order results.
    /// Call `finish()` (or drop all producers) before or during iteration;
    /// `into_iter` alone does not close the queue.
    pub fn into_iter(self) -> OrderedQueueIter<T> {
        OrderedQueueIter { queue: self }
    }
}

/// Blocking iterator adapter over an [`OrderedQueue`]'s results.
pub struct OrderedQueueIter<T: Send + 'static> {
    queue: OrderedQueue<T>,
}

impl<T: Send + 'static> Iterator for OrderedQueueIter<T> {
    type Item = T;
    fn next(&mut self) -> Option<T> {
        self.queue.recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn preserves_submission_order_despite_inverted_completion() {
        let q: OrderedQueue<usize> = OrderedQueue::new(4);
        // Task 0 sleeps longest, task 3 finishes first: completion order is reversed.
        for i in 0..4usize {
            q.submit(move || {
                std::thread::sleep(Duration::from_millis((4 - i as u64) * 15));
                i
            });
        }
        q.finish();
        let results: Vec<usize> = q.into_iter().collect();
        assert_eq!(results, vec![0, 1, 2, 3]);
    }

    #[test]
    fn never_exceeds_batch_size_concurrent_tasks() {
        let batch_size = 3;
        let q: OrderedQueue<()> = OrderedQueue::new(batch_size);
        let inflight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let inflight = inflight.clone();
            let max_seen = max_seen.clone();
            q.submit(move || {
                let cur = inflight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(cur, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(5));
                inflight.fetch_sub(1, Ordering::SeqCst);
            });
        }
        q.finish();
        let _: Vec<()> = q.into_iter().collect();
        assert!(max_seen.load(Ordering::SeqCst) <= batch_size);
    }

    #[test]
    fn empty_queue_yields_nothing() {
        let q: OrderedQueue<u8> = OrderedQueue::new(2);
        q.finish();
        assert_eq!(q.recv(), None);
    }
}
