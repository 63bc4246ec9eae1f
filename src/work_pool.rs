//! # Unordered Work Pool + Task Handles
//!
//! The sibling primitive to [`crate::ordered_queue::OrderedQueue`]: bounded
//! parallelism with the same blocking-producer backpressure, but no
//! resequencing — results are `()`, discarded, and consumed only by
//! `drain`. Used by the extraction scheduler to dispatch per-file
//! materialization jobs, where ordering is instead expressed explicitly via
//! [`Flag`] handles threaded through each job.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// A one-shot, multi-waiter completion signal.
///
/// Stands in for the spec's "abstract future/promise": cheap to clone
/// (`Arc`-backed), cheap to wait on from any thread, and broadcasts to every
/// waiter once `signal` is called. Used as the "task handle" the extraction
/// scheduler records in `DirTask` and `LinkOrigin` so later files can block
/// on a parent directory or hardlink origin before materializing themselves.
#[derive(Clone)]
pub struct Flag {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Flag {
    pub fn new() -> Self {
        Self { inner: Arc::new((Mutex::new(false), Condvar::new())) }
    }

    /// Mark this handle complete and wake every waiter. Idempotent.
    pub fn signal(&self) {
        let (lock, cvar) = &*self.inner;
        let mut done = lock.lock().unwrap();
        *done = true;
        cvar.notify_all();
    }

    /// Block until `signal` has been called (no-op if already signaled).
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut done = lock.lock().unwrap();
        while !*done {
            done = cvar.wait(done).unwrap();
        }
    }
}

impl Default for Flag {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded-parallel pool for fire-and-forget jobs, with an admission limit
/// (`batch_size`) enforced the same way as `OrderedQueue`: `spawn` blocks
/// while `batch_size` jobs are already in flight.
pub struct WorkPool {
    pool: rayon::ThreadPool,
    batch_size: usize,
    inflight: Arc<(Mutex<usize>, Condvar)>,
    completed: Arc<AtomicUsize>,
}

impl WorkPool {
    pub fn new(batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(batch_size)
            .build()
            .expect("failed to build work-pool thread pool");
        Self {
            pool,
            batch_size,
            inflight: Arc::new((Mutex::new(0), Condvar::new())),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Submit a job. Blocks while `batch_size` jobs are already running.
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let (lock, cvar) = &*self.inflight;
            let mut count = lock.lock().unwrap();
            while *count >= self.batch_size {
                count = cvar.wait(count).unwrap();
            }
            *count += 1;
        }

        let inflight = self.inflight.clone();
        let completed = self.completed.clone();
        self.pool.spawn(move || {
            job();
            completed.fetch_add(1, Ordering::SeqCst);
            let (lock, cvar) = &*inflight;
            let mut count = lock.lock().unwrap();
            *count -= 1;
            cvar.notify_all();
        });
    }

    /// Block until every job submitted so far has finished running.
    pub fn drain(&self) {
        let (lock, cvar) = &*self.inflight;
        let mut count = lock.lock().unwrap();
        while *count > 0 {
            count = cvar.wait(count).unwrap();
        }
    }

    /// Total jobs that have completed so far. Mostly useful for tests.
    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn flag_wakes_multiple_waiters() {
        let flag = Flag::new();
        let mut handles = Vec::new();
        let woke = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let flag = flag.clone();
            let woke = woke.clone();
            handles.push(std::thread::spawn(move || {
                flag.wait();
                woke.fetch_add(1, Ordering::SeqCst);
            }));
        }
        std::thread::sleep(Duration::from_millis(10));
        flag.signal();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(woke.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn drain_waits_for_all_jobs() {
        let pool = WorkPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = counter.clone();
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
        assert_eq!(pool.completed_count(), 50);
    }

    #[test]
    fn never_exceeds_batch_size() {
        let batch_size = 4;
        let pool = WorkPool::new(batch_size);
        let inflight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        for _ in 0..30 {
            let inflight = inflight.clone();
            let max_seen = max_seen.clone();
            pool.spawn(move || {
                let cur = inflight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(cur, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(5));
                inflight.fetch_sub(1, Ordering::SeqCst);
            });
        }
        pool.drain();
        assert!(max_seen.load(Ordering::SeqCst) <= batch_size);
    }
}
