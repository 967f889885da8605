//! Fixed-size pool executing proof-lookup jobs.

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

/// A named thread pool answering batched proof lookups.
///
/// Callers submit fire-and-forget jobs and join on a completion channel of
/// their own; see [`SpaceKeeper::get_proofs`](crate::SpaceKeeper::get_proofs).
#[derive(Debug)]
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    /// Creates a pool of exactly `workers` threads.
    pub fn new(workers: usize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("proof-worker-{index}"))
            .build()?;
        Ok(Self { pool })
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Submits a job for asynchronous execution.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        self.pool.spawn(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    #[test]
    fn executes_submitted_jobs() {
        let pool = WorkerPool::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (done_sender, done_receiver) = mpsc::channel::<()>();

        for _ in 0..64 {
            let counter = Arc::clone(&counter);
            let done_sender = done_sender.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(done_sender);
            });
        }
        drop(done_sender);
        while done_receiver.recv().is_ok() {}

        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn join_pattern_is_safe_with_zero_jobs() {
        let (done_sender, done_receiver) = mpsc::channel::<()>();
        drop(done_sender);
        // must return immediately instead of blocking forever
        while done_receiver.recv().is_ok() {}
    }

    #[test]
    fn concurrency_is_bounded_by_worker_count() {
        let pool = WorkerPool::new(2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (done_sender, done_receiver) = mpsc::channel::<()>();

        for _ in 0..16 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done_sender = done_sender.clone();
            pool.submit(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(5));
                running.fetch_sub(1, Ordering::SeqCst);
                drop(done_sender);
            });
        }
        drop(done_sender);
        while done_receiver.recv().is_ok() {}

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
