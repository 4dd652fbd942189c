//! Partition sorting workers.

use std::cmp::Ordering;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{self, AtomicUsize};
use std::sync::{Condvar, Mutex, PoisonError};

/// Sorts a single in-memory partition.
pub struct SortWorker<'a> {
    partition: &'a mut Vec<String>,
}

impl<'a> SortWorker<'a> {
    pub fn new(partition: &'a mut Vec<String>) -> Self {
        SortWorker { partition }
    }

    /// Sorts the partition in place.
    pub fn run<F>(self, compare: &F)
    where
        F: Fn(&str, &str) -> Ordering,
    {
        self.partition.sort_by(|a, b| compare(a, b));
    }
}

/// Countdown barrier the orchestrating thread blocks on until every worker of a batch has finished.
pub struct JoinBarrier {
    pending: Mutex<usize>,
    done: Condvar,
}

impl JoinBarrier {
    pub fn new(workers: usize) -> Self {
        JoinBarrier {
            pending: Mutex::new(workers),
            done: Condvar::new(),
        }
    }

    /// Signals one worker completion.
    pub fn count_down(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.done.notify_all();
        }
    }

    /// Blocks until all workers have signaled completion.
    ///
    /// A wake-up that arrives while workers are still running is logged and the wait is resumed.
    pub fn wait(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        while *pending > 0 {
            pending = self.done.wait(pending).unwrap_or_else(PoisonError::into_inner);
            if *pending > 0 {
                log::trace!("join barrier woken with {} workers pending, waiting again", *pending);
            }
        }
    }
}

/// Pool of sorting threads. Every batch partition is handed to its own [`SortWorker`].
pub struct WorkerPool {
    thread_pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Creates a pool of `threads_number` threads.
    /// If the parameter is [`None`] threads number is selected based on available CPU core number.
    pub fn new(threads_number: Option<usize>) -> Result<Self, rayon::ThreadPoolBuildError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new().thread_name(|idx| format!("sort-worker-{}", idx));

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder.build()?;

        return Ok(WorkerPool { thread_pool });
    }

    /// Number of threads in the pool.
    pub fn threads_number(&self) -> usize {
        self.thread_pool.current_num_threads()
    }

    /// Sorts every partition on its own worker and blocks until all of them are done.
    ///
    /// Returns indices of the partitions whose worker panicked. Those partitions are left in an
    /// unspecified order and must not be merged.
    pub fn sort_partitions<F>(&self, partitions: &mut [Vec<String>], compare: &F) -> Vec<usize>
    where
        F: Fn(&str, &str) -> Ordering + Sync,
    {
        let barrier = JoinBarrier::new(partitions.len());
        let failed = Mutex::new(Vec::new());
        let sorted = AtomicUsize::new(0);

        self.thread_pool.in_place_scope(|scope| {
            for (idx, partition) in partitions.iter_mut().enumerate() {
                let barrier = &barrier;
                let failed = &failed;
                let sorted = &sorted;

                scope.spawn(move |_| {
                    let worker = SortWorker::new(partition);
                    match panic::catch_unwind(AssertUnwindSafe(|| worker.run(compare))) {
                        Ok(()) => {
                            sorted.fetch_add(1, atomic::Ordering::Relaxed);
                        }
                        Err(_) => {
                            log::error!("sort worker for partition {} panicked", idx);
                            failed.lock().unwrap_or_else(PoisonError::into_inner).push(idx);
                        }
                    }
                    barrier.count_down();
                });
            }

            barrier.wait();
        });

        log::debug!("{} partitions sorted", sorted.load(atomic::Ordering::Relaxed));

        let mut failed = failed.into_inner().unwrap_or_else(PoisonError::into_inner);
        failed.sort_unstable();

        return failed;
    }
}
