//! Bounded task pool.
//!
//! A fixed set of workers executes submitted tasks and remembers the first
//! error any of them returns. Used to fan out asset, post and page rendering
//! within a single build pass.
//!
//! # Example
//!
//! ```ignore
//! use kiln::build::Pool;
//!
//! let pool: Pool<std::io::Error> = Pool::new()?;
//! for path in paths {
//!     if !pool.add(move || std::fs::remove_file(path)) {
//!         break; // an earlier task failed
//!     }
//! }
//! pool.wait()?;
//! ```
//!
//! Tasks are not caught on panic. A panicking task aborts the process,
//! matching rayon's behavior for spawned jobs without a panic handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Default number of workers (uses available parallelism).
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Fan-out/fan-in executor with first-error capture.
pub struct Pool<E> {
    workers: rayon::ThreadPool,
    shared: Arc<Shared<E>>,
}

struct Shared<E> {
    state: Mutex<PoolState<E>>,
    drained: Condvar,
    failed: AtomicBool,
}

struct PoolState<E> {
    pending: usize,
    first_error: Option<E>,
}

impl<E> Shared<E> {
    fn lock(&self) -> MutexGuard<'_, PoolState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, outcome: Result<(), E>) {
        let mut state = self.lock();
        if let Err(e) = outcome {
            self.failed.store(true, Ordering::Release);
            if state.first_error.is_none() {
                state.first_error = Some(e);
            }
        }
        state.pending -= 1;
        if state.pending == 0 {
            self.drained.notify_all();
        }
    }
}

impl<E: Send + 'static> Pool<E> {
    /// Create a pool sized to the available hardware parallelism.
    pub fn new() -> Result<Self, rayon::ThreadPoolBuildError> {
        Self::with_workers(default_workers())
    }

    /// Create a pool with a fixed number of workers (at least one).
    pub fn with_workers(workers: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("kiln-worker-{}", i))
            .build()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState { pending: 0, first_error: None }),
            drained: Condvar::new(),
            failed: AtomicBool::new(false),
        });
        Ok(Self { workers, shared })
    }

    /// Number of workers in this pool.
    pub fn workers(&self) -> usize {
        self.workers.current_num_threads()
    }

    /// Submit a task.
    ///
    /// The task is always scheduled. Returns `false` when a task of this pool
    /// has already failed, in which case the caller may stop producing work.
    pub fn add<F>(&self, task: F) -> bool
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        let accepted = !self.shared.failed.load(Ordering::Acquire);
        self.shared.lock().pending += 1;

        let shared = Arc::clone(&self.shared);
        self.workers.spawn(move || shared.finish(task()));
        accepted
    }

    /// Whether a task has failed so far.
    pub fn has_failed(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }

    /// Block until every submitted task has finished and return the first
    /// error in completion order.
    pub fn wait(self) -> Result<(), E> {
        let mut state = self.shared.lock();
        while state.pending > 0 {
            state = self.shared.drained.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        match state.first_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
