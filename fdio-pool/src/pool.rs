//! A bounded pool of threads for blocking work.
//!
//! Threads are spawned lazily up to `max_threads` when work arrives and no
//! thread is idle. Threads above `min_threads` retire after sitting idle for
//! `idle_timeout`. Shutting down stops new submissions; work already queued
//! still runs before the threads exit.
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use std::{fmt, panic};

use crossbeam_queue::SegQueue;
use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::{Executor, Rejected, Work};

const LOG: &str = "fdio_pool::pool";

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_THREADS: usize = 16;
const DEFAULT_THREAD_NAME: &str = "fdio-blocking";

/// [`BlockingPool`] runs [`Work`] on dedicated OS threads.
///
/// The pool is cheap to clone; all clones share the same threads. When the
/// last clone is dropped the pool shuts down and joins its threads.
#[derive(Clone)]
pub struct BlockingPool {
    inner: Arc<Inner>,
    _owner: Arc<Owner>,
}

struct Inner {
    min_threads: usize,
    max_threads: usize,
    idle_timeout: Duration,
    thread_name: String,
    /// Threads that have been spawned and have not exited.
    active: AtomicUsize,
    /// Threads parked waiting for work.
    idle: AtomicUsize,
    pending: AtomicUsize,
    next_id: AtomicUsize,
    queue: SegQueue<Work>,
    shutdown: AtomicBool,
    lock: Mutex<()>,
    condvar: Condvar,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// Shuts the pool down once every [`BlockingPool`] clone is gone.
struct Owner {
    inner: Arc<Inner>,
}

/// Configures and builds a [`BlockingPool`].
#[derive(Debug, Clone)]
pub struct Builder {
    min_threads: usize,
    max_threads: usize,
    idle_timeout: Duration,
    thread_name: String,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            min_threads: 0,
            max_threads: DEFAULT_MAX_THREADS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
        }
    }
}

impl Builder {
    /// Number of threads spawned eagerly and never retired.
    pub fn min_threads(mut self, n: usize) -> Self {
        self.min_threads = n;
        self
    }

    /// Upper bound on the number of threads.
    pub fn max_threads(mut self, n: usize) -> Self {
        self.max_threads = n;
        self
    }

    /// How long a thread above `min_threads` waits for work before exiting.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Prefix for worker thread names.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Build the pool, spawning `min_threads` workers.
    ///
    /// Fails with [`io::ErrorKind::InvalidInput`] if `max_threads` is zero or
    /// smaller than `min_threads`, or with the OS error if a thread cannot be
    /// spawned.
    pub fn build(self) -> io::Result<BlockingPool> {
        if self.max_threads == 0 || self.max_threads < self.min_threads {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "max_threads must be non-zero and at least min_threads",
            ));
        }
        let inner = Arc::new(Inner {
            min_threads: self.min_threads,
            max_threads: self.max_threads,
            idle_timeout: self.idle_timeout,
            thread_name: self.thread_name,
            active: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            next_id: AtomicUsize::new(0),
            queue: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            lock: Mutex::new(()),
            condvar: Condvar::new(),
            threads: Mutex::new(Vec::with_capacity(self.max_threads)),
        });
        let pool = BlockingPool {
            _owner: Arc::new(Owner {
                inner: inner.clone(),
            }),
            inner,
        };
        for _ in 0..pool.inner.min_threads {
            spawn_thread(&pool.inner)?;
        }
        debug!(
            target: LOG,
            "pool.start min={} max={}", pool.inner.min_threads, pool.inner.max_threads
        );
        Ok(pool)
    }
}

impl BlockingPool {
    /// Returns a [`Builder`] with default settings.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Number of queued jobs that no thread has picked up yet.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Relaxed)
    }

    /// Number of live worker threads.
    pub fn active_threads(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    /// Returns `true` once the pool stopped accepting work.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting work. Queued work still runs.
    pub fn shutdown(&self) {
        self.inner.begin_shutdown();
    }
}

impl fmt::Debug for BlockingPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingPool")
            .field("min_threads", &self.inner.min_threads)
            .field("max_threads", &self.inner.max_threads)
            .field("active_threads", &self.active_threads())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Executor for BlockingPool {
    fn execute(&self, work: Work) -> Result<(), Rejected> {
        let inner = &self.inner;
        if inner.shutdown.load(Ordering::Acquire) {
            return Err(Rejected::shutting_down());
        }
        inner.queue.push(work);
        inner.pending.fetch_add(1, Ordering::Relaxed);

        if inner.idle.load(Ordering::Acquire) == 0
            && inner.active.load(Ordering::Acquire) < inner.max_threads
        {
            if let Err(err) = spawn_thread(inner) {
                warn!(target: LOG, "thread.spawn.failed {}", err);
                if inner.active.load(Ordering::Acquire) == 0 {
                    // Nothing will ever drain the queue; dropping the work
                    // resolves the job handles.
                    while inner.queue.pop().is_some() {
                        inner.pending.fetch_sub(1, Ordering::Relaxed);
                    }
                    return Err(Rejected::no_workers());
                }
            }
        }

        let _guard = inner.lock.lock();
        inner.condvar.notify_one();
        Ok(())
    }
}

impl Inner {
    fn begin_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            debug!(target: LOG, "pool.shutdown");
        }
        let _guard = self.lock.lock();
        self.condvar.notify_all();
    }

    /// Try to retire the calling thread. Never drops below `min_threads`.
    fn try_retire(&self) -> bool {
        let mut active = self.active.load(Ordering::Acquire);
        loop {
            if active <= self.min_threads || !self.queue.is_empty() {
                return false;
            }
            match self.active.compare_exchange_weak(
                active,
                active - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => active = actual,
            }
        }
    }
}

impl Drop for Owner {
    fn drop(&mut self) {
        self.inner.begin_shutdown();
        let current = thread::current().id();
        let handles: Vec<_> = self.inner.threads.lock().drain(..).collect();
        for handle in handles {
            // The last clone may be dropped from inside a job.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(target: LOG, "thread.join.panicked");
            }
        }
    }
}

fn spawn_thread(inner: &Arc<Inner>) -> io::Result<()> {
    let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
    inner.active.fetch_add(1, Ordering::AcqRel);
    let worker = inner.clone();
    let spawned = thread::Builder::new()
        .name(format!("{}-{}", inner.thread_name, id))
        .spawn(move || run_worker(worker));
    match spawned {
        Ok(handle) => {
            let mut threads = inner.threads.lock();
            threads.retain(|h| !h.is_finished());
            threads.push(handle);
            trace!(target: LOG, "thread.spawn id={}", id);
            Ok(())
        }
        Err(err) => {
            inner.active.fetch_sub(1, Ordering::AcqRel);
            Err(err)
        }
    }
}

fn run_worker(inner: Arc<Inner>) {
    loop {
        if let Some(work) = inner.queue.pop() {
            inner.pending.fetch_sub(1, Ordering::Relaxed);
            // Jobs catch their own panics; this keeps foreign work from
            // taking the thread down with it.
            if panic::catch_unwind(panic::AssertUnwindSafe(work)).is_err() {
                warn!(target: LOG, "work.panicked");
            }
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        let mut guard = inner.lock.lock();
        if !inner.queue.is_empty() || inner.shutdown.load(Ordering::Acquire) {
            continue;
        }
        inner.idle.fetch_add(1, Ordering::AcqRel);
        let timed_out = inner
            .condvar
            .wait_for(&mut guard, inner.idle_timeout)
            .timed_out();
        inner.idle.fetch_sub(1, Ordering::AcqRel);
        drop(guard);

        if timed_out && inner.try_retire() {
            trace!(target: LOG, "thread.retire");
            return;
        }
    }
    inner.active.fetch_sub(1, Ordering::AcqRel);
    trace!(target: LOG, "thread.exit");
}
