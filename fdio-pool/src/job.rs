//! Single-resolution completion handles for blocking jobs.
//!
//! A job owns its closure and everything the closure captured until a worker
//! is done with it. The [`JobHandle`] only observes the outcome: dropping the
//! handle never frees what the job captured while the job is running.
use std::future::Future;
use std::panic;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::{fmt, mem};

use futures_core::FusedFuture;
use log::trace;
use parking_lot::Mutex;

use crate::{Executor, JobError, Work};

const LOG: &str = "fdio_pool::job";

/// Submit `f` to `executor` and return a [`JobHandle`] for its result.
///
/// The handle resolves exactly once: with `Ok` when `f` returns, or with a
/// [`JobError`] when the executor rejects or drops the job, or when `f`
/// panics.
///
/// Dropping the handle before it resolves is a soft cancellation. A job that
/// has not started yet is skipped, a job that is already running runs to
/// completion and its output is discarded.
pub fn spawn<E, F, T>(executor: &E, f: F) -> JobHandle<T>
where
    E: Executor + ?Sized,
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let shared = Arc::new(Shared::new());
    let job = Job {
        shared: shared.clone(),
        f: Some(f),
    };
    let work: Work = Box::new(move || job.run());
    trace!(target: LOG, "job.submit");
    if let Err(rejected) = executor.execute(work) {
        trace!(target: LOG, "job.rejected {}", rejected);
        shared.fail(JobError::rejected(rejected));
    }
    JobHandle { shared }
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    cancelled: AtomicBool,
}

struct Inner<T> {
    slot: Slot<T>,
    waker: Option<Waker>,
}

enum Slot<T> {
    Pending,
    Ready(Result<T, JobError>),
    Taken,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slot: Slot::Pending,
                waker: None,
            }),
            cancelled: AtomicBool::new(false),
        }
    }

    fn complete(&self, result: Result<T, JobError>) {
        let waker = {
            let mut inner = self.inner.lock();
            if !matches!(inner.slot, Slot::Pending) {
                return;
            }
            inner.slot = Slot::Ready(result);
            inner.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Record a submission failure. This overrides the `Dropped` outcome the
    /// rejected work produced while being dropped by the executor.
    fn fail(&self, err: JobError) {
        let mut inner = self.inner.lock();
        if !matches!(inner.slot, Slot::Taken) {
            inner.slot = Slot::Ready(Err(err));
        }
    }
}

struct Job<T, F> {
    shared: Arc<Shared<T>>,
    f: Option<F>,
}

impl<T, F> Job<T, F>
where
    F: FnOnce() -> T,
{
    fn run(mut self) {
        if self.shared.cancelled.load(Ordering::Acquire) {
            trace!(target: LOG, "job.skipped");
            return;
        }
        let Some(f) = self.f.take() else {
            return;
        };
        let result = panic::catch_unwind(panic::AssertUnwindSafe(f)).map_err(JobError::panicked);
        trace!(target: LOG, "job.complete ok={}", result.is_ok());
        self.shared.complete(result);
    }
}

impl<T, F> Drop for Job<T, F> {
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            // Release the captured operands before publishing the outcome.
            drop(f);
            self.shared.complete(Err(JobError::dropped()));
        }
    }
}

/// An awaitable handle to a submitted job.
///
/// See [`spawn`] for the cancellation semantics.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct JobHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> JobHandle<T> {
    /// Returns `true` once the job produced its outcome, whether or not the
    /// outcome has been taken yet.
    pub fn is_finished(&self) -> bool {
        !matches!(self.shared.inner.lock().slot, Slot::Pending)
    }
}

impl<T> fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.shared.inner.lock().slot {
            Slot::Pending => "pending",
            Slot::Ready(_) => "ready",
            Slot::Taken => "taken",
        };
        f.debug_struct("JobHandle").field("state", &state).finish()
    }
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T, JobError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.shared.inner.lock();
        match mem::replace(&mut inner.slot, Slot::Taken) {
            Slot::Ready(result) => Poll::Ready(result),
            Slot::Pending => {
                inner.slot = Slot::Pending;
                match &mut inner.waker {
                    Some(waker) if waker.will_wake(cx.waker()) => {}
                    waker => *waker = Some(cx.waker().clone()),
                }
                Poll::Pending
            }
            Slot::Taken => panic!("JobHandle polled after its result was taken"),
        }
    }
}

impl<T> FusedFuture for JobHandle<T> {
    fn is_terminated(&self) -> bool {
        matches!(self.shared.inner.lock().slot, Slot::Taken)
    }
}

impl<T> Drop for JobHandle<T> {
    fn drop(&mut self) {
        if matches!(self.shared.inner.lock().slot, Slot::Pending) {
            self.shared.cancelled.store(true, Ordering::Release);
        }
    }
}
