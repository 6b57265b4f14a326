//! Blocking job execution for fdio.
//!
//! Descriptors operated in blocking mode cannot be driven by readiness
//! notifications, so their system calls are handed to a separate execution
//! context and awaited through a single-resolution [`JobHandle`].
//!
//! # Components
//! - [`Executor`]: the seam through which blocking work is handed off.
//! - [`BlockingPool`]: a bounded thread pool implementing [`Executor`].
//! - [`spawn`] and [`JobHandle`]: submit a closure and await its result once.
#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    clippy::missing_safety_doc
)]
use std::sync::Arc;

mod error;
mod job;
mod pool;

pub use error::{JobError, Rejected};
pub use job::{spawn, JobHandle};
pub use pool::{BlockingPool, Builder};

/// A unit of blocking work accepted by an [`Executor`].
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// The [`Executor`] trait runs [`Work`] on an execution context where
/// blocking is allowed.
///
/// Implementations must either run the work exactly once or drop it
/// without running it. Dropping the work resolves the associated
/// [`JobHandle`] with a [`JobError`], so a job is never left pending.
pub trait Executor {
    /// Hand `work` off for execution.
    ///
    /// Returning [`Rejected`] means the work was not, and will not be, run.
    fn execute(&self, work: Work) -> Result<(), Rejected>;
}

impl<T> Executor for &T
where
    T: Executor + ?Sized,
{
    fn execute(&self, work: Work) -> Result<(), Rejected> {
        (**self).execute(work)
    }
}

impl<T> Executor for Arc<T>
where
    T: Executor + ?Sized,
{
    fn execute(&self, work: Work) -> Result<(), Rejected> {
        (**self).execute(work)
    }
}
