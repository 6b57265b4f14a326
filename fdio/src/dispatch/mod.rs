//! The two ways a system call reaches the kernel.
//!
//! - [`Retry`] attempts the call directly and, on would-block, suspends on a
//!   readiness future before attempting it again.
//! - [`blocking`] hands the call to an [`Executor`](fdio_pool::Executor) and
//!   awaits the job's single result.
//!
//! Both drive a [`Syscall`], which owns its operands (buffer leases, control
//! data, addresses) for as long as the kernel may touch them.
use std::io;
use std::os::fd::RawFd;

use fdio_reactor::Interest;

mod job;
mod retry;

pub(crate) use job::blocking;
pub use retry::Retry;

/// One re-attemptable system call together with its operands.
pub trait Syscall {
    /// What a successful attempt produces.
    type Output;

    /// The readiness to wait for after the call reports would-block.
    fn interest(&self) -> Interest;

    /// Make the system call once against `fd`.
    ///
    /// `WouldBlock` and `Interrupted` errors are handled by the dispatcher;
    /// any other error is final.
    fn attempt(&mut self, fd: RawFd) -> io::Result<Self::Output>;
}
