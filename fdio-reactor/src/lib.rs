//! Readiness notification for fdio.
//!
//! Non-blocking descriptors report "would block" when they are not ready. The
//! caller then suspends on a readiness future obtained from a [`Readiness`]
//! implementation and retries once it resolves.
//!
//! # Components
//! - [`Readiness`]: the seam used by the dispatch layer.
//! - [`Interest`]: which direction of readiness to wait for.
//! - [`Reactor`]: a background-thread notifier built on the `polling` crate.
#![cfg(unix)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    clippy::missing_safety_doc
)]
use std::future::Future;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;

mod interest;
mod reactor;

pub use interest::Interest;
pub use reactor::{Reactor, Ready};

/// The [`Readiness`] trait hands out futures that resolve when a descriptor
/// becomes ready for the requested [`Interest`].
///
/// Each returned future resolves at most once. Dropping it before it resolves
/// withdraws the registration without side effects. Resolution is a hint: the
/// caller must still be prepared for the next attempt to report would-block.
pub trait Readiness {
    /// The future returned by [`Readiness::ready`].
    type Ready: Future<Output = io::Result<()>> + Send;

    /// Wait until `fd` is ready for `interest`.
    fn ready(&self, fd: RawFd, interest: Interest) -> Self::Ready;
}

impl<T> Readiness for &T
where
    T: Readiness + ?Sized,
{
    type Ready = T::Ready;

    fn ready(&self, fd: RawFd, interest: Interest) -> Self::Ready {
        (**self).ready(fd, interest)
    }
}

impl<T> Readiness for Arc<T>
where
    T: Readiness + ?Sized,
{
    type Ready = T::Ready;

    fn ready(&self, fd: RawFd, interest: Interest) -> Self::Ready {
        (**self).ready(fd, interest)
    }
}
