//! Dual-path descriptor I/O for async Rust.
//!
//! fdio moves bytes between [`Buffer`]s and OS descriptors (sockets, pipes,
//! files) from asynchronous code. Every operation takes one of two paths:
//!
//! - A [`Descriptor::NonBlocking`] descriptor is driven directly. When the
//!   kernel reports would-block, the operation suspends on a readiness
//!   notification and retries ([`Retry`]).
//! - A [`Descriptor::Blocking`] descriptor is handed to a blocking executor
//!   and the operation awaits the job's single result.
//!
//! `read`, `write`, `readv` and `writev` choose a path from the descriptor's
//! tag. Socket operations always use the retry path.
//!
//! # Components
//! - [`Buffer`] and [`Segment`]: fixed-length shareable memory and the
//!   bounds-checked views over it. In-flight operations lease the buffers
//!   they use, so memory is never freed or rewritten under the kernel.
//! - [`IoVectors`]: a growable segment list for scatter/gather transfers.
//! - [`Dispatcher`]: the operation façade.
//! - [`FdStream`]: `tokio::io` traits over a non-blocking descriptor.
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::os::unix::net::UnixStream;
//!
//! use fdio::{Buffer, Descriptor, Dispatcher};
//!
//! let dispatcher = Dispatcher::builder().build()?;
//! let (a, b) = UnixStream::pair()?;
//! a.set_nonblocking(true)?;
//!
//! let buf = Buffer::from(&b"ping"[..]);
//! let sent = futures::executor::block_on(dispatcher.write(Descriptor::of(&a)?, &buf, 0, 4))?;
//! # drop((b, sent));
//! # Ok(())
//! # }
//! ```
#![cfg(unix)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    clippy::missing_safety_doc
)]

mod ancillary;
mod buf;
mod caps;
mod config;
mod descriptor;
mod dispatch;
mod dispatcher;
mod error;
mod flags;
mod ops;
mod segment;
mod stream;
mod sys;

pub use buf::Buffer;
pub use caps::Capabilities;
pub use config::Builder;
pub use descriptor::Descriptor;
pub use dispatch::{Retry, Syscall};
pub use dispatcher::{Dispatcher, DEFAULT_MAX_ANCILLARY_FDS};
pub use error::{Error, Result};
pub use flags::MsgFlags;
pub use segment::{check_bounds, IoVectors, Segment};
pub use stream::FdStream;

pub use fdio_pool::{BlockingPool, Executor, JobError};
pub use fdio_reactor::{Interest, Reactor, Readiness};
