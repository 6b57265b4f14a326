use std::os::fd::RawFd;

use fdio_pool::{BlockingPool, Executor};
use fdio_reactor::{Reactor, Readiness};
use log::trace;
use socket2::SockAddr;

use crate::ancillary::ControlBuffer;
use crate::config::Builder;
use crate::dispatch::{self, Retry, Syscall};
use crate::ops;
use crate::segment::{check_bounds, LeasedSlice, LeasedVectors};
use crate::{Buffer, Capabilities, Descriptor, Error, IoVectors, MsgFlags, Result, Segment};

const LOG: &str = "fdio::dispatcher";

/// Default upper bound on descriptors accepted by one [`Dispatcher::recv_msg`].
pub const DEFAULT_MAX_ANCILLARY_FDS: usize = 256;

/// The operation façade.
///
/// Validates arguments, leases buffers, and routes each call either through
/// the readiness-driven [`Retry`] path or through the blocking executor:
///
/// - `read`, `write`, `readv` and `writev` follow the [`Descriptor`] tag.
/// - Socket calls always take the retry path. On a blocking descriptor they
///   park the calling thread inside the system call.
///
/// Cloning is cheap when the readiness and executor handles are.
#[derive(Debug, Clone)]
pub struct Dispatcher<R = Reactor, E = BlockingPool> {
    readiness: R,
    executor: E,
    capabilities: Capabilities,
    max_ancillary_fds: usize,
}

impl Dispatcher {
    /// Start configuring a dispatcher backed by the default reactor and pool.
    pub fn builder() -> Builder {
        Builder::default()
    }
}

impl<R, E> Dispatcher<R, E>
where
    R: Readiness,
    E: Executor,
{
    /// Assemble a dispatcher from existing collaborators.
    pub fn from_parts(readiness: R, executor: E) -> Self {
        Self {
            readiness,
            executor,
            capabilities: Capabilities::detect(),
            max_ancillary_fds: DEFAULT_MAX_ANCILLARY_FDS,
        }
    }

    /// Replace the capability set.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Replace the receive limit for passed descriptors.
    #[must_use]
    pub fn with_max_ancillary_fds(mut self, max: usize) -> Self {
        self.max_ancillary_fds = max;
        self
    }

    /// The capability set operations are checked against.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// The readiness notifier used by the retry path.
    pub fn readiness(&self) -> &R {
        &self.readiness
    }

    /// The executor used by the blocking path.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Drive an arbitrary [`Syscall`] through the retry path.
    pub fn retry<S: Syscall>(&self, fd: RawFd, syscall: S) -> Retry<'_, R, S> {
        Retry::new(&self.readiness, fd, syscall)
    }

    async fn dual<S>(&self, fd: Descriptor, syscall: S) -> Result<S::Output>
    where
        S: Syscall + Send + 'static,
        S::Output: Send + 'static,
    {
        match fd {
            Descriptor::Blocking(raw) => dispatch::blocking(&self.executor, raw, syscall).await,
            Descriptor::NonBlocking(raw) => Retry::new(&self.readiness, raw, syscall).await,
        }
    }

    fn require_vectored(&self, op: &'static str) -> Result<()> {
        if self.capabilities.vectored_io {
            Ok(())
        } else {
            trace!(target: LOG, "dispatch.unsupported op={}", op);
            Err(Error::Unsupported(op))
        }
    }

    /// Read up to `len` bytes from `fd` into `buf` at `offset`.
    ///
    /// Returns the number of bytes read; `0` means end of stream.
    pub async fn read(
        &self,
        fd: Descriptor,
        buf: &Buffer,
        offset: isize,
        len: isize,
    ) -> Result<usize> {
        check_bounds(buf.len(), offset, len)?;
        self.require_vectored("read")?;
        let slice = LeasedSlice::acquire(buf, offset, len, true)?;
        self.dual(fd, ops::Read { slice }).await
    }

    /// Write up to `len` bytes from `buf` at `offset` to `fd`.
    pub async fn write(
        &self,
        fd: Descriptor,
        buf: &Buffer,
        offset: isize,
        len: isize,
    ) -> Result<usize> {
        check_bounds(buf.len(), offset, len)?;
        self.require_vectored("write")?;
        let slice = LeasedSlice::acquire(buf, offset, len, false)?;
        self.dual(fd, ops::Write { slice }).await
    }

    /// Scatter a read across `segments`, filling them in order.
    ///
    /// Segments beyond [`IoVectors::system_limit`] are left untouched.
    pub async fn readv(&self, fd: Descriptor, segments: &[Segment]) -> Result<usize> {
        validate_all(segments)?;
        self.require_vectored("readv")?;
        let vectors = LeasedVectors::acquire(segments, true, IoVectors::system_limit())?;
        self.dual(fd, ops::ReadV { vectors }).await
    }

    /// Gather a write from `segments`, in order.
    ///
    /// Segments beyond [`IoVectors::system_limit`] are not sent.
    pub async fn writev(&self, fd: Descriptor, segments: &[Segment]) -> Result<usize> {
        validate_all(segments)?;
        self.require_vectored("writev")?;
        let vectors = LeasedVectors::acquire(segments, false, IoVectors::system_limit())?;
        self.dual(fd, ops::WriteV { vectors }).await
    }

    /// Receive up to `len` bytes from a socket into `buf` at `offset`.
    pub async fn recv(
        &self,
        fd: Descriptor,
        buf: &Buffer,
        offset: isize,
        len: isize,
        flags: MsgFlags,
    ) -> Result<usize> {
        let slice = LeasedSlice::acquire(buf, offset, len, true)?;
        let syscall = ops::RecvBuf {
            slice,
            flags: flags.bits(),
        };
        self.retry(fd.raw(), syscall).await
    }

    /// Send up to `len` bytes from `buf` at `offset` on a socket.
    pub async fn send(
        &self,
        fd: Descriptor,
        buf: &Buffer,
        offset: isize,
        len: isize,
        flags: MsgFlags,
    ) -> Result<usize> {
        let slice = LeasedSlice::acquire(buf, offset, len, false)?;
        let syscall = ops::SendBuf {
            slice,
            flags: flags.bits(),
        };
        self.retry(fd.raw(), syscall).await
    }

    /// Receive a datagram into `buf[offset..offset + len]` and report its
    /// sender.
    pub async fn recv_from(
        &self,
        fd: Descriptor,
        buf: &mut [u8],
        offset: isize,
        len: isize,
        flags: MsgFlags,
    ) -> Result<(usize, SockAddr)> {
        let range = check_bounds(buf.len(), offset, len)?;
        let syscall = ops::RecvFrom {
            buf: &mut buf[range],
            flags: flags.bits(),
        };
        self.retry(fd.raw(), syscall).await
    }

    /// Send `buf[offset..offset + len]` to `addr`.
    pub async fn send_to(
        &self,
        fd: Descriptor,
        buf: &[u8],
        offset: isize,
        len: isize,
        addr: &SockAddr,
        flags: MsgFlags,
    ) -> Result<usize> {
        let range = check_bounds(buf.len(), offset, len)?;
        let syscall = ops::SendTo {
            buf: &buf[range],
            addr,
            flags: flags.bits(),
        };
        self.retry(fd.raw(), syscall).await
    }

    /// Receive data into `segments` together with any passed descriptors.
    ///
    /// Descriptors are returned in the order the kernel delivered them and
    /// belong to the caller from then on. At most the configured
    /// `max_ancillary_fds` are accepted; the kernel drops (and closes) the
    /// rest and a warning is logged. Without descriptor passing no control
    /// buffer is offered and the list is always empty.
    pub async fn recv_msg(
        &self,
        fd: Descriptor,
        segments: &[Segment],
        flags: MsgFlags,
    ) -> Result<(usize, Vec<RawFd>)> {
        validate_all(segments)?;
        self.require_vectored("recv_msg")?;
        let max_fds = if self.capabilities.fd_passing {
            self.max_ancillary_fds
        } else {
            0
        };
        let vectors = LeasedVectors::acquire(segments, true, IoVectors::system_limit())?;
        let syscall = ops::RecvMsg {
            vectors,
            control: ControlBuffer::for_receive(max_fds),
            flags: flags.bits(),
        };
        self.retry(fd.raw(), syscall).await
    }

    /// Send `segments` on a connected socket, passing `fds` alongside.
    ///
    /// An empty `fds` sends no control message.
    pub async fn send_msg(
        &self,
        fd: Descriptor,
        segments: &[Segment],
        fds: &[RawFd],
        flags: MsgFlags,
    ) -> Result<usize> {
        self.send_msg_to(fd, segments, fds, None, flags).await
    }

    /// [`send_msg`](Self::send_msg) with an optional destination, for
    /// unconnected datagram sockets.
    pub async fn send_msg_to(
        &self,
        fd: Descriptor,
        segments: &[Segment],
        fds: &[RawFd],
        addr: Option<&SockAddr>,
        flags: MsgFlags,
    ) -> Result<usize> {
        validate_all(segments)?;
        self.require_vectored("send_msg")?;
        if !fds.is_empty() && !self.capabilities.fd_passing {
            trace!(target: LOG, "dispatch.unsupported op=send_msg fds={}", fds.len());
            return Err(Error::Unsupported("descriptor passing"));
        }
        let vectors = LeasedVectors::acquire(segments, false, IoVectors::system_limit())?;
        let syscall = ops::SendMsg {
            vectors,
            control: ControlBuffer::with_fds(fds),
            addr,
            flags: flags.bits(),
        };
        self.retry(fd.raw(), syscall).await
    }
}

fn validate_all(segments: &[Segment]) -> Result<()> {
    segments.iter().try_for_each(|s| s.validate().map(|_| ()))
}
