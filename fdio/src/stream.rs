//! [`tokio::io`] adapters over non-blocking descriptors.
use std::fmt;
use std::future::Future;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use fdio_pool::Executor;
use fdio_reactor::{Interest, Readiness};
use log::trace;
use smallvec::SmallVec;

use crate::{sys, Descriptor, Dispatcher, Error, IoVectors, Result};

const LOG: &str = "fdio::stream";

pin_project_lite::pin_project! {
    /// A non-blocking descriptor exposed as [`tokio::io::AsyncRead`] and
    /// [`tokio::io::AsyncWrite`].
    ///
    /// Reads and writes are attempted directly and suspend on the readiness
    /// notifier when the descriptor would block. The descriptor is not closed
    /// when the stream is dropped.
    pub struct FdStream<R>
    where
        R: Readiness,
    {
        fd: RawFd,
        readiness: R,
        #[pin]
        read_ready: Option<R::Ready>,
        #[pin]
        write_ready: Option<R::Ready>,
    }
}

impl<R> FdStream<R>
where
    R: Readiness,
{
    /// Wrap `fd`, which must be tagged [`Descriptor::NonBlocking`].
    pub fn new(fd: Descriptor, readiness: R) -> Result<Self> {
        match fd {
            Descriptor::NonBlocking(fd) => Ok(Self {
                fd,
                readiness,
                read_ready: None,
                write_ready: None,
            }),
            Descriptor::Blocking(_) => Err(Error::InvalidArgument(
                "stream requires a non-blocking descriptor",
            )),
        }
    }

    /// The wrapped descriptor.
    pub fn descriptor(&self) -> Descriptor {
        Descriptor::NonBlocking(self.fd)
    }
}

impl<R, E> Dispatcher<R, E>
where
    R: Readiness + Clone,
    E: Executor,
{
    /// Wrap a non-blocking descriptor in an [`FdStream`] sharing this
    /// dispatcher's readiness notifier.
    pub fn stream(&self, fd: Descriptor) -> Result<FdStream<R>> {
        FdStream::new(fd, self.readiness().clone())
    }
}

fn poll_io<R, T>(
    mut slot: Pin<&mut Option<R::Ready>>,
    readiness: &R,
    fd: RawFd,
    interest: Interest,
    cx: &mut Context<'_>,
    mut f: impl FnMut() -> io::Result<T>,
) -> Poll<io::Result<T>>
where
    R: Readiness,
{
    loop {
        if let Some(ready) = slot.as_mut().as_pin_mut() {
            let result = ready!(ready.poll(cx));
            slot.set(None);
            result?;
        }
        match f() {
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                trace!(target: LOG, "stream.would_block fd={}", fd);
                slot.set(Some(readiness.ready(fd, interest)));
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            result => return Poll::Ready(result),
        }
    }
}

impl<R> tokio::io::AsyncRead for FdStream<R>
where
    R: Readiness,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let fd = *this.fd;
        let n = ready!(poll_io(
            this.read_ready,
            &*this.readiness,
            fd,
            Interest::READABLE,
            cx,
            || {
                // Safety: read(2) only writes initialized bytes into the
                // unfilled tail.
                unsafe {
                    let unfilled = buf.unfilled_mut();
                    sys::read(fd, unfilled.as_mut_ptr().cast(), unfilled.len())
                }
            },
        ))?;
        // Safety: the kernel initialized the first `n` bytes.
        unsafe { buf.assume_init(n) };
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl<R> tokio::io::AsyncWrite for FdStream<R>
where
    R: Readiness,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let fd = *this.fd;
        poll_io(
            this.write_ready,
            &*this.readiness,
            fd,
            Interest::WRITABLE,
            cx,
            // Safety: `buf` is valid for reads of its length.
            || unsafe { sys::write(fd, buf.as_ptr(), buf.len()) },
        )
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let fd = *this.fd;
        let iov: SmallVec<[libc::iovec; 8]> = bufs
            .iter()
            .take(IoVectors::system_limit())
            .map(|b| libc::iovec {
                iov_base: b.as_ptr() as *mut libc::c_void,
                iov_len: b.len(),
            })
            .collect();
        poll_io(
            this.write_ready,
            &*this.readiness,
            fd,
            Interest::WRITABLE,
            cx,
            // Safety: every iovec borrows from `bufs`.
            || unsafe { sys::writev(fd, &iov) },
        )
    }

    fn is_write_vectored(&self) -> bool {
        true
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Safety: shutdown(2) takes no pointers.
        if unsafe { libc::shutdown(self.fd, libc::SHUT_WR) } < 0 {
            let err = io::Error::last_os_error();
            // Pipes and files have no write half to shut down.
            if err.raw_os_error() != Some(libc::ENOTSOCK) {
                return Poll::Ready(Err(err));
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl<R> AsRawFd for FdStream<R>
where
    R: Readiness,
{
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl<R> fmt::Debug for FdStream<R>
where
    R: Readiness,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FdStream").field("fd", &self.fd).finish()
    }
}
