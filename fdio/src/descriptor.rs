use std::io;
use std::os::fd::{AsRawFd, RawFd};

use log::trace;

const LOG: &str = "fdio::descriptor";

/// A raw descriptor tagged with the mode it was classified in.
///
/// The tag decides how read and write style operations are dispatched: a
/// blocking descriptor is handed to the blocking executor, a non-blocking one
/// is attempted directly and retried on readiness. The descriptor is never
/// closed by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Descriptor {
    /// `O_NONBLOCK` is clear; system calls may park the calling thread.
    Blocking(RawFd),
    /// `O_NONBLOCK` is set; system calls report would-block instead.
    NonBlocking(RawFd),
}

impl Descriptor {
    /// Query the descriptor's file status flags and tag it accordingly.
    pub fn classify(fd: RawFd) -> io::Result<Self> {
        let flags = fcntl_getfl(fd)?;
        let descriptor = if flags & libc::O_NONBLOCK != 0 {
            Descriptor::NonBlocking(fd)
        } else {
            Descriptor::Blocking(fd)
        };
        trace!(target: LOG, "descriptor.classify fd={} blocking={}", fd, descriptor.is_blocking());
        Ok(descriptor)
    }

    /// Classify any type that exposes a raw descriptor.
    pub fn of<T: AsRawFd + ?Sized>(io: &T) -> io::Result<Self> {
        Self::classify(io.as_raw_fd())
    }

    /// The underlying raw descriptor.
    pub fn raw(&self) -> RawFd {
        match *self {
            Descriptor::Blocking(fd) | Descriptor::NonBlocking(fd) => fd,
        }
    }

    /// Returns `true` for [`Descriptor::Blocking`].
    pub fn is_blocking(&self) -> bool {
        matches!(self, Descriptor::Blocking(_))
    }

    /// Set or clear `O_NONBLOCK` and return the re-tagged descriptor.
    pub fn set_nonblocking(self, nonblocking: bool) -> io::Result<Self> {
        let fd = self.raw();
        let flags = fcntl_getfl(fd)?;
        let updated = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        if updated != flags {
            // Safety: F_SETFL with an integer argument has no memory-safety
            // preconditions; an invalid fd is reported as EBADF.
            if unsafe { libc::fcntl(fd, libc::F_SETFL, updated) } < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(if nonblocking {
            Descriptor::NonBlocking(fd)
        } else {
            Descriptor::Blocking(fd)
        })
    }
}

impl AsRawFd for Descriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.raw()
    }
}

fn fcntl_getfl(fd: RawFd) -> io::Result<libc::c_int> {
    // Safety: F_GETFL takes no pointer argument.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(flags)
    }
}
