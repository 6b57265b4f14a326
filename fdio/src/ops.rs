//! The system calls behind each operation.
//!
//! Every type here owns its operands: buffer leases for memory the kernel
//! reads or writes, control buffers for ancillary data, borrowed addresses
//! for the datagram calls.
use std::io;
use std::os::fd::RawFd;

use fdio_reactor::Interest;
use socket2::SockAddr;

use crate::ancillary::{self, ControlBuffer};
use crate::dispatch::Syscall;
use crate::segment::{LeasedSlice, LeasedVectors};
use crate::sys;

#[derive(Debug)]
pub(crate) struct Read {
    pub(crate) slice: LeasedSlice,
}

impl Syscall for Read {
    type Output = usize;

    fn interest(&self) -> Interest {
        Interest::READABLE
    }

    fn attempt(&mut self, fd: RawFd) -> io::Result<usize> {
        // Safety: the exclusive lease keeps the range valid for writes.
        unsafe { sys::read(fd, self.slice.ptr(), self.slice.len()) }
    }
}

#[derive(Debug)]
pub(crate) struct Write {
    pub(crate) slice: LeasedSlice,
}

impl Syscall for Write {
    type Output = usize;

    fn interest(&self) -> Interest {
        Interest::WRITABLE
    }

    fn attempt(&mut self, fd: RawFd) -> io::Result<usize> {
        // Safety: the shared lease keeps the range valid for reads.
        unsafe { sys::write(fd, self.slice.ptr(), self.slice.len()) }
    }
}

#[derive(Debug)]
pub(crate) struct ReadV {
    pub(crate) vectors: LeasedVectors,
}

impl Syscall for ReadV {
    type Output = usize;

    fn interest(&self) -> Interest {
        Interest::READABLE
    }

    fn attempt(&mut self, fd: RawFd) -> io::Result<usize> {
        let iov = self.vectors.iovecs();
        // Safety: every iovec points into an exclusively leased buffer.
        unsafe { sys::readv(fd, &iov) }
    }
}

#[derive(Debug)]
pub(crate) struct WriteV {
    pub(crate) vectors: LeasedVectors,
}

impl Syscall for WriteV {
    type Output = usize;

    fn interest(&self) -> Interest {
        Interest::WRITABLE
    }

    fn attempt(&mut self, fd: RawFd) -> io::Result<usize> {
        let iov = self.vectors.iovecs();
        // Safety: every iovec points into a leased buffer.
        unsafe { sys::writev(fd, &iov) }
    }
}

#[derive(Debug)]
pub(crate) struct RecvBuf {
    pub(crate) slice: LeasedSlice,
    pub(crate) flags: libc::c_int,
}

impl Syscall for RecvBuf {
    type Output = usize;

    fn interest(&self) -> Interest {
        Interest::READABLE
    }

    fn attempt(&mut self, fd: RawFd) -> io::Result<usize> {
        // Safety: the exclusive lease keeps the range valid for writes.
        unsafe { sys::recv(fd, self.slice.ptr(), self.slice.len(), self.flags) }
    }
}

#[derive(Debug)]
pub(crate) struct SendBuf {
    pub(crate) slice: LeasedSlice,
    pub(crate) flags: libc::c_int,
}

impl Syscall for SendBuf {
    type Output = usize;

    fn interest(&self) -> Interest {
        Interest::WRITABLE
    }

    fn attempt(&mut self, fd: RawFd) -> io::Result<usize> {
        // Safety: the shared lease keeps the range valid for reads.
        unsafe { sys::send(fd, self.slice.ptr(), self.slice.len(), self.flags) }
    }
}

#[derive(Debug)]
pub(crate) struct RecvFrom<'a> {
    pub(crate) buf: &'a mut [u8],
    pub(crate) flags: libc::c_int,
}

impl Syscall for RecvFrom<'_> {
    type Output = (usize, SockAddr);

    fn interest(&self) -> Interest {
        Interest::READABLE
    }

    fn attempt(&mut self, fd: RawFd) -> io::Result<(usize, SockAddr)> {
        let (buf, flags) = (&mut *self.buf, self.flags);
        // Safety: socket2 hands us zeroed storage and its length, and only
        // reads as many address bytes as the kernel reported.
        unsafe { SockAddr::try_init(|addr, len| sys::recvfrom(fd, buf, flags, addr, len)) }
    }
}

#[derive(Debug)]
pub(crate) struct SendTo<'a> {
    pub(crate) buf: &'a [u8],
    pub(crate) addr: &'a SockAddr,
    pub(crate) flags: libc::c_int,
}

impl Syscall for SendTo<'_> {
    type Output = usize;

    fn interest(&self) -> Interest {
        Interest::WRITABLE
    }

    fn attempt(&mut self, fd: RawFd) -> io::Result<usize> {
        // Safety: the address is borrowed for the lifetime of the call.
        unsafe {
            sys::sendto(
                fd,
                self.buf,
                self.flags,
                self.addr.as_ptr().cast(),
                self.addr.len(),
            )
        }
    }
}

#[derive(Debug)]
pub(crate) struct RecvMsg {
    pub(crate) vectors: LeasedVectors,
    pub(crate) control: ControlBuffer,
    pub(crate) flags: libc::c_int,
}

impl Syscall for RecvMsg {
    type Output = (usize, Vec<RawFd>);

    fn interest(&self) -> Interest {
        Interest::READABLE
    }

    fn attempt(&mut self, fd: RawFd) -> io::Result<(usize, Vec<RawFd>)> {
        let mut iov = self.vectors.iovecs();
        let mut msg = ancillary::msghdr(&mut iov, &mut self.control, None);
        // Safety: the iovecs point into exclusively leased buffers and the
        // control buffer outlives the call.
        let n = unsafe { sys::recvmsg(fd, &mut msg, self.flags)? };
        // Safety: `msg` was just filled in by recvmsg.
        let fds = unsafe { ancillary::received_fds(&msg) };
        Ok((n, fds))
    }
}

#[derive(Debug)]
pub(crate) struct SendMsg<'a> {
    pub(crate) vectors: LeasedVectors,
    pub(crate) control: ControlBuffer,
    pub(crate) addr: Option<&'a SockAddr>,
    pub(crate) flags: libc::c_int,
}

impl Syscall for SendMsg<'_> {
    type Output = usize;

    fn interest(&self) -> Interest {
        Interest::WRITABLE
    }

    fn attempt(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut iov = self.vectors.iovecs();
        let name = self
            .addr
            .map(|addr| (addr.as_ptr() as *mut libc::c_void, addr.len()));
        let msg = ancillary::msghdr(&mut iov, &mut self.control, name);
        // Safety: the iovecs point into leased buffers; the control buffer
        // and address outlive the call.
        unsafe { sys::sendmsg(fd, &msg, self.flags) }
    }
}
