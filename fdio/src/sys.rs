//! Thin wrappers over the libc calls used by the dispatcher.
//!
//! Every wrapper makes exactly one system call and maps a negative return to
//! `io::Error::last_os_error()`. Callers own retry policy.
use std::io;
use std::os::fd::RawFd;

fn cvt(ret: libc::ssize_t) -> io::Result<usize> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// # Safety
/// `buf` must be valid for writes of `len` bytes.
pub(crate) unsafe fn read(fd: RawFd, buf: *mut u8, len: usize) -> io::Result<usize> {
    cvt(libc::read(fd, buf.cast(), len))
}

/// # Safety
/// `buf` must be valid for reads of `len` bytes.
pub(crate) unsafe fn write(fd: RawFd, buf: *const u8, len: usize) -> io::Result<usize> {
    cvt(libc::write(fd, buf.cast(), len))
}

/// # Safety
/// Every iovec must describe memory valid for writes.
pub(crate) unsafe fn readv(fd: RawFd, iov: &[libc::iovec]) -> io::Result<usize> {
    cvt(libc::readv(fd, iov.as_ptr(), iov.len() as libc::c_int))
}

/// # Safety
/// Every iovec must describe memory valid for reads.
pub(crate) unsafe fn writev(fd: RawFd, iov: &[libc::iovec]) -> io::Result<usize> {
    cvt(libc::writev(fd, iov.as_ptr(), iov.len() as libc::c_int))
}

/// # Safety
/// `buf` must be valid for writes of `len` bytes.
pub(crate) unsafe fn recv(
    fd: RawFd,
    buf: *mut u8,
    len: usize,
    flags: libc::c_int,
) -> io::Result<usize> {
    cvt(libc::recv(fd, buf.cast(), len, flags))
}

/// # Safety
/// `buf` must be valid for reads of `len` bytes.
pub(crate) unsafe fn send(
    fd: RawFd,
    buf: *const u8,
    len: usize,
    flags: libc::c_int,
) -> io::Result<usize> {
    cvt(libc::send(fd, buf.cast(), len, flags | SEND_FLAGS))
}

/// # Safety
/// `buf` must be valid for writes of `buf.len()` bytes, `addr` and `addrlen`
/// must point to writable address storage.
pub(crate) unsafe fn recvfrom(
    fd: RawFd,
    buf: &mut [u8],
    flags: libc::c_int,
    addr: *mut libc::sockaddr_storage,
    addrlen: *mut libc::socklen_t,
) -> io::Result<usize> {
    cvt(libc::recvfrom(
        fd,
        buf.as_mut_ptr().cast(),
        buf.len(),
        flags,
        addr.cast(),
        addrlen,
    ))
}

/// # Safety
/// `addr` must point to `addrlen` readable bytes.
pub(crate) unsafe fn sendto(
    fd: RawFd,
    buf: &[u8],
    flags: libc::c_int,
    addr: *const libc::sockaddr,
    addrlen: libc::socklen_t,
) -> io::Result<usize> {
    cvt(libc::sendto(
        fd,
        buf.as_ptr().cast(),
        buf.len(),
        flags | SEND_FLAGS,
        addr,
        addrlen,
    ))
}

/// # Safety
/// Every pointer reachable from `msg` must be valid for the kernel to use.
pub(crate) unsafe fn recvmsg(
    fd: RawFd,
    msg: *mut libc::msghdr,
    flags: libc::c_int,
) -> io::Result<usize> {
    cvt(libc::recvmsg(fd, msg, flags | RECV_MSG_FLAGS))
}

/// # Safety
/// Every pointer reachable from `msg` must be valid for the kernel to use.
pub(crate) unsafe fn sendmsg(
    fd: RawFd,
    msg: *const libc::msghdr,
    flags: libc::c_int,
) -> io::Result<usize> {
    cvt(libc::sendmsg(fd, msg, flags | SEND_FLAGS))
}

// A peer that went away must surface as EPIPE, not kill the process.
#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

// Received descriptors must not leak into exec'd children.
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
const RECV_MSG_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
const RECV_MSG_FLAGS: libc::c_int = 0;
