//! `SCM_RIGHTS` control messages.
//!
//! Outgoing descriptors are packed into a single control message. Incoming
//! control data is walked with the `CMSG_*` macros and every `SCM_RIGHTS`
//! message contributes its descriptors in the order the kernel laid them out.
use std::mem;
use std::os::fd::RawFd;

use log::warn;

const LOG: &str = "fdio::ancillary";

const FD_SIZE: usize = mem::size_of::<libc::c_int>();

/// Aligned storage for control messages.
#[derive(Debug)]
pub(crate) struct ControlBuffer {
    // u64 words keep the storage aligned for `cmsghdr`.
    words: Vec<u64>,
    len: usize,
}

impl ControlBuffer {
    fn zeroed(len: usize) -> Self {
        let words = vec![0u64; (len + mem::size_of::<u64>() - 1) / mem::size_of::<u64>()];
        Self { words, len }
    }

    /// Room for up to `max_fds` received descriptors.
    pub(crate) fn for_receive(max_fds: usize) -> Self {
        if max_fds == 0 {
            return Self::zeroed(0);
        }
        Self::zeroed(space_for(max_fds))
    }

    /// One `SCM_RIGHTS` message carrying `fds`, or nothing when `fds` is empty.
    pub(crate) fn with_fds(fds: &[RawFd]) -> Self {
        if fds.is_empty() {
            return Self::zeroed(0);
        }
        let mut control = Self::zeroed(space_for(fds.len()));
        // Safety: an all-zero msghdr is valid; only the control fields are
        // used by the CMSG_* macros below.
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_control = control.as_mut_ptr();
        msg.msg_controllen = control.len as _;
        // Safety: the control buffer is aligned and at least CMSG_SPACE bytes
        // long, so the first header and its payload fit.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN((fds.len() * FD_SIZE) as libc::c_uint) as _;
            std::ptr::copy_nonoverlapping(
                fds.as_ptr().cast::<u8>(),
                libc::CMSG_DATA(cmsg),
                fds.len() * FD_SIZE,
            );
        }
        control
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut libc::c_void {
        if self.len == 0 {
            std::ptr::null_mut()
        } else {
            self.words.as_mut_ptr().cast()
        }
    }
}

fn space_for(fds: usize) -> usize {
    // Safety: CMSG_SPACE is pure arithmetic on its argument.
    unsafe { libc::CMSG_SPACE((fds * FD_SIZE) as libc::c_uint) as usize }
}

/// A message header over `iov`, `control` and an optional socket address.
pub(crate) fn msghdr(
    iov: &mut [libc::iovec],
    control: &mut ControlBuffer,
    name: Option<(*mut libc::c_void, libc::socklen_t)>,
) -> libc::msghdr {
    // Safety: an all-zero msghdr is a valid empty header.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = iov.as_mut_ptr();
    msg.msg_iovlen = iov.len() as _;
    msg.msg_control = control.as_mut_ptr();
    msg.msg_controllen = control.len() as _;
    if let Some((name, namelen)) = name {
        msg.msg_name = name;
        msg.msg_namelen = namelen;
    }
    msg
}

/// Collect descriptors from every `SCM_RIGHTS` message in `msg`.
///
/// # Safety
/// `msg` must have been filled in by a successful `recvmsg` and its control
/// buffer must still be alive.
pub(crate) unsafe fn received_fds(msg: &libc::msghdr) -> Vec<RawFd> {
    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        warn!(target: LOG, "ancillary.truncated controllen={}", msg.msg_controllen);
    }
    let mut fds = Vec::new();
    if msg.msg_control.is_null() || msg.msg_controllen == 0 {
        return fds;
    }
    let header = libc::CMSG_LEN(0) as usize;
    let mut cmsg = libc::CMSG_FIRSTHDR(msg);
    while !cmsg.is_null() {
        if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
            let data = libc::CMSG_DATA(cmsg);
            let count = ((*cmsg).cmsg_len as usize).saturating_sub(header) / FD_SIZE;
            fds.reserve(count);
            for i in 0..count {
                let fd = std::ptr::read_unaligned(data.add(i * FD_SIZE).cast::<libc::c_int>());
                fds.push(fd);
            }
        }
        cmsg = libc::CMSG_NXTHDR(msg, cmsg);
    }
    fds
}

#[cfg(test)]
mod tests {
    use super::{msghdr, received_fds, ControlBuffer};

    #[test]
    fn empty_fd_list_has_no_control_data() {
        let mut control = ControlBuffer::with_fds(&[]);
        assert_eq!(control.len(), 0);
        assert!(control.as_mut_ptr().is_null());
    }

    #[test]
    fn packed_fds_parse_back_in_order() {
        let mut control = ControlBuffer::with_fds(&[7, 3, 11]);
        assert!(control.len() >= 3 * std::mem::size_of::<libc::c_int>());
        let msg = msghdr(&mut [], &mut control, None);
        let fds = unsafe { received_fds(&msg) };
        assert_eq!(fds, vec![7, 3, 11]);
    }

    #[test]
    fn receive_space_grows_with_fd_count() {
        assert_eq!(ControlBuffer::for_receive(0).len(), 0);
        assert!(ControlBuffer::for_receive(4).len() < ControlBuffer::for_receive(256).len());
    }
}
