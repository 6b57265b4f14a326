bitflags::bitflags! {
    /// Flags passed through to the socket calls.
    ///
    /// Bits outside the named constants are forwarded untouched; use
    /// [`MsgFlags::from_bits_retain`] to pass platform specific flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MsgFlags: libc::c_int {
        /// Send or receive out-of-band data.
        const OOB = libc::MSG_OOB;
        /// Receive data without removing it from the queue.
        const PEEK = libc::MSG_PEEK;
        /// Bypass routing, send only to directly connected hosts.
        const DONTROUTE = libc::MSG_DONTROUTE;
    }
}

impl Default for MsgFlags {
    fn default() -> Self {
        MsgFlags::empty()
    }
}
