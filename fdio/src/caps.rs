/// Platform features the dispatcher relies on.
///
/// Operations that need a missing feature fail with
/// [`Error::Unsupported`](crate::Error::Unsupported) before any system call
/// is made. [`Capabilities::detect`] reports what the build target offers;
/// embedders may narrow it through the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `readv`, `writev`, `recvmsg` and `sendmsg` are available.
    pub vectored_io: bool,
    /// Descriptors can be passed as `SCM_RIGHTS` ancillary data.
    pub fd_passing: bool,
}

impl Capabilities {
    /// Capabilities of the current target.
    pub const fn detect() -> Self {
        Self {
            vectored_io: cfg!(unix),
            fd_passing: cfg!(any(
                target_os = "linux",
                target_os = "android",
                target_os = "freebsd",
                target_os = "dragonfly",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "macos",
                target_os = "ios",
            )),
        }
    }

    /// No optional features at all.
    pub const fn none() -> Self {
        Self {
            vectored_io: false,
            fd_passing: false,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::detect()
    }
}
