use std::io;

use fdio_pool::JobError;

/// Convenience alias for results produced by this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure conditions surfaced by descriptor operations.
///
/// "Would block" never appears here: it is absorbed by the retry loop.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An offset or length failed validation. No system call was made.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The operation needs a platform feature that is not available.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
    /// The system call failed. The OS error is kept verbatim.
    #[error(transparent)]
    System(#[from] io::Error),
    /// The blocking executor did not produce a result for the job.
    #[error("blocking job failed: {0}")]
    Job(#[from] JobError),
    /// The buffer is leased by an in-flight operation that conflicts with
    /// the requested access.
    #[error("buffer is in use by an in-flight operation")]
    Busy,
    /// The operation was cancelled before it completed.
    #[error("operation was cancelled")]
    Cancelled,
}

impl Error {
    /// Returns the underlying OS error code, if the failure came from a
    /// system call.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::System(err) => err.raw_os_error(),
            _ => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::System(err) => err,
            Error::InvalidArgument(_) => io::Error::new(io::ErrorKind::InvalidInput, value),
            Error::Unsupported(_) => io::Error::new(io::ErrorKind::Unsupported, value),
            Error::Job(err) => err.into(),
            Error::Busy => io::Error::new(io::ErrorKind::ResourceBusy, value),
            Error::Cancelled => io::Error::new(io::ErrorKind::Interrupted, value),
        }
    }
}
