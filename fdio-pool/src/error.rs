use std::any::Any;
use std::io;

/// Returned by an [`Executor`] that refuses a unit of work.
///
/// [`Executor`]: crate::Executor
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("executor rejected work: {reason}")]
pub struct Rejected {
    reason: &'static str,
}

impl Rejected {
    /// Create a new [`Rejected`] with a static reason.
    pub const fn new(reason: &'static str) -> Self {
        Self { reason }
    }

    pub(crate) const fn shutting_down() -> Self {
        Self::new("pool is shutting down")
    }

    pub(crate) const fn no_workers() -> Self {
        Self::new("no worker thread could be started")
    }

    /// Returns the reason the work was rejected.
    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

/// [`JobError`] indicates that a job did not produce a value.
///
/// A job fails when the executor rejects it, when the executor drops it
/// without running it, or when the job itself panics. Callers can tell these
/// apart with [`JobError::is_rejected`], [`JobError::is_dropped`] and
/// [`JobError::is_panic`].
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct JobError {
    kind: JobErrorKind,
}

#[derive(Debug, thiserror::Error)]
enum JobErrorKind {
    #[error(transparent)]
    Rejected(Rejected),
    #[error("job was dropped before it ran")]
    Dropped,
    #[error("job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub(crate) fn rejected(rejected: Rejected) -> Self {
        Self {
            kind: JobErrorKind::Rejected(rejected),
        }
    }

    pub(crate) fn dropped() -> Self {
        Self {
            kind: JobErrorKind::Dropped,
        }
    }

    pub(crate) fn panicked(payload: Box<dyn Any + Send + 'static>) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_owned()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self {
            kind: JobErrorKind::Panicked(message),
        }
    }

    /// Returns `true` if the executor refused the job.
    pub fn is_rejected(&self) -> bool {
        matches!(self.kind, JobErrorKind::Rejected(_))
    }

    /// Returns `true` if the job was dropped without running.
    pub fn is_dropped(&self) -> bool {
        matches!(self.kind, JobErrorKind::Dropped)
    }

    /// Returns `true` if the job panicked.
    pub fn is_panic(&self) -> bool {
        matches!(self.kind, JobErrorKind::Panicked(_))
    }
}

impl From<JobError> for io::Error {
    fn from(value: JobError) -> Self {
        io::Error::new(io::ErrorKind::Other, value)
    }
}
