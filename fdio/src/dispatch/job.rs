use std::io;
use std::os::fd::RawFd;

use fdio_pool::Executor;
use log::trace;

use super::Syscall;
use crate::{Error, Result};

const LOG: &str = "fdio::job";

/// Run `syscall` against a blocking descriptor on `executor`.
///
/// The syscall, and every buffer lease it holds, moves into the job and is
/// released by the worker once the call returns. Dropping the returned future
/// abandons the result but never frees memory the kernel is still using.
pub(crate) async fn blocking<E, S>(executor: &E, fd: RawFd, mut syscall: S) -> Result<S::Output>
where
    E: Executor + ?Sized,
    S: Syscall + Send + 'static,
    S::Output: Send + 'static,
{
    trace!(target: LOG, "job.dispatch fd={}", fd);
    let handle = fdio_pool::spawn(executor, move || loop {
        match syscall.attempt(fd) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    });
    match handle.await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => {
            trace!(target: LOG, "job.failed fd={} err={}", fd, err);
            Err(Error::System(err))
        }
        Err(err) => {
            trace!(target: LOG, "job.lost fd={} err={}", fd, err);
            Err(Error::Job(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::os::fd::RawFd;
    use std::sync::Arc;

    use fdio_pool::{Executor, Rejected, Work};
    use fdio_reactor::Interest;
    use futures::executor::block_on;

    use super::blocking;
    use crate::dispatch::Syscall;
    use crate::Error;

    struct Inline;

    impl Executor for Inline {
        fn execute(&self, work: Work) -> Result<(), Rejected> {
            work();
            Ok(())
        }
    }

    struct Closed;

    impl Executor for Closed {
        fn execute(&self, _: Work) -> Result<(), Rejected> {
            Err(Rejected::new("closed"))
        }
    }

    struct Flaky {
        interrupts: usize,
        operand: Arc<()>,
    }

    impl Syscall for Flaky {
        type Output = usize;

        fn interest(&self) -> Interest {
            Interest::READABLE
        }

        fn attempt(&mut self, fd: RawFd) -> io::Result<usize> {
            if self.interrupts > 0 {
                self.interrupts -= 1;
                return Err(io::Error::from_raw_os_error(libc::EINTR));
            }
            if fd < 0 {
                return Err(io::Error::from_raw_os_error(libc::EBADF));
            }
            Ok(Arc::strong_count(&self.operand))
        }
    }

    #[test]
    fn interrupted_jobs_are_retried_on_the_worker() {
        let operand = Arc::new(());
        let syscall = Flaky {
            interrupts: 2,
            operand: operand.clone(),
        };
        assert_eq!(block_on(blocking(&Inline, 3, syscall)).unwrap(), 2);
        assert_eq!(Arc::strong_count(&operand), 1);
    }

    #[test]
    fn system_errors_pass_through() {
        let syscall = Flaky {
            interrupts: 0,
            operand: Arc::new(()),
        };
        let err = block_on(blocking(&Inline, -1, syscall)).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn rejected_jobs_surface_as_job_errors() {
        let syscall = Flaky {
            interrupts: 0,
            operand: Arc::new(()),
        };
        let err = block_on(blocking(&Closed, 0, syscall)).unwrap_err();
        assert!(matches!(err, Error::Job(ref job) if job.is_rejected()));
    }
}
