use std::fmt;
use std::future::Future;
use std::io;
use std::os::fd::RawFd;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use fdio_reactor::Readiness;
use futures_core::FusedFuture;
use log::trace;

use super::Syscall;
use crate::{Error, Result};

const LOG: &str = "fdio::retry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Attempt,
    Suspended,
    Cancelled,
    Done,
}

pin_project_lite::pin_project! {
    /// A system call on a non-blocking descriptor, retried until it stops
    /// reporting would-block.
    ///
    /// The call is first attempted when the future is polled. A would-block
    /// result suspends the future on a readiness notification, after which the
    /// call is attempted again from scratch. `EINTR` re-attempts immediately.
    ///
    /// Dropping the future, or calling [`Retry::cancel`], withdraws the
    /// readiness registration and releases the call's operands.
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    pub struct Retry<'a, R, S>
    where
        R: Readiness,
    {
        readiness: &'a R,
        fd: RawFd,
        syscall: Option<S>,
        state: State,
        #[pin]
        ready: Option<R::Ready>,
    }
}

impl<'a, R, S> Retry<'a, R, S>
where
    R: Readiness,
    S: Syscall,
{
    /// Prepare `syscall` against `fd`. Nothing happens until the first poll.
    pub fn new(readiness: &'a R, fd: RawFd, syscall: S) -> Self {
        Self {
            readiness,
            fd,
            syscall: Some(syscall),
            state: State::Attempt,
            ready: None,
        }
    }

    /// Stop retrying.
    ///
    /// Any pending readiness registration is dropped along with the call's
    /// operands. Subsequent polls resolve with [`Error::Cancelled`]. Has no
    /// effect once the call completed.
    pub fn cancel(self: Pin<&mut Self>) {
        let mut this = self.project();
        if *this.state == State::Done {
            return;
        }
        trace!(target: LOG, "retry.cancel fd={}", this.fd);
        *this.state = State::Cancelled;
        this.ready.set(None);
        this.syscall.take();
    }

    /// Returns `true` while the call is waiting for readiness.
    pub fn is_suspended(&self) -> bool {
        self.state == State::Suspended
    }

    /// Returns `true` once [`Retry::cancel`] took effect.
    pub fn is_cancelled(&self) -> bool {
        self.state == State::Cancelled
    }
}

impl<R, S> Future for Retry<'_, R, S>
where
    R: Readiness,
    S: Syscall,
{
    type Output = Result<S::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();
        loop {
            match *this.state {
                State::Cancelled => return Poll::Ready(Err(Error::Cancelled)),
                State::Done => panic!("Retry polled after completion"),
                State::Suspended => {
                    let result = match this.ready.as_mut().as_pin_mut() {
                        Some(ready) => ready!(ready.poll(cx)),
                        None => Ok(()),
                    };
                    this.ready.set(None);
                    if let Err(err) = result {
                        trace!(target: LOG, "retry.ready_failed fd={} err={}", this.fd, err);
                        *this.state = State::Done;
                        this.syscall.take();
                        return Poll::Ready(Err(Error::System(err)));
                    }
                    trace!(target: LOG, "retry.ready fd={}", this.fd);
                    *this.state = State::Attempt;
                }
                State::Attempt => {
                    let Some(syscall) = this.syscall.as_mut() else {
                        *this.state = State::Done;
                        return Poll::Ready(Err(Error::Cancelled));
                    };
                    match syscall.attempt(*this.fd) {
                        Ok(output) => {
                            trace!(target: LOG, "retry.complete fd={}", this.fd);
                            *this.state = State::Done;
                            this.syscall.take();
                            return Poll::Ready(Ok(output));
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                            trace!(target: LOG, "retry.would_block fd={}", this.fd);
                            let interest = syscall.interest();
                            this.ready
                                .set(Some(this.readiness.ready(*this.fd, interest)));
                            *this.state = State::Suspended;
                        }
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                            trace!(target: LOG, "retry.interrupted fd={}", this.fd);
                        }
                        Err(err) => {
                            trace!(target: LOG, "retry.failed fd={} err={}", this.fd, err);
                            *this.state = State::Done;
                            this.syscall.take();
                            return Poll::Ready(Err(Error::System(err)));
                        }
                    }
                }
            }
        }
    }
}

impl<R, S> FusedFuture for Retry<'_, R, S>
where
    R: Readiness,
    S: Syscall,
{
    fn is_terminated(&self) -> bool {
        matches!(self.state, State::Done | State::Cancelled)
    }
}

impl<R, S> fmt::Debug for Retry<'_, R, S>
where
    R: Readiness,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("fd", &self.fd)
            .field("state", &self.state)
            .finish()
    }
}
