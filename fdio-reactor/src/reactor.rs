//! [`Reactor`] waits on an OS poller from a dedicated thread and wakes the
//! tasks that registered interest in a descriptor.
//!
//! Registrations are oneshot: each readiness event disarms the descriptor in
//! the poller. Waiters that were not satisfied by the event are re-armed
//! before the lock is released, and a descriptor without waiters is removed
//! from the poller entirely.
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, JoinHandle};

use log::{debug, error, trace, warn};
use parking_lot::Mutex;
use polling::{Event, Events, Poller};

use crate::{Interest, Readiness};

const LOG: &str = "fdio_reactor::reactor";

/// [`Reactor`] implements [`Readiness`] on top of [`polling::Poller`].
///
/// The reactor is cheap to clone. The polling thread stops once the last
/// clone is dropped; waiters still registered at that point resolve with an
/// error.
#[derive(Clone)]
pub struct Reactor {
    shared: Arc<Shared>,
    _owner: Arc<Owner>,
}

struct Shared {
    poller: Poller,
    sources: Mutex<HashMap<RawFd, Source>>,
    shutdown: AtomicBool,
}

#[derive(Default)]
struct Source {
    readers: Vec<Arc<Waiter>>,
    writers: Vec<Arc<Waiter>>,
    /// The descriptor has been added to the poller.
    registered: bool,
    /// Interest currently armed in the poller.
    armed: Option<Interest>,
}

impl Source {
    fn wanted(&self) -> Interest {
        Interest::from_flags(!self.readers.is_empty(), !self.writers.is_empty())
    }

    fn remove(&mut self, waiter: &Arc<Waiter>) {
        self.readers.retain(|w| !Arc::ptr_eq(w, waiter));
        self.writers.retain(|w| !Arc::ptr_eq(w, waiter));
    }
}

struct Waiter {
    state: Mutex<WaiterState>,
}

enum WaiterState {
    Waiting(Waker),
    Fired,
    Shutdown,
}

impl Waiter {
    fn new(waker: Waker) -> Self {
        Self {
            state: Mutex::new(WaiterState::Waiting(waker)),
        }
    }

    fn settle(&self, next: WaiterState) -> Option<Waker> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, next) {
            WaiterState::Waiting(waker) => Some(waker),
            prev => {
                *state = prev;
                None
            }
        }
    }
}

struct Owner {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Reactor {
    /// Create a new [`Reactor`] and start its polling thread.
    pub fn new() -> io::Result<Self> {
        let shared = Arc::new(Shared {
            poller: Poller::new()?,
            sources: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        });
        let worker = shared.clone();
        let thread = thread::Builder::new()
            .name("fdio-reactor".to_owned())
            .spawn(move || worker.run())?;
        debug!(target: LOG, "reactor.start");
        Ok(Self {
            _owner: Arc::new(Owner {
                shared: shared.clone(),
                thread: Mutex::new(Some(thread)),
            }),
            shared,
        })
    }

    /// Number of descriptors with at least one waiter.
    pub fn registered(&self) -> usize {
        self.shared.sources.lock().len()
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("registered", &self.registered())
            .finish()
    }
}

impl Readiness for Reactor {
    type Ready = Ready;

    fn ready(&self, fd: RawFd, interest: Interest) -> Ready {
        Ready {
            shared: self.shared.clone(),
            fd,
            interest,
            waiter: None,
        }
    }
}

impl Drop for Owner {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Err(err) = self.shared.poller.notify() {
            warn!(target: LOG, "shutdown.notify.failed {}", err);
        }
        if let Some(thread) = self.thread.lock().take() {
            if thread.thread().id() != thread::current().id() && thread.join().is_err() {
                error!(target: LOG, "shutdown.join.panicked");
            }
        }
    }
}

fn shutdown_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "reactor has shut down")
}

fn poll_event(fd: RawFd, interest: Interest) -> Event {
    let key = fd as usize;
    match (interest.is_readable(), interest.is_writable()) {
        (true, true) => Event::all(key),
        (true, false) => Event::readable(key),
        (false, true) => Event::writable(key),
        (false, false) => Event::none(key),
    }
}

impl Shared {
    fn register(&self, fd: RawFd, interest: Interest, waiter: &Arc<Waiter>) -> io::Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(shutdown_error());
        }
        let mut sources = self.sources.lock();
        let source = sources.entry(fd).or_default();
        if interest.is_readable() {
            source.readers.push(waiter.clone());
        }
        if interest.is_writable() {
            source.writers.push(waiter.clone());
        }
        if let Err(err) = self.arm(fd, source) {
            source.remove(waiter);
            if source.wanted().is_empty() {
                sources.remove(&fd);
            }
            return Err(err);
        }
        trace!(target: LOG, "register fd={} interest={:?}", fd, interest);
        Ok(())
    }

    fn deregister(&self, fd: RawFd, waiter: &Arc<Waiter>) {
        let mut sources = self.sources.lock();
        let Some(source) = sources.get_mut(&fd) else {
            return;
        };
        source.remove(waiter);
        if source.wanted().is_empty() {
            if let Some(source) = sources.remove(&fd) {
                self.forget(fd, &source);
            }
        }
        trace!(target: LOG, "deregister fd={}", fd);
    }

    /// Bring the poller in line with the waiters of `source`.
    fn arm(&self, fd: RawFd, source: &mut Source) -> io::Result<()> {
        let wanted = source.wanted();
        if source.armed == Some(wanted) {
            return Ok(());
        }
        let event = poll_event(fd, wanted);
        if source.registered {
            // Safety: the caller guarantees `fd` is open while it waits on it.
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            match self.poller.modify(&borrowed, event) {
                // The descriptor was closed and its number reused since it
                // was added, so the kernel already dropped the registration.
                Err(err) if err.raw_os_error() == Some(libc::ENOENT) => self.add(fd, event)?,
                res => res?,
            }
        } else {
            self.add(fd, event)?;
            source.registered = true;
        }
        source.armed = Some(wanted);
        Ok(())
    }

    fn add(&self, fd: RawFd, event: Event) -> io::Result<()> {
        // Safety: the descriptor is removed from the poller before the last
        // waiter for it goes away; the caller keeps it open until then.
        unsafe { self.poller.add(fd, event) }
    }

    fn forget(&self, fd: RawFd, source: &Source) {
        if source.registered {
            // Safety: see `arm`.
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            if let Err(err) = self.poller.delete(&borrowed) {
                trace!(target: LOG, "delete.failed fd={} {}", fd, err);
            }
        }
    }

    fn run(&self) {
        let mut events = Events::new();
        let mut wakers = Vec::new();
        loop {
            events.clear();
            match self.poller.wait(&mut events, None) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!(target: LOG, "poll.failed {}", err);
                    break;
                }
            }
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            {
                let mut sources = self.sources.lock();
                for event in events.iter() {
                    let fd = event.key as RawFd;
                    let Some(source) = sources.get_mut(&fd) else {
                        continue;
                    };
                    source.armed = None;
                    if event.readable {
                        wakers.extend(
                            source
                                .readers
                                .drain(..)
                                .filter_map(|w| w.settle(WaiterState::Fired)),
                        );
                    }
                    if event.writable {
                        wakers.extend(
                            source
                                .writers
                                .drain(..)
                                .filter_map(|w| w.settle(WaiterState::Fired)),
                        );
                    }
                    trace!(
                        target: LOG,
                        "event fd={} readable={} writable={}",
                        fd,
                        event.readable,
                        event.writable
                    );

                    if source.wanted().is_empty() {
                        if let Some(source) = sources.remove(&fd) {
                            self.forget(fd, &source);
                        }
                    } else if let Err(err) = self.arm(fd, source) {
                        // Let the remaining waiters retry; their next attempt
                        // surfaces the descriptor's real error.
                        warn!(target: LOG, "rearm.failed fd={} {}", fd, err);
                        let source = sources.remove(&fd).unwrap_or_default();
                        for w in source.readers.iter().chain(source.writers.iter()) {
                            wakers.extend(w.settle(WaiterState::Fired));
                        }
                    }
                }
            }

            for waker in wakers.drain(..) {
                waker.wake();
            }
        }

        let sources = std::mem::take(&mut *self.sources.lock());
        for (_, source) in sources {
            for w in source.readers.iter().chain(source.writers.iter()) {
                if let Some(waker) = w.settle(WaiterState::Shutdown) {
                    waker.wake();
                }
            }
        }
        debug!(target: LOG, "reactor.stop");
    }
}

/// A future that resolves when a descriptor becomes ready.
///
/// Returned by [`Reactor::ready`](Readiness::ready).
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Ready {
    shared: Arc<Shared>,
    fd: RawFd,
    interest: Interest,
    waiter: Option<Arc<Waiter>>,
}

impl fmt::Debug for Ready {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ready")
            .field("fd", &self.fd)
            .field("interest", &self.interest)
            .field("registered", &self.waiter.is_some())
            .finish()
    }
}

impl Future for Ready {
    type Output = io::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if let Some(waiter) = &this.waiter {
            let mut state = waiter.state.lock();
            return match &mut *state {
                WaiterState::Fired => Poll::Ready(Ok(())),
                WaiterState::Shutdown => Poll::Ready(Err(shutdown_error())),
                WaiterState::Waiting(waker) => {
                    if !waker.will_wake(cx.waker()) {
                        *waker = cx.waker().clone();
                    }
                    Poll::Pending
                }
            };
        }

        let waiter = Arc::new(Waiter::new(cx.waker().clone()));
        this.shared.register(this.fd, this.interest, &waiter)?;
        this.waiter = Some(waiter);
        Poll::Pending
    }
}

impl Drop for Ready {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            if matches!(*waiter.state.lock(), WaiterState::Waiting(_)) {
                self.shared.deregister(self.fd, &waiter);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    use futures::executor::block_on;
    use futures::FutureExt;

    use super::Reactor;
    use crate::{Interest, Readiness};

    fn init_logging() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Trace)
            .is_test(true)
            .try_init();
    }

    #[test]
    fn fresh_socket_is_writable() {
        init_logging();
        let reactor = Reactor::new().unwrap();
        let (a, _b) = UnixStream::pair().unwrap();
        block_on(reactor.ready(a.as_raw_fd(), Interest::WRITABLE)).unwrap();
        assert_eq!(reactor.registered(), 0);
    }

    #[test]
    fn readable_after_peer_writes() {
        init_logging();
        let reactor = Reactor::new().unwrap();
        let (a, mut b) = UnixStream::pair().unwrap();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            b.write_all(b"x").unwrap();
            b
        });
        block_on(reactor.ready(a.as_raw_fd(), Interest::READABLE)).unwrap();
        drop(writer.join().unwrap());
    }

    #[test]
    fn dropping_ready_deregisters() {
        init_logging();
        let reactor = Reactor::new().unwrap();
        let (a, _b) = UnixStream::pair().unwrap();
        let mut ready = reactor.ready(a.as_raw_fd(), Interest::READABLE);
        assert!((&mut ready).now_or_never().is_none());
        assert_eq!(reactor.registered(), 1);
        drop(ready);
        assert_eq!(reactor.registered(), 0);
    }

    #[test]
    fn reader_and_writer_share_a_descriptor() {
        init_logging();
        let reactor = Reactor::new().unwrap();
        let (a, _b) = UnixStream::pair().unwrap();
        let mut read = reactor.ready(a.as_raw_fd(), Interest::READABLE);
        assert!((&mut read).now_or_never().is_none());
        block_on(reactor.ready(a.as_raw_fd(), Interest::WRITABLE)).unwrap();
        assert_eq!(reactor.registered(), 1);
        drop(read);
        assert_eq!(reactor.registered(), 0);
    }

    #[test]
    fn invalid_descriptor_fails_registration() {
        init_logging();
        let reactor = Reactor::new().unwrap();
        assert!(block_on(reactor.ready(-1, Interest::READABLE)).is_err());
        assert_eq!(reactor.registered(), 0);
    }
}
