use std::io;
use std::time::Duration;

use fdio_pool::BlockingPool;
use fdio_reactor::Reactor;
use log::debug;

use crate::dispatcher::DEFAULT_MAX_ANCILLARY_FDS;
use crate::{Capabilities, Dispatcher};

const LOG: &str = "fdio::config";

/// Builder for a [`Dispatcher`] backed by a [`Reactor`] and a
/// [`BlockingPool`].
///
/// ```no_run
/// # fn main() -> std::io::Result<()> {
/// let dispatcher = fdio::Dispatcher::builder()
///     .max_blocking_threads(4)
///     .thread_name("io-blocking")
///     .build()?;
/// # drop(dispatcher);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Builder {
    pool: fdio_pool::Builder,
    max_ancillary_fds: usize,
    capabilities: Capabilities,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            pool: BlockingPool::builder().thread_name("fdio-blocking"),
            max_ancillary_fds: DEFAULT_MAX_ANCILLARY_FDS,
            capabilities: Capabilities::detect(),
        }
    }
}

impl Builder {
    /// Threads the blocking pool keeps alive while idle.
    pub fn min_blocking_threads(mut self, n: usize) -> Self {
        self.pool = self.pool.min_threads(n);
        self
    }

    /// Upper bound on blocking pool threads.
    pub fn max_blocking_threads(mut self, n: usize) -> Self {
        self.pool = self.pool.max_threads(n);
        self
    }

    /// Name given to blocking pool threads.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.pool = self.pool.thread_name(name);
        self
    }

    /// How long a surplus blocking thread waits for work before exiting.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool = self.pool.idle_timeout(timeout);
        self
    }

    /// Most descriptors accepted by one `recv_msg`.
    pub fn max_ancillary_fds(mut self, max: usize) -> Self {
        self.max_ancillary_fds = max;
        self
    }

    /// Override the detected platform capabilities.
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Start the reactor and the blocking pool.
    pub fn build(self) -> io::Result<Dispatcher> {
        debug!(
            target: LOG,
            "dispatcher.build max_ancillary_fds={} capabilities={:?}",
            self.max_ancillary_fds,
            self.capabilities
        );
        let executor = self.pool.build()?;
        let readiness = Reactor::new()?;
        Ok(Dispatcher::from_parts(readiness, executor)
            .with_capabilities(self.capabilities)
            .with_max_ancillary_fds(self.max_ancillary_fds))
    }
}
