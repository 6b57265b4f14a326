#![cfg(unix)]
#![allow(dead_code)]

use std::future::Future;
use std::ops;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fdio::{Descriptor, Dispatcher};

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub fn with_test_env<U, F>(f: impl FnOnce(Dispatcher) -> F) -> TestResult<U>
where
    F: Future<Output = TestResult<U>>,
{
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .is_test(true)
        .try_init();

    let dispatcher = Dispatcher::builder()
        .max_blocking_threads(4)
        .thread_name("fdio-test-blocking")
        .build()?;
    futures::executor::block_on((f)(dispatcher))
}

/// Classify `io` after switching it to non-blocking mode.
pub fn nonblocking<T: AsRawFd>(io: &T) -> TestResult<Descriptor> {
    Ok(Descriptor::of(io)?.set_nonblocking(true)?)
}

/// Classify `io` after switching it to blocking mode.
pub fn blocking<T: AsRawFd>(io: &T) -> TestResult<Descriptor> {
    Ok(Descriptor::of(io)?.set_nonblocking(false)?)
}

/// Spin until `cond` holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// [`ThreadNameTestDir`] creates a test directory under /tmp
/// using the current thread name. This is nice for tests
/// because cargo test will name the thread with the name of
/// the test.
///
/// The directory is automatically cleaned up on drop.
#[derive(Debug, Clone)]
pub struct ThreadNameTestDir {
    path: PathBuf,
}

impl ThreadNameTestDir {
    pub fn new() -> Self {
        let thread = std::thread::current();
        let thread_name = thread.name().expect("no thread name");
        let sanitized = thread_name.replace("::", "-");
        let path = std::env::temp_dir()
            .join(format!("fdio-test-{}", std::process::id()))
            .join(sanitized);
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).expect("could not create directory");
        Self { path }
    }
}

impl Default for ThreadNameTestDir {
    fn default() -> Self {
        Self::new()
    }
}

impl ops::Deref for ThreadNameTestDir {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.path
    }
}

impl AsRef<Path> for ThreadNameTestDir {
    fn as_ref(&self) -> &Path {
        self.path.as_path()
    }
}

impl Drop for ThreadNameTestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}
