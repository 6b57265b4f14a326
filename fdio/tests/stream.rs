#![cfg(unix)]

use std::io::IoSlice;
use std::os::unix::net::UnixStream;

use fdio::{Descriptor, Error};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

mod util;

use util::TestResult;

#[test]
fn stream_round_trip() -> TestResult {
    util::with_test_env(|dispatcher| async move {
        let (a, b) = UnixStream::pair()?;
        let mut writer = dispatcher.stream(util::nonblocking(&a)?)?;
        let mut reader = dispatcher.stream(util::nonblocking(&b)?)?;

        let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 253) as u8).collect();
        let expected = payload.clone();
        let write = async {
            writer.write_all(&payload).await?;
            writer.shutdown().await?;
            Ok::<_, std::io::Error>(())
        };
        let read = async {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).await?;
            Ok::<_, std::io::Error>(out)
        };
        let ((), out) = futures_util::future::try_join(write, read).await?;
        assert_eq!(out, expected);
        Ok(())
    })
}

#[test]
fn stream_vectored_write() -> TestResult {
    util::with_test_env(|dispatcher| async move {
        let (a, b) = UnixStream::pair()?;
        let mut writer = dispatcher.stream(util::nonblocking(&a)?)?;
        let mut reader = dispatcher.stream(util::nonblocking(&b)?)?;

        let bufs = [IoSlice::new(b"one "), IoSlice::new(b"two")];
        let n = writer.write_vectored(&bufs).await?;
        assert_eq!(n, 7);

        let mut out = [0u8; 7];
        reader.read_exact(&mut out).await?;
        assert_eq!(&out, b"one two");
        Ok(())
    })
}

#[test]
fn stream_rejects_blocking_descriptors() -> TestResult {
    util::with_test_env(|dispatcher| async move {
        let (a, _b) = UnixStream::pair()?;
        let fd = util::blocking(&a)?;
        assert!(matches!(dispatcher.stream(fd), Err(Error::InvalidArgument(_))));

        let fd = fd.set_nonblocking(true)?;
        let stream = dispatcher.stream(fd)?;
        assert_eq!(stream.descriptor(), Descriptor::of(&a)?);
        Ok(())
    })
}
