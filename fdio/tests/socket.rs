#![cfg(unix)]

use std::future::Future;
use std::io::Write;
use std::net::UdpSocket;
use std::os::unix::net::UnixStream;
use std::pin::pin;
use std::task::Context;
use std::time::{Duration, Instant};

use fdio::{Buffer, MsgFlags};
use socket2::SockAddr;

mod util;

use util::TestResult;

#[test]
fn send_recv() -> TestResult {
    util::with_test_env(|dispatcher| async move {
        let (a, b) = UnixStream::pair()?;
        let (fa, fb) = (util::nonblocking(&a)?, util::nonblocking(&b)?);

        let src = Buffer::from(&b"hello"[..]);
        let n = dispatcher.send(fa, &src, 0, 5, MsgFlags::empty()).await?;
        // Assert that we sent 5 bytes
        assert_eq!(5, n);

        let dst = Buffer::new(5);
        let n = dispatcher.recv(fb, &dst, 0, 5, MsgFlags::empty()).await?;
        // Assert that we received 5 bytes
        assert_eq!(5, n);
        // Assert that the message is correct
        assert_eq!(dst.to_vec()?, b"hello");
        Ok(())
    })
}

#[test]
fn peek_leaves_data_queued() -> TestResult {
    util::with_test_env(|dispatcher| async move {
        let (a, b) = UnixStream::pair()?;
        let fb = util::nonblocking(&b)?;
        (&a).write_all(b"peekaboo")?;

        let peeked = Buffer::new(4);
        let n = dispatcher.recv(fb, &peeked, 0, 4, MsgFlags::PEEK).await?;
        assert_eq!(n, 4);
        assert_eq!(peeked.to_vec()?, b"peek");

        let all = Buffer::new(8);
        let n = dispatcher.recv(fb, &all, 0, 8, MsgFlags::empty()).await?;
        assert_eq!(n, 8);
        assert_eq!(all.to_vec()?, b"peekaboo");
        Ok(())
    })
}

#[test]
fn recv_suspends_until_data_arrives() -> TestResult {
    util::with_test_env(|dispatcher| async move {
        let (a, b) = UnixStream::pair()?;
        let fb = util::nonblocking(&b)?;

        let delay = Duration::from_millis(100);
        let writer = std::thread::spawn(move || {
            std::thread::sleep(delay);
            (&a).write_all(b"late")
        });

        let start = Instant::now();
        let buf = Buffer::new(16);
        let n = dispatcher.recv(fb, &buf, 0, 16, MsgFlags::empty()).await?;
        assert!(start.elapsed() >= delay);
        assert_eq!(n, 4);
        let mut out = [0u8; 4];
        buf.copy_to_slice(0, &mut out)?;
        assert_eq!(&out, b"late");

        writer.join().expect("writer panicked")?;
        assert_eq!(dispatcher.readiness().registered(), 0);
        Ok(())
    })
}

#[test]
fn dropping_a_suspended_recv_withdraws_it() -> TestResult {
    util::with_test_env(|dispatcher| async move {
        let (a, b) = UnixStream::pair()?;
        let fb = util::nonblocking(&b)?;
        let buf = Buffer::new(4);

        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        {
            let mut recv = pin!(dispatcher.recv(fb, &buf, 0, 4, MsgFlags::empty()));
            assert!(recv.as_mut().poll(&mut cx).is_pending());
            assert_eq!(dispatcher.readiness().registered(), 1);
        }
        assert_eq!(dispatcher.readiness().registered(), 0);
        assert!(!buf.is_busy());

        // The data sent afterwards is still there for the next caller.
        (&a).write_all(b"next")?;
        assert_eq!(dispatcher.recv(fb, &buf, 0, 4, MsgFlags::empty()).await?, 4);
        Ok(())
    })
}

#[test]
fn socket_calls_on_blocking_descriptors() -> TestResult {
    util::with_test_env(|dispatcher| async move {
        let (a, b) = UnixStream::pair()?;
        let (fa, fb) = (util::blocking(&a)?, util::blocking(&b)?);

        let src = Buffer::from(&b"direct"[..]);
        assert_eq!(dispatcher.send(fa, &src, 0, 6, MsgFlags::empty()).await?, 6);
        let dst = Buffer::new(6);
        assert_eq!(dispatcher.recv(fb, &dst, 0, 6, MsgFlags::empty()).await?, 6);
        assert_eq!(dst.to_vec()?, b"direct");
        Ok(())
    })
}

#[test]
fn send_to_recv_from() -> TestResult {
    util::with_test_env(|dispatcher| async move {
        let s1 = UdpSocket::bind("127.0.0.1:0")?;
        let s2 = UdpSocket::bind("127.0.0.1:0")?;
        let (f1, f2) = (util::nonblocking(&s1)?, util::nonblocking(&s2)?);

        // Send hello to s2
        let target = SockAddr::from(s2.local_addr()?);
        let payload = *b"xxhelloxx";
        let n = dispatcher
            .send_to(f1, &payload, 2, 5, &target, MsgFlags::empty())
            .await?;
        assert_eq!(n, 5);

        // Receive hello on s2
        let mut buf = [0u8; 16];
        let (n, addr) = dispatcher
            .recv_from(f2, &mut buf, 1, 8, MsgFlags::empty())
            .await?;
        // Assert that we received 5 bytes
        assert_eq!(n, 5);
        // Assert that we received from the correct address
        assert_eq!(addr.as_socket(), Some(s1.local_addr()?));
        // Assert that the message is correct
        assert_eq!(&buf[1..6], b"hello");
        assert_eq!(buf[0], 0);
        Ok(())
    })
}

#[test]
fn recv_from_suspends_until_a_datagram_arrives() -> TestResult {
    util::with_test_env(|dispatcher| async move {
        let s1 = UdpSocket::bind("127.0.0.1:0")?;
        let s2 = UdpSocket::bind("127.0.0.1:0")?;
        let f2 = util::nonblocking(&s2)?;
        let target = s2.local_addr()?;
        let origin = s1.local_addr()?;

        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            s1.send_to(b"ping", target)
        });

        let mut buf = [0u8; 8];
        let (n, addr) = dispatcher
            .recv_from(f2, &mut buf, 0, 8, MsgFlags::empty())
            .await?;
        assert_eq!(n, 4);
        assert_eq!(addr.as_socket(), Some(origin));
        assert_eq!(sender.join().expect("sender panicked")?, 4);
        Ok(())
    })
}

#[test]
fn peer_errors_are_reported_verbatim() -> TestResult {
    util::with_test_env(|dispatcher| async move {
        let (a, b) = UnixStream::pair()?;
        let fa = util::nonblocking(&a)?;
        drop(b);

        let buf = Buffer::new(4);
        let err = dispatcher
            .send(fa, &buf, 0, 4, MsgFlags::empty())
            .await
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EPIPE));
        Ok(())
    })
}
