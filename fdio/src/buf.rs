//! Fixed-length, shareable I/O buffers.
//!
//! A [`Buffer`] owns a heap region whose address never changes, so a system
//! call running on another thread can keep writing into it after the caller
//! has moved on. Clones share the same region.
//!
//! Operations in flight hold a *lease* on each buffer they touch. Operations
//! that fill the buffer hold an exclusive lease, operations that drain it hold
//! a shared lease. The lease keeps the region alive, so a buffer is never
//! freed underneath a running job even if every [`Buffer`] handle is dropped.
//! Accessors that conflict with an outstanding lease fail with
//! [`Error::Busy`].
use std::fmt;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::{Error, Result};

const EXCLUSIVE: usize = usize::MAX;

/// A fixed-length region of raw bytes with a stable address.
#[derive(Clone)]
pub struct Buffer {
    region: Arc<Region>,
}

struct Region {
    ptr: NonNull<u8>,
    len: usize,
    // Number of shared leases, or `EXCLUSIVE`.
    leases: AtomicUsize,
}

// Safety: the region is only written through an exclusive lease, and only
// read while no exclusive lease is held.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Drop for Region {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        // Safety: `ptr` and `len` came from `Box::into_raw` in `Region::new`.
        drop(unsafe { Box::from_raw(slice) });
    }
}

impl Region {
    fn new(bytes: Box<[u8]>) -> Self {
        let len = bytes.len();
        let raw = Box::into_raw(bytes) as *mut u8;
        // Safety: `Box::into_raw` never returns null.
        let ptr = unsafe { NonNull::new_unchecked(raw) };
        Self {
            ptr,
            len,
            leases: AtomicUsize::new(0),
        }
    }

    fn try_share(&self) -> Result<()> {
        let mut current = self.leases.load(Ordering::Relaxed);
        loop {
            if current >= EXCLUSIVE - 1 {
                return Err(Error::Busy);
            }
            match self.leases.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn try_exclusive(&self) -> Result<()> {
        self.leases
            .compare_exchange(0, EXCLUSIVE, Ordering::Acquire, Ordering::Relaxed)
            .map(|_| ())
            .map_err(|_| Error::Busy)
    }

    fn release(&self, exclusive: bool) {
        if exclusive {
            self.leases.store(0, Ordering::Release);
        } else {
            self.leases.fetch_sub(1, Ordering::Release);
        }
    }
}

impl Buffer {
    /// Allocate a zero-filled buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self::from(vec![0u8; len])
    }

    /// Length of the buffer in bytes.
    pub fn len(&self) -> usize {
        self.region.len
    }

    /// Returns `true` if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.region.len == 0
    }

    /// Returns `true` while any operation holds a lease on this buffer.
    pub fn is_busy(&self) -> bool {
        self.region.leases.load(Ordering::Acquire) != 0
    }

    /// Returns `true` if both handles refer to the same region.
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.region, &other.region)
    }

    /// Read the byte at `index`.
    pub fn get(&self, index: usize) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.copy_to_slice(index, &mut byte)?;
        Ok(byte[0])
    }

    /// Overwrite the byte at `index`.
    pub fn set(&self, index: usize, value: u8) -> Result<()> {
        self.copy_from_slice(index, &[value])
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`.
    pub fn copy_to_slice(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        let range = self.span(offset, dst.len())?;
        let lease = self.lease_shared()?;
        dst.copy_from_slice(lease.slice(range));
        Ok(())
    }

    /// Copy `src` into the buffer starting at `offset`.
    pub fn copy_from_slice(&self, offset: usize, src: &[u8]) -> Result<()> {
        let range = self.span(offset, src.len())?;
        let mut lease = self.lease_exclusive()?;
        lease.slice_mut(range).copy_from_slice(src);
        Ok(())
    }

    /// Copy the whole buffer into a new vector.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let lease = self.lease_shared()?;
        Ok(lease.slice(0..self.len()).to_vec())
    }

    /// Copy the whole buffer into a new [`Bytes`].
    pub fn to_bytes(&self) -> Result<Bytes> {
        self.to_vec().map(Bytes::from)
    }

    pub(crate) fn lease_shared(&self) -> Result<Lease> {
        self.region.try_share()?;
        Ok(Lease {
            region: self.region.clone(),
            exclusive: false,
        })
    }

    pub(crate) fn lease_exclusive(&self) -> Result<Lease> {
        self.region.try_exclusive()?;
        Ok(Lease {
            region: self.region.clone(),
            exclusive: true,
        })
    }

    pub(crate) fn lease(&self, exclusive: bool) -> Result<Lease> {
        if exclusive {
            self.lease_exclusive()
        } else {
            self.lease_shared()
        }
    }

    fn span(&self, offset: usize, len: usize) -> Result<Range<usize>> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len() => Ok(offset..end),
            _ => Err(Error::InvalidArgument("range exceeds buffer length")),
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(value: Vec<u8>) -> Self {
        Self {
            region: Arc::new(Region::new(value.into_boxed_slice())),
        }
    }
}

impl From<&[u8]> for Buffer {
    fn from(value: &[u8]) -> Self {
        Self::from(value.to_vec())
    }
}

impl From<Bytes> for Buffer {
    fn from(value: Bytes) -> Self {
        Self::from(&value[..])
    }
}

/// Access to a buffer held by an in-flight operation.
///
/// Holds a strong reference to the region and releases the lease on drop.
pub(crate) struct Lease {
    region: Arc<Region>,
    exclusive: bool,
}

impl Lease {
    pub(crate) fn same_region(&self, buffer: &Buffer) -> bool {
        Arc::ptr_eq(&self.region, &buffer.region)
    }

    /// Pointer `offset` bytes into the region. Callers validate the range first.
    pub(crate) fn ptr_at(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.region.len);
        // Safety: `offset` is within the allocation (or one past its end).
        unsafe { self.region.ptr.as_ptr().add(offset) }
    }

    fn slice(&self, range: Range<usize>) -> &[u8] {
        // Safety: bounds were checked by the caller and no exclusive lease
        // can coexist with this one.
        unsafe { std::slice::from_raw_parts(self.ptr_at(range.start), range.len()) }
    }

    fn slice_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        debug_assert!(self.exclusive);
        // Safety: bounds were checked by the caller and this lease is the
        // only access to the region.
        unsafe { std::slice::from_raw_parts_mut(self.ptr_at(range.start), range.len()) }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.region.release(self.exclusive);
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("len", &self.region.len)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::Buffer;
    use crate::Error;

    #[test]
    fn new_buffers_are_zeroed() {
        let buf = Buffer::new(16);
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.to_vec().unwrap(), vec![0u8; 16]);
        assert!(Buffer::new(0).is_empty());
    }

    #[test]
    fn clones_share_memory() {
        let buf = Buffer::from(&b"hello"[..]);
        let other = buf.clone();
        other.set(0, b'j').unwrap();
        assert_eq!(buf.to_bytes().unwrap(), Bytes::from_static(b"jello"));
        assert!(buf.ptr_eq(&other));
        assert!(!buf.ptr_eq(&Buffer::from(&b"jello"[..])));
    }

    #[test]
    fn accessors_are_bounds_checked() {
        let buf = Buffer::new(4);
        assert!(matches!(buf.get(4), Err(Error::InvalidArgument(_))));
        assert!(matches!(buf.set(9, 1), Err(Error::InvalidArgument(_))));
        let mut dst = [0u8; 3];
        assert!(matches!(
            buf.copy_to_slice(2, &mut dst),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            buf.copy_from_slice(usize::MAX, &[1]),
            Err(Error::InvalidArgument(_))
        ));
        buf.copy_from_slice(1, &[1, 2, 3]).unwrap();
        buf.copy_to_slice(1, &mut dst).unwrap();
        assert_eq!(dst, [1, 2, 3]);
    }

    #[test]
    fn exclusive_lease_blocks_accessors() {
        let buf = Buffer::new(4);
        let lease = buf.lease_exclusive().unwrap();
        assert!(buf.is_busy());
        assert!(matches!(buf.get(0), Err(Error::Busy)));
        assert!(matches!(buf.set(0, 1), Err(Error::Busy)));
        assert!(matches!(buf.lease_shared(), Err(Error::Busy)));
        drop(lease);
        assert!(!buf.is_busy());
        buf.set(0, 1).unwrap();
    }

    #[test]
    fn shared_leases_allow_reads_only() {
        let buf = Buffer::from(vec![7u8; 4]);
        let first = buf.lease_shared().unwrap();
        let second = buf.lease_shared().unwrap();
        assert_eq!(buf.get(3).unwrap(), 7);
        assert!(matches!(buf.set(0, 1), Err(Error::Busy)));
        assert!(matches!(buf.lease_exclusive(), Err(Error::Busy)));
        drop(first);
        assert!(buf.is_busy());
        drop(second);
        assert!(!buf.is_busy());
    }

    #[test]
    fn lease_keeps_region_alive() {
        let buf = Buffer::from(vec![1u8, 2, 3]);
        let lease = buf.lease_exclusive().unwrap();
        drop(buf);
        // Safety: the lease holds the region and is the only accessor.
        let byte = unsafe { *lease.ptr_at(2) };
        assert_eq!(byte, 3);
    }
}
