//! Segments and segment lists for scatter/gather transfers.
use std::ops::{Deref, Range};
use std::sync::OnceLock;

use smallvec::SmallVec;

use crate::buf::Lease;
use crate::{Buffer, Error, Result};

/// Fallback when the platform does not report an iovec limit.
const DEFAULT_IOV_MAX: usize = 1024;

/// Validate `offset` and `len` against a region of `buf_len` bytes.
///
/// Fails with [`Error::InvalidArgument`] iff `offset < 0`, `len < 0` or
/// `offset > buf_len - len`. On success returns the byte range.
pub fn check_bounds(buf_len: usize, offset: isize, len: isize) -> Result<Range<usize>> {
    if offset < 0 {
        return Err(Error::InvalidArgument("negative offset"));
    }
    if len < 0 {
        return Err(Error::InvalidArgument("negative length"));
    }
    let (offset, len) = (offset as usize, len as usize);
    match buf_len.checked_sub(len) {
        Some(max_offset) if offset <= max_offset => Ok(offset..offset + len),
        _ => Err(Error::InvalidArgument("offset and length exceed buffer")),
    }
}

/// One contiguous piece of a scatter/gather transfer.
///
/// Offsets and lengths are kept as given and validated when the segment is
/// handed to an operation.
#[derive(Debug, Clone)]
pub struct Segment {
    buffer: Buffer,
    offset: isize,
    len: isize,
}

impl Segment {
    /// Describe `len` bytes of `buffer` starting at `offset`.
    pub fn new(buffer: Buffer, offset: isize, len: isize) -> Self {
        Self {
            buffer,
            offset,
            len,
        }
    }

    /// A segment covering all of `buffer`.
    pub fn full(buffer: Buffer) -> Self {
        let len = buffer.len() as isize;
        Self::new(buffer, 0, len)
    }

    /// The buffer this segment views.
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Start offset within the buffer.
    pub fn offset(&self) -> isize {
        self.offset
    }

    /// Length in bytes.
    pub fn len(&self) -> isize {
        self.len
    }

    /// Returns `true` if the segment covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check the segment against its buffer.
    pub fn validate(&self) -> Result<Range<usize>> {
        check_bounds(self.buffer.len(), self.offset, self.len)
    }
}

/// A growable list of validated segments.
///
/// Dereferences to `[Segment]`, so it can be passed wherever a segment slice
/// is accepted.
#[derive(Debug, Clone, Default)]
pub struct IoVectors {
    segments: Vec<Segment>,
}

impl IoVectors {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// The largest number of segments one system call accepts.
    pub fn system_limit() -> usize {
        static LIMIT: OnceLock<usize> = OnceLock::new();
        *LIMIT.get_or_init(|| {
            // Safety: sysconf has no memory-safety preconditions.
            let max = unsafe { libc::sysconf(libc::_SC_IOV_MAX) };
            if max > 0 {
                max as usize
            } else {
                DEFAULT_IOV_MAX
            }
        })
    }

    /// Validate `segment` and add it to the end of the list.
    pub fn append(&mut self, segment: Segment) -> Result<()> {
        segment.validate()?;
        self.segments.push(segment);
        Ok(())
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns `true` if the list holds no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total bytes covered by all segments.
    pub fn byte_count(&self) -> usize {
        self.segments.iter().map(|s| s.len as usize).sum()
    }

    /// Drop the first `n` bytes of the list after a partial transfer.
    ///
    /// Segments that were fully transferred are removed and the first
    /// partially transferred one is narrowed. Advancing past the end
    /// empties the list.
    pub fn advance(&mut self, mut n: usize) {
        let mut consumed = 0;
        for segment in self.segments.iter_mut() {
            let len = segment.len as usize;
            if n < len {
                segment.offset += n as isize;
                segment.len -= n as isize;
                break;
            }
            n -= len;
            consumed += 1;
        }
        self.segments.drain(..consumed);
    }
}

impl Deref for IoVectors {
    type Target = [Segment];

    fn deref(&self) -> &Self::Target {
        &self.segments
    }
}

impl From<IoVectors> for Vec<Segment> {
    fn from(value: IoVectors) -> Self {
        value.segments
    }
}

/// One validated byte range of a leased buffer.
#[derive(Debug)]
pub(crate) struct LeasedSlice {
    lease: Lease,
    range: Range<usize>,
}

impl LeasedSlice {
    pub(crate) fn acquire(
        buffer: &Buffer,
        offset: isize,
        len: isize,
        exclusive: bool,
    ) -> Result<Self> {
        let range = check_bounds(buffer.len(), offset, len)?;
        let lease = buffer.lease(exclusive)?;
        Ok(Self { lease, range })
    }

    pub(crate) fn ptr(&self) -> *mut u8 {
        self.lease.ptr_at(self.range.start)
    }

    pub(crate) fn len(&self) -> usize {
        self.range.len()
    }
}

/// The leased form of a segment list, ready to be turned into iovecs.
///
/// Holds one lease per distinct buffer, so segments may share a buffer.
#[derive(Debug)]
pub(crate) struct LeasedVectors {
    leases: SmallVec<[Lease; 4]>,
    parts: SmallVec<[(usize, Range<usize>); 8]>,
}

impl LeasedVectors {
    /// Validate every segment, then lease each distinct buffer.
    ///
    /// At most `limit` segments are kept; the rest are validated but ignored.
    pub(crate) fn acquire(segments: &[Segment], exclusive: bool, limit: usize) -> Result<Self> {
        let mut ranges = segments
            .iter()
            .map(Segment::validate)
            .collect::<Result<SmallVec<[_; 8]>>>()?;
        let segments = &segments[..segments.len().min(limit)];
        ranges.truncate(segments.len());

        let mut leases: SmallVec<[Lease; 4]> = SmallVec::new();
        let mut parts = SmallVec::with_capacity(segments.len());
        for (segment, range) in segments.iter().zip(ranges) {
            let index = match leases.iter().position(|l| l.same_region(&segment.buffer)) {
                Some(index) => index,
                None => {
                    leases.push(segment.buffer.lease(exclusive)?);
                    leases.len() - 1
                }
            };
            parts.push((index, range));
        }
        Ok(Self { leases, parts })
    }

    /// Native iovec array in segment order.
    ///
    /// The pointers stay valid for as long as `self` is alive.
    pub(crate) fn iovecs(&self) -> SmallVec<[libc::iovec; 8]> {
        self.parts
            .iter()
            .map(|(index, range)| libc::iovec {
                iov_base: self.leases[*index].ptr_at(range.start).cast(),
                iov_len: range.len(),
            })
            .collect()
    }
}
