//! Memory regions and the allocators that hand them out.
//!
//! A [`MemoryRegion`] is a fixed-capacity block with a `[position, limit)`
//! window, the same cursor model page readers use for their I/O buffers.
//! Regions are either *direct* (allocated for handing straight to native codec
//! entry points) or *heap* (general purpose memory that native codecs only see
//! through a staging copy).
use std::{
    io::{self, Write},
    ops::Range,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{DirectCodecError, DirectCodecResult};

#[derive(Debug)]
pub struct MemoryRegion {
    data: Box<[u8]>,
    position: usize,
    limit: usize,
    direct: bool,
}

impl MemoryRegion {
    fn try_new(capacity: usize, direct: bool) -> DirectCodecResult<Self> {
        Ok(Self {
            data: zeroed_vec(capacity)?.into_boxed_slice(),
            position: 0,
            limit: capacity,
            direct,
        })
    }

    /// A zeroed heap region of exactly `capacity` bytes.
    pub fn heap(capacity: usize) -> DirectCodecResult<Self> {
        Self::try_new(capacity, false)
    }

    /// A zeroed direct region of exactly `capacity` bytes.
    pub fn direct(capacity: usize) -> DirectCodecResult<Self> {
        Self::try_new(capacity, true)
    }

    /// A direct region holding a copy of `bytes`, with the window covering all of it.
    pub fn direct_from(bytes: &[u8]) -> DirectCodecResult<Self> {
        let mut region = Self::direct(bytes.len())?;
        region.put_slice(bytes)?;
        region.flip();
        Ok(region)
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn is_direct(&self) -> bool {
        self.direct
    }

    pub fn set_position(&mut self, position: usize) -> DirectCodecResult<()> {
        if position > self.limit {
            return Err(self.out_of_bounds(position..self.limit));
        }
        self.position = position;
        Ok(())
    }

    /// Moves the limit, pulling the position back if it would lie past it.
    pub fn set_limit(&mut self, limit: usize) -> DirectCodecResult<()> {
        if limit > self.capacity() {
            return Err(self.out_of_bounds(0..limit));
        }
        self.limit = limit;
        self.position = self.position.min(limit);
        Ok(())
    }

    /// Resets the window to the whole region, ready to be written from the start.
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.capacity();
    }

    /// Turns the bytes written so far into the readable window.
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
    }

    /// The bytes inside the window.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.position..self.limit]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.position..self.limit]
    }

    /// Bytes at absolute offsets, ignoring the window.
    pub fn slice(&self, range: Range<usize>) -> DirectCodecResult<&[u8]> {
        if range.start > range.end || range.end > self.capacity() {
            return Err(self.out_of_bounds(range));
        }
        Ok(&self.data[range])
    }

    pub fn slice_mut(&mut self, range: Range<usize>) -> DirectCodecResult<&mut [u8]> {
        if range.start > range.end || range.end > self.capacity() {
            return Err(self.out_of_bounds(range));
        }
        Ok(&mut self.data[range])
    }

    /// Copies `bytes` in at the position and advances past them.
    pub fn put_slice(&mut self, bytes: &[u8]) -> DirectCodecResult<()> {
        let end = self.position + bytes.len();
        if end > self.limit {
            return Err(self.out_of_bounds(self.position..end));
        }
        self.data[self.position..end].copy_from_slice(bytes);
        self.position = end;
        Ok(())
    }

    fn out_of_bounds(&self, range: Range<usize>) -> DirectCodecError {
        DirectCodecError::OutOfBounds {
            start: range.start,
            end: range.end,
            capacity: self.capacity(),
        }
    }
}

/// A zeroed vector of `len` bytes, failing instead of aborting if the global
/// allocator refuses.
pub(crate) fn zeroed_vec(len: usize) -> DirectCodecResult<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|e| DirectCodecError::ResourceExhaustion {
            requested: len,
            reason: e.to_string(),
        })?;
    data.resize(len, 0);
    Ok(data)
}

/// Writes land in the window at the current position, which advances past them.
impl Write for MemoryRegion {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        self.data[self.position..self.position + n].copy_from_slice(&buf[..n]);
        self.position += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hands out and takes back [`MemoryRegion`]s.
///
/// Implementations must be shareable across threads: a factory and every
/// strategy it creates hold the same allocator.
pub trait ByteBufferAllocator: Send + Sync {
    /// Allocates a region of exactly `size` bytes with its window covering all of it.
    fn allocate(&self, size: usize) -> DirectCodecResult<MemoryRegion>;

    /// Takes back a region previously returned by [`allocate()`](Self::allocate).
    fn release(&self, region: MemoryRegion) -> DirectCodecResult<()>;
}

/// Allocates heap regions; release just frees them.
#[derive(Debug, Default)]
pub struct HeapByteBufferAllocator;

impl ByteBufferAllocator for HeapByteBufferAllocator {
    fn allocate(&self, size: usize) -> DirectCodecResult<MemoryRegion> {
        MemoryRegion::heap(size)
    }

    fn release(&self, _region: MemoryRegion) -> DirectCodecResult<()> {
        Ok(())
    }
}

/// Allocates direct regions, optionally capped at a number of outstanding bytes.
#[derive(Debug, Default)]
pub struct DirectByteBufferAllocator {
    limit: Option<usize>,
    outstanding: AtomicUsize,
}

impl DirectByteBufferAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// An allocator that refuses requests once `limit` bytes are outstanding.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Bytes handed out and not yet released.
    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    fn reserve(&self, size: usize) -> DirectCodecResult<()> {
        let limit = self.limit.unwrap_or(usize::MAX);
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(size).filter(|total| *total <= limit)
            })
            .map(|_| ())
            .map_err(|current| DirectCodecError::ResourceExhaustion {
                requested: size,
                reason: format!("{current} of {limit} direct bytes already outstanding"),
            })
    }
}

impl ByteBufferAllocator for DirectByteBufferAllocator {
    fn allocate(&self, size: usize) -> DirectCodecResult<MemoryRegion> {
        self.reserve(size)?;
        MemoryRegion::direct(size).map_err(|e| {
            self.outstanding.fetch_sub(size, Ordering::AcqRel);
            e
        })
    }

    fn release(&self, region: MemoryRegion) -> DirectCodecResult<()> {
        if !region.is_direct() {
            return Err(DirectCodecError::Configuration(
                "a heap region was released to a direct allocator".to_string(),
            ));
        }
        self.outstanding
            .fetch_sub(region.capacity(), Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn window_follows_puts_and_flips() {
        let mut region = MemoryRegion::heap(8).unwrap();
        assert_eq!((region.position(), region.limit()), (0, 8));

        region.put_slice(b"abc").unwrap();
        assert_eq!(region.position(), 3);
        assert_eq!(region.remaining(), 5);

        region.flip();
        assert_eq!(region.as_slice(), b"abc");

        region.clear();
        assert_eq!((region.position(), region.limit()), (0, 8));
    }

    #[test]
    fn puts_past_the_limit_fail() {
        let mut region = MemoryRegion::direct(4).unwrap();
        region.set_limit(2).unwrap();
        assert_matches!(
            region.put_slice(b"abc"),
            Err(DirectCodecError::OutOfBounds {
                start: 0,
                end: 3,
                capacity: 4
            })
        );
        assert_eq!(region.position(), 0);
    }

    #[test]
    fn absolute_slices_are_bounds_checked() {
        let mut region = MemoryRegion::direct_from(b"hello").unwrap();
        assert_eq!(region.slice(1..4).unwrap(), b"ell");
        assert_matches!(region.slice(2..6), Err(DirectCodecError::OutOfBounds { .. }));
        assert_matches!(region.set_limit(6), Err(DirectCodecError::OutOfBounds { .. }));
    }

    #[test]
    fn limited_allocator_exhausts_and_recovers() {
        let allocator = DirectByteBufferAllocator::with_limit(100);
        let first = allocator.allocate(60).unwrap();
        assert!(first.is_direct());
        assert_eq!(allocator.outstanding_bytes(), 60);

        assert_matches!(
            allocator.allocate(41),
            Err(DirectCodecError::ResourceExhaustion { requested: 41, .. })
        );

        allocator.release(first).unwrap();
        assert_eq!(allocator.outstanding_bytes(), 0);
        allocator.allocate(100).unwrap();
    }

    #[test]
    fn direct_allocator_rejects_heap_regions() {
        let allocator = DirectByteBufferAllocator::new();
        assert_matches!(
            allocator.release(MemoryRegion::heap(1).unwrap()),
            Err(DirectCodecError::Configuration(_))
        );
    }
}
