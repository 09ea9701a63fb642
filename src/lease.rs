use log::trace;

use crate::{ByteBufferAllocator, DirectCodecResult, MemoryRegion};

/// A reusable scratch region that only grows.
///
/// [`ensure()`](Self::ensure) hands back the held region, cleared, whenever it
/// is big enough; otherwise the region goes back to the allocator and a new
/// one of exactly the requested size takes its place.
#[derive(Debug, Default)]
pub struct BufferLease {
    held: Option<MemoryRegion>,
}

impl BufferLease {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capacity of the held region, if any.
    pub fn capacity(&self) -> Option<usize> {
        self.held.as_ref().map(MemoryRegion::capacity)
    }

    pub fn ensure(
        &mut self,
        allocator: &dyn ByteBufferAllocator,
        size: usize,
    ) -> DirectCodecResult<&mut MemoryRegion> {
        match self.held.take() {
            Some(mut region) if region.capacity() >= size => {
                trace!("reusing {} byte region for {size} bytes", region.capacity());
                region.clear();
                Ok(self.held.insert(region))
            }
            previous => {
                if let Some(region) = previous {
                    trace!("growing {} byte region to {size} bytes", region.capacity());
                    allocator.release(region)?;
                }
                let region = allocator.allocate(size)?;
                Ok(self.held.insert(region))
            }
        }
    }

    /// Gives the held region back to the allocator. Safe to call on an empty lease.
    pub fn release(&mut self, allocator: &dyn ByteBufferAllocator) -> DirectCodecResult<()> {
        match self.held.take() {
            Some(region) => allocator.release(region),
            None => Ok(()),
        }
    }

    pub(crate) fn is_held(&self) -> bool {
        self.held.is_some()
    }
}
