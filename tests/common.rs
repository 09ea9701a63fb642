#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use direct_codec::{
    native::{Compressor, Decompressor, DirectDecompressor},
    ByteBufferAllocator, CodecOptions, CodecPool, CompressionCodecName, DirectByteBufferAllocator,
    DirectCodecError, DirectCodecFactory, DirectCodecResult, MemoryRegion, NativeCodecPool,
    PoolStats,
};

/// Every codec this build can compress.
pub fn codecs() -> Vec<CompressionCodecName> {
    CompressionCodecName::ALL
        .into_iter()
        .filter(|codec| match codec {
            CompressionCodecName::Zstd => cfg!(feature = "zstd"),
            CompressionCodecName::Lz4 => cfg!(feature = "lz4"),
            _ => true,
        })
        .collect()
}

/// Page-like data: runs of repeated bytes with a little noise, so every codec
/// has something to find.
pub fn page(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i / 7) % 13) as u8 ^ (i % 3) as u8).collect()
}

/// A direct allocator that counts calls.
#[derive(Default)]
pub struct CountingAllocator {
    inner: DirectByteBufferAllocator,
    allocations: AtomicUsize,
    releases: AtomicUsize,
}

impl CountingAllocator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn outstanding_bytes(&self) -> usize {
        self.inner.outstanding_bytes()
    }
}

impl ByteBufferAllocator for CountingAllocator {
    fn allocate(&self, size: usize) -> DirectCodecResult<MemoryRegion> {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        self.inner.allocate(size)
    }

    fn release(&self, region: MemoryRegion) -> DirectCodecResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.release(region)
    }
}

/// Borrow and return counts for one kind of handle.
#[derive(Debug, Default)]
pub struct Loans {
    borrowed: AtomicUsize,
    returned: AtomicUsize,
}

impl Loans {
    fn borrow(&self) {
        self.borrowed.fetch_add(1, Ordering::SeqCst);
    }

    fn give_back(&self) {
        self.returned.fetch_add(1, Ordering::SeqCst);
    }

    pub fn borrowed(&self) -> usize {
        self.borrowed.load(Ordering::SeqCst)
    }

    pub fn returned(&self) -> usize {
        self.returned.load(Ordering::SeqCst)
    }
}

/// A [`NativeCodecPool`] that records every loan.
pub struct CountingPool {
    inner: NativeCodecPool,
    pub compressors: Loans,
    pub decompressors: Loans,
    pub direct_decompressors: Loans,
}

impl CountingPool {
    pub fn new(options: CodecOptions) -> Arc<Self> {
        Arc::new(Self {
            inner: NativeCodecPool::new(options).expect("valid options"),
            compressors: Loans::default(),
            decompressors: Loans::default(),
            direct_decompressors: Loans::default(),
        })
    }

    /// Handles of any kind borrowed and not yet returned.
    pub fn outstanding(&self) -> usize {
        [&self.compressors, &self.decompressors, &self.direct_decompressors]
            .iter()
            .map(|loans| loans.borrowed() - loans.returned())
            .sum()
    }
}

impl CodecPool for CountingPool {
    fn supports_direct_decompression(&self, codec: CompressionCodecName) -> bool {
        self.inner.supports_direct_decompression(codec)
    }

    fn borrow_compressor(
        &self,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<Box<dyn Compressor>> {
        let handle = self.inner.borrow_compressor(codec)?;
        self.compressors.borrow();
        Ok(handle)
    }

    fn borrow_decompressor(
        &self,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<Box<dyn Decompressor>> {
        let handle = self.inner.borrow_decompressor(codec)?;
        self.decompressors.borrow();
        Ok(handle)
    }

    fn borrow_direct_decompressor(
        &self,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<Box<dyn DirectDecompressor>> {
        let handle = self.inner.borrow_direct_decompressor(codec)?;
        self.direct_decompressors.borrow();
        Ok(handle)
    }

    fn return_compressor(&self, compressor: Box<dyn Compressor>) -> DirectCodecResult<()> {
        self.compressors.give_back();
        self.inner.return_compressor(compressor)
    }

    fn return_decompressor(&self, decompressor: Box<dyn Decompressor>) -> DirectCodecResult<()> {
        self.decompressors.give_back();
        self.inner.return_decompressor(decompressor)
    }

    fn return_direct_decompressor(
        &self,
        decompressor: Box<dyn DirectDecompressor>,
    ) -> DirectCodecResult<()> {
        self.direct_decompressors.give_back();
        self.inner.return_direct_decompressor(decompressor)
    }
}

/// A direct decompressor whose native call scribbles on the output and then fails.
pub struct FailingDirectDecompressor {
    codec: CompressionCodecName,
}

impl DirectDecompressor for FailingDirectDecompressor {
    fn codec(&self) -> CompressionCodecName {
        self.codec
    }

    fn reset(&mut self) {}

    fn decompress_direct(&mut self, _input: &[u8], output: &mut [u8]) -> DirectCodecResult<usize> {
        output.fill(0xAA);
        Err(DirectCodecError::codec(self.codec, "native direct call failed"))
    }
}

/// Advertises direct decompression for every compressed codec and lends
/// [`FailingDirectDecompressor`]s for it. Everything else comes from a
/// [`NativeCodecPool`].
pub struct FailingDirectPool {
    inner: NativeCodecPool,
    pub direct_returned: AtomicUsize,
    /// Makes returning a direct decompressor fail.
    pub fail_returns: AtomicBool,
}

impl FailingDirectPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: NativeCodecPool::new(CodecOptions::new()).expect("valid options"),
            direct_returned: AtomicUsize::new(0),
            fail_returns: AtomicBool::new(false),
        })
    }

    pub fn native_stats(&self) -> PoolStats {
        self.inner.stats()
    }
}

impl CodecPool for FailingDirectPool {
    fn supports_direct_decompression(&self, codec: CompressionCodecName) -> bool {
        codec.is_compressed()
    }

    fn borrow_compressor(
        &self,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<Box<dyn Compressor>> {
        self.inner.borrow_compressor(codec)
    }

    fn borrow_decompressor(
        &self,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<Box<dyn Decompressor>> {
        self.inner.borrow_decompressor(codec)
    }

    fn borrow_direct_decompressor(
        &self,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<Box<dyn DirectDecompressor>> {
        Ok(Box::new(FailingDirectDecompressor { codec }))
    }

    fn return_compressor(&self, compressor: Box<dyn Compressor>) -> DirectCodecResult<()> {
        self.inner.return_compressor(compressor)
    }

    fn return_decompressor(&self, decompressor: Box<dyn Decompressor>) -> DirectCodecResult<()> {
        self.inner.return_decompressor(decompressor)
    }

    fn return_direct_decompressor(
        &self,
        _decompressor: Box<dyn DirectDecompressor>,
    ) -> DirectCodecResult<()> {
        self.direct_returned.fetch_add(1, Ordering::SeqCst);
        if self.fail_returns.load(Ordering::SeqCst) {
            return Err(DirectCodecError::Configuration(
                "direct decompressor returned to a closed pool".to_string(),
            ));
        }
        Ok(())
    }
}

/// A factory over a [`CountingAllocator`] and a [`CountingPool`].
pub fn counting_factory(
    options: CodecOptions,
) -> (DirectCodecFactory, Arc<CountingAllocator>, Arc<CountingPool>) {
    let allocator = CountingAllocator::new();
    let pool = CountingPool::new(options.clone());
    let factory =
        DirectCodecFactory::new(options, allocator.clone(), pool.clone()).expect("valid options");
    (factory, allocator, pool)
}
