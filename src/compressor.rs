//! Compression strategies.
use std::sync::Arc;

use log::*;

use crate::{
    factory::CompressorKind,
    native::{snappy::SnappyEncoder, Compressor},
    pool::{self, Borrowed},
    BufferLease, ByteBufferAllocator, BytesInput, CodecPool, CompressionCodecName,
    DirectCodecError, DirectCodecResult,
};

/// Hands pages back untouched.
#[derive(Debug, Default)]
pub struct NoopCompressor;

impl NoopCompressor {
    pub fn compress<'a>(&mut self, bytes: BytesInput<'a>) -> DirectCodecResult<BytesInput<'a>> {
        Ok(bytes)
    }
}

/// Streams pages through a pooled compressor into a reusable heap buffer.
pub struct HeapBytesCompressor {
    codec: CompressionCodecName,
    compressor: Borrowed<dyn Compressor>,
    out: Vec<u8>,
}

impl HeapBytesCompressor {
    pub(crate) fn new(
        pool: &Arc<dyn CodecPool>,
        codec: CompressionCodecName,
        page_size_hint: usize,
    ) -> DirectCodecResult<Self> {
        let mut out = Vec::new();
        out.try_reserve_exact(page_size_hint)
            .map_err(|e| DirectCodecError::ResourceExhaustion {
                requested: page_size_hint,
                reason: e.to_string(),
            })?;
        let compressor = pool::borrow_compressor(pool, codec)?;
        Ok(Self {
            codec,
            compressor,
            out,
        })
    }

    /// Compresses `bytes`. The result borrows the output buffer, which the
    /// next call overwrites.
    pub fn compress<'a>(&'a mut self, bytes: BytesInput<'_>) -> DirectCodecResult<BytesInput<'a>> {
        let codec = self.codec;
        self.out.clear();
        let compressor = self.compressor.get_mut();
        compressor.reset()?;

        let mut stream = compressor.output_stream(&mut self.out)?;
        bytes
            .write_all_to(&mut *stream)
            .map_err(|e| DirectCodecError::codec(codec, e))?;
        stream
            .finish()
            .map_err(|e| DirectCodecError::codec(codec, e))?;

        Ok(BytesInput::from_slice(&self.out))
    }

    pub fn release(self) -> DirectCodecResult<()> {
        self.compressor.give_back()
    }
}

/// Snappy compression straight between memory regions.
///
/// The compressed page lands in an `outgoing` region sized for snappy's worst
/// case. Inputs that aren't already a direct region are first copied into an
/// `incoming` region. Both regions are kept for the next page and only
/// replaced when a page needs more room.
pub struct SnappyCompressor {
    allocator: Arc<dyn ByteBufferAllocator>,
    encoder: SnappyEncoder,
    incoming: BufferLease,
    outgoing: BufferLease,
}

impl SnappyCompressor {
    pub(crate) fn new(allocator: Arc<dyn ByteBufferAllocator>) -> Self {
        Self {
            allocator,
            encoder: SnappyEncoder::new(),
            incoming: BufferLease::new(),
            outgoing: BufferLease::new(),
        }
    }

    /// Compresses `bytes`. The result is a window over the outgoing region,
    /// which the next call overwrites.
    pub fn compress<'a>(&'a mut self, bytes: BytesInput<'_>) -> DirectCodecResult<BytesInput<'a>> {
        let size = bytes.size();
        let max_size = SnappyEncoder::max_compressed_length(size).ok_or_else(|| {
            DirectCodecError::codec(
                CompressionCodecName::Snappy,
                format!("{size} bytes is too large for a snappy block"),
            )
        })?;

        let allocator = self.allocator.as_ref();
        let outgoing = self.outgoing.ensure(allocator, max_size)?;
        let compressed_size = match bytes {
            BytesInput::Region(window) if window.is_direct() => self
                .encoder
                .compress_direct(window.as_slice(), outgoing.as_mut_slice())?,
            staged => {
                let incoming = self.incoming.ensure(allocator, size)?;
                staged.write_all_to(&mut *incoming)?;
                incoming.flip();
                self.encoder
                    .compress_direct(incoming.as_slice(), outgoing.as_mut_slice())?
            }
        };
        outgoing.set_limit(compressed_size)?;
        Ok(BytesInput::from_region(outgoing))
    }

    /// Capacities of the incoming and outgoing regions currently held.
    pub fn lease_capacities(&self) -> (Option<usize>, Option<usize>) {
        (self.incoming.capacity(), self.outgoing.capacity())
    }

    pub fn release(mut self) -> DirectCodecResult<()> {
        self.release_leases()
    }

    fn release_leases(&mut self) -> DirectCodecResult<()> {
        let allocator = self.allocator.as_ref();
        let incoming = self.incoming.release(allocator);
        let outgoing = self.outgoing.release(allocator);
        incoming.and(outgoing)
    }
}

impl Drop for SnappyCompressor {
    fn drop(&mut self) {
        if self.incoming.is_held() || self.outgoing.is_held() {
            if let Err(e) = self.release_leases() {
                warn!("Couldn't release snappy staging regions: {e}");
            }
        }
    }
}

/// A compression strategy, picked per codec by [`CompressorKind::select()`].
pub enum BytesCompressor {
    Noop(NoopCompressor),
    HeapBuffered(HeapBytesCompressor),
    SpecializedDirect(SnappyCompressor),
}

impl BytesCompressor {
    /// Compresses one page.
    ///
    /// Unless this is the no-op strategy, the returned bytes live in scratch
    /// memory owned by the strategy and are only valid until the next call.
    pub fn compress<'a>(&'a mut self, bytes: BytesInput<'a>) -> DirectCodecResult<BytesInput<'a>> {
        match self {
            BytesCompressor::Noop(c) => c.compress(bytes),
            BytesCompressor::HeapBuffered(c) => c.compress(bytes),
            BytesCompressor::SpecializedDirect(c) => c.compress(bytes),
        }
    }

    pub fn codec_name(&self) -> CompressionCodecName {
        match self {
            BytesCompressor::Noop(_) => CompressionCodecName::Uncompressed,
            BytesCompressor::HeapBuffered(c) => c.codec,
            BytesCompressor::SpecializedDirect(_) => CompressionCodecName::Snappy,
        }
    }

    pub fn kind(&self) -> CompressorKind {
        match self {
            BytesCompressor::Noop(_) => CompressorKind::Noop,
            BytesCompressor::HeapBuffered(_) => CompressorKind::HeapBuffered,
            BytesCompressor::SpecializedDirect(_) => CompressorKind::SpecializedDirect,
        }
    }

    /// Returns pooled handles and scratch regions.
    pub fn release(self) -> DirectCodecResult<()> {
        match self {
            BytesCompressor::Noop(_) => Ok(()),
            BytesCompressor::HeapBuffered(c) => c.release(),
            BytesCompressor::SpecializedDirect(c) => c.release(),
        }
    }
}
