//! Decompression strategies.
use std::sync::Arc;

use crate::{
    factory::DecompressorKind,
    memory::zeroed_vec,
    native::{check_produced, read_exact_checked, Decompressor, DirectDecompressor},
    pool::{self, Borrowed},
    BytesInput, CodecPool, CompressionCodecName, DirectCodecError, DirectCodecResult,
    MemoryRegion,
};

fn check_sizes(context: &'static str, expected: usize, actual: usize) -> DirectCodecResult<()> {
    if expected != actual {
        return Err(DirectCodecError::SizeMismatch {
            context,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Passes uncompressed pages through.
#[derive(Debug, Default)]
pub struct NoopDecompressor;

impl NoopDecompressor {
    pub fn decompress<'a>(
        &mut self,
        bytes: BytesInput<'a>,
        uncompressed_size: usize,
    ) -> DirectCodecResult<BytesInput<'a>> {
        check_sizes(
            "uncompressed page size differs from its declared size",
            uncompressed_size,
            bytes.size(),
        )?;
        Ok(bytes)
    }

    pub fn decompress_region(
        &mut self,
        input: &MemoryRegion,
        compressed_size: usize,
        output: &mut MemoryRegion,
        uncompressed_size: usize,
    ) -> DirectCodecResult<()> {
        check_sizes(
            "uncompressed page has different compressed and uncompressed sizes",
            uncompressed_size,
            compressed_size,
        )?;
        output.clear();
        output.put_slice(input.slice(0..compressed_size)?)
    }
}

/// Reads pages through a pooled decompressor's input stream.
pub struct HeapBytesDecompressor {
    codec: CompressionCodecName,
    decompressor: Borrowed<dyn Decompressor>,
}

impl HeapBytesDecompressor {
    pub(crate) fn new(
        pool: &Arc<dyn CodecPool>,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<Self> {
        Ok(Self {
            codec,
            decompressor: pool::borrow_decompressor(pool, codec)?,
        })
    }

    pub fn decompress(
        &mut self,
        bytes: BytesInput<'_>,
        uncompressed_size: usize,
    ) -> DirectCodecResult<BytesInput<'static>> {
        let mut out = zeroed_vec(uncompressed_size)?;
        let decompressor = self.decompressor.get_mut();
        decompressor.reset();
        let mut stream = decompressor.input_stream(bytes)?;
        read_exact_checked(self.codec, &mut *stream, &mut out)?;
        Ok(BytesInput::from_vec(out))
    }

    pub fn release(self) -> DirectCodecResult<()> {
        self.decompressor.give_back()
    }
}

/// Decompresses through a pooled handle that only works on arrays it owns,
/// staging every page in and out of it.
pub struct IndirectDecompressor {
    codec: CompressionCodecName,
    decompressor: Borrowed<dyn Decompressor>,
}

impl IndirectDecompressor {
    pub(crate) fn new(
        pool: &Arc<dyn CodecPool>,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<Self> {
        Ok(Self {
            codec,
            decompressor: pool::borrow_decompressor(pool, codec)?,
        })
    }

    pub fn decompress(
        &mut self,
        bytes: BytesInput<'_>,
        uncompressed_size: usize,
    ) -> DirectCodecResult<BytesInput<'static>> {
        let decompressor = self.decompressor.get_mut();
        decompressor.reset();
        match bytes.as_contiguous() {
            Some(input) => decompressor.set_input(input),
            None => decompressor.set_input(&bytes.to_vec()?),
        }
        let mut out = zeroed_vec(uncompressed_size)?;
        let produced = decompressor.decompress(&mut out)?;
        check_produced(uncompressed_size, produced)?;
        Ok(BytesInput::from_vec(out))
    }

    /// Copies the first `compressed_size` bytes of `input` out, decompresses
    /// them, and copies the result into `output`.
    pub fn decompress_region(
        &mut self,
        input: &MemoryRegion,
        compressed_size: usize,
        output: &mut MemoryRegion,
        uncompressed_size: usize,
    ) -> DirectCodecResult<()> {
        output.clear();
        let decompressor = self.decompressor.get_mut();
        decompressor.reset();
        decompressor.set_input(input.slice(0..compressed_size)?);

        let mut staged = zeroed_vec(uncompressed_size)?;
        let produced = decompressor.decompress(&mut staged)?;
        check_produced(uncompressed_size, produced)?;
        output.put_slice(&staged)
    }

    pub fn codec(&self) -> CompressionCodecName {
        self.codec
    }

    pub fn release(self) -> DirectCodecResult<()> {
        self.decompressor.give_back()
    }
}

/// Decompresses between memory regions in place through a pooled direct handle.
///
/// Byte-source input, which has no region to decompress from, goes through a
/// [`HeapBytesDecompressor`] instead.
pub struct FullDirectDecompressor {
    direct: Borrowed<dyn DirectDecompressor>,
    fallback: HeapBytesDecompressor,
}

impl FullDirectDecompressor {
    pub(crate) fn new(
        pool: &Arc<dyn CodecPool>,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<Self> {
        let direct = pool::borrow_direct_decompressor(pool, codec)?;
        let fallback = HeapBytesDecompressor::new(pool, codec)?;
        Ok(Self { direct, fallback })
    }

    pub fn decompress(
        &mut self,
        bytes: BytesInput<'_>,
        uncompressed_size: usize,
    ) -> DirectCodecResult<BytesInput<'static>> {
        self.fallback.decompress(bytes, uncompressed_size)
    }

    /// Decompresses `input[0..compressed_size]` into `output[0..uncompressed_size]`.
    ///
    /// On success the output position is `uncompressed_size`. On failure it
    /// stays at 0 and the error is returned.
    pub fn decompress_region(
        &mut self,
        input: &MemoryRegion,
        compressed_size: usize,
        output: &mut MemoryRegion,
        uncompressed_size: usize,
    ) -> DirectCodecResult<()> {
        output.clear();
        let src = input.slice(0..compressed_size)?;
        let dst = output.slice_mut(0..uncompressed_size)?;

        let direct = self.direct.get_mut();
        direct.reset();
        let produced = direct.decompress_direct(src, dst)?;
        check_produced(uncompressed_size, produced)?;
        output.set_position(uncompressed_size)
    }

    pub fn codec(&self) -> CompressionCodecName {
        self.fallback.codec
    }

    pub fn release(self) -> DirectCodecResult<()> {
        let direct = self.direct.give_back();
        let fallback = self.fallback.release();
        direct.and(fallback)
    }
}

/// A decompression strategy, picked per codec by [`DecompressorKind::select()`].
pub enum BytesDecompressor {
    Noop(NoopDecompressor),
    DirectCapable(FullDirectDecompressor),
    Indirect(IndirectDecompressor),
}

impl BytesDecompressor {
    /// Decompresses one page of exactly `uncompressed_size` bytes.
    pub fn decompress<'a>(
        &mut self,
        bytes: BytesInput<'a>,
        uncompressed_size: usize,
    ) -> DirectCodecResult<BytesInput<'a>> {
        match self {
            BytesDecompressor::Noop(d) => d.decompress(bytes, uncompressed_size),
            BytesDecompressor::DirectCapable(d) => d.decompress(bytes, uncompressed_size),
            BytesDecompressor::Indirect(d) => d.decompress(bytes, uncompressed_size),
        }
    }

    /// Decompresses the first `compressed_size` bytes of `input` into `output`.
    ///
    /// `output` is cleared first; afterwards its position is `uncompressed_size`.
    pub fn decompress_region(
        &mut self,
        input: &MemoryRegion,
        compressed_size: usize,
        output: &mut MemoryRegion,
        uncompressed_size: usize,
    ) -> DirectCodecResult<()> {
        match self {
            BytesDecompressor::Noop(d) => {
                d.decompress_region(input, compressed_size, output, uncompressed_size)
            }
            BytesDecompressor::DirectCapable(d) => {
                d.decompress_region(input, compressed_size, output, uncompressed_size)
            }
            BytesDecompressor::Indirect(d) => {
                d.decompress_region(input, compressed_size, output, uncompressed_size)
            }
        }
    }

    pub fn codec_name(&self) -> CompressionCodecName {
        match self {
            BytesDecompressor::Noop(_) => CompressionCodecName::Uncompressed,
            BytesDecompressor::DirectCapable(d) => d.codec(),
            BytesDecompressor::Indirect(d) => d.codec(),
        }
    }

    pub fn kind(&self) -> DecompressorKind {
        match self {
            BytesDecompressor::Noop(_) => DecompressorKind::Noop,
            BytesDecompressor::DirectCapable(_) => DecompressorKind::DirectCapable,
            BytesDecompressor::Indirect(_) => DecompressorKind::Indirect,
        }
    }

    /// Returns every pooled handle this strategy borrowed.
    pub fn release(self) -> DirectCodecResult<()> {
        match self {
            BytesDecompressor::Noop(_) => Ok(()),
            BytesDecompressor::DirectCapable(d) => d.release(),
            BytesDecompressor::Indirect(d) => d.release(),
        }
    }
}
