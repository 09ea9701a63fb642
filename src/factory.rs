//! Picks and caches a codec strategy per codec.
use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    sync::Arc,
};

use log::*;

use crate::{
    compressor::{HeapBytesCompressor, NoopCompressor, SnappyCompressor},
    decompressor::{FullDirectDecompressor, IndirectDecompressor, NoopDecompressor},
    ByteBufferAllocator, BytesCompressor, BytesDecompressor, CodecOptions, CodecPool,
    CompressionCodecName, DirectCodecResult, NativeCodecPool,
};

/// The compression strategies a factory can hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressorKind {
    Noop,
    HeapBuffered,
    SpecializedDirect,
}

impl CompressorKind {
    /// Snappy has a region-to-region encoder; every other codec is cheaper to
    /// drive through a heap output buffer.
    pub fn select(codec: CompressionCodecName) -> Self {
        match codec {
            CompressionCodecName::Uncompressed => CompressorKind::Noop,
            CompressionCodecName::Snappy => CompressorKind::SpecializedDirect,
            _ => CompressorKind::HeapBuffered,
        }
    }
}

/// The decompression strategies a factory can hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecompressorKind {
    Noop,
    DirectCapable,
    Indirect,
}

impl DecompressorKind {
    pub fn select(codec: CompressionCodecName, supports_direct: bool) -> Self {
        match codec {
            CompressionCodecName::Uncompressed => DecompressorKind::Noop,
            _ if supports_direct => DecompressorKind::DirectCapable,
            _ => DecompressorKind::Indirect,
        }
    }
}

fn build_compressor(
    codec: CompressionCodecName,
    page_size_hint: usize,
    allocator: &Arc<dyn ByteBufferAllocator>,
    pool: &Arc<dyn CodecPool>,
) -> DirectCodecResult<BytesCompressor> {
    let kind = CompressorKind::select(codec);
    debug!("Creating {kind:?} compressor for {codec}");
    Ok(match kind {
        CompressorKind::Noop => BytesCompressor::Noop(NoopCompressor),
        CompressorKind::HeapBuffered => BytesCompressor::HeapBuffered(HeapBytesCompressor::new(
            pool,
            codec,
            page_size_hint,
        )?),
        CompressorKind::SpecializedDirect => {
            BytesCompressor::SpecializedDirect(SnappyCompressor::new(Arc::clone(allocator)))
        }
    })
}

fn build_decompressor(
    codec: CompressionCodecName,
    pool: &Arc<dyn CodecPool>,
) -> DirectCodecResult<BytesDecompressor> {
    let kind = DecompressorKind::select(codec, pool.supports_direct_decompression(codec));
    debug!("Creating {kind:?} decompressor for {codec}");
    Ok(match kind {
        DecompressorKind::Noop => BytesDecompressor::Noop(NoopDecompressor),
        DecompressorKind::DirectCapable => {
            BytesDecompressor::DirectCapable(FullDirectDecompressor::new(pool, codec)?)
        }
        DecompressorKind::Indirect => {
            BytesDecompressor::Indirect(IndirectDecompressor::new(pool, codec)?)
        }
    })
}

/// Hands out compression strategies for the pages of a file.
///
/// The factory owns every strategy it builds and releases all of them on
/// [`release()`](Self::release), [`close()`](Self::close) or drop.
/// [`get_compressor()`](Self::get_compressor) and
/// [`get_decompressor()`](Self::get_decompressor) build one strategy per codec
/// on first use and keep handing it out.
/// [`create_compressor()`](Self::create_compressor) and
/// [`create_decompressor()`](Self::create_decompressor) build a new one on
/// every call.
///
/// A factory and its strategies are used from one thread at a time; give each
/// worker its own factory or its own strategies.
pub struct DirectCodecFactory {
    options: CodecOptions,
    allocator: Arc<dyn ByteBufferAllocator>,
    pool: Arc<dyn CodecPool>,
    compressors: HashMap<CompressionCodecName, BytesCompressor>,
    decompressors: HashMap<CompressionCodecName, BytesDecompressor>,
    created_compressors: Vec<BytesCompressor>,
    created_decompressors: Vec<BytesDecompressor>,
}

static_assertions::assert_impl_all!(DirectCodecFactory: Send);
static_assertions::assert_impl_all!(BytesCompressor: Send);
static_assertions::assert_impl_all!(BytesDecompressor: Send);

impl DirectCodecFactory {
    pub fn new(
        options: CodecOptions,
        allocator: Arc<dyn ByteBufferAllocator>,
        pool: Arc<dyn CodecPool>,
    ) -> DirectCodecResult<Self> {
        options.validate()?;
        Ok(Self {
            options,
            allocator,
            pool,
            compressors: HashMap::new(),
            decompressors: HashMap::new(),
            created_compressors: Vec::new(),
            created_decompressors: Vec::new(),
        })
    }

    /// A factory backed by its own [`NativeCodecPool`] built from `options`.
    pub fn with_native_pool(
        options: CodecOptions,
        allocator: Arc<dyn ByteBufferAllocator>,
    ) -> DirectCodecResult<Self> {
        let pool = Arc::new(NativeCodecPool::new(options.clone())?);
        Self::new(options, allocator, pool)
    }

    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    pub fn allocator(&self) -> &Arc<dyn ByteBufferAllocator> {
        &self.allocator
    }

    pub fn pool(&self) -> &Arc<dyn CodecPool> {
        &self.pool
    }

    /// Builds a new compression strategy for `codec`, borrowing its pooled
    /// handle now. The factory keeps it until it is released.
    ///
    /// `page_size_hint` pre-sizes heap output buffers.
    pub fn create_compressor(
        &mut self,
        codec: CompressionCodecName,
        page_size_hint: usize,
    ) -> DirectCodecResult<&mut BytesCompressor> {
        let compressor = build_compressor(codec, page_size_hint, &self.allocator, &self.pool)?;
        let created = &mut self.created_compressors;
        created.push(compressor);
        let last = created.len() - 1;
        Ok(&mut created[last])
    }

    /// Builds a new decompression strategy for `codec`, borrowing its pooled
    /// handles now. The factory keeps it until it is released.
    pub fn create_decompressor(
        &mut self,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<&mut BytesDecompressor> {
        let decompressor = build_decompressor(codec, &self.pool)?;
        let created = &mut self.created_decompressors;
        created.push(decompressor);
        let last = created.len() - 1;
        Ok(&mut created[last])
    }

    /// The factory's compressor for `codec`, built on first use.
    pub fn get_compressor(
        &mut self,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<&mut BytesCompressor> {
        match self.compressors.entry(codec) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => Ok(e.insert(build_compressor(
                codec,
                self.options.get_page_size(),
                &self.allocator,
                &self.pool,
            )?)),
        }
    }

    /// The factory's decompressor for `codec`, built on first use.
    pub fn get_decompressor(
        &mut self,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<&mut BytesDecompressor> {
        match self.decompressors.entry(codec) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => Ok(e.insert(build_decompressor(codec, &self.pool)?)),
        }
    }

    /// Number of per-codec strategies from `get_*`, compressors and
    /// decompressors together.
    pub fn cached_strategies(&self) -> usize {
        self.compressors.len() + self.decompressors.len()
    }

    /// Number of strategies built by `create_*` and not yet released.
    pub fn created_strategies(&self) -> usize {
        self.created_compressors.len() + self.created_decompressors.len()
    }

    /// Releases every strategy the factory built.
    ///
    /// All of them are released even if some fail; the first failure is
    /// returned. The factory stays usable and builds fresh strategies on the
    /// next request.
    pub fn release(&mut self) -> DirectCodecResult<()> {
        let mut first_error = None;
        let compressors = self
            .compressors
            .drain()
            .map(|(_, c)| c)
            .chain(self.created_compressors.drain(..))
            .map(BytesCompressor::release);
        let decompressors = self
            .decompressors
            .drain()
            .map(|(_, d)| d)
            .chain(self.created_decompressors.drain(..))
            .map(BytesDecompressor::release);
        for result in compressors.chain(decompressors) {
            if let Err(e) = result {
                warn!("Failed to release a codec strategy: {e}");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Releases every strategy and consumes the factory.
    pub fn close(mut self) -> DirectCodecResult<()> {
        self.release()
    }
}

impl fmt::Debug for DirectCodecFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectCodecFactory")
            .field("options", &self.options)
            .field("compressors", &self.compressors.keys().collect::<Vec<_>>())
            .field("decompressors", &self.decompressors.keys().collect::<Vec<_>>())
            .field("created", &self.created_strategies())
            .finish_non_exhaustive()
    }
}

impl Drop for DirectCodecFactory {
    fn drop(&mut self) {
        if self.cached_strategies() + self.created_strategies() > 0 {
            // Errors were already logged by release().
            let _ = self.release();
        }
    }
}
