//! Lending and reclaiming native codec handles.
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use enumset::EnumSet;
use log::*;

use crate::{
    native::{gzip, snappy, Compressor, Decompressor, DirectDecompressor},
    Capability, CodecOptions, CompressionCodecName, DirectCodecError, DirectCodecResult,
};

#[cfg(feature = "lz4")]
use crate::native::lz4;
#[cfg(feature = "zstd")]
use crate::native::zstd;

/// Lends out codec handles and takes them back.
///
/// Strategies borrow their handles when they are constructed and return them
/// when they are released. A handle is only ever held by one strategy at a time.
pub trait CodecPool: Send + Sync {
    /// Whether `codec` can decompress straight between memory regions.
    fn supports_direct_decompression(&self, codec: CompressionCodecName) -> bool;

    fn borrow_compressor(&self, codec: CompressionCodecName)
        -> DirectCodecResult<Box<dyn Compressor>>;

    fn borrow_decompressor(
        &self,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<Box<dyn Decompressor>>;

    fn borrow_direct_decompressor(
        &self,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<Box<dyn DirectDecompressor>>;

    fn return_compressor(&self, compressor: Box<dyn Compressor>) -> DirectCodecResult<()>;

    fn return_decompressor(&self, decompressor: Box<dyn Decompressor>) -> DirectCodecResult<()>;

    fn return_direct_decompressor(
        &self,
        decompressor: Box<dyn DirectDecompressor>,
    ) -> DirectCodecResult<()>;
}

/// A handle type that knows which [`CodecPool`] method takes it back.
pub trait PooledHandle {
    fn give_back(pool: &dyn CodecPool, handle: Box<Self>) -> DirectCodecResult<()>;
}

impl PooledHandle for dyn Compressor {
    fn give_back(pool: &dyn CodecPool, handle: Box<Self>) -> DirectCodecResult<()> {
        pool.return_compressor(handle)
    }
}

impl PooledHandle for dyn Decompressor {
    fn give_back(pool: &dyn CodecPool, handle: Box<Self>) -> DirectCodecResult<()> {
        pool.return_decompressor(handle)
    }
}

impl PooledHandle for dyn DirectDecompressor {
    fn give_back(pool: &dyn CodecPool, handle: Box<Self>) -> DirectCodecResult<()> {
        pool.return_direct_decompressor(handle)
    }
}

/// A handle on loan from a [`CodecPool`].
///
/// [`give_back()`](Self::give_back) consumes the loan, so a handle cannot be
/// returned twice or used after it was returned. A loan that is dropped
/// instead is returned from `Drop`.
pub struct Borrowed<T: PooledHandle + ?Sized> {
    handle: Option<Box<T>>,
    pool: Arc<dyn CodecPool>,
}

impl<T: PooledHandle + ?Sized> Borrowed<T> {
    fn new(handle: Box<T>, pool: &Arc<dyn CodecPool>) -> Self {
        Self {
            handle: Some(handle),
            pool: Arc::clone(pool),
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        match self.handle.as_deref_mut() {
            Some(handle) => handle,
            None => unreachable!("a loan only gives its handle up when consumed"),
        }
    }

    pub fn give_back(mut self) -> DirectCodecResult<()> {
        match self.handle.take() {
            Some(handle) => T::give_back(self.pool.as_ref(), handle),
            None => Ok(()),
        }
    }
}

impl<T: PooledHandle + ?Sized> Drop for Borrowed<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = T::give_back(self.pool.as_ref(), handle) {
                warn!("Couldn't return a dropped codec handle to its pool: {e}");
            }
        }
    }
}

impl<T: PooledHandle + ?Sized> fmt::Debug for Borrowed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Borrowed")
            .field("held", &self.handle.is_some())
            .finish()
    }
}

pub(crate) fn borrow_compressor(
    pool: &Arc<dyn CodecPool>,
    codec: CompressionCodecName,
) -> DirectCodecResult<Borrowed<dyn Compressor>> {
    Ok(Borrowed::new(pool.borrow_compressor(codec)?, pool))
}

pub(crate) fn borrow_decompressor(
    pool: &Arc<dyn CodecPool>,
    codec: CompressionCodecName,
) -> DirectCodecResult<Borrowed<dyn Decompressor>> {
    Ok(Borrowed::new(pool.borrow_decompressor(codec)?, pool))
}

pub(crate) fn borrow_direct_decompressor(
    pool: &Arc<dyn CodecPool>,
    codec: CompressionCodecName,
) -> DirectCodecResult<Borrowed<dyn DirectDecompressor>> {
    Ok(Borrowed::new(pool.borrow_direct_decompressor(codec)?, pool))
}

/// Counters kept by a [`NativeCodecPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Handles constructed because no idle one was available.
    pub created: usize,
    pub borrowed: usize,
    pub returned: usize,
}

impl PoolStats {
    /// Handles currently on loan.
    pub fn outstanding(&self) -> usize {
        self.borrowed.saturating_sub(self.returned)
    }
}

#[derive(Default)]
struct IdleHandles {
    compressors: Vec<Box<dyn Compressor>>,
    decompressors: Vec<Box<dyn Decompressor>>,
    direct_decompressors: Vec<Box<dyn DirectDecompressor>>,
}

/// The default [`CodecPool`]: keeps returned handles per codec and hands them
/// out again before constructing new ones.
pub struct NativeCodecPool {
    options: CodecOptions,
    direct: EnumSet<CompressionCodecName>,
    idle: Mutex<HashMap<CompressionCodecName, IdleHandles>>,
    created: AtomicUsize,
    borrowed: AtomicUsize,
    returned: AtomicUsize,
}

impl NativeCodecPool {
    pub fn new(options: CodecOptions) -> DirectCodecResult<Self> {
        options.validate()?;
        let mut direct = options.get_direct_decompression();
        if cfg!(not(feature = "zstd")) {
            direct.remove(CompressionCodecName::Zstd);
        }
        Ok(Self {
            options,
            direct,
            idle: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
            borrowed: AtomicUsize::new(0),
            returned: AtomicUsize::new(0),
        })
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Acquire),
            borrowed: self.borrowed.load(Ordering::Acquire),
            returned: self.returned.load(Ordering::Acquire),
        }
    }

    fn idle(&self) -> MutexGuard<'_, HashMap<CompressionCodecName, IdleHandles>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pops an idle handle or builds a new one, counting the loan.
    fn lend<H: ?Sized>(
        &self,
        codec: CompressionCodecName,
        capability: Capability,
        take_idle: impl FnOnce(&mut IdleHandles) -> Option<Box<H>>,
        create: impl FnOnce() -> DirectCodecResult<Box<H>>,
    ) -> DirectCodecResult<Box<H>> {
        let idle = take_idle(self.idle().entry(codec).or_default());
        let handle = match idle {
            Some(handle) => handle,
            None => {
                debug!("Creating a new {codec} handle for {capability}");
                let handle = create()?;
                self.created.fetch_add(1, Ordering::AcqRel);
                handle
            }
        };
        self.borrowed.fetch_add(1, Ordering::AcqRel);
        Ok(handle)
    }

    fn take_back(&self, codec: CompressionCodecName, put_idle: impl FnOnce(&mut IdleHandles)) {
        put_idle(self.idle().entry(codec).or_default());
        self.returned.fetch_add(1, Ordering::AcqRel);
    }

    /// Snappy pages are compressed region to region by a strategy that owns
    /// its encoder, so there is no pooled Snappy compressor.
    fn new_compressor(&self, codec: CompressionCodecName) -> DirectCodecResult<Box<dyn Compressor>> {
        match codec {
            CompressionCodecName::Gzip => {
                Ok(Box::new(gzip::GzipEncoder::new(self.options.get_gzip_level())))
            }
            #[cfg(feature = "zstd")]
            CompressionCodecName::Zstd => {
                Ok(Box::new(zstd::ZstdEncoder::new(self.options.get_zstd_level())?))
            }
            #[cfg(feature = "lz4")]
            CompressionCodecName::Lz4 => Ok(Box::new(lz4::Lz4Encoder::new()?)),
            _ => Err(DirectCodecError::UnsupportedCodec {
                codec,
                capability: Capability::Compress,
            }),
        }
    }

    fn new_decompressor(
        &self,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<Box<dyn Decompressor>> {
        match codec {
            CompressionCodecName::Snappy => Ok(Box::new(snappy::SnappyDecoder::new())),
            CompressionCodecName::Gzip => Ok(Box::new(gzip::GzipDecoder::new())),
            #[cfg(feature = "zstd")]
            CompressionCodecName::Zstd => Ok(Box::new(zstd::ZstdDecoder::new()?)),
            #[cfg(feature = "lz4")]
            CompressionCodecName::Lz4 => Ok(Box::new(lz4::Lz4Decoder::new()?)),
            _ => Err(DirectCodecError::UnsupportedCodec {
                codec,
                capability: Capability::Decompress,
            }),
        }
    }

    fn new_direct_decompressor(
        &self,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<Box<dyn DirectDecompressor>> {
        match codec {
            CompressionCodecName::Snappy => Ok(Box::new(snappy::SnappyDecoder::new())),
            CompressionCodecName::Gzip => Ok(Box::new(gzip::GzipDecoder::new())),
            #[cfg(feature = "zstd")]
            CompressionCodecName::Zstd => Ok(Box::new(zstd::ZstdDecoder::new()?)),
            _ => Err(DirectCodecError::UnsupportedCodec {
                codec,
                capability: Capability::DirectDecompress,
            }),
        }
    }
}

impl fmt::Debug for NativeCodecPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCodecPool")
            .field("options", &self.options)
            .field("direct", &self.direct)
            .field("stats", &self.stats())
            .finish()
    }
}

impl CodecPool for NativeCodecPool {
    fn supports_direct_decompression(&self, codec: CompressionCodecName) -> bool {
        self.direct.contains(codec)
    }

    fn borrow_compressor(
        &self,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<Box<dyn Compressor>> {
        self.lend(
            codec,
            Capability::Compress,
            |idle| idle.compressors.pop(),
            || self.new_compressor(codec),
        )
    }

    fn borrow_decompressor(
        &self,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<Box<dyn Decompressor>> {
        self.lend(
            codec,
            Capability::Decompress,
            |idle| idle.decompressors.pop(),
            || self.new_decompressor(codec),
        )
    }

    fn borrow_direct_decompressor(
        &self,
        codec: CompressionCodecName,
    ) -> DirectCodecResult<Box<dyn DirectDecompressor>> {
        if !self.supports_direct_decompression(codec) {
            return Err(DirectCodecError::UnsupportedCodec {
                codec,
                capability: Capability::DirectDecompress,
            });
        }
        self.lend(
            codec,
            Capability::DirectDecompress,
            |idle| idle.direct_decompressors.pop(),
            || self.new_direct_decompressor(codec),
        )
    }

    fn return_compressor(&self, mut compressor: Box<dyn Compressor>) -> DirectCodecResult<()> {
        let codec = compressor.codec();
        match compressor.reset() {
            Ok(()) => self.take_back(codec, |idle| idle.compressors.push(compressor)),
            Err(e) => {
                warn!("Discarding a {codec} compressor that failed to reset: {e}");
                self.take_back(codec, |_| {});
            }
        }
        Ok(())
    }

    fn return_decompressor(&self, mut decompressor: Box<dyn Decompressor>) -> DirectCodecResult<()> {
        decompressor.reset();
        self.take_back(decompressor.codec(), |idle| {
            idle.decompressors.push(decompressor)
        });
        Ok(())
    }

    fn return_direct_decompressor(
        &self,
        mut decompressor: Box<dyn DirectDecompressor>,
    ) -> DirectCodecResult<()> {
        decompressor.reset();
        self.take_back(decompressor.codec(), |idle| {
            idle.direct_decompressors.push(decompressor)
        });
        Ok(())
    }
}
