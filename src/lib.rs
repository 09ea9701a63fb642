//! Compression dispatch for the page I/O path of a columnar storage format.
//!
//! A [`DirectCodecFactory`] picks a compression strategy per codec and hands out
//! [`BytesCompressor`]s and [`BytesDecompressor`]s that are meant to be reused for
//! every page of a file. Strategies borrow stateful codec handles from a
//! [`CodecPool`] and keep their scratch memory in [`BufferLease`]s backed by a
//! pluggable [`ByteBufferAllocator`], so the steady state of compressing or
//! decompressing millions of small pages allocates nothing.
//!
//! ```no_run
//! use std::sync::Arc;
//! use direct_codec::{
//!     BytesInput, CodecOptions, CompressionCodecName, DirectByteBufferAllocator,
//!     DirectCodecFactory,
//! };
//!
//! # fn main() -> direct_codec::DirectCodecResult<()> {
//! let allocator = Arc::new(DirectByteBufferAllocator::new());
//! let mut factory = DirectCodecFactory::with_native_pool(CodecOptions::new(), allocator)?;
//!
//! let page = vec![7u8; 4096];
//! let compressed = factory
//!     .get_compressor(CompressionCodecName::Snappy)?
//!     .compress(BytesInput::from_slice(&page))?
//!     .to_vec()?;
//!
//! let decompressed = factory
//!     .get_decompressor(CompressionCodecName::Snappy)?
//!     .decompress(BytesInput::from_vec(compressed), page.len())?
//!     .to_vec()?;
//! assert_eq!(decompressed, page);
//!
//! factory.close()
//! # }
//! ```

use std::error::Error as StdError;

use thiserror::Error;

pub mod bytes_input;
pub mod codec_name;
pub mod compressor;
pub mod decompressor;
pub mod factory;
pub mod lease;
pub mod memory;
pub mod native;
pub mod options;
pub mod pool;

pub use bytes_input::{BytesInput, RegionWindow};
pub use codec_name::CompressionCodecName;
pub use compressor::BytesCompressor;
pub use decompressor::BytesDecompressor;
pub use factory::{CompressorKind, DecompressorKind, DirectCodecFactory};
pub use lease::BufferLease;
pub use memory::{
    ByteBufferAllocator, DirectByteBufferAllocator, HeapByteBufferAllocator, MemoryRegion,
};
pub use options::CodecOptions;
pub use pool::{CodecPool, NativeCodecPool, PoolStats};

/// The capability a codec handle was requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Compress,
    Decompress,
    DirectDecompress,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Capability::Compress => "compression",
            Capability::Decompress => "decompression",
            Capability::DirectDecompress => "direct decompression",
        })
    }
}

#[derive(Debug, Error)]
pub enum DirectCodecError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Unknown compression codec name {0:?}")]
    UnknownCodecName(String),
    #[error("Codec {codec} does not support {capability}")]
    UnsupportedCodec {
        codec: CompressionCodecName,
        capability: Capability,
    },
    #[error("{context}: expected {expected} bytes, found {actual}")]
    SizeMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Range {start}..{end} is out of bounds for a region of capacity {capacity}")]
    OutOfBounds {
        start: usize,
        end: usize,
        capacity: usize,
    },
    #[error("{codec} codec failed")]
    Codec {
        codec: CompressionCodecName,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("Allocator could not provide {requested} bytes: {reason}")]
    ResourceExhaustion { requested: usize, reason: String },
    #[error("I/O error while reading page bytes")]
    Io(#[from] std::io::Error),
}

impl DirectCodecError {
    /// Wraps a failure reported by the native layer of `codec`.
    pub fn codec<E>(codec: CompressionCodecName, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        DirectCodecError::Codec {
            codec,
            source: source.into(),
        }
    }
}

pub type DirectCodecResult<T> = Result<T, DirectCodecError>;
