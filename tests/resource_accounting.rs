mod common;

use common::*;

use std::sync::{atomic::Ordering, Arc};

use anyhow::Result;
use assert_matches::assert_matches;
use direct_codec::{
    BytesInput, CodecOptions, CodecPool, CompressionCodecName, CompressorKind, DecompressorKind,
    DirectByteBufferAllocator, DirectCodecError, DirectCodecFactory, NativeCodecPool,
};

#[test]
fn every_borrow_is_returned_once() -> Result<()> {
    let (mut factory, allocator, pool) = counting_factory(CodecOptions::new());

    let mut expected_compressors = 0;
    let mut expected_decompressors = 0;
    let mut expected_direct = 0;
    for codec in codecs() {
        if factory.create_compressor(codec, 1024)?.kind() == CompressorKind::HeapBuffered {
            expected_compressors += 1;
        }
        match factory.create_decompressor(codec)?.kind() {
            DecompressorKind::Noop => {}
            // The direct handle plus the stream fallback.
            DecompressorKind::DirectCapable => {
                expected_direct += 1;
                expected_decompressors += 1;
            }
            DecompressorKind::Indirect => expected_decompressors += 1,
        }
        assert_eq!(factory.created_strategies(), 2);
        factory.release()?;
        assert_eq!(pool.outstanding(), 0, "{codec}");
    }

    assert_eq!(pool.compressors.borrowed(), expected_compressors);
    assert_eq!(pool.compressors.returned(), expected_compressors);
    assert_eq!(pool.decompressors.borrowed(), expected_decompressors);
    assert_eq!(pool.decompressors.returned(), expected_decompressors);
    assert_eq!(pool.direct_decompressors.borrowed(), expected_direct);
    assert_eq!(pool.direct_decompressors.returned(), expected_direct);
    assert!(expected_direct > 0 && expected_decompressors >= expected_direct);
    assert_eq!(allocator.outstanding_bytes(), 0);
    Ok(())
}

#[test]
fn handles_are_borrowed_when_the_strategy_is_built() -> Result<()> {
    let (mut factory, _allocator, pool) = counting_factory(CodecOptions::new());

    let kind = factory.create_decompressor(CompressionCodecName::Gzip)?.kind();
    assert_eq!(kind, DecompressorKind::DirectCapable);
    assert_eq!(pool.direct_decompressors.borrowed(), 1);
    assert_eq!(pool.decompressors.borrowed(), 1);

    factory.release()?;
    assert_eq!(pool.direct_decompressors.returned(), 1);
    assert_eq!(pool.decompressors.returned(), 1);
    Ok(())
}

#[test]
fn closing_the_factory_releases_created_strategies() -> Result<()> {
    let (mut factory, _allocator, pool) = counting_factory(CodecOptions::new());

    factory.create_decompressor(CompressionCodecName::Gzip)?;
    factory.create_compressor(CompressionCodecName::Zstd, 1024)?;
    assert_eq!(pool.outstanding(), 3);
    assert_eq!(factory.created_strategies(), 2);

    factory.close()?;
    assert_eq!(pool.outstanding(), 0);
    Ok(())
}

#[test]
fn dropping_the_factory_returns_created_strategies() -> Result<()> {
    let (mut factory, allocator, pool) = counting_factory(CodecOptions::new());

    factory.create_compressor(CompressionCodecName::Gzip, 0)?;
    factory
        .create_compressor(CompressionCodecName::Snappy, 0)?
        .compress(BytesInput::from_slice(b"some page"))?;
    factory.create_decompressor(CompressionCodecName::Snappy)?;
    assert_eq!(pool.outstanding(), 3);
    assert!(allocator.outstanding_bytes() > 0);

    drop(factory);
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(allocator.outstanding_bytes(), 0);
    Ok(())
}

#[test]
fn closing_the_factory_releases_cached_strategies() -> Result<()> {
    let (mut factory, allocator, pool) = counting_factory(CodecOptions::new());
    let page = page(4000);

    for codec in codecs() {
        let compressed = factory
            .get_compressor(codec)?
            .compress(BytesInput::from_slice(&page))?
            .to_vec()?;
        factory
            .get_decompressor(codec)?
            .decompress(BytesInput::from_vec(compressed), page.len())?;
    }
    assert_eq!(factory.cached_strategies(), 2 * codecs().len());
    assert!(pool.outstanding() > 0);
    assert!(allocator.outstanding_bytes() > 0);

    factory.close()?;
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(allocator.outstanding_bytes(), 0);
    assert_eq!(allocator.allocations(), allocator.releases());
    Ok(())
}

#[test]
fn dropping_the_factory_releases_cached_strategies() -> Result<()> {
    let (mut factory, allocator, pool) = counting_factory(CodecOptions::new());
    factory
        .get_compressor(CompressionCodecName::Snappy)?
        .compress(BytesInput::from_slice(b"some page"))?;
    factory.get_decompressor(CompressionCodecName::Gzip)?;

    drop(factory);
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(allocator.outstanding_bytes(), 0);
    Ok(())
}

#[test]
fn native_pool_recycles_handles_across_strategies() -> Result<()> {
    let pool = Arc::new(NativeCodecPool::new(CodecOptions::new())?);
    let mut factory = DirectCodecFactory::new(
        CodecOptions::new(),
        Arc::new(DirectByteBufferAllocator::new()),
        pool.clone(),
    )?;

    for _ in 0..10 {
        factory.create_decompressor(CompressionCodecName::Snappy)?;
        factory.release()?;
    }
    let stats = pool.stats();
    // One direct handle and one stream fallback, reused ten times.
    assert_eq!(stats.created, 2);
    assert_eq!(stats.borrowed, 20);
    assert_eq!(stats.outstanding(), 0);
    assert!(pool.supports_direct_decompression(CompressionCodecName::Snappy));
    Ok(())
}

#[test]
fn failing_returns_are_reported_after_everything_is_released() -> Result<()> {
    let pool = FailingDirectPool::new();
    let mut factory = DirectCodecFactory::new(
        CodecOptions::new(),
        Arc::new(DirectByteBufferAllocator::new()),
        pool.clone(),
    )?;
    factory.get_decompressor(CompressionCodecName::Gzip)?;
    factory.get_decompressor(CompressionCodecName::Snappy)?;
    factory.get_compressor(CompressionCodecName::Gzip)?;
    pool.fail_returns.store(true, Ordering::SeqCst);

    assert_matches!(factory.release(), Err(DirectCodecError::Configuration(_)));
    assert_eq!(pool.direct_returned.load(Ordering::SeqCst), 2);
    assert_eq!(pool.native_stats().outstanding(), 0);
    assert_eq!(factory.cached_strategies(), 0);

    pool.fail_returns.store(false, Ordering::SeqCst);
    factory.release()?;
    Ok(())
}
