//! Typed entry points into the compression libraries.
//!
//! Each codec implements the handle traits below. Handles are stateful and
//! expensive enough to be worth pooling: they are borrowed from a
//! [`CodecPool`](crate::CodecPool), [reset](Compressor::reset) before each use,
//! and given back when the strategy holding them is released.
use std::io::{self, prelude::*};

use crate::{BytesInput, CompressionCodecName, DirectCodecError, DirectCodecResult};

pub mod gzip;
#[cfg(feature = "lz4")]
pub mod lz4;
pub mod snappy;
#[cfg(feature = "zstd")]
pub mod zstd;

/// A compression handle that streams into a byte vector.
pub trait Compressor: Send {
    fn codec(&self) -> CompressionCodecName;

    /// Drops any state left over from a previous (possibly failed) use.
    fn reset(&mut self) -> DirectCodecResult<()>;

    /// Wraps `sink` in this codec's encoder. Compressed bytes are appended to `sink`.
    fn output_stream<'a>(
        &'a mut self,
        sink: &'a mut Vec<u8>,
    ) -> DirectCodecResult<Box<dyn CompressionOutputStream + 'a>>;
}

/// The writing end of a [`Compressor`].
pub trait CompressionOutputStream: Write {
    /// Writes out the codec's trailing data and closes the stream.
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// A decompression handle that only works on arrays it has copied in.
pub trait Decompressor: Send {
    fn codec(&self) -> CompressionCodecName;

    fn reset(&mut self);

    /// Copies `input` into the handle's own staging buffer.
    fn set_input(&mut self, input: &[u8]);

    /// Decompresses the staged input into all of `output`, returning the bytes produced.
    fn decompress(&mut self, output: &mut [u8]) -> DirectCodecResult<usize>;

    /// Wraps compressed `input` in this codec's decoder.
    fn input_stream<'a>(
        &'a mut self,
        input: BytesInput<'a>,
    ) -> DirectCodecResult<Box<dyn Read + 'a>>;
}

/// A decompression handle that reads and writes caller memory in place.
pub trait DirectDecompressor: Send {
    fn codec(&self) -> CompressionCodecName;

    fn reset(&mut self);

    /// Decompresses all of `input` into `output`, returning the bytes produced.
    fn decompress_direct(&mut self, input: &[u8], output: &mut [u8]) -> DirectCodecResult<usize>;
}

/// Fills `output` from a decoder and checks the decoder has nothing left.
///
/// Running dry early means the input was truncated or corrupt; anything left
/// over means the declared size was too small.
pub(crate) fn read_exact_checked<R: Read + ?Sized>(
    codec: CompressionCodecName,
    reader: &mut R,
    output: &mut [u8],
) -> DirectCodecResult<usize> {
    reader
        .read_exact(output)
        .map_err(|e| DirectCodecError::codec(codec, e))?;

    let mut next = [0u8; 1];
    let extra = loop {
        match reader.read(&mut next) {
            Ok(0) => return Ok(output.len()),
            Ok(n) => break n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DirectCodecError::codec(codec, e)),
        }
    };
    let rest = io::copy(reader, &mut io::sink()).map_err(|e| DirectCodecError::codec(codec, e))?;
    Err(DirectCodecError::SizeMismatch {
        context: "decompressed page is longer than its declared size",
        expected: output.len(),
        actual: output.len() + extra + rest as usize,
    })
}

/// Checks a decompressor produced exactly the declared number of bytes.
pub(crate) fn check_produced(expected: usize, actual: usize) -> DirectCodecResult<()> {
    if expected != actual {
        return Err(DirectCodecError::SizeMismatch {
            context: "decompressed page size differs from its declared size",
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn exact_reads_succeed() {
        let mut out = [0u8; 3];
        let n = read_exact_checked(CompressionCodecName::Gzip, &mut &b"abc"[..], &mut out).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&out, b"abc");
    }

    #[test]
    fn leftovers_are_a_size_mismatch() {
        let mut out = [0u8; 2];
        assert_matches!(
            read_exact_checked(CompressionCodecName::Gzip, &mut &b"abcde"[..], &mut out),
            Err(DirectCodecError::SizeMismatch {
                expected: 2,
                actual: 5,
                ..
            })
        );
    }

    #[test]
    fn short_reads_are_codec_errors() {
        let mut out = [0u8; 4];
        assert_matches!(
            read_exact_checked(CompressionCodecName::Lz4, &mut &b"ab"[..], &mut out),
            Err(DirectCodecError::Codec {
                codec: CompressionCodecName::Lz4,
                ..
            })
        );
    }
}
