//! Snappy raw block format via the `snap` crate.
//!
//! A page is always one block. Compression only runs region to region, so
//! the encoder has no output stream.
use std::io::{prelude::*, Cursor};

use super::{check_produced, Decompressor, DirectDecompressor};
use crate::{BytesInput, CompressionCodecName, DirectCodecError, DirectCodecResult};

const CODEC: CompressionCodecName = CompressionCodecName::Snappy;

pub struct SnappyEncoder {
    encoder: snap::raw::Encoder,
}

impl SnappyEncoder {
    pub fn new() -> Self {
        Self {
            encoder: snap::raw::Encoder::new(),
        }
    }

    /// Worst-case compressed size of `input_len` bytes, or `None` if snappy
    /// cannot encode that much in one block.
    pub fn max_compressed_length(input_len: usize) -> Option<usize> {
        match snap::raw::max_compress_len(input_len) {
            0 => None,
            n => Some(n),
        }
    }

    /// Compresses `input` straight into `output`, returning the compressed length.
    pub fn compress_direct(&mut self, input: &[u8], output: &mut [u8]) -> DirectCodecResult<usize> {
        self.encoder
            .compress(input, output)
            .map_err(|e| DirectCodecError::codec(CODEC, e))
    }
}

pub struct SnappyDecoder {
    decoder: snap::raw::Decoder,
    input: Vec<u8>,
}

impl SnappyDecoder {
    pub fn new() -> Self {
        Self {
            decoder: snap::raw::Decoder::new(),
            input: Vec::new(),
        }
    }

    fn decode_into(
        decoder: &mut snap::raw::Decoder,
        input: &[u8],
        output: &mut [u8],
    ) -> DirectCodecResult<usize> {
        let len = snap::raw::decompress_len(input).map_err(|e| DirectCodecError::codec(CODEC, e))?;
        if len != output.len() {
            return Err(DirectCodecError::SizeMismatch {
                context: "snappy block length differs from the declared page size",
                expected: output.len(),
                actual: len,
            });
        }
        let produced = decoder
            .decompress(input, output)
            .map_err(|e| DirectCodecError::codec(CODEC, e))?;
        check_produced(output.len(), produced)?;
        Ok(produced)
    }
}

impl Decompressor for SnappyDecoder {
    fn codec(&self) -> CompressionCodecName {
        CODEC
    }

    fn reset(&mut self) {
        self.input.clear();
    }

    fn set_input(&mut self, input: &[u8]) {
        self.input.clear();
        self.input.extend_from_slice(input);
    }

    fn decompress(&mut self, output: &mut [u8]) -> DirectCodecResult<usize> {
        Self::decode_into(&mut self.decoder, &self.input, output)
    }

    fn input_stream<'a>(
        &'a mut self,
        input: BytesInput<'a>,
    ) -> DirectCodecResult<Box<dyn Read + 'a>> {
        let compressed = input.to_vec()?;
        let decoded = self
            .decoder
            .decompress_vec(&compressed)
            .map_err(|e| DirectCodecError::codec(CODEC, e))?;
        Ok(Box::new(Cursor::new(decoded)))
    }
}

impl DirectDecompressor for SnappyDecoder {
    fn codec(&self) -> CompressionCodecName {
        CODEC
    }

    fn reset(&mut self) {
        self.input.clear();
    }

    fn decompress_direct(&mut self, input: &[u8], output: &mut [u8]) -> DirectCodecResult<usize> {
        Self::decode_into(&mut self.decoder, input, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn encode(data: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; SnappyEncoder::max_compressed_length(data.len()).unwrap()];
        let n = SnappyEncoder::new().compress_direct(data, &mut out).unwrap();
        out.truncate(n);
        out
    }

    #[test]
    fn blocks_round_trip_on_both_paths() {
        let data = b"snappy snappy snappy snappy snappy".repeat(20);
        let compressed = encode(&data);
        assert!(compressed.len() < data.len());

        let mut decoder = SnappyDecoder::new();
        let mut direct = vec![0u8; data.len()];
        decoder.decompress_direct(&compressed, &mut direct).unwrap();
        assert_eq!(direct, data);

        let mut streamed = Vec::new();
        decoder
            .input_stream(BytesInput::from_slice(&compressed))
            .unwrap()
            .read_to_end(&mut streamed)
            .unwrap();
        assert_eq!(streamed, data);
    }

    #[test]
    fn declared_size_must_match_block_length() {
        let compressed = encode(&[3u8; 100]);
        let mut decoder = SnappyDecoder::new();
        let mut output = vec![0u8; 99];
        assert_matches!(
            decoder.decompress_direct(&compressed, &mut output),
            Err(DirectCodecError::SizeMismatch {
                expected: 99,
                actual: 100,
                ..
            })
        );
    }
}
