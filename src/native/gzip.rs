//! GZIP members (RFC 1952) via `flate2`.
//!
//! Handles keep their raw deflate state and CRC between pages and frame each
//! page as a single member themselves, so a pooled handle never rebuilds its
//! deflate or inflate window.
use std::io::{self, prelude::*, Cursor};

use flate2::{Compress, Compression, Crc, Decompress, FlushCompress, FlushDecompress, Status};

use super::{CompressionOutputStream, Compressor, Decompressor, DirectDecompressor};
use crate::{BytesInput, CompressionCodecName, DirectCodecError, DirectCodecResult};

const CODEC: CompressionCodecName = CompressionCodecName::Gzip;

const MAGIC: [u8; 3] = [0x1f, 0x8b, 8];
const HEADER_LEN: usize = 10;
const TRAILER_LEN: usize = 8;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;

/// Output is grown by at least this much before each deflate or inflate call.
const CHUNK: usize = 32 * 1024;

fn header(level: Compression) -> [u8; HEADER_LEN] {
    let xfl = if level.level() >= Compression::best().level() {
        2
    } else if level.level() <= Compression::fast().level() {
        4
    } else {
        0
    };
    [MAGIC[0], MAGIC[1], MAGIC[2], 0, 0, 0, 0, 0, xfl, 0xff]
}

fn corrupt(reason: impl Into<String>) -> DirectCodecError {
    DirectCodecError::codec(CODEC, reason.into())
}

/// Length of the member header at the start of `input`.
fn header_len(input: &[u8]) -> DirectCodecResult<usize> {
    if input.len() < HEADER_LEN || input[..3] != MAGIC {
        return Err(corrupt("input is not a gzip member"));
    }
    let flags = input[3];
    let truncated = || corrupt("gzip header is truncated");
    let mut pos = HEADER_LEN;
    if flags & FEXTRA != 0 {
        let len = input.get(pos..pos + 2).ok_or_else(truncated)?;
        pos += 2 + u16::from_le_bytes([len[0], len[1]]) as usize;
    }
    for flag in [FNAME, FCOMMENT] {
        if flags & flag != 0 {
            let end = input
                .get(pos..)
                .and_then(|rest| rest.iter().position(|&b| b == 0))
                .ok_or_else(truncated)?;
            pos += end + 1;
        }
    }
    if flags & FHCRC != 0 {
        pos += 2;
    }
    if pos > input.len() {
        return Err(truncated());
    }
    Ok(pos)
}

pub struct GzipEncoder {
    level: Compression,
    deflate: Compress,
    crc: Crc,
}

impl GzipEncoder {
    pub fn new(level: u32) -> Self {
        let level = Compression::new(level);
        Self {
            level,
            deflate: Compress::new(level, false),
            crc: Crc::new(),
        }
    }
}

impl Compressor for GzipEncoder {
    fn codec(&self) -> CompressionCodecName {
        CODEC
    }

    fn reset(&mut self) -> DirectCodecResult<()> {
        self.deflate.reset();
        self.crc.reset();
        Ok(())
    }

    fn output_stream<'a>(
        &'a mut self,
        sink: &'a mut Vec<u8>,
    ) -> DirectCodecResult<Box<dyn CompressionOutputStream + 'a>> {
        self.reset()?;
        sink.extend_from_slice(&header(self.level));
        Ok(Box::new(GzipOutputStream {
            deflate: &mut self.deflate,
            crc: &mut self.crc,
            sink,
        }))
    }
}

struct GzipOutputStream<'a> {
    deflate: &'a mut Compress,
    crc: &'a mut Crc,
    sink: &'a mut Vec<u8>,
}

impl GzipOutputStream<'_> {
    fn deflate_step(&mut self, input: &[u8], flush: FlushCompress) -> io::Result<(usize, Status)> {
        self.sink.reserve(CHUNK);
        let before = self.deflate.total_in();
        let status = self
            .deflate
            .compress_vec(input, self.sink, flush)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(((self.deflate.total_in() - before) as usize, status))
    }
}

impl Write for GzipOutputStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.crc.update(buf);
        let mut consumed = 0;
        while consumed < buf.len() {
            consumed += self.deflate_step(&buf[consumed..], FlushCompress::None)?.0;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CompressionOutputStream for GzipOutputStream<'_> {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        while self.deflate_step(&[], FlushCompress::Finish)?.1 != Status::StreamEnd {}
        self.sink.extend_from_slice(&self.crc.sum().to_le_bytes());
        self.sink.extend_from_slice(&self.crc.amount().to_le_bytes());
        Ok(())
    }
}

pub struct GzipDecoder {
    inflate: Decompress,
    crc: Crc,
    input: Vec<u8>,
}

impl Default for GzipDecoder {
    fn default() -> Self {
        Self {
            inflate: Decompress::new(false),
            crc: Crc::new(),
            input: Vec::new(),
        }
    }
}

impl GzipDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn inflate_step(
        &mut self,
        body: &[u8],
        output: &mut [u8],
    ) -> DirectCodecResult<(usize, Status)> {
        let consumed = self.inflate.total_in() as usize;
        let before = self.inflate.total_out();
        let status = self
            .inflate
            .decompress(&body[consumed..], output, FlushDecompress::Finish)
            .map_err(|e| DirectCodecError::codec(CODEC, e))?;
        Ok(((self.inflate.total_out() - before) as usize, status))
    }

    /// Inflates one member into exactly `output`.
    ///
    /// A member that ends early is a codec error; one that has more to give
    /// is inflated to the end so the size mismatch carries its real length.
    fn decode_into(&mut self, input: &[u8], output: &mut [u8]) -> DirectCodecResult<usize> {
        let body = &input[header_len(input)?..];
        self.inflate.reset(false);

        let (produced, mut status) = self.inflate_step(body, output)?;
        if status != Status::StreamEnd {
            if produced < output.len() {
                return Err(corrupt(format!(
                    "gzip member ended after {produced} of {} bytes",
                    output.len()
                )));
            }
            let mut spill = [0u8; 4096];
            while status != Status::StreamEnd {
                let (wrote, next) = self.inflate_step(body, &mut spill)?;
                if wrote == 0 && next != Status::StreamEnd {
                    return Err(corrupt("gzip member is truncated"));
                }
                status = next;
            }
            let actual = self.inflate.total_out() as usize;
            if actual != output.len() {
                return Err(DirectCodecError::SizeMismatch {
                    context: "decompressed page is longer than its declared size",
                    expected: output.len(),
                    actual,
                });
            }
        } else if produced < output.len() {
            return Err(corrupt(format!(
                "gzip member ended after {produced} of {} bytes",
                output.len()
            )));
        }

        self.check_trailer(&body[self.inflate.total_in() as usize..], output)?;
        Ok(output.len())
    }

    /// Inflates one member into a vector of whatever size it turns out to be.
    fn decode_to_vec(&mut self, input: &[u8]) -> DirectCodecResult<Vec<u8>> {
        let body = &input[header_len(input)?..];
        self.inflate.reset(false);

        let mut out = Vec::new();
        loop {
            out.reserve(CHUNK);
            let consumed = self.inflate.total_in() as usize;
            let before = self.inflate.total_out();
            let status = self
                .inflate
                .decompress_vec(&body[consumed..], &mut out, FlushDecompress::Finish)
                .map_err(|e| DirectCodecError::codec(CODEC, e))?;
            if status == Status::StreamEnd {
                break;
            }
            if self.inflate.total_out() == before && self.inflate.total_in() as usize == consumed {
                return Err(corrupt("gzip member is truncated"));
            }
        }
        self.check_trailer(&body[self.inflate.total_in() as usize..], &out)?;
        Ok(out)
    }

    fn check_trailer(&mut self, trailer: &[u8], data: &[u8]) -> DirectCodecResult<()> {
        let trailer = trailer
            .get(..TRAILER_LEN)
            .ok_or_else(|| corrupt("gzip trailer is truncated"))?;
        let crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let len = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);

        self.crc.reset();
        self.crc.update(data);
        if crc != self.crc.sum() || len != self.crc.amount() {
            return Err(corrupt("gzip trailer does not match the inflated data"));
        }
        Ok(())
    }
}

impl Decompressor for GzipDecoder {
    fn codec(&self) -> CompressionCodecName {
        CODEC
    }

    fn reset(&mut self) {
        self.input.clear();
        self.inflate.reset(false);
    }

    fn set_input(&mut self, input: &[u8]) {
        self.input.clear();
        self.input.extend_from_slice(input);
    }

    fn decompress(&mut self, output: &mut [u8]) -> DirectCodecResult<usize> {
        let input = std::mem::take(&mut self.input);
        let result = self.decode_into(&input, output);
        self.input = input;
        result
    }

    fn input_stream<'a>(
        &'a mut self,
        input: BytesInput<'a>,
    ) -> DirectCodecResult<Box<dyn Read + 'a>> {
        let compressed = input.to_vec()?;
        Ok(Box::new(Cursor::new(self.decode_to_vec(&compressed)?)))
    }
}

impl DirectDecompressor for GzipDecoder {
    fn codec(&self) -> CompressionCodecName {
        CODEC
    }

    fn reset(&mut self) {
        self.input.clear();
        self.inflate.reset(false);
    }

    fn decompress_direct(&mut self, input: &[u8], output: &mut [u8]) -> DirectCodecResult<usize> {
        self.decode_into(input, output)
    }
}
