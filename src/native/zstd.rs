//! Zstandard frames via the `zstd` crate.
//!
//! Both directions keep their native context for the life of the handle and
//! only reset its session between pages.
use std::io::{self, prelude::*};

use log::*;
use zstd::{
    stream::raw::{self, InBuffer, Operation, OutBuffer},
    zstd_safe::{get_error_name, DCtx, ResetDirective},
};

use super::{check_produced, CompressionOutputStream, Compressor, Decompressor, DirectDecompressor};
use crate::{BytesInput, CompressionCodecName, DirectCodecError, DirectCodecResult};

const CODEC: CompressionCodecName = CompressionCodecName::Zstd;

/// The sink is grown by at least this much before each encoder step.
const CHUNK: usize = 32 * 1024;

fn zstd_error(code: usize) -> DirectCodecError {
    DirectCodecError::codec(CODEC, get_error_name(code))
}

pub struct ZstdEncoder {
    context: raw::Encoder<'static>,
}

impl ZstdEncoder {
    pub fn new(level: i32) -> DirectCodecResult<Self> {
        let context = raw::Encoder::new(level).map_err(|e| DirectCodecError::codec(CODEC, e))?;
        Ok(Self { context })
    }
}

impl Compressor for ZstdEncoder {
    fn codec(&self) -> CompressionCodecName {
        CODEC
    }

    fn reset(&mut self) -> DirectCodecResult<()> {
        self.context
            .reinit()
            .map_err(|e| DirectCodecError::codec(CODEC, e))
    }

    fn output_stream<'a>(
        &'a mut self,
        sink: &'a mut Vec<u8>,
    ) -> DirectCodecResult<Box<dyn CompressionOutputStream + 'a>> {
        self.reset()?;
        Ok(Box::new(ZstdOutputStream {
            context: &mut self.context,
            sink,
        }))
    }
}

/// Writes one frame straight into the spare capacity of the sink.
struct ZstdOutputStream<'a> {
    context: &'a mut raw::Encoder<'static>,
    sink: &'a mut Vec<u8>,
}

impl ZstdOutputStream<'_> {
    fn step(
        &mut self,
        op: impl FnOnce(&mut raw::Encoder<'static>, &mut OutBuffer<'_, Vec<u8>>) -> io::Result<usize>,
    ) -> io::Result<usize> {
        self.sink.reserve(CHUNK);
        let pos = self.sink.len();
        let mut output = OutBuffer::around_pos(&mut *self.sink, pos);
        op(&mut *self.context, &mut output)
    }
}

impl Write for ZstdOutputStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut input = InBuffer::around(buf);
        while input.pos < buf.len() {
            self.step(|context, output| context.run(&mut input, output))?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        while self.step(|context, output| context.flush(output))? != 0 {}
        Ok(())
    }
}

impl CompressionOutputStream for ZstdOutputStream<'_> {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        while self.step(|context, output| context.finish(output, false))? != 0 {}
        Ok(())
    }
}

pub struct ZstdDecoder {
    context: DCtx<'static>,
    input: Vec<u8>,
}

impl ZstdDecoder {
    pub fn new() -> DirectCodecResult<Self> {
        let context = DCtx::try_create()
            .ok_or_else(|| DirectCodecError::codec(CODEC, "couldn't create a decompression context"))?;
        Ok(Self {
            context,
            input: Vec::new(),
        })
    }

    fn decode_into(
        context: &mut DCtx<'static>,
        input: &[u8],
        output: &mut [u8],
    ) -> DirectCodecResult<usize> {
        let produced = context.decompress(output, input).map_err(zstd_error)?;
        check_produced(output.len(), produced)?;
        Ok(produced)
    }

    fn reset_session(&mut self) {
        self.input.clear();
        if let Err(code) = self.context.reset(ResetDirective::SessionOnly) {
            warn!("Couldn't reset a zstd decompression context: {}", get_error_name(code));
        }
    }
}

impl Decompressor for ZstdDecoder {
    fn codec(&self) -> CompressionCodecName {
        CODEC
    }

    fn reset(&mut self) {
        self.reset_session();
    }

    fn set_input(&mut self, input: &[u8]) {
        self.input.clear();
        self.input.extend_from_slice(input);
    }

    fn decompress(&mut self, output: &mut [u8]) -> DirectCodecResult<usize> {
        Self::decode_into(&mut self.context, &self.input, output)
    }

    fn input_stream<'a>(
        &'a mut self,
        input: BytesInput<'a>,
    ) -> DirectCodecResult<Box<dyn Read + 'a>> {
        let compressed = input.to_vec()?;
        self.context
            .reset(ResetDirective::SessionOnly)
            .map_err(zstd_error)?;
        Ok(Box::new(ZstdInputStream {
            context: &mut self.context,
            compressed,
            pos: 0,
        }))
    }
}

impl DirectDecompressor for ZstdDecoder {
    fn codec(&self) -> CompressionCodecName {
        CODEC
    }

    fn reset(&mut self) {
        self.reset_session();
    }

    fn decompress_direct(&mut self, input: &[u8], output: &mut [u8]) -> DirectCodecResult<usize> {
        Self::decode_into(&mut self.context, input, output)
    }
}

/// Streams a frame out of the handle's context.
struct ZstdInputStream<'a> {
    context: &'a mut DCtx<'static>,
    compressed: Vec<u8>,
    pos: usize,
}

impl Read for ZstdInputStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let mut input = InBuffer::around(&self.compressed[self.pos..]);
            let mut output = OutBuffer::around(&mut *buf);
            let hint = self
                .context
                .decompress_stream(&mut output, &mut input)
                .map_err(|code| io::Error::new(io::ErrorKind::InvalidData, get_error_name(code)))?;
            let consumed = input.pos;
            let wrote = output.pos();
            self.pos += consumed;
            if wrote > 0 {
                return Ok(wrote);
            }
            // A finished frame, or input that ran out mid-frame.
            if hint == 0 || consumed == 0 {
                return Ok(0);
            }
        }
    }
}
