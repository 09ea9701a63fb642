//! LZ4 frames driven through liblz4's frame API.
//!
//! Each handle owns one liblz4 frame context for its whole life. A compressor
//! starts every page with `LZ4F_compressBegin`, which reinitializes the
//! context; a decompressor resets its context before each page. LZ4 is only
//! offered through the array-staging [`Decompressor`].
use std::{
    io::{self, prelude::*},
    ptr,
};

use lz4::liblz4::{
    check_error, BlockChecksum, BlockMode, BlockSize, ContentChecksum, FrameType,
    LZ4FCompressionContext, LZ4FDecompressionContext, LZ4FErrorCode, LZ4FFrameInfo,
    LZ4FPreferences, LZ4F_compressBegin, LZ4F_compressBound, LZ4F_compressEnd,
    LZ4F_compressUpdate, LZ4F_createCompressionContext, LZ4F_createDecompressionContext,
    LZ4F_decompress, LZ4F_flush, LZ4F_freeCompressionContext, LZ4F_freeDecompressionContext,
    LZ4F_resetDecompressionContext, LZ4F_VERSION,
};

use super::{check_produced, CompressionOutputStream, Compressor, Decompressor};
use crate::{BytesInput, CompressionCodecName, DirectCodecError, DirectCodecResult};

const CODEC: CompressionCodecName = CompressionCodecName::Lz4;

/// Input is fed to the encoder at most one block at a time.
const BLOCK: usize = 64 * 1024;

/// Largest frame header liblz4 writes.
const HEADER_MAX: usize = 19;

fn lz4_error(e: io::Error) -> DirectCodecError {
    DirectCodecError::codec(CODEC, e)
}

fn preferences() -> LZ4FPreferences {
    LZ4FPreferences {
        frame_info: LZ4FFrameInfo {
            block_size_id: BlockSize::Max64KB,
            block_mode: BlockMode::Linked,
            content_checksum_flag: ContentChecksum::ChecksumEnabled,
            frame_type: FrameType::Frame,
            content_size: 0,
            dict_id: 0,
            block_checksum_flag: BlockChecksum::NoBlockChecksum,
        },
        compression_level: 0,
        auto_flush: 0,
        favor_dec_speed: 0,
        reserved: [0; 3],
    }
}

pub struct Lz4Encoder {
    context: LZ4FCompressionContext,
    preferences: LZ4FPreferences,
    /// Worst-case output of one block, including the frame's end mark.
    block_bound: usize,
}

impl Lz4Encoder {
    pub fn new() -> DirectCodecResult<Self> {
        let preferences = preferences();
        let block_bound =
            check_error(unsafe { LZ4F_compressBound(BLOCK, &preferences) }).map_err(lz4_error)?;
        let mut context = LZ4FCompressionContext(ptr::null_mut());
        check_error(unsafe { LZ4F_createCompressionContext(&mut context, LZ4F_VERSION) })
            .map_err(lz4_error)?;
        Ok(Self {
            context,
            preferences,
            block_bound,
        })
    }
}

impl Drop for Lz4Encoder {
    fn drop(&mut self) {
        unsafe { LZ4F_freeCompressionContext(self.context) };
    }
}

impl Compressor for Lz4Encoder {
    fn codec(&self) -> CompressionCodecName {
        CODEC
    }

    fn reset(&mut self) -> DirectCodecResult<()> {
        // The next frame's begin call reinitializes the context.
        Ok(())
    }

    fn output_stream<'a>(
        &'a mut self,
        sink: &'a mut Vec<u8>,
    ) -> DirectCodecResult<Box<dyn CompressionOutputStream + 'a>> {
        let context = self.context;
        let preferences = &self.preferences;
        append(sink, HEADER_MAX, |dst, capacity| unsafe {
            LZ4F_compressBegin(context, dst, capacity, preferences)
        })
        .map_err(lz4_error)?;
        Ok(Box::new(Lz4OutputStream {
            context,
            block_bound: self.block_bound,
            sink,
        }))
    }
}

/// Runs one liblz4 call that writes at most `max` bytes at the end of `sink`.
fn append(
    sink: &mut Vec<u8>,
    max: usize,
    op: impl FnOnce(*mut u8, usize) -> LZ4FErrorCode,
) -> io::Result<usize> {
    sink.reserve(max);
    let spare = sink.spare_capacity_mut();
    let written = check_error(op(spare.as_mut_ptr().cast(), spare.len()))?;
    // SAFETY: liblz4 initialized `written` bytes of the spare capacity.
    unsafe { sink.set_len(sink.len() + written) };
    Ok(written)
}

/// Writes one frame into the sink through the encoder's context.
///
/// The encoder stays borrowed for the stream's lifetime, so its context
/// can't start another frame while this one is open.
struct Lz4OutputStream<'a> {
    context: LZ4FCompressionContext,
    block_bound: usize,
    sink: &'a mut Vec<u8>,
}

impl Write for Lz4OutputStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let context = self.context;
        for block in buf.chunks(BLOCK) {
            append(self.sink, self.block_bound, |dst, capacity| unsafe {
                LZ4F_compressUpdate(
                    context,
                    dst,
                    capacity,
                    block.as_ptr(),
                    block.len(),
                    ptr::null(),
                )
            })?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let context = self.context;
        append(self.sink, self.block_bound, |dst, capacity| unsafe {
            LZ4F_flush(context, dst, capacity, ptr::null())
        })?;
        Ok(())
    }
}

impl CompressionOutputStream for Lz4OutputStream<'_> {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        let context = self.context;
        append(self.sink, self.block_bound, |dst, capacity| unsafe {
            LZ4F_compressEnd(context, dst, capacity, ptr::null())
        })?;
        Ok(())
    }
}

/// Progress of one `LZ4F_decompress` call.
struct DecompressStep {
    consumed: usize,
    wrote: usize,
    /// Zero once the frame is complete.
    need: usize,
}

fn decompress_step(
    context: LZ4FDecompressionContext,
    src: &[u8],
    dst: &mut [u8],
) -> io::Result<DecompressStep> {
    let mut src_size = src.len();
    let mut dst_size = dst.len();
    let need = check_error(unsafe {
        LZ4F_decompress(
            context,
            dst.as_mut_ptr(),
            &mut dst_size,
            src.as_ptr(),
            &mut src_size,
            ptr::null(),
        )
    })?;
    Ok(DecompressStep {
        consumed: src_size,
        wrote: dst_size,
        need,
    })
}

fn truncated() -> DirectCodecError {
    DirectCodecError::codec(CODEC, "frame ends before its end mark")
}

pub struct Lz4Decoder {
    context: LZ4FDecompressionContext,
    input: Vec<u8>,
}

impl Lz4Decoder {
    pub fn new() -> DirectCodecResult<Self> {
        let mut context = LZ4FDecompressionContext(ptr::null_mut());
        check_error(unsafe { LZ4F_createDecompressionContext(&mut context, LZ4F_VERSION) })
            .map_err(lz4_error)?;
        Ok(Self {
            context,
            input: Vec::new(),
        })
    }

    /// Decodes one frame into `output`, which must be exactly its length.
    fn decode_into(
        context: LZ4FDecompressionContext,
        input: &[u8],
        output: &mut [u8],
    ) -> DirectCodecResult<usize> {
        unsafe { LZ4F_resetDecompressionContext(context) };
        let mut pos = 0;
        let mut produced = 0;
        while produced < output.len() {
            let step = decompress_step(context, &input[pos..], &mut output[produced..])
                .map_err(lz4_error)?;
            pos += step.consumed;
            produced += step.wrote;
            if step.need == 0 {
                check_produced(output.len(), produced)?;
                return Ok(produced);
            }
            if step.consumed == 0 && step.wrote == 0 {
                return Err(truncated());
            }
        }

        // The output is full; measure whatever the frame still holds.
        let mut spill = [0u8; 4096];
        let mut extra = 0;
        loop {
            let step = decompress_step(context, &input[pos..], &mut spill).map_err(lz4_error)?;
            pos += step.consumed;
            extra += step.wrote;
            if step.need == 0 {
                break;
            }
            if step.consumed == 0 && step.wrote == 0 {
                return Err(truncated());
            }
        }
        check_produced(output.len(), produced + extra)?;
        Ok(produced)
    }
}

impl Drop for Lz4Decoder {
    fn drop(&mut self) {
        unsafe { LZ4F_freeDecompressionContext(self.context) };
    }
}

impl Decompressor for Lz4Decoder {
    fn codec(&self) -> CompressionCodecName {
        CODEC
    }

    fn reset(&mut self) {
        self.input.clear();
        unsafe { LZ4F_resetDecompressionContext(self.context) };
    }

    fn set_input(&mut self, input: &[u8]) {
        self.input.clear();
        self.input.extend_from_slice(input);
    }

    fn decompress(&mut self, output: &mut [u8]) -> DirectCodecResult<usize> {
        Self::decode_into(self.context, &self.input, output)
    }

    fn input_stream<'a>(
        &'a mut self,
        input: BytesInput<'a>,
    ) -> DirectCodecResult<Box<dyn Read + 'a>> {
        let compressed = input.to_vec()?;
        unsafe { LZ4F_resetDecompressionContext(self.context) };
        Ok(Box::new(Lz4InputStream {
            context: &mut self.context,
            compressed,
            pos: 0,
            finished: false,
        }))
    }
}

/// Streams a frame out of the handle's context.
struct Lz4InputStream<'a> {
    context: &'a mut LZ4FDecompressionContext,
    compressed: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl Read for Lz4InputStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.finished {
            return Ok(0);
        }
        loop {
            let step = decompress_step(*self.context, &self.compressed[self.pos..], buf)?;
            self.pos += step.consumed;
            self.finished = step.need == 0;
            if step.wrote > 0 || self.finished {
                return Ok(step.wrote);
            }
            // Input that ran out mid-frame.
            if step.consumed == 0 {
                return Ok(0);
            }
        }
    }
}
