use enumset::{enum_set, EnumSet};

use crate::{CompressionCodecName, DirectCodecError, DirectCodecResult};

/// Default page size hint: compressed pages are rarely bigger than this.
pub const DEFAULT_PAGE_SIZE: usize = 1024 * 1024;
pub const DEFAULT_GZIP_LEVEL: u32 = 6;
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Tuning for a [`DirectCodecFactory`](crate::DirectCodecFactory) and the
/// [`NativeCodecPool`](crate::NativeCodecPool) behind it.
#[derive(Debug, Clone)]
pub struct CodecOptions {
    page_size: usize,
    gzip_level: u32,
    zstd_level: i32,
    direct_decompression: EnumSet<CompressionCodecName>,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            gzip_level: DEFAULT_GZIP_LEVEL,
            zstd_level: DEFAULT_ZSTD_LEVEL,
            direct_decompression: enum_set!(
                CompressionCodecName::Snappy
                    | CompressionCodecName::Gzip
                    | CompressionCodecName::Zstd
            ),
        }
    }
}

impl CodecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Specifies the page size hint used to pre-size compression output buffers
    /// for compressors handed out by
    /// [`get_compressor()`](crate::DirectCodecFactory::get_compressor).
    pub fn page_size(self, page_size: usize) -> Self {
        Self { page_size, ..self }
    }

    /// Specifies the GZIP compression level, 0 (store) through 9 (best).
    pub fn gzip_level(self, gzip_level: u32) -> Self {
        Self { gzip_level, ..self }
    }

    /// Specifies the Zstandard compression level, 1 through 22.
    pub fn zstd_level(self, zstd_level: i32) -> Self {
        Self { zstd_level, ..self }
    }

    /// Specifies which codecs decompress straight between memory regions.
    ///
    /// Codecs left out of the set are decompressed through staging arrays.
    /// LZ4 is always staged and is ignored here.
    pub fn direct_decompression(mut self, codecs: EnumSet<CompressionCodecName>) -> Self {
        self.direct_decompression = codecs
            - (CompressionCodecName::Lz4 | CompressionCodecName::Uncompressed);
        self
    }

    pub fn get_page_size(&self) -> usize {
        self.page_size
    }

    pub fn get_gzip_level(&self) -> u32 {
        self.gzip_level
    }

    pub fn get_zstd_level(&self) -> i32 {
        self.zstd_level
    }

    pub fn get_direct_decompression(&self) -> EnumSet<CompressionCodecName> {
        self.direct_decompression
    }

    pub fn validate(&self) -> DirectCodecResult<()> {
        if self.gzip_level > 9 {
            return Err(DirectCodecError::Configuration(format!(
                "gzip level {} is outside 0..=9",
                self.gzip_level
            )));
        }
        if !(1..=22).contains(&self.zstd_level) {
            return Err(DirectCodecError::Configuration(format!(
                "zstd level {} is outside 1..=22",
                self.zstd_level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_are_valid() {
        let options = CodecOptions::new();
        options.validate().unwrap();
        assert_eq!(options.get_page_size(), DEFAULT_PAGE_SIZE);
        assert!(!options
            .get_direct_decompression()
            .contains(CompressionCodecName::Lz4));
    }

    #[test]
    fn out_of_range_levels_are_rejected() {
        assert_matches!(
            CodecOptions::new().gzip_level(10).validate(),
            Err(DirectCodecError::Configuration(_))
        );
        assert_matches!(
            CodecOptions::new().zstd_level(0).validate(),
            Err(DirectCodecError::Configuration(_))
        );
    }

    #[test]
    fn lz4_cannot_be_made_direct() {
        let options = CodecOptions::new()
            .direct_decompression(CompressionCodecName::Lz4 | CompressionCodecName::Snappy);
        assert_eq!(
            options.get_direct_decompression(),
            enum_set!(CompressionCodecName::Snappy)
        );
    }
}
