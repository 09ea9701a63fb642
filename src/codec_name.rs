//! Names of the compression codecs a page can be written with.
use std::{fmt, str::FromStr};

use enumset::EnumSetType;

use crate::DirectCodecError;

/// A compression scheme, as recorded in page and column metadata.
///
/// [`Uncompressed`](Self::Uncompressed) is the "no codec" sentinel:
/// the factory maps it to the no-op strategies.
#[derive(EnumSetType, Debug, Hash)]
pub enum CompressionCodecName {
    Uncompressed,
    Snappy,
    Gzip,
    Lz4,
    Zstd,
}

impl CompressionCodecName {
    pub const ALL: [CompressionCodecName; 5] = [
        CompressionCodecName::Uncompressed,
        CompressionCodecName::Snappy,
        CompressionCodecName::Gzip,
        CompressionCodecName::Lz4,
        CompressionCodecName::Zstd,
    ];

    /// The name used for this codec in file metadata and configuration.
    pub fn name(self) -> &'static str {
        match self {
            CompressionCodecName::Uncompressed => "UNCOMPRESSED",
            CompressionCodecName::Snappy => "SNAPPY",
            CompressionCodecName::Gzip => "GZIP",
            CompressionCodecName::Lz4 => "LZ4",
            CompressionCodecName::Zstd => "ZSTD",
        }
    }

    /// Conventional file extension for data compressed with this codec.
    pub fn extension(self) -> &'static str {
        match self {
            CompressionCodecName::Uncompressed => "",
            CompressionCodecName::Snappy => ".snappy",
            CompressionCodecName::Gzip => ".gz",
            CompressionCodecName::Lz4 => ".lz4",
            CompressionCodecName::Zstd => ".zstd",
        }
    }

    pub fn is_compressed(self) -> bool {
        self != CompressionCodecName::Uncompressed
    }
}

impl fmt::Display for CompressionCodecName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionCodecName {
    type Err = DirectCodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|codec| codec.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DirectCodecError::UnknownCodecName(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!(
            "snappy".parse::<CompressionCodecName>().unwrap(),
            CompressionCodecName::Snappy
        );
        assert_eq!(
            " ZSTD ".parse::<CompressionCodecName>().unwrap(),
            CompressionCodecName::Zstd
        );
        for codec in CompressionCodecName::ALL {
            assert_eq!(codec.to_string().parse::<CompressionCodecName>().unwrap(), codec);
        }
    }

    #[test]
    fn rejects_unknown_names() {
        assert_matches!(
            "brotli".parse::<CompressionCodecName>(),
            Err(DirectCodecError::UnknownCodecName(name)) if name == "brotli"
        );
    }

    #[test]
    fn only_uncompressed_is_the_sentinel() {
        let sentinels: Vec<_> = CompressionCodecName::ALL
            .into_iter()
            .filter(|c| !c.is_compressed())
            .collect();
        assert_eq!(sentinels, vec![CompressionCodecName::Uncompressed]);
        assert_eq!(CompressionCodecName::Gzip.extension(), ".gz");
    }
}
