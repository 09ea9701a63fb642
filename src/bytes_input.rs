//! Page payloads handed to and returned from the codec strategies.
use std::{
    fmt,
    io::{self, prelude::*, Cursor},
};

use crate::{DirectCodecError, DirectCodecResult, MemoryRegion};

/// A borrowed view into a [`MemoryRegion`] that remembers whether the region is direct.
#[derive(Debug, Clone, Copy)]
pub struct RegionWindow<'a> {
    bytes: &'a [u8],
    direct: bool,
}

impl<'a> RegionWindow<'a> {
    pub fn as_slice(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn is_direct(&self) -> bool {
        self.direct
    }
}

/// Bytes of known size, backed by a slice, a vector, a memory region, a reader,
/// or a concatenation of those.
///
/// The size is always known up front. Consuming methods take `self`, so a
/// reader-backed input is fed to a codec at most once.
pub enum BytesInput<'a> {
    Slice(&'a [u8]),
    Owned(Vec<u8>),
    Region(RegionWindow<'a>),
    Stream {
        reader: Box<dyn Read + 'a>,
        size: usize,
    },
    Concat(Vec<BytesInput<'a>>),
}

impl<'a> BytesInput<'a> {
    pub fn empty() -> Self {
        BytesInput::Slice(&[])
    }

    pub fn from_slice(bytes: &'a [u8]) -> Self {
        BytesInput::Slice(bytes)
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        BytesInput::Owned(bytes)
    }

    /// The window `[position, limit)` of `region`.
    pub fn from_region(region: &'a MemoryRegion) -> Self {
        BytesInput::Region(RegionWindow {
            bytes: region.as_slice(),
            direct: region.is_direct(),
        })
    }

    /// `len` bytes of `region` starting at absolute `offset`, regardless of its window.
    pub fn from_region_range(
        region: &'a MemoryRegion,
        offset: usize,
        len: usize,
    ) -> DirectCodecResult<Self> {
        let end = offset
            .checked_add(len)
            .ok_or(DirectCodecError::OutOfBounds {
                start: offset,
                end: usize::MAX,
                capacity: region.capacity(),
            })?;
        Ok(BytesInput::Region(RegionWindow {
            bytes: region.slice(offset..end)?,
            direct: region.is_direct(),
        }))
    }

    /// Exactly `size` bytes read from `reader`.
    pub fn from_reader<R: Read + 'a>(reader: R, size: usize) -> Self {
        BytesInput::Stream {
            reader: Box::new(reader),
            size,
        }
    }

    pub fn concat(parts: Vec<BytesInput<'a>>) -> Self {
        BytesInput::Concat(parts)
    }

    pub fn size(&self) -> usize {
        match self {
            BytesInput::Slice(bytes) => bytes.len(),
            BytesInput::Owned(bytes) => bytes.len(),
            BytesInput::Region(window) => window.bytes.len(),
            BytesInput::Stream { size, .. } => *size,
            BytesInput::Concat(parts) => parts.iter().map(BytesInput::size).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether the bytes live in a direct region native code can read in place.
    pub fn is_direct(&self) -> bool {
        matches!(self, BytesInput::Region(window) if window.direct)
    }

    /// The bytes, if they are already contiguous in memory.
    pub fn as_contiguous(&self) -> Option<&[u8]> {
        match self {
            BytesInput::Slice(bytes) => Some(*bytes),
            BytesInput::Owned(bytes) => Some(bytes.as_slice()),
            BytesInput::Region(window) => Some(window.bytes),
            BytesInput::Stream { .. } | BytesInput::Concat(_) => None,
        }
    }

    /// Writes every byte to `w`.
    ///
    /// Fails with [`io::ErrorKind::UnexpectedEof`] if a reader-backed input
    /// runs dry before its declared size.
    pub fn write_all_to<W: Write + ?Sized>(self, w: &mut W) -> io::Result<()> {
        match self {
            BytesInput::Slice(bytes) => w.write_all(bytes),
            BytesInput::Owned(bytes) => w.write_all(&bytes),
            BytesInput::Region(window) => w.write_all(window.bytes),
            BytesInput::Stream { reader, size } => {
                let copied = io::copy(&mut reader.take(size as u64), w)?;
                if copied != size as u64 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("stream ended after {copied} of {size} bytes"),
                    ));
                }
                Ok(())
            }
            BytesInput::Concat(parts) => {
                for part in parts {
                    part.write_all_to(w)?;
                }
                Ok(())
            }
        }
    }

    /// Materializes the bytes as a vector, without copying if they already are one.
    pub fn to_vec(self) -> DirectCodecResult<Vec<u8>> {
        match self {
            BytesInput::Owned(bytes) => Ok(bytes),
            other => {
                let mut out = Vec::with_capacity(other.size());
                other.write_all_to(&mut out)?;
                Ok(out)
            }
        }
    }

    /// A reader over the bytes, bounded to the declared size.
    pub fn into_reader(self) -> Box<dyn Read + 'a> {
        match self {
            BytesInput::Slice(bytes) => Box::new(bytes),
            BytesInput::Owned(bytes) => Box::new(Cursor::new(bytes)),
            BytesInput::Region(window) => Box::new(window.bytes),
            BytesInput::Stream { reader, size } => Box::new(reader.take(size as u64)),
            BytesInput::Concat(parts) => parts
                .into_iter()
                .fold(
                    Box::new(io::empty()) as Box<dyn Read + 'a>,
                    |acc, part| -> Box<dyn Read + 'a> { Box::new(acc.chain(part.into_reader())) },
                ),
        }
    }
}

impl fmt::Debug for BytesInput<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            BytesInput::Slice(_) => "Slice",
            BytesInput::Owned(_) => "Owned",
            BytesInput::Region(window) if window.direct => "DirectRegion",
            BytesInput::Region(_) => "HeapRegion",
            BytesInput::Stream { .. } => "Stream",
            BytesInput::Concat(_) => "Concat",
        };
        f.debug_struct("BytesInput")
            .field("kind", &kind)
            .field("size", &self.size())
            .finish()
    }
}

impl<'a> From<&'a [u8]> for BytesInput<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        BytesInput::Slice(bytes)
    }
}

impl From<Vec<u8>> for BytesInput<'_> {
    fn from(bytes: Vec<u8>) -> Self {
        BytesInput::Owned(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn sizes_are_known_without_consuming() {
        let data = [1u8, 2, 3, 4];
        let input = BytesInput::concat(vec![
            BytesInput::from_slice(&data[..2]),
            BytesInput::from_reader(&data[2..], 2),
            BytesInput::from_vec(vec![9; 3]),
        ]);
        assert_eq!(input.size(), 7);
        assert_eq!(input.to_vec().unwrap(), vec![1, 2, 3, 4, 9, 9, 9]);
    }

    #[test]
    fn short_streams_fail() {
        let data = [1u8, 2, 3];
        let input = BytesInput::from_reader(&data[..], 5);
        assert_matches!(input.to_vec(), Err(DirectCodecError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn readers_stop_at_the_declared_size() {
        let data = [5u8; 10];
        let mut out = Vec::new();
        BytesInput::from_reader(&data[..], 4)
            .into_reader()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, vec![5; 4]);
    }

    #[test]
    fn region_windows_keep_directness() {
        let direct = MemoryRegion::direct_from(b"page bytes").unwrap();
        let input = BytesInput::from_region_range(&direct, 5, 5).unwrap();
        assert!(input.is_direct());
        assert_eq!(input.as_contiguous(), Some(&b"bytes"[..]));

        let heap = MemoryRegion::heap(4).unwrap();
        assert!(!BytesInput::from_region(&heap).is_direct());
        assert_matches!(
            BytesInput::from_region_range(&heap, 2, 3),
            Err(DirectCodecError::OutOfBounds { .. })
        );
    }

    #[test]
    fn regions_accept_writes_until_full() {
        let mut region = MemoryRegion::direct(4).unwrap();
        BytesInput::from_slice(b"abc").write_all_to(&mut region).unwrap();
        assert_eq!(region.position(), 3);
        let err = BytesInput::from_slice(b"de")
            .write_all_to(&mut region)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }
}
