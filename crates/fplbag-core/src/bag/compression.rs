//! Chunk compression.

use crate::error::{Error, Result};
use lz4_flex::frame::{BlockMode, BlockSize, FrameEncoder, FrameInfo};
use std::borrow::Cow;
use std::io::Write;

/// LZ4 frame settings understood by rosbag's roslz4 reader: independent
/// 1 MiB blocks, no block checksums, a content checksum and no content size.
fn lz4_frame_info() -> FrameInfo {
    FrameInfo::new()
        .block_mode(BlockMode::Independent)
        .block_size(BlockSize::Max1MB)
        .block_checksums(false)
        .content_checksum(true)
}

/// Compression applied to bag chunks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    /// Chunks stored verbatim
    #[default]
    None,
    /// LZ4 frames, fast
    Lz4,
    /// BZip2, strong
    Bz2,
}

impl Compression {
    /// Selects a codec from a repeat count: 0 none, 1 fast, 2+ strong
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Compression::None,
            1 => Compression::Lz4,
            _ => Compression::Bz2,
        }
    }

    /// Name written into chunk records
    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Lz4 => "lz4",
            Compression::Bz2 => "bz2",
        }
    }

    /// Compresses one chunk worth of records
    pub fn compress(self, data: &[u8]) -> Result<Cow<'_, [u8]>> {
        match self {
            Compression::None => Ok(Cow::Borrowed(data)),
            Compression::Lz4 => {
                let mut encoder = FrameEncoder::with_frame_info(lz4_frame_info(), Vec::new());
                encoder
                    .write_all(data)
                    .map_err(|e| Error::compression(self.name(), e))?;
                let out = encoder
                    .finish()
                    .map_err(|e| Error::compression(self.name(), e))?;
                Ok(Cow::Owned(out))
            }
            Compression::Bz2 => {
                let mut encoder =
                    bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
                encoder
                    .write_all(data)
                    .map_err(|e| Error::compression(self.name(), e))?;
                let out = encoder
                    .finish()
                    .map_err(|e| Error::compression(self.name(), e))?;
                Ok(Cow::Owned(out))
            }
        }
    }
}
