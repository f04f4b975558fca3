//! Per-block payload codecs.
//!
//! Every block is compressed as one self-contained stream, so any codec that
//! maps bytes to bytes can be plugged in through [`BlockCodec`]. The built-in
//! codecs write their usual magic bytes, which lets decompression pick the
//! right decoder per block without storing the codec in the directory.

use std::io::{self, Read, Write};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{BlockzipError, Result};

const ZSTD_MAGIC: &[u8] = &[0x28, 0xB5, 0x2F, 0xFD];
const XZ_MAGIC: &[u8] = &[0xFD, b'7', b'z', b'X', b'Z', 0x00];
const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];

/// A stateless transform applied to each block independently.
pub trait BlockCodec: Send + Sync {
    /// Short name used in logs and reports.
    fn name(&self) -> &'static str;

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>>;
}

/// Built-in codec families.
#[derive(ValueEnum, Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// Zstandard (default).
    Zstd,
    /// LZMA2 in an xz container.
    Xz,
    /// Deflate in a gzip container.
    Gzip,
}

impl CodecKind {
    pub fn default_level(self) -> i32 {
        match self {
            CodecKind::Zstd => 3,
            CodecKind::Xz => 6,
            CodecKind::Gzip => 6,
        }
    }

    pub fn level_range(self) -> std::ops::RangeInclusive<i32> {
        match self {
            CodecKind::Zstd => 1..=22,
            CodecKind::Xz | CodecKind::Gzip => 0..=9,
        }
    }

    /// Builds the codec, validating `level` against the family's range.
    pub fn build(self, level: Option<i32>) -> Result<Box<dyn BlockCodec>> {
        let level = level.unwrap_or_else(|| self.default_level());
        let range = self.level_range();
        if !range.contains(&level) {
            return Err(BlockzipError::Config(format!(
                "{:?} level must be in {}..={}, got {}",
                self,
                range.start(),
                range.end(),
                level
            )));
        }
        Ok(match self {
            CodecKind::Zstd => Box::new(ZstdCodec { level }),
            CodecKind::Xz => Box::new(XzCodec {
                preset: level as u32,
            }),
            CodecKind::Gzip => Box::new(GzipCodec {
                level: level as u32,
            }),
        })
    }

    /// Identifies the codec family of a compressed block from its magic bytes.
    pub fn detect(payload: &[u8]) -> Option<CodecKind> {
        if payload.starts_with(ZSTD_MAGIC) {
            Some(CodecKind::Zstd)
        } else if payload.starts_with(XZ_MAGIC) {
            Some(CodecKind::Xz)
        } else if payload.starts_with(GZIP_MAGIC) {
            Some(CodecKind::Gzip)
        } else {
            None
        }
    }
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CodecKind::Zstd => "zstd",
            CodecKind::Xz => "xz",
            CodecKind::Gzip => "gzip",
        };
        f.write_str(name)
    }
}

pub struct ZstdCodec {
    level: i32,
}

impl BlockCodec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = zstd::Encoder::new(Vec::with_capacity(data.len() / 2), self.level)?;
        encoder.include_checksum(true)?;
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        zstd::stream::decode_all(data)
    }
}

pub struct XzCodec {
    preset: u32,
}

impl BlockCodec for XzCodec {
    fn name(&self) -> &'static str {
        "xz"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() / 2);
        xz2::read::XzEncoder::new(data, self.preset).read_to_end(&mut out)?;
        Ok(out)
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() * 2);
        xz2::read::XzDecoder::new(data).read_to_end(&mut out)?;
        Ok(out)
    }
}

pub struct GzipCodec {
    level: u32,
}

impl BlockCodec for GzipCodec {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = flate2::write::GzEncoder::new(
            Vec::with_capacity(data.len() / 2),
            flate2::Compression::new(self.level),
        );
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() * 2);
        flate2::read::GzDecoder::new(data).read_to_end(&mut out)?;
        Ok(out)
    }
}

/// Compresses with one configured codec and decompresses whatever built-in
/// codec each block was written with.
pub struct AutoCodec {
    compressor: Box<dyn BlockCodec>,
}

impl AutoCodec {
    pub fn new(kind: CodecKind, level: Option<i32>) -> Result<Self> {
        Ok(Self {
            compressor: kind.build(level)?,
        })
    }
}

impl BlockCodec for AutoCodec {
    fn name(&self) -> &'static str {
        self.compressor.name()
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        self.compressor.compress(data)
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let kind = CodecKind::detect(data).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "block payload does not start with a known codec signature",
            )
        })?;
        // Default levels only matter for compression.
        kind.build(None)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?
            .decompress(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"the quick brown fox jumps over the lazy dog, repeatedly; \
        the quick brown fox jumps over the lazy dog, repeatedly";

    #[test]
    fn each_codec_is_detected_from_its_output() {
        for kind in [CodecKind::Zstd, CodecKind::Xz, CodecKind::Gzip] {
            let codec = kind.build(None).unwrap();
            let packed = codec.compress(SAMPLE).unwrap();
            assert_eq!(CodecKind::detect(&packed), Some(kind));
            assert_eq!(codec.decompress(&packed).unwrap(), SAMPLE);
        }
    }

    #[test]
    fn auto_codec_reads_blocks_from_any_family() {
        let auto = AutoCodec::new(CodecKind::Zstd, None).unwrap();
        let gz = CodecKind::Gzip.build(Some(1)).unwrap().compress(SAMPLE).unwrap();
        assert_eq!(auto.decompress(&gz).unwrap(), SAMPLE);
    }

    #[test]
    fn unknown_signature_is_invalid_data() {
        let auto = AutoCodec::new(CodecKind::Zstd, None).unwrap();
        let err = auto.decompress(b"definitely not compressed").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_stream_fails() {
        let codec = CodecKind::Zstd.build(None).unwrap();
        let packed = codec.compress(SAMPLE).unwrap();
        assert!(codec.decompress(&packed[..packed.len() / 2]).is_err());
    }

    #[test]
    fn level_outside_range_is_rejected() {
        assert!(CodecKind::Zstd.build(Some(30)).is_err());
        assert!(CodecKind::Xz.build(Some(10)).is_err());
        assert!(CodecKind::Gzip.build(Some(-1)).is_err());
    }
}
