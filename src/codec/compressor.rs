//! Payload compressors
//!
//! Each compressor leaves payloads of `min_length` bytes or less untouched.
//! Compressed output always starts with the format's frame magic, which is
//! how `ValueCodec` tells a short plain payload from a compressed one.

use std::io::{Read, Write};

use tracing::debug;

use crate::utils::CodecError;

/// Byte-level compression with a size threshold
pub trait Compressor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Payloads this long or shorter are stored uncompressed
    fn min_length(&self) -> usize;

    /// Whether `data` starts like this compressor's output
    fn is_compressed(&self, data: &[u8]) -> bool;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

const LZ4_FRAME_MAGIC: [u8; 4] = [0x04, 0x22, 0x4d, 0x18];
const ZSTD_FRAME_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Pass-through
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCompressor;

impl Compressor for IdentityCompressor {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn min_length(&self) -> usize {
        0
    }

    fn is_compressed(&self, _data: &[u8]) -> bool {
        true
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }
}

/// LZ4 frame format, tuned for speed
#[derive(Debug, Clone)]
pub struct Lz4Compressor {
    pub min_length: usize,
    pub level: u32,
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        Self {
            min_length: 15,
            level: 4,
        }
    }
}

impl Compressor for Lz4Compressor {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn min_length(&self) -> usize {
        self.min_length
    }

    fn is_compressed(&self, data: &[u8]) -> bool {
        data.starts_with(&LZ4_FRAME_MAGIC)
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        if data.len() <= self.min_length {
            return Ok(data.to_vec());
        }

        let compress_err = |e: std::io::Error| CodecError::Compress(e.to_string());
        let mut encoder = lz4::EncoderBuilder::new()
            .level(self.level)
            .build(Vec::new())
            .map_err(compress_err)?;
        encoder.write_all(data).map_err(compress_err)?;
        let (compressed, result) = encoder.finish();
        result.map_err(compress_err)?;

        debug!("LZ4 compressed: {} → {} bytes", data.len(), compressed.len());
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        // The decoder yields an empty stream for input without a frame header
        if !self.is_compressed(data) {
            return Err(CodecError::Decompress("missing LZ4 frame magic".to_string()));
        }
        let decompress_err = |e: std::io::Error| CodecError::Decompress(e.to_string());
        let mut decoder = lz4::Decoder::new(data).map_err(decompress_err)?;
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(decompress_err)?;
        Ok(decompressed)
    }
}

/// Zstandard, better ratio for larger values
#[derive(Debug, Clone)]
pub struct ZstdCompressor {
    pub min_length: usize,
    pub level: i32,
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self {
            min_length: 100,
            level: 3,
        }
    }
}

impl Compressor for ZstdCompressor {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn min_length(&self) -> usize {
        self.min_length
    }

    fn is_compressed(&self, data: &[u8]) -> bool {
        data.starts_with(&ZSTD_FRAME_MAGIC)
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        if data.len() <= self.min_length {
            return Ok(data.to_vec());
        }

        let compressed =
            zstd::encode_all(data, self.level).map_err(|e| CodecError::Compress(e.to_string()))?;
        debug!("Zstd compressed: {} → {} bytes", data.len(), compressed.len());
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::decode_all(data).map_err(|e| CodecError::Decompress(e.to_string()))
    }
}
