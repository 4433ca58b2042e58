//! # Message Compression
//!
//! Compression codecs for the compression envelope: a message whose payload
//! is itself a compressed, length-framed message set.
//!
//! ## Supported Compression Types
//!
//! - **None** (0): payload stored as-is
//! - **GZIP** (1): standard gzip stream (deflate with gzip header)
//! - **Snappy** (2): recognised on the wire but not implemented; fails fast

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("Unknown compression type: {0}")]
    UnknownType(u8),

    #[error("{0} compression is not implemented")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Compression codes as carried in the message attribute byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompressionType {
    #[default]
    None = 0,
    Gzip = 1,
    Snappy = 2,
}

impl TryFrom<u8> for CompressionType {
    type Error = CompressionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Gzip),
            2 => Ok(CompressionType::Snappy),
            _ => Err(CompressionError::UnknownType(value)),
        }
    }
}

impl From<CompressionType> for u8 {
    fn from(compression_type: CompressionType) -> Self {
        compression_type as u8
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionType::None => "none",
            CompressionType::Gzip => "gzip",
            CompressionType::Snappy => "snappy",
        };
        f.write_str(name)
    }
}

/// Compress data using the specified compression type
pub fn compress(data: &[u8], compression_type: CompressionType) -> Result<Bytes, CompressionError> {
    match compression_type {
        CompressionType::None => Ok(Bytes::copy_from_slice(data)),
        CompressionType::Gzip => compress_gzip(data),
        CompressionType::Snappy => Err(CompressionError::Unsupported("snappy")),
    }
}

/// Decompress data using the specified compression type
pub fn decompress(
    compressed_data: &[u8],
    compression_type: CompressionType,
) -> Result<Bytes, CompressionError> {
    match compression_type {
        CompressionType::None => Ok(Bytes::copy_from_slice(compressed_data)),
        CompressionType::Gzip => decompress_gzip(compressed_data),
        CompressionType::Snappy => Err(CompressionError::Unsupported("snappy")),
    }
}

fn compress_gzip(data: &[u8]) -> Result<Bytes, CompressionError> {
    use std::io::Write;

    let mut buffer = Vec::with_capacity(data.len() / 2 + 32);
    let mut encoder = flate2::write::GzEncoder::new(&mut buffer, flate2::Compression::default());
    encoder.write_all(data)?;
    encoder.finish()?;

    Ok(Bytes::from(buffer))
}

fn decompress_gzip(compressed_data: &[u8]) -> Result<Bytes, CompressionError> {
    use std::io::Read;

    let mut buffer = Vec::new();
    let mut decoder = flate2::read::GzDecoder::new(compressed_data);
    decoder
        .read_to_end(&mut buffer)
        .map_err(|e| CompressionError::DecompressionFailed(e.to_string()))?;

    Ok(Bytes::from(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_type_conversion() {
        assert_eq!(CompressionType::try_from(0).unwrap(), CompressionType::None);
        assert_eq!(CompressionType::try_from(1).unwrap(), CompressionType::Gzip);
        assert_eq!(CompressionType::try_from(2).unwrap(), CompressionType::Snappy);
        assert!(CompressionType::try_from(3).is_err());

        assert_eq!(u8::from(CompressionType::Gzip), 1);
    }

    #[test]
    fn test_no_compression_is_identity() {
        let data = b"plain payload";
        let compressed = compress(data, CompressionType::None).unwrap();
        assert_eq!(&compressed[..], data);
        let decompressed = decompress(&compressed, CompressionType::None).unwrap();
        assert_eq!(&decompressed[..], data);
    }

    #[test]
    fn test_gzip_roundtrip() {
        let data = b"Hello, World! ".repeat(100);
        let compressed = compress(&data, CompressionType::Gzip).unwrap();
        assert!(compressed.len() < data.len());
        // gzip magic
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);

        let decompressed = decompress(&compressed, CompressionType::Gzip).unwrap();
        assert_eq!(&decompressed[..], &data[..]);
    }

    #[test]
    fn test_gzip_rejects_garbage() {
        let result = decompress(b"definitely not gzip", CompressionType::Gzip);
        assert!(matches!(result, Err(CompressionError::DecompressionFailed(_))));
    }

    #[test]
    fn test_snappy_fails_fast() {
        assert!(matches!(
            compress(b"data", CompressionType::Snappy),
            Err(CompressionError::Unsupported("snappy"))
        ));
        assert!(matches!(
            decompress(b"data", CompressionType::Snappy),
            Err(CompressionError::Unsupported("snappy"))
        ));
    }
}
