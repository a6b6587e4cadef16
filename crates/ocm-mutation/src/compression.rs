//! Transparent decompression of fetched payloads

use flate2::read::GzDecoder;
use std::io::{self, Read};

/// Compression formats recognised on fetched payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    /// Raw data
    None,
    /// Gzip (`1f 8b`)
    Gzip,
}

impl CompressionFormat {
    /// Detect compression format from magic bytes
    #[must_use]
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        if data.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else {
            Self::None
        }
    }
}

/// Decompress `data` if it carries a known compression header
///
/// # Errors
/// Returns error if the payload claims gzip but cannot be decoded
pub fn decompress_auto(data: Vec<u8>) -> io::Result<Vec<u8>> {
    match CompressionFormat::from_magic_bytes(&data) {
        CompressionFormat::None => Ok(data),
        CompressionFormat::Gzip => {
            let mut out = Vec::with_capacity(data.len() * 4);
            GzDecoder::new(data.as_slice()).read_to_end(&mut out)?;
            Ok(out)
        }
    }
}

/// Read a stream fully, then decompress it
///
/// # Errors
/// Returns error on read failure or a corrupt gzip stream
pub fn read_decompressed(mut reader: impl Read) -> io::Result<Vec<u8>> {
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    decompress_auto(raw)
}
