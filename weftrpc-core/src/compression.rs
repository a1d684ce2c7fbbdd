//! Per-message compression.
//!
//! A stream may negotiate an [`Encoding`] via `grpc-encoding` metadata; each
//! message payload is then compressed independently and flagged in its frame
//! header. Identity (no compression) is always available; gzip requires the
//! `compression-gzip` feature.

use std::io;

use bytes::Bytes;

#[cfg(feature = "compression-gzip")]
use std::io::{Read, Write};

/// Metadata key announcing the message encoding of a stream.
pub const ENCODING_KEY: &str = "grpc-encoding";

/// Per-message compressor.
pub trait Compressor: Send + Sync + 'static {
    /// The encoding name used in metadata (e.g. "gzip").
    fn name(&self) -> &'static str;

    /// Compress a payload.
    fn compress(&self, data: &[u8]) -> io::Result<Bytes>;

    /// Decompress a payload.
    fn decompress(&self, data: &[u8]) -> io::Result<Bytes>;
}

/// Supported message encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Identity,
    #[cfg(feature = "compression-gzip")]
    Gzip,
}

impl Encoding {
    /// Parse a `grpc-encoding` metadata value.
    ///
    /// Returns `None` for unsupported encodings.
    pub fn from_metadata(value: Option<&str>) -> Option<Self> {
        match value {
            None | Some("identity") | Some("") => Some(Self::Identity),
            #[cfg(feature = "compression-gzip")]
            Some("gzip") => Some(Self::Gzip),
            _ => None,
        }
    }

    /// The metadata value for this encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => "gzip",
        }
    }

    /// Returns true if this encoding is identity (no compression).
    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Get the compressor for this encoding, `None` for identity.
    pub fn compressor(&self) -> Option<Box<dyn Compressor>> {
        match self {
            Self::Identity => None,
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => Some(Box::new(GzipCompressor::default())),
        }
    }
}

/// Gzip compressor backed by flate2.
#[cfg(feature = "compression-gzip")]
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    /// Compression level (0-9). Default is 6.
    pub level: u32,
}

#[cfg(feature = "compression-gzip")]
impl Default for GzipCompressor {
    fn default() -> Self {
        Self { level: 6 }
    }
}

#[cfg(feature = "compression-gzip")]
impl GzipCompressor {
    /// Create a compressor with the specified level (0-9, clamped).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

#[cfg(feature = "compression-gzip")]
impl Compressor for GzipCompressor {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(self.level));
        encoder.write_all(data)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut decoder = flate2::read::GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        Ok(Bytes::from(decompressed))
    }
}
