//! Artifact compression.
//!
//! Every packed artifact is a self-describing stream:
//!
//! ```text
//! [decoded length: u64 LE][zlib body]
//! ```
//!
//! The length prefix lets the decoder verify the payload without any
//! bookkeeping outside the stream.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::bufread::ZlibDecoder;
use flate2::write::ZlibEncoder;
use thiserror::Error;

use crate::manifest::CompressionLevel;

/// Size of the decoded-length prefix.
pub const LENGTH_PREFIX_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum CodecError {
  #[error("compressed stream error: {0}")]
  Stream(#[from] io::Error),

  #[error("compressed stream is truncated ({0} bytes)")]
  Truncated(usize),

  #[error("decoded length mismatch: header says {expected} bytes, stream produced {actual}")]
  LengthMismatch { expected: u64, actual: u64 },

  #[error("{0} bytes follow the end of the compressed stream")]
  TrailingData(usize),

  #[error("decoded length {0} does not fit in memory")]
  TooLarge(u64),
}

/// Compression service used by the pipeline and the loader.
pub trait Codec: Send + Sync {
  fn compress(&self, level: CompressionLevel, data: &[u8]) -> Result<Vec<u8>, CodecError>;

  fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// zlib-backed codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateCodec;

impl DeflateCodec {
  pub fn level(level: CompressionLevel) -> Compression {
    match level {
      CompressionLevel::Store => Compression::new(0),
      CompressionLevel::Fastest => Compression::new(1),
      CompressionLevel::Fast => Compression::new(3),
      CompressionLevel::Normal => Compression::new(6),
      CompressionLevel::Maximum => Compression::new(8),
      CompressionLevel::Ultra => Compression::new(9),
    }
  }
}

impl Codec for DeflateCodec {
  fn compress(&self, level: CompressionLevel, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(LENGTH_PREFIX_LEN + data.len() / 2);
    out.extend_from_slice(&(data.len() as u64).to_le_bytes());

    let mut encoder = ZlibEncoder::new(out, Self::level(level));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
  }

  fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let expected = decoded_len(data)?;
    let capacity = usize::try_from(expected).map_err(|_| CodecError::TooLarge(expected))?;

    // One byte past the header length is enough to detect an overlong stream.
    let mut decoder = ZlibDecoder::new(&data[LENGTH_PREFIX_LEN..]);
    let mut out = Vec::with_capacity(capacity.min(data.len().saturating_mul(4)));
    (&mut decoder).take(expected.saturating_add(1)).read_to_end(&mut out)?;

    let actual = out.len() as u64;
    if actual != expected {
      return Err(CodecError::LengthMismatch { expected, actual });
    }
    let trailing = decoder.into_inner().len();
    if trailing != 0 {
      return Err(CodecError::TrailingData(trailing));
    }
    Ok(out)
  }
}

/// Decoded length recorded in a packed stream's header.
pub fn decoded_len(data: &[u8]) -> Result<u64, CodecError> {
  let header: [u8; LENGTH_PREFIX_LEN] = data
    .get(..LENGTH_PREFIX_LEN)
    .and_then(|h| h.try_into().ok())
    .ok_or(CodecError::Truncated(data.len()))?;
  Ok(u64::from_le_bytes(header))
}
