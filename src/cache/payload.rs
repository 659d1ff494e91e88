//! Payload codec: postcard-encoded [`MetricResult`], deflate-compressed.

use super::CacheError;
use crate::core::MetricResult;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Upper bound on a decompressed payload; anything larger is treated as damage.
const MAX_DECODED_BYTES: u64 = 64 * 1024 * 1024;

pub fn encode(result: &MetricResult) -> Result<Vec<u8>, CacheError> {
    let raw = postcard::to_allocvec(result).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })?;
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::fast());
    encoder
        .write_all(&raw)
        .and_then(|_| encoder.finish())
        .map_err(|e| CacheError::Compression {
            reason: e.to_string(),
        })
}

pub fn decode(compressed: &[u8]) -> Result<MetricResult, CacheError> {
    let mut raw = Vec::new();
    DeflateDecoder::new(compressed)
        .take(MAX_DECODED_BYTES)
        .read_to_end(&mut raw)
        .map_err(|e| CacheError::Compression {
            reason: e.to_string(),
        })?;
    postcard::from_bytes(&raw).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })
}
