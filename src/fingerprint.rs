//! Content-addressed fingerprints for analysis inputs.
//!
//! A [`FileFingerprint`] records where a file was found, but its
//! [`CacheKey`] is derived only from the content hash and the analyzer
//! version. Two files with identical bytes share a cache entry no matter
//! where they live.

use crate::errors::AnalysisError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Domain separator for content hashes.
const CONTENT_DOMAIN: &[u8] = b"metricore/content/v1\0";

/// Domain separator for cache keys.
const KEY_DOMAIN: &[u8] = b"metricore/key/v1\0";

/// Domain separator for structural keys, kept apart from cache keys so a
/// digest can never collide with a content key.
const STRUCTURAL_DOMAIN: &[u8] = b"metricore/structural/v1\0";

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn parse_hex32(s: &str) -> Option<[u8; 32]> {
    if s.len() != 64 || !s.is_ascii() {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        let pair = std::str::from_utf8(chunk).ok()?;
        out[i] = u8::from_str_radix(pair, 16).ok()?;
    }
    Some(out)
}

/// SHA-256 of a file's raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(CONTENT_DOMAIN);
        hasher.update(content);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_hex(&self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &to_hex(&self.0)[..12])
    }
}

/// Key under which a result is stored in the cache.
///
/// Serializes as a hex string in human-readable formats and as raw bytes
/// otherwise.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Key for a content hash produced by a given analyzer version.
    pub fn derive(content_hash: &ContentHash, analyzer_version: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DOMAIN);
        hasher.update((analyzer_version.len() as u64).to_le_bytes());
        hasher.update(analyzer_version.as_bytes());
        hasher.update(content_hash.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Key for a runner-supplied structural digest.
    pub fn structural(digest: &[u8], analyzer_version: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(STRUCTURAL_DOMAIN);
        hasher.update((analyzer_version.len() as u64).to_le_bytes());
        hasher.update(analyzer_version.as_bytes());
        hasher.update(digest);
        Self(hasher.finalize().into())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }

    /// Abbreviated form for logs.
    pub fn short(&self) -> String {
        to_hex(&self.0[..6])
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for CacheKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for CacheKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let hex = String::deserialize(deserializer)?;
            hex.parse().map_err(de::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(Self)
        }
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.short())
    }
}

/// Error returned when parsing a [`CacheKey`] from hex fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cache key `{0}`: expected 64 hex characters")]
pub struct ParseKeyError(pub String);

impl FromStr for CacheKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex32(s.trim())
            .map(Self)
            .ok_or_else(|| ParseKeyError(s.to_string()))
    }
}

/// Immutable identity of one unit of cacheable work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileFingerprint {
    path: PathBuf,
    content_hash: ContentHash,
    size: u64,
    analyzer_version: String,
    key: CacheKey,
}

impl FileFingerprint {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn analyzer_version(&self) -> &str {
        &self.analyzer_version
    }

    /// Path-independent cache key.
    pub fn cache_key(&self) -> CacheKey {
        self.key
    }
}

/// Fingerprint already-loaded content.
///
/// Deterministic and path-independent in its key. Empty content is valid.
pub fn compute_fingerprint(path: &Path, content: &[u8], analyzer_version: &str) -> FileFingerprint {
    let content_hash = ContentHash::of(content);
    FileFingerprint {
        path: path.to_path_buf(),
        content_hash,
        size: content.len() as u64,
        analyzer_version: analyzer_version.to_string(),
        key: CacheKey::derive(&content_hash, analyzer_version),
    }
}

/// Read a file and fingerprint it, returning the content for later analysis.
pub fn fingerprint_file(
    path: &Path,
    analyzer_version: &str,
) -> Result<(FileFingerprint, Vec<u8>), AnalysisError> {
    let content = std::fs::read(path).map_err(|e| AnalysisError::from_io(path, &e))?;
    let fingerprint = compute_fingerprint(path, &content, analyzer_version);
    Ok((fingerprint, content))
}
