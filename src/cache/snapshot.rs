//! Checkpoint snapshot of all live entries.
//!
//! Written to a temporary file, synced, then renamed over `store.snap`, so a
//! reader sees either the previous snapshot or the new one.

use super::journal::{PersistedEntry, CHECKSUM_SEED};
use super::CacheError;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use xxhash_rust::xxh64::xxh64;

pub(crate) const SNAPSHOT_FILE: &str = "store.snap";
const SNAPSHOT_TMP: &str = "store.snap.tmp";
const SNAPSHOT_MAGIC: [u8; 4] = *b"MCS1";
const SNAPSHOT_FORMAT: u32 = 1;
const HEADER_LEN: usize = 16;

pub(crate) fn read(dir: &Path) -> Result<Vec<PersistedEntry>, CacheError> {
    let path = dir.join(SNAPSHOT_FILE);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CacheError::io(path, e)),
    };
    decode(&path, &bytes)
}

fn decode(path: &Path, bytes: &[u8]) -> Result<Vec<PersistedEntry>, CacheError> {
    if bytes.len() < HEADER_LEN || bytes[..4] != SNAPSHOT_MAGIC {
        return Err(CacheError::corruption(path, "missing snapshot header"));
    }

    let mut format = [0u8; 4];
    format.copy_from_slice(&bytes[4..8]);
    let format = u32::from_le_bytes(format);
    if format != SNAPSHOT_FORMAT {
        return Err(CacheError::corruption(
            path,
            format!("unsupported snapshot format {}", format),
        ));
    }

    let mut checksum = [0u8; 8];
    checksum.copy_from_slice(&bytes[8..16]);
    let body = &bytes[HEADER_LEN..];
    if xxh64(body, CHECKSUM_SEED) != u64::from_le_bytes(checksum) {
        return Err(CacheError::corruption(path, "snapshot checksum mismatch"));
    }

    postcard::from_bytes(body)
        .map_err(|e| CacheError::corruption(path, format!("undecodable snapshot: {}", e)))
}

pub(crate) fn write(dir: &Path, entries: &[PersistedEntry]) -> Result<(), CacheError> {
    let body = postcard::to_allocvec(entries).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
    bytes.extend_from_slice(&SNAPSHOT_MAGIC);
    bytes.extend_from_slice(&SNAPSHOT_FORMAT.to_le_bytes());
    bytes.extend_from_slice(&xxh64(&body, CHECKSUM_SEED).to_le_bytes());
    bytes.extend_from_slice(&body);

    let tmp = dir.join(SNAPSHOT_TMP);
    let target = dir.join(SNAPSHOT_FILE);
    {
        let mut file = File::create(&tmp).map_err(|e| CacheError::io(&tmp, e))?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| CacheError::io(&tmp, e))?;
    }
    std::fs::rename(&tmp, &target).map_err(|e| CacheError::io(&target, e))?;

    // Persist the rename itself where the platform allows it.
    #[cfg(unix)]
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }

    Ok(())
}
