//! Write-ahead journal for the cache store.
//!
//! Every mutation is appended as one self-checking frame and flushed before
//! the in-memory index changes, so a record that is visible is also durable.
//!
//! Frame layout (little-endian):
//!
//! ```text
//! magic "MCJ1" (4) | payload length u32 (4) | xxh64(payload) u64 (8) | postcard payload
//! ```
//!
//! A short or checksum-failing *final* frame is a torn write from a crash and
//! is dropped; the write it carried was never acknowledged. Damage anywhere
//! else is corruption.

use super::CacheError;
use crate::fingerprint::CacheKey;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use xxhash_rust::xxh64::xxh64;

pub(crate) const JOURNAL_FILE: &str = "store.journal";

const FRAME_MAGIC: [u8; 4] = *b"MCJ1";
const FRAME_HEADER_LEN: usize = 16;
pub(crate) const CHECKSUM_SEED: u64 = 0x6d65_7472_6963_6f72;

/// On-disk form of one cache entry, shared by journal and snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PersistedEntry {
    pub key: CacheKey,
    pub payload: Vec<u8>,
    pub schema_version: u32,
    pub created_at_ms: i64,
    pub last_accessed_ms: i64,
    pub structural_key: Option<CacheKey>,
    pub source_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum JournalRecord {
    Put(PersistedEntry),
    Evict(CacheKey),
    Clear,
}

/// Outcome of reading an existing journal.
#[derive(Debug, Default)]
pub(crate) struct Replay {
    pub records: Vec<JournalRecord>,
    /// Length of the valid prefix; anything after it is a torn tail.
    pub valid_len: u64,
    pub torn_tail: bool,
}

pub(crate) fn encode_frame(record: &JournalRecord) -> Result<Vec<u8>, CacheError> {
    let payload = postcard::to_allocvec(record).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })?;
    let len = u32::try_from(payload.len()).map_err(|_| CacheError::Serialization {
        reason: format!("journal record of {} bytes is too large", payload.len()),
    })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&xxh64(&payload, CHECKSUM_SEED).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// Parse a journal image into records.
pub(crate) fn parse_frames(path: &Path, bytes: &[u8]) -> Result<Replay, CacheError> {
    let mut replay = Replay::default();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let remaining = bytes.len() - pos;
        if remaining < FRAME_HEADER_LEN {
            replay.torn_tail = true;
            break;
        }

        let header = &bytes[pos..pos + FRAME_HEADER_LEN];
        if header[..4] != FRAME_MAGIC {
            return Err(CacheError::corruption(
                path,
                format!("bad frame magic at offset {}", pos),
            ));
        }

        let len = read_u32(&header[4..8]) as usize;
        let checksum = read_u64(&header[8..16]);
        let body_start = pos + FRAME_HEADER_LEN;
        if len > bytes.len() - body_start {
            replay.torn_tail = true;
            break;
        }

        let body = &bytes[body_start..body_start + len];
        let frame_end = body_start + len;
        if xxh64(body, CHECKSUM_SEED) != checksum {
            if frame_end == bytes.len() {
                replay.torn_tail = true;
                break;
            }
            return Err(CacheError::corruption(
                path,
                format!("checksum mismatch in frame at offset {}", pos),
            ));
        }

        let record: JournalRecord = postcard::from_bytes(body).map_err(|e| {
            CacheError::corruption(path, format!("undecodable frame at offset {}: {}", pos, e))
        })?;
        replay.records.push(record);
        pos = frame_end;
        replay.valid_len = pos as u64;
    }

    Ok(replay)
}

/// Append handle over the journal file.
#[derive(Debug)]
pub(crate) struct Journal {
    path: PathBuf,
    file: File,
    len: u64,
    records: usize,
}

impl Journal {
    /// Read and validate the journal in `dir`, if any.
    pub fn read_existing(dir: &Path) -> Result<Replay, CacheError> {
        let path = dir.join(JOURNAL_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => parse_frames(&path, &bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Replay::default()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Open the journal for appending, discarding anything past `valid_len`.
    pub fn open_append(dir: &Path, valid_len: u64, records: usize) -> Result<Self, CacheError> {
        let path = dir.join(JOURNAL_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CacheError::io(&path, e))?;

        let on_disk = file.metadata().map_err(|e| CacheError::io(&path, e))?.len();
        if on_disk > valid_len {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = on_disk - valid_len,
                "Dropping torn journal tail"
            );
            file.set_len(valid_len)
                .map_err(|e| CacheError::io(&path, e))?;
        }

        Ok(Self {
            path,
            file,
            len: valid_len,
            records,
        })
    }

    /// Append one record. Returns once the frame is written and flushed
    /// (and synced to disk when `sync` is set).
    pub fn append(&mut self, record: &JournalRecord, sync: bool) -> Result<(), CacheError> {
        let frame = encode_frame(record)?;
        let written = self
            .file
            .write_all(&frame)
            .and_then(|_| self.file.flush())
            .and_then(|_| if sync { self.file.sync_data() } else { Ok(()) });

        if let Err(e) = written {
            // Roll back a partial frame so later appends stay parseable.
            if let Err(rollback) = self.file.set_len(self.len) {
                tracing::warn!(error = %rollback, "Failed to roll back partial journal frame");
            }
            return Err(CacheError::io(&self.path, e));
        }

        self.len += frame.len() as u64;
        self.records += 1;
        Ok(())
    }

    /// Truncate after a successful checkpoint.
    pub fn reset(&mut self) -> Result<(), CacheError> {
        self.file
            .set_len(0)
            .and_then(|_| self.file.sync_all())
            .map_err(|e| CacheError::io(&self.path, e))?;
        self.len = 0;
        self.records = 0;
        Ok(())
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn len_bytes(&self) -> u64 {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(byte: u8) -> PersistedEntry {
        PersistedEntry {
            key: CacheKey::from_bytes([byte; 32]),
            payload: vec![byte; 8],
            schema_version: 1,
            created_at_ms: 1_700_000_000_000,
            last_accessed_ms: 1_700_000_000_000,
            structural_key: None,
            source_size: 64,
        }
    }

    fn image(records: &[JournalRecord]) -> Vec<u8> {
        records
            .iter()
            .flat_map(|r| encode_frame(r).unwrap())
            .collect()
    }

    #[test]
    fn test_parse_complete_journal() {
        let records = vec![
            JournalRecord::Put(entry(1)),
            JournalRecord::Evict(CacheKey::from_bytes([1; 32])),
            JournalRecord::Clear,
        ];
        let bytes = image(&records);
        let replay = parse_frames(Path::new("j"), &bytes).unwrap();
        assert_eq!(replay.records, records);
        assert!(!replay.torn_tail);
        assert_eq!(replay.valid_len, bytes.len() as u64);
    }

    #[test]
    fn test_short_final_frame_is_torn_tail() {
        let mut bytes = image(&[JournalRecord::Put(entry(1)), JournalRecord::Put(entry(2))]);
        let full = bytes.len();
        bytes.truncate(full - 3);

        let replay = parse_frames(Path::new("j"), &bytes).unwrap();
        assert_eq!(replay.records.len(), 1);
        assert!(replay.torn_tail);
    }

    #[test]
    fn test_bad_checksum_in_final_frame_is_torn_tail() {
        let mut bytes = image(&[JournalRecord::Put(entry(1))]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;

        let replay = parse_frames(Path::new("j"), &bytes).unwrap();
        assert!(replay.records.is_empty());
        assert!(replay.torn_tail);
        assert_eq!(replay.valid_len, 0);
    }

    #[test]
    fn test_bad_checksum_mid_journal_is_corruption() {
        let mut bytes = image(&[JournalRecord::Put(entry(1)), JournalRecord::Put(entry(2))]);
        bytes[FRAME_HEADER_LEN + 2] ^= 0xff;

        let err = parse_frames(Path::new("j"), &bytes).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_bad_magic_is_corruption() {
        let bytes = b"garbage that is longer than a header".to_vec();
        assert!(parse_frames(Path::new("j"), &bytes).unwrap_err().is_corruption());
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut journal = Journal::open_append(dir.path(), 0, 0).unwrap();
            journal.append(&JournalRecord::Put(entry(7)), true).unwrap();
            journal.append(&JournalRecord::Put(entry(8)), false).unwrap();
            assert_eq!(journal.records(), 2);
        }

        let replay = Journal::read_existing(dir.path()).unwrap();
        assert_eq!(replay.records.len(), 2);
    }

    #[test]
    fn test_open_append_truncates_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = image(&[JournalRecord::Put(entry(1))]);
        let valid = bytes.len() as u64;
        bytes.extend_from_slice(&FRAME_MAGIC);
        std::fs::write(dir.path().join(JOURNAL_FILE), &bytes).unwrap();

        let replay = Journal::read_existing(dir.path()).unwrap();
        assert!(replay.torn_tail);
        let journal = Journal::open_append(dir.path(), replay.valid_len, 1).unwrap();
        assert_eq!(journal.len_bytes(), valid);
        let on_disk = std::fs::metadata(dir.path().join(JOURNAL_FILE)).unwrap().len();
        assert_eq!(on_disk, valid);
    }

    #[test]
    fn test_reset_empties_journal() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::open_append(dir.path(), 0, 0).unwrap();
        journal.append(&JournalRecord::Clear, false).unwrap();
        journal.reset().unwrap();
        assert_eq!(journal.records(), 0);
        assert!(Journal::read_existing(dir.path()).unwrap().records.is_empty());
    }
}
