//! The cache store: in-memory index over a journaled directory.
//!
//! Readers take a shared lock on the index and never touch disk. Writers
//! serialize per key through a [`KeyPin`], then append to the journal and
//! publish into the index while holding the journal lock. A checkpoint
//! takes the same lock, so the snapshot it writes always agrees with the
//! journal it truncates.
//!
//! # Example
//!
//! ```no_run
//! use metricore::cache::{CacheStore, PutOutcome, StoreOptions};
//! use metricore::core::MetricResult;
//! use metricore::fingerprint::compute_fingerprint;
//! use std::path::Path;
//!
//! let store = CacheStore::open(StoreOptions::new("/tmp/metricore-cache"))?;
//! let fp = compute_fingerprint(Path::new("a.py"), b"x = 1\n", "lines@1");
//! match store.put(fp.cache_key(), &MetricResult::default(), None, fp.size())? {
//!     PutOutcome::Committed(_) => println!("stored"),
//!     PutOutcome::Existing(_) => println!("someone else stored it first"),
//! }
//! store.close()?;
//! # Ok::<(), metricore::cache::CacheError>(())
//! ```

use super::journal::{Journal, JournalRecord, PersistedEntry, JOURNAL_FILE};
use super::lock::DirectoryLock;
use super::pruning::{exceeds_limits, select_entries_to_evict, EntryInfo, EvictionPolicy, PruneStats};
use super::snapshot::{self, SNAPSHOT_FILE};
use super::totals::{self, CounterTotals};
use super::{payload, CacheError, SCHEMA_VERSION};
use crate::core::MetricResult;
use crate::fingerprint::CacheKey;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Options for opening a [`CacheStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub directory: PathBuf,
    pub policy: EvictionPolicy,
    /// fsync every journal append instead of only flushing.
    pub sync_writes: bool,
    /// Journal records that trigger an automatic checkpoint.
    pub checkpoint_records: usize,
    /// Payload schema this process reads and writes.
    pub schema_version: u32,
    /// How long `open` waits for another store to release the directory.
    pub lock_timeout: Duration,
    /// Decoded results kept in memory alongside the compressed payloads.
    pub decoded_capacity: usize,
}

impl StoreOptions {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            policy: EvictionPolicy::default(),
            sync_writes: false,
            checkpoint_records: 1024,
            schema_version: SCHEMA_VERSION,
            lock_timeout: Duration::from_secs(30),
            decoded_capacity: 4096,
        }
    }

    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    pub fn with_checkpoint_records(mut self, records: usize) -> Self {
        self.checkpoint_records = records.max(1);
        self
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_decoded_capacity(mut self, capacity: usize) -> Self {
        self.decoded_capacity = capacity;
        self
    }
}

/// A committed cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Compressed payload bytes.
    pub payload: Arc<[u8]>,
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub structural_key: Option<CacheKey>,
    pub source_size: u64,
}

impl CacheEntry {
    pub fn decode(&self) -> Result<MetricResult, CacheError> {
        payload::decode(&self.payload)
    }
}

/// Result of [`CacheStore::put`].
#[derive(Debug, Clone)]
pub enum PutOutcome {
    /// This call stored the value.
    Committed(CacheEntry),
    /// Another writer stored a value for the key first; this is the winner.
    Existing(CacheEntry),
}

impl PutOutcome {
    pub fn entry(&self) -> &CacheEntry {
        match self {
            Self::Committed(entry) | Self::Existing(entry) => entry,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

/// One row of [`CacheStore::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySummary {
    pub key: CacheKey,
    pub size_bytes: u64,
    pub source_size: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub has_structural_key: bool,
}

/// Counters and totals reported by [`CacheStore::stats`].
///
/// `hits` through `evictions` count this process only; `lifetime` adds the
/// totals every earlier owner persisted at checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    /// Puts that lost to an earlier writer for the same key.
    pub races: u64,
    pub evictions: u64,
    pub journal_records: usize,
    /// The store was rebuilt empty after finding corrupt files at open.
    pub recreated: bool,
    pub lifetime: CounterTotals,
}

/// Holds a write pin on one key. Pinned keys are never evicted.
pub struct KeyPin<'a> {
    pins: &'a DashMap<CacheKey, Arc<Mutex<()>>>,
    key: CacheKey,
    slot: Arc<Mutex<()>>,
}

impl KeyPin<'_> {
    pub fn key(&self) -> CacheKey {
        self.key
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.slot.lock()
    }
}

impl Drop for KeyPin<'_> {
    fn drop(&mut self) {
        // The map holds one reference and this pin another.
        self.pins
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) <= 2);
    }
}

#[derive(Debug)]
struct StoredEntry {
    key: CacheKey,
    payload: Arc<[u8]>,
    schema_version: u32,
    created_at_ms: i64,
    last_accessed_ms: AtomicI64,
    structural_key: Option<CacheKey>,
    source_size: u64,
}

impl StoredEntry {
    fn from_persisted(entry: PersistedEntry) -> Self {
        Self {
            key: entry.key,
            payload: entry.payload.into(),
            schema_version: entry.schema_version,
            created_at_ms: entry.created_at_ms,
            last_accessed_ms: AtomicI64::new(entry.last_accessed_ms),
            structural_key: entry.structural_key,
            source_size: entry.source_size,
        }
    }

    fn to_persisted(&self) -> PersistedEntry {
        PersistedEntry {
            key: self.key,
            payload: self.payload.to_vec(),
            schema_version: self.schema_version,
            created_at_ms: self.created_at_ms,
            last_accessed_ms: self.last_accessed(),
            structural_key: self.structural_key,
            source_size: self.source_size,
        }
    }

    fn to_entry(&self) -> CacheEntry {
        CacheEntry {
            key: self.key,
            payload: Arc::clone(&self.payload),
            schema_version: self.schema_version,
            created_at: ms_to_datetime(self.created_at_ms),
            last_accessed: ms_to_datetime(self.last_accessed()),
            structural_key: self.structural_key,
            source_size: self.source_size,
        }
    }

    fn last_accessed(&self) -> i64 {
        self.last_accessed_ms.load(Ordering::Relaxed)
    }

    fn touch(&self, now_ms: i64) {
        self.last_accessed_ms.fetch_max(now_ms, Ordering::Relaxed);
    }

    fn size_bytes(&self) -> u64 {
        self.payload.len() as u64
    }
}

#[derive(Debug, Default)]
struct Index {
    entries: HashMap<CacheKey, Arc<StoredEntry>>,
    structural: HashMap<CacheKey, CacheKey>,
    total_bytes: u64,
}

impl Index {
    fn insert(&mut self, entry: Arc<StoredEntry>) {
        if let Some(structural) = entry.structural_key {
            self.structural.insert(structural, entry.key);
        }
        self.total_bytes += entry.size_bytes();
        if let Some(previous) = self.entries.insert(entry.key, entry) {
            self.total_bytes = self.total_bytes.saturating_sub(previous.size_bytes());
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Arc<StoredEntry>> {
        let removed = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(removed.size_bytes());
        if let Some(structural) = removed.structural_key {
            if self.structural.get(&structural) == Some(key) {
                self.structural.remove(&structural);
            }
        }
        Some(removed)
    }

    fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.structural.clear();
        self.total_bytes = 0;
        count
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    races: AtomicU64,
    evictions: AtomicU64,
}

impl Counters {
    fn totals(&self) -> CounterTotals {
        CounterTotals {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            races: self.races.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Entries and journal position recovered from disk.
struct Recovered {
    entries: Vec<PersistedEntry>,
    journal_len: u64,
    journal_records: usize,
}

/// Durable, concurrency-safe store of analysis results.
pub struct CacheStore {
    options: StoreOptions,
    index: RwLock<Index>,
    journal: Mutex<Journal>,
    pins: DashMap<CacheKey, Arc<Mutex<()>>>,
    decoded: DashMap<CacheKey, Arc<MetricResult>>,
    counters: Counters,
    /// Totals persisted by earlier owners of the directory.
    lifetime_base: CounterTotals,
    recreated: bool,
    prune_guard: Mutex<()>,
    _lock: DirectoryLock,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("directory", &self.options.directory)
            .field("entries", &self.index.read().entries.len())
            .field("recreated", &self.recreated)
            .finish()
    }
}

impl CacheStore {
    /// Open (or create) the store in `options.directory`, replaying the
    /// journal on top of the last snapshot.
    ///
    /// Corrupt files are discarded and the store starts empty; only I/O
    /// failures and [`CacheError::Locked`] are returned as errors. The store
    /// owns the directory exclusively until it is closed or dropped.
    pub fn open(options: StoreOptions) -> Result<Self, CacheError> {
        let dir = options.directory.clone();
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        let lock = DirectoryLock::acquire(&dir, options.lock_timeout)?;

        let (recovered, recreated) = match Self::recover(&dir) {
            Ok(recovered) => (recovered, false),
            Err(e) if e.is_corruption() => {
                tracing::warn!(
                    target: "metricore::cache",
                    error = %e,
                    directory = %dir.display(),
                    "CacheCorruption: discarding cache files and starting empty"
                );
                Self::remove_files(&dir)?;
                let empty = Recovered {
                    entries: Vec::new(),
                    journal_len: 0,
                    journal_records: 0,
                };
                (empty, true)
            }
            Err(e) => return Err(e),
        };

        let journal = Journal::open_append(&dir, recovered.journal_len, recovered.journal_records)?;

        let mut index = Index::default();
        let mut stale = 0usize;
        for entry in recovered.entries {
            if entry.schema_version == options.schema_version {
                index.insert(Arc::new(StoredEntry::from_persisted(entry)));
            } else {
                stale += 1;
            }
        }
        if stale > 0 {
            tracing::debug!(stale, "Ignoring entries written under another schema version");
        }

        tracing::debug!(
            directory = %dir.display(),
            entries = index.entries.len(),
            journal_records = recovered.journal_records,
            "Opened cache store"
        );

        let store = Self {
            options,
            index: RwLock::new(index),
            journal: Mutex::new(journal),
            pins: DashMap::new(),
            decoded: DashMap::new(),
            counters: Counters::default(),
            lifetime_base: totals::read(&dir),
            recreated,
            prune_guard: Mutex::new(()),
            _lock: lock,
        };

        let pruned = store.prune()?;
        if pruned.entries_removed > 0 {
            tracing::info!("{}", pruned);
        }

        Ok(store)
    }

    fn recover(dir: &Path) -> Result<Recovered, CacheError> {
        let snapshot = snapshot::read(dir)?;
        let replay = Journal::read_existing(dir)?;

        let mut live: HashMap<CacheKey, PersistedEntry> =
            snapshot.into_iter().map(|e| (e.key, e)).collect();
        let journal_records = replay.records.len();
        for record in replay.records {
            match record {
                JournalRecord::Put(entry) => {
                    live.insert(entry.key, entry);
                }
                JournalRecord::Evict(key) => {
                    live.remove(&key);
                }
                JournalRecord::Clear => live.clear(),
            }
        }

        Ok(Recovered {
            entries: live.into_values().collect(),
            journal_len: replay.valid_len,
            journal_records,
        })
    }

    fn remove_files(dir: &Path) -> Result<(), CacheError> {
        for name in [SNAPSHOT_FILE, JOURNAL_FILE] {
            let path = dir.join(name);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(path, e)),
            }
        }
        Ok(())
    }

    pub fn directory(&self) -> &Path {
        &self.options.directory
    }

    pub fn schema_version(&self) -> u32 {
        self.options.schema_version
    }

    pub fn was_recreated(&self) -> bool {
        self.recreated
    }

    /// Look up `key`, refreshing its access time.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.touch(key) {
            Some(entry) => {
                bump(&self.counters.hits, 1);
                Some(entry.to_entry())
            }
            None => {
                bump(&self.counters.misses, 1);
                None
            }
        }
    }

    /// Whether `key` is present, without counting or touching it.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.index.read().entries.contains_key(key)
    }

    fn touch(&self, key: &CacheKey) -> Option<Arc<StoredEntry>> {
        let index = self.index.read();
        let entry = index.entries.get(key)?;
        entry.touch(now_ms());
        Some(Arc::clone(entry))
    }

    /// Decoded result for `key`. An undecodable payload counts as a miss.
    pub fn load_result(&self, key: &CacheKey) -> Option<Arc<MetricResult>> {
        let result = self.touch(key).and_then(|entry| self.decode_entry(&entry));
        let counter = if result.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        bump(counter, 1);
        result
    }

    /// Find a live entry recorded under `structural_key`.
    pub fn find_structural(
        &self,
        structural_key: &CacheKey,
    ) -> Option<(CacheKey, Arc<MetricResult>)> {
        let key = *self.index.read().structural.get(structural_key)?;
        let entry = self.touch(&key)?;
        let result = self.decode_entry(&entry)?;
        Some((key, result))
    }

    fn decode_entry(&self, entry: &StoredEntry) -> Option<Arc<MetricResult>> {
        if let Some(result) = self.decoded.get(&entry.key) {
            return Some(Arc::clone(result.value()));
        }
        match entry.to_entry().decode() {
            Ok(result) => {
                let result = Arc::new(result);
                self.remember(entry.key, Arc::clone(&result));
                Some(result)
            }
            Err(e) => {
                tracing::warn!(key = %entry.key.short(), error = %e, "Undecodable cache payload");
                None
            }
        }
    }

    /// Memoize a decoded result, dropping an arbitrary one when full.
    fn remember(&self, key: CacheKey, result: Arc<MetricResult>) {
        if self.options.decoded_capacity == 0 {
            return;
        }
        if self.decoded.len() >= self.options.decoded_capacity && !self.decoded.contains_key(&key) {
            let victim = self.decoded.iter().next().map(|slot| *slot.key());
            if let Some(victim) = victim {
                self.decoded.remove(&victim);
            }
        }
        self.decoded.insert(key, result);
    }

    /// Pin `key` against eviction. Also used by `put` to serialize writers.
    pub fn pin(&self, key: CacheKey) -> KeyPin<'_> {
        let slot = Arc::clone(self.pins.entry(key).or_default().value());
        KeyPin {
            pins: &self.pins,
            key,
            slot,
        }
    }

    pub fn is_pinned(&self, key: &CacheKey) -> bool {
        self.pins.contains_key(key)
    }

    /// Store `result` under `key`. First writer wins.
    ///
    /// Returns once the journal record is written and flushed; from then on
    /// every `get` (including after restart) observes the value.
    pub fn put(
        &self,
        key: CacheKey,
        result: &MetricResult,
        structural_key: Option<CacheKey>,
        source_size: u64,
    ) -> Result<PutOutcome, CacheError> {
        let pin = self.pin(key);
        let _writer = pin.lock();

        if let Some(existing) = self.index.read().entries.get(&key) {
            bump(&self.counters.races, 1);
            return Ok(PutOutcome::Existing(existing.to_entry()));
        }

        let bytes = payload::encode(result)?;
        let now = now_ms();
        let stored = Arc::new(StoredEntry {
            key,
            payload: bytes.into(),
            schema_version: self.options.schema_version,
            created_at_ms: now,
            last_accessed_ms: AtomicI64::new(now),
            structural_key,
            source_size,
        });

        let checkpoint_due = {
            let mut journal = self.journal.lock();
            journal.append(
                &JournalRecord::Put(stored.to_persisted()),
                self.options.sync_writes,
            )?;
            self.index.write().insert(Arc::clone(&stored));
            journal.records() >= self.options.checkpoint_records
        };

        bump(&self.counters.writes, 1);
        self.remember(key, Arc::new(result.clone()));

        // `key` is still pinned, so the entry just written survives.
        self.enforce_limits();

        if checkpoint_due {
            if let Err(e) = self.checkpoint() {
                tracing::warn!(error = %e, "Automatic checkpoint failed");
            }
        }

        Ok(PutOutcome::Committed(stored.to_entry()))
    }

    /// Remove `key`. Returns `false` if it was absent or is pinned.
    pub fn evict(&self, key: &CacheKey) -> Result<bool, CacheError> {
        if self.is_pinned(key) {
            tracing::debug!(key = %key.short(), "Refusing to evict pinned key");
            return Ok(false);
        }

        let mut journal = self.journal.lock();
        if !self.index.read().entries.contains_key(key) {
            return Ok(false);
        }
        journal.append(&JournalRecord::Evict(*key), self.options.sync_writes)?;
        self.index.write().remove(key);
        drop(journal);

        self.decoded.remove(key);
        bump(&self.counters.evictions, 1);
        Ok(true)
    }

    /// Prune if the index is over its size or count limit. Skipped while
    /// another prune runs; failures are logged.
    fn enforce_limits(&self) {
        let over = {
            let index = self.index.read();
            exceeds_limits(index.entries.len(), index.total_bytes, &self.options.policy)
        };
        if !over {
            return;
        }
        let Some(_pruning) = self.prune_guard.try_lock() else {
            return;
        };
        match self.prune_locked() {
            Ok(stats) => tracing::debug!(
                removed = stats.entries_removed,
                remaining = stats.entries_remaining,
                "Cache over its limits, pruned"
            ),
            Err(e) => tracing::warn!(error = %e, "Automatic prune failed"),
        }
    }

    /// Apply the eviction policy.
    pub fn prune(&self) -> Result<PruneStats, CacheError> {
        let _pruning = self.prune_guard.lock();
        self.prune_locked()
    }

    fn prune_locked(&self) -> Result<PruneStats, CacheError> {
        let start = Instant::now();
        let infos: Vec<EntryInfo> = {
            let index = self.index.read();
            index
                .entries
                .values()
                .map(|entry| EntryInfo {
                    key: entry.key,
                    size_bytes: entry.size_bytes(),
                    last_accessed_ms: entry.last_accessed(),
                    pinned: self.is_pinned(&entry.key),
                })
                .collect()
        };
        let skipped_pinned = infos.iter().filter(|info| info.pinned).count();
        let victims = select_entries_to_evict(&infos, &self.options.policy, now_ms());

        let mut stats = PruneStats {
            skipped_pinned,
            ..PruneStats::default()
        };
        for key in victims {
            let size = self
                .index
                .read()
                .entries
                .get(&key)
                .map(|e| e.size_bytes())
                .unwrap_or(0);
            if self.evict(&key)? {
                stats.entries_removed += 1;
                stats.bytes_freed += size;
            }
        }

        let index = self.index.read();
        stats.entries_remaining = index.entries.len();
        stats.bytes_remaining = index.total_bytes;
        stats.duration_ms = start.elapsed().as_millis() as u64;
        Ok(stats)
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let removed = {
            let mut journal = self.journal.lock();
            journal.append(&JournalRecord::Clear, self.options.sync_writes)?;
            self.index.write().clear()
        };
        self.decoded.clear();
        bump(&self.counters.evictions, removed as u64);
        tracing::info!(removed, "Cache cleared");
        Ok(removed)
    }

    /// Summaries of all entries, most recently used first.
    pub fn list(&self) -> Vec<EntrySummary> {
        let mut rows: Vec<EntrySummary> = self
            .index
            .read()
            .entries
            .values()
            .map(|entry| EntrySummary {
                key: entry.key,
                size_bytes: entry.size_bytes(),
                source_size: entry.source_size,
                created_at: ms_to_datetime(entry.created_at_ms),
                last_accessed: ms_to_datetime(entry.last_accessed()),
                has_structural_key: entry.structural_key.is_some(),
            })
            .collect();
        rows.sort_by(|a, b| {
            b.last_accessed
                .cmp(&a.last_accessed)
                .then_with(|| a.key.cmp(&b.key))
        });
        rows
    }

    pub fn stats(&self) -> CacheStats {
        let journal_records = self.journal.lock().records();
        let index = self.index.read();
        let session = self.counters.totals();
        CacheStats {
            entries: index.entries.len(),
            total_bytes: index.total_bytes,
            hits: session.hits,
            misses: session.misses,
            writes: session.writes,
            races: session.races,
            evictions: session.evictions,
            journal_records,
            recreated: self.recreated,
            lifetime: self.lifetime_base.merged(session),
        }
    }

    /// Drop decoded payloads held in memory. Returns how many were dropped.
    pub fn shed_memory(&self) -> usize {
        let dropped = self.decoded.len();
        self.decoded.clear();
        dropped
    }

    /// Write all live entries to the snapshot and truncate the journal.
    pub fn checkpoint(&self) -> Result<(), CacheError> {
        let mut journal = self.journal.lock();
        let entries: Vec<PersistedEntry> = self
            .index
            .read()
            .entries
            .values()
            .map(|entry| entry.to_persisted())
            .collect();
        snapshot::write(&self.options.directory, &entries)?;
        journal.reset()?;
        let lifetime = self.lifetime_base.merged(self.counters.totals());
        if let Err(e) = totals::write(&self.options.directory, &lifetime) {
            tracing::warn!(error = %e, "Failed to persist cache counter totals");
        }
        tracing::debug!(entries = entries.len(), "Cache checkpoint written");
        Ok(())
    }

    /// Checkpoint and release the store.
    pub fn close(self) -> Result<(), CacheError> {
        self.checkpoint()
    }
}
