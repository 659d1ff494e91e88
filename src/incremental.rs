//! Cache-hit versus recompute decisions.
//!
//! A file is first looked up by its content key. On a miss the runner may
//! supply a structural digest; if an entry was stored under the same digest
//! and analyzer version, its result is reused and re-keyed under the new
//! content key so the next lookup is a direct hit.

use crate::cache::CacheStore;
use crate::core::{MetricResult, Runner};
use crate::fingerprint::{CacheKey, FileFingerprint};
use std::sync::Arc;

/// Outcome of an incremental lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Stored under this exact content key.
    Hit(Arc<MetricResult>),
    /// Content changed but is structurally equal to an entry under `source_key`.
    StructuralReuse {
        result: Arc<MetricResult>,
        source_key: CacheKey,
    },
    /// Must be computed. Carries the structural key to record with the result.
    Miss { structural_key: Option<CacheKey> },
}

impl Lookup {
    pub fn result(&self) -> Option<&Arc<MetricResult>> {
        match self {
            Self::Hit(result) | Self::StructuralReuse { result, .. } => Some(result),
            Self::Miss { .. } => None,
        }
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss { .. })
    }
}

/// Decides between cached results and recomputation.
pub struct IncrementalAnalyzer<'a> {
    store: &'a CacheStore,
    runner: &'a dyn Runner,
}

impl<'a> IncrementalAnalyzer<'a> {
    pub fn new(store: &'a CacheStore, runner: &'a dyn Runner) -> Self {
        Self { store, runner }
    }

    pub fn lookup(&self, fingerprint: &FileFingerprint, content: &[u8]) -> Lookup {
        let key = fingerprint.cache_key();
        if let Some(result) = self.store.load_result(&key) {
            return Lookup::Hit(result);
        }

        let Some(structural_key) = self.structural_key(fingerprint, content) else {
            return Lookup::Miss {
                structural_key: None,
            };
        };

        match self.store.find_structural(&structural_key) {
            Some((source_key, result)) if source_key != key => {
                self.rekey(fingerprint, &result, structural_key);
                Lookup::StructuralReuse { result, source_key }
            }
            _ => Lookup::Miss {
                structural_key: Some(structural_key),
            },
        }
    }

    /// Ask the runner for a digest; any failure is simply no digest.
    fn structural_key(&self, fingerprint: &FileFingerprint, content: &[u8]) -> Option<CacheKey> {
        match self.runner.structural_digest(fingerprint.path(), content) {
            Ok(Some(digest)) => Some(CacheKey::structural(
                &digest,
                fingerprint.analyzer_version(),
            )),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(
                    path = %fingerprint.path().display(),
                    error = %e,
                    "Structural digest failed, treating as miss"
                );
                None
            }
        }
    }

    fn rekey(&self, fingerprint: &FileFingerprint, result: &MetricResult, structural_key: CacheKey) {
        if let Err(e) = self.store.put(
            fingerprint.cache_key(),
            result,
            Some(structural_key),
            fingerprint.size(),
        ) {
            tracing::warn!(
                path = %fingerprint.path().display(),
                error = %e,
                "Failed to re-key structurally reused result"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EvictionPolicy, StoreOptions};
    use crate::core::{Metric, MetricType};
    use crate::errors::AnalysisError;
    use crate::fingerprint::compute_fingerprint;
    use std::path::Path;
    use tempfile::TempDir;

    /// Digest ignores case; metrics are the byte length.
    struct CaseInsensitive {
        fail_digest: bool,
    }

    impl Runner for CaseInsensitive {
        fn name(&self) -> &str {
            "case"
        }

        fn version(&self) -> &str {
            "1"
        }

        fn analyze(&self, _path: &Path, content: &[u8]) -> Result<MetricResult, AnalysisError> {
            Ok(MetricResult::new(vec![Metric::file_level(
                MetricType::LinesOfCode,
                content.len() as f64,
            )]))
        }

        fn structural_digest(
            &self,
            path: &Path,
            content: &[u8],
        ) -> Result<Option<Vec<u8>>, AnalysisError> {
            if self.fail_digest {
                return Err(AnalysisError::parse(path, "no digest"));
            }
            Ok(Some(content.to_ascii_lowercase()))
        }
    }

    fn store(dir: &TempDir) -> CacheStore {
        CacheStore::open(StoreOptions::new(dir.path()).with_policy(EvictionPolicy::unbounded()))
            .unwrap()
    }

    fn seed(store: &CacheStore, runner: &dyn Runner, content: &[u8]) -> FileFingerprint {
        let fp = compute_fingerprint(Path::new("a.txt"), content, &runner.analyzer_version());
        let analyzer = IncrementalAnalyzer::new(store, runner);
        let Lookup::Miss { structural_key } = analyzer.lookup(&fp, content) else {
            panic!("expected miss on empty store");
        };
        let result = runner.analyze(fp.path(), content).unwrap();
        store.put(fp.cache_key(), &result, structural_key, fp.size()).unwrap();
        fp
    }

    #[test]
    fn test_exact_hit() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let runner = CaseInsensitive { fail_digest: false };
        let fp = seed(&store, &runner, b"abc");

        let analyzer = IncrementalAnalyzer::new(&store, &runner);
        assert!(matches!(analyzer.lookup(&fp, b"abc"), Lookup::Hit(_)));
    }

    #[test]
    fn test_structural_reuse_rekeys() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let runner = CaseInsensitive { fail_digest: false };
        let original = seed(&store, &runner, b"abc");

        let changed = compute_fingerprint(Path::new("a.txt"), b"ABC", &runner.analyzer_version());
        let analyzer = IncrementalAnalyzer::new(&store, &runner);
        match analyzer.lookup(&changed, b"ABC") {
            Lookup::StructuralReuse { result, source_key } => {
                assert_eq!(source_key, original.cache_key());
                assert_eq!(result.file_value(MetricType::LinesOfCode), Some(3.0));
            }
            other => panic!("expected structural reuse, got {:?}", other),
        }

        // Re-keyed: now a direct hit.
        assert!(matches!(analyzer.lookup(&changed, b"ABC"), Lookup::Hit(_)));
    }

    #[test]
    fn test_digest_failure_is_plain_miss() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        seed(&store, &CaseInsensitive { fail_digest: false }, b"abc");

        let runner = CaseInsensitive { fail_digest: true };
        let changed = compute_fingerprint(Path::new("a.txt"), b"ABC", &runner.analyzer_version());
        let lookup = IncrementalAnalyzer::new(&store, &runner).lookup(&changed, b"ABC");
        assert!(matches!(lookup, Lookup::Miss { structural_key: None }));
    }

    #[test]
    fn test_unrelated_content_is_miss_with_structural_key() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let runner = CaseInsensitive { fail_digest: false };
        seed(&store, &runner, b"abc");

        let other = compute_fingerprint(Path::new("b.txt"), b"xyz", &runner.analyzer_version());
        let lookup = IncrementalAnalyzer::new(&store, &runner).lookup(&other, b"xyz");
        assert!(matches!(lookup, Lookup::Miss { structural_key: Some(_) }));
    }
}
