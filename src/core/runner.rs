//! The pluggable per-file analysis capability.
//!
//! The engine has no knowledge of languages or metric formulas. Callers hand
//! it a [`Runner`] and the engine decides when, where and whether to invoke
//! it.

use crate::core::types::MetricResult;
use crate::errors::AnalysisError;
use std::path::Path;

/// Per-file metric computation supplied by the caller.
///
/// Implementations must be deterministic: the same `(path, content)` pair must
/// always produce the same result, otherwise cached and fresh results diverge.
/// Results must not depend on `path` beyond diagnostics, because cache keys are
/// path-independent.
pub trait Runner: Send + Sync {
    /// Stable identifier used in logs and cache keys.
    fn name(&self) -> &str;

    /// Version folded into every fingerprint. Bump it whenever the output for
    /// unchanged input may change.
    fn version(&self) -> &str;

    /// Compute metrics for one file.
    fn analyze(&self, path: &Path, content: &[u8]) -> Result<MetricResult, AnalysisError>;

    /// Normalized form of `content` whose equality implies equal metrics.
    ///
    /// Returning `Ok(None)` disables structural reuse for this file. Errors are
    /// treated as a plain cache miss.
    fn structural_digest(
        &self,
        _path: &Path,
        _content: &[u8],
    ) -> Result<Option<Vec<u8>>, AnalysisError> {
        Ok(None)
    }

    fn is_available(&self) -> bool {
        true
    }

    /// Analyzer identity folded into fingerprints: `name@version`.
    fn analyzer_version(&self) -> String {
        format!("{}@{}", self.name(), self.version())
    }
}
