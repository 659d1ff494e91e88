//! Thread-local context tracking for crash reports.
//!
//! Records which engine phase and which file the current thread is working
//! on, plus global progress counters. Worker threads and worker processes set
//! the file before invoking the runner so a panic names the input that
//! triggered it.
//!
//! ## Thread Safety
//!
//! - Thread-local context: each thread has its own context (via `thread_local!`)
//! - Global progress: atomic counters for files processed/total
//! - Context guards use RAII for automatic cleanup on drop

use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

static FILES_PROCESSED: AtomicUsize = AtomicUsize::new(0);
static FILES_TOTAL: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static CURRENT_CONTEXT: RefCell<AnalysisContext> = const { RefCell::new(AnalysisContext::new()) };
}

/// Snapshot of what the current thread was doing.
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    pub phase: Option<AnalysisPhase>,
    pub current_file: Option<PathBuf>,
}

impl AnalysisContext {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: None,
            current_file: None,
        }
    }
}

/// Stages of one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisPhase {
    /// Reading and hashing input files
    Fingerprinting,
    /// Probing the cache for exact and structural hits
    CacheLookup,
    /// Planning batches and choosing a strategy
    Planning,
    /// Waiting on and collecting batch results
    Dispatch,
    /// Running the analyzer on one batch
    Execution,
    /// Writing fresh results to the cache
    Commit,
}

impl std::fmt::Display for AnalysisPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fingerprinting => write!(f, "fingerprinting"),
            Self::CacheLookup => write!(f, "cache_lookup"),
            Self::Planning => write!(f, "planning"),
            Self::Dispatch => write!(f, "dispatch"),
            Self::Execution => write!(f, "execution"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

/// Restores the previous context on drop, so guards nest.
pub struct ContextGuard {
    previous: AnalysisContext,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT_CONTEXT.with(|ctx| {
            *ctx.borrow_mut() = self.previous.clone();
        });
    }
}

/// Set the current phase until the guard drops.
///
/// # Example
///
/// ```
/// use metricore::observability::{get_current_context, set_phase, AnalysisPhase};
///
/// {
///     let _phase = set_phase(AnalysisPhase::Planning);
///     assert_eq!(get_current_context().phase, Some(AnalysisPhase::Planning));
/// }
/// assert_eq!(get_current_context().phase, None);
/// ```
#[must_use]
pub fn set_phase(phase: AnalysisPhase) -> ContextGuard {
    CURRENT_CONTEXT.with(|ctx| {
        let previous = ctx.borrow().clone();
        ctx.borrow_mut().phase = Some(phase);
        ContextGuard { previous }
    })
}

/// Set the file being analyzed until the guard drops.
#[must_use]
pub fn set_current_file(path: impl Into<PathBuf>) -> ContextGuard {
    CURRENT_CONTEXT.with(|ctx| {
        let previous = ctx.borrow().clone();
        ctx.borrow_mut().current_file = Some(path.into());
        ContextGuard { previous }
    })
}

pub fn set_progress(processed: usize, total: usize) {
    FILES_PROCESSED.store(processed, Ordering::Relaxed);
    FILES_TOTAL.store(total, Ordering::Relaxed);
}

/// Add `count` to the processed file counter. Callable from any thread.
pub fn increment_processed(count: usize) {
    FILES_PROCESSED.fetch_add(count, Ordering::Relaxed);
}

#[must_use]
pub fn get_current_context() -> AnalysisContext {
    CURRENT_CONTEXT.with(|ctx| ctx.borrow().clone())
}

/// Current progress as `(processed, total)`.
#[must_use]
pub fn get_progress() -> (usize, usize) {
    (
        FILES_PROCESSED.load(Ordering::Relaxed),
        FILES_TOTAL.load(Ordering::Relaxed),
    )
}

pub fn reset_context() {
    CURRENT_CONTEXT.with(|ctx| {
        *ctx.borrow_mut() = AnalysisContext::new();
    });
}
