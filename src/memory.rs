//! Memory accounting for in-flight batches.
//!
//! The estimate is a proxy (`content bytes × cost factor`), not a measurement.
//! It only gates submissions: crossing the ceiling produces backpressure,
//! batch splitting and, after repeated breaches, emergency degradation. None
//! of it is ever reported as an error.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running estimate of memory committed to in-flight work.
#[derive(Debug)]
pub struct MemoryBudget {
    limit: u64,
    current: AtomicU64,
    peak: AtomicU64,
}

impl MemoryBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            current: AtomicU64::new(0),
            peak: AtomicU64::new(0),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Acquire)
    }

    /// Reserve `bytes` if the total stays within the limit.
    pub fn try_reserve(&self, bytes: u64) -> bool {
        let reserved = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(bytes)
                    .filter(|total| *total <= self.limit)
            });
        match reserved {
            Ok(previous) => {
                self.peak.fetch_max(previous + bytes, Ordering::AcqRel);
                true
            }
            Err(_) => false,
        }
    }

    /// Reserve `bytes` regardless of the limit.
    pub fn force_reserve(&self, bytes: u64) {
        let previous = self.current.fetch_add(bytes, Ordering::AcqRel);
        self.peak
            .fetch_max(previous.saturating_add(bytes), Ordering::AcqRel);
    }

    /// Release `bytes`; the estimate never goes below zero.
    pub fn release(&self, bytes: u64) {
        let _ = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    pub fn reset(&self) {
        self.current.store(0, Ordering::Release);
        self.peak.store(0, Ordering::Release);
    }
}

/// Answer to a request to submit a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Reserved within the ceiling.
    Granted,
    /// Over the ceiling; wait for an in-flight batch to finish.
    Wait,
    /// Over the ceiling with nothing in flight; split the batch.
    Split,
    /// A single item larger than the ceiling; reserved anyway.
    Forced,
}

/// Degradation step triggered by repeated breaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Drop decoded cache payloads held in memory.
    EmergencyCleanup,
    /// Run the rest of the work one item at a time on the sequential lane.
    ForcedSequential,
}

#[derive(Debug)]
pub struct MemoryMonitor {
    budget: MemoryBudget,
    cost_factor: f64,
    breach_limit: u32,
    breaches: u32,
    cleanup_done: bool,
    forced_sequential: bool,
}

impl MemoryMonitor {
    pub fn new(ceiling_bytes: u64, cost_factor: f64, breach_limit: u32) -> Self {
        Self {
            budget: MemoryBudget::new(ceiling_bytes),
            cost_factor,
            breach_limit: breach_limit.max(1),
            breaches: 0,
            cleanup_done: false,
            forced_sequential: false,
        }
    }

    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    pub fn breaches(&self) -> u32 {
        self.breaches
    }

    pub fn is_forced_sequential(&self) -> bool {
        self.forced_sequential
    }

    /// Estimated footprint of analyzing `content_bytes`.
    pub fn estimate(&self, content_bytes: u64) -> u64 {
        ((content_bytes as f64) * self.cost_factor).ceil() as u64
    }

    /// Decide whether a batch of `item_count` items costing `estimate` may be
    /// submitted while `in_flight` batches are running.
    pub fn admit(&mut self, estimate: u64, in_flight: usize, item_count: usize) -> Admission {
        if self.budget.try_reserve(estimate) {
            return Admission::Granted;
        }

        self.breaches += 1;
        tracing::debug!(
            estimate,
            current = self.budget.current(),
            limit = self.budget.limit(),
            breaches = self.breaches,
            "Memory ceiling breached"
        );

        if in_flight > 0 {
            Admission::Wait
        } else if item_count > 1 {
            Admission::Split
        } else {
            self.budget.force_reserve(estimate);
            Admission::Forced
        }
    }

    pub fn release(&self, estimate: u64) {
        self.budget.release(estimate);
    }

    /// Next degradation step, each returned at most once per run.
    pub fn escalation(&mut self) -> Option<Escalation> {
        if !self.cleanup_done && self.breaches >= self.breach_limit {
            self.cleanup_done = true;
            return Some(Escalation::EmergencyCleanup);
        }
        if !self.forced_sequential && self.breaches >= self.breach_limit.saturating_mul(2) {
            self.forced_sequential = true;
            return Some(Escalation::ForcedSequential);
        }
        None
    }

    /// Start a new run.
    pub fn reset(&mut self) {
        self.budget.reset();
        self.breaches = 0;
        self.cleanup_done = false;
        self.forced_sequential = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_within_limit() {
        let budget = MemoryBudget::new(100);
        assert!(budget.try_reserve(60));
        assert!(!budget.try_reserve(50));
        assert!(budget.try_reserve(40));
        assert_eq!(budget.current(), 100);
    }

    #[test]
    fn test_release_never_negative() {
        let budget = MemoryBudget::new(100);
        budget.try_reserve(10);
        budget.release(50);
        assert_eq!(budget.current(), 0);
    }

    #[test]
    fn test_peak_tracks_high_water() {
        let budget = MemoryBudget::new(100);
        budget.try_reserve(70);
        budget.release(70);
        budget.try_reserve(20);
        assert_eq!(budget.peak(), 70);
        budget.reset();
        assert_eq!(budget.peak(), 0);
    }

    #[test]
    fn test_concurrent_reservations_respect_limit() {
        let budget = MemoryBudget::new(1000);
        let granted: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| (0..100).filter(|_| budget.try_reserve(3)).count()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(granted, 333);
        assert!(budget.current() <= budget.limit());
    }

    #[test]
    fn test_estimate_applies_cost_factor() {
        let monitor = MemoryMonitor::new(1000, 2.5, 3);
        assert_eq!(monitor.estimate(10), 25);
        assert_eq!(monitor.estimate(0), 0);
    }

    #[test]
    fn test_admission_outcomes() {
        let mut monitor = MemoryMonitor::new(100, 1.0, 3);
        assert_eq!(monitor.admit(80, 0, 4), Admission::Granted);
        assert_eq!(monitor.admit(80, 1, 4), Admission::Wait);
        monitor.release(80);
        assert_eq!(monitor.admit(500, 0, 4), Admission::Split);
        assert_eq!(monitor.admit(500, 0, 1), Admission::Forced);
        assert_eq!(monitor.budget().current(), 500);
        assert_eq!(monitor.breaches(), 3);
    }

    #[test]
    fn test_escalation_sequence() {
        let mut monitor = MemoryMonitor::new(1, 1.0, 2);
        assert_eq!(monitor.escalation(), None);

        monitor.admit(10, 1, 1);
        monitor.admit(10, 1, 1);
        assert_eq!(monitor.escalation(), Some(Escalation::EmergencyCleanup));
        assert_eq!(monitor.escalation(), None);

        monitor.admit(10, 1, 1);
        monitor.admit(10, 1, 1);
        assert_eq!(monitor.escalation(), Some(Escalation::ForcedSequential));
        assert!(monitor.is_forced_sequential());
        assert_eq!(monitor.escalation(), None);

        monitor.reset();
        assert_eq!(monitor.breaches(), 0);
        assert!(!monitor.is_forced_sequential());
    }
}
