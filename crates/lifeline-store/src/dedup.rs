//! Two-tier duplicate filter
//!
//! Flood relay means the same logical packet arrives from many
//! uncoordinated peers. The [`DedupEngine`] absorbs those copies with a
//! probabilistic pre-filter in front of an authoritative exact set:
//!
//! 1. The [`PreFilter`] answers "definitely new" vs "possibly known" in
//!    O(1). A "definitely new" verdict needs no further work.
//! 2. Only "possibly known" results consult the exact set - the keys of
//!    currently live packets - which is the sole basis for admitting or
//!    rejecting a packet.
//!
//! When the pre-filter's fill ratio crosses the rebuild threshold it is
//! cleared and re-populated from the still-live exact set, trading a
//! transient rise in false positives for bounded memory. A saturated filter
//! only causes extra (cheap) exact lookups, never a wrong admission.

use lifeline_core::{DedupKey, StoreConfig};
use std::collections::HashSet;
use tracing::{debug, trace};

use crate::prefilter::PreFilter;

/// Counters for dedup behaviour, cheap to clone for stats snapshots
#[derive(Debug, Clone, Default)]
pub struct DedupStats {
    /// Total keys checked
    pub checks: u64,
    /// Keys rejected as duplicates
    pub duplicates: u64,
    /// Keys newly admitted
    pub admitted: u64,
    /// Pre-filter clear-and-rebuild cycles
    pub rebuilds: u64,
}

impl DedupStats {
    /// Fraction of checks that were duplicates, in `[0.0, 1.0]`
    pub fn duplicate_rate(&self) -> f64 {
        if self.checks == 0 {
            0.0
        } else {
            self.duplicates as f64 / self.checks as f64
        }
    }
}

/// Two-tier duplicate filter: pre-filter + authoritative live-key set
#[derive(Debug)]
pub struct DedupEngine {
    prefilter: PreFilter,
    exact: HashSet<DedupKey>,
    expected_insertions: usize,
    fp_rate: f64,
    rebuild_threshold: f64,
    stats: DedupStats,
}

impl DedupEngine {
    /// Create an engine from store configuration
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(
            config.prefilter_expected_insertions,
            config.prefilter_fp_rate,
            config.prefilter_rebuild_threshold,
        )
    }

    /// Create an engine with explicit pre-filter parameters
    pub fn new(expected_insertions: usize, fp_rate: f64, rebuild_threshold: f64) -> Self {
        Self {
            prefilter: PreFilter::new(expected_insertions, fp_rate),
            exact: HashSet::new(),
            expected_insertions,
            fp_rate,
            rebuild_threshold: rebuild_threshold.clamp(0.05, 1.0),
            stats: DedupStats::default(),
        }
    }

    /// Mark a key as seen
    ///
    /// Returns `true` if the key was newly marked, `false` if it was
    /// already known. The exact set is authoritative; the pre-filter only
    /// short-circuits lookups for definitely-new keys.
    pub fn mark_seen(&mut self, key: &DedupKey) -> bool {
        self.stats.checks += 1;

        if self.prefilter.maybe_contains(key) && self.exact.contains(key) {
            self.stats.duplicates += 1;
            trace!(key = %key, "duplicate key");
            return false;
        }

        self.prefilter.insert(key);
        self.exact.insert(key.clone());
        self.stats.admitted += 1;
        self.maybe_rebuild();
        true
    }

    /// Exact membership check without marking
    pub fn contains(&self, key: &DedupKey) -> bool {
        self.exact.contains(key)
    }

    /// Drop a key from the authoritative set
    ///
    /// Called when the packet leaves the buffer (eviction or sweep). The
    /// pre-filter bits stay set until the next rebuild, which only costs an
    /// exact lookup if the key reappears.
    pub fn forget(&mut self, key: &DedupKey) {
        self.exact.remove(key);
    }

    /// Drop every key and reset the pre-filter
    pub fn clear(&mut self) {
        self.exact.clear();
        self.prefilter.clear();
    }

    /// Number of live keys in the authoritative set
    pub fn len(&self) -> usize {
        self.exact.len()
    }

    /// Whether the authoritative set is empty
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    /// Current pre-filter fill ratio
    pub fn fill_ratio(&self) -> f64 {
        self.prefilter.fill_ratio()
    }

    /// Snapshot of the dedup counters
    pub fn stats(&self) -> DedupStats {
        self.stats.clone()
    }

    fn maybe_rebuild(&mut self) {
        if self.prefilter.fill_ratio() < self.rebuild_threshold {
            return;
        }

        self.prefilter = PreFilter::new(self.expected_insertions, self.fp_rate);
        for key in &self.exact {
            self.prefilter.insert(key);
        }
        self.stats.rebuilds += 1;
        debug!(
            live_keys = self.exact.len(),
            fill_ratio = self.prefilter.fill_ratio(),
            "pre-filter rebuilt from live set"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32) -> DedupKey {
        DedupKey::derive(format!("event-{n}").as_bytes())
    }

    #[test]
    fn test_mark_seen_idempotent() {
        let mut engine = DedupEngine::new(256, 0.01, 0.75);
        let k = key(1);

        assert!(engine.mark_seen(&k));
        assert!(!engine.mark_seen(&k));
        assert!(!engine.mark_seen(&k));

        let stats = engine.stats();
        assert_eq!(stats.checks, 3);
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.duplicates, 2);
    }

    #[test]
    fn test_forget_allows_readmission() {
        let mut engine = DedupEngine::new(256, 0.01, 0.75);
        let k = key(2);

        assert!(engine.mark_seen(&k));
        engine.forget(&k);
        assert!(!engine.contains(&k));
        // Pre-filter bits are still set, but the exact set decides
        assert!(engine.mark_seen(&k));
    }

    #[test]
    fn test_rebuild_keeps_live_keys() {
        // Tiny filter so the threshold trips quickly
        let mut engine = DedupEngine::new(8, 0.01, 0.3);
        for n in 0..64 {
            engine.mark_seen(&key(n));
        }
        assert!(engine.stats().rebuilds > 0);

        // Live keys are still recognized after rebuilds
        for n in 0..64 {
            assert!(!engine.mark_seen(&key(n)), "key {n} lost by rebuild");
        }
    }

    #[test]
    fn test_rebuild_drops_forgotten_bits_eventually() {
        let mut engine = DedupEngine::new(8, 0.01, 0.3);
        let dead = key(1000);
        engine.mark_seen(&dead);
        engine.forget(&dead);

        // Force rebuilds; the forgotten key no longer contributes bits
        for n in 0..64 {
            engine.mark_seen(&key(n));
        }
        assert!(engine.mark_seen(&dead));
    }

    #[test]
    fn test_duplicate_rate() {
        let mut engine = DedupEngine::new(256, 0.01, 0.75);
        engine.mark_seen(&key(1));
        engine.mark_seen(&key(1));
        assert!((engine.stats().duplicate_rate() - 0.5).abs() < f64::EPSILON);
    }
}
