//! Probabilistic pre-filter for the dedup engine
//!
//! A classic Bloom filter sized from an expected-insertion count and a
//! target false-positive rate:
//!
//! ```text
//! bits   = ceil(-n * ln(p) / (ln 2)^2)
//! hashes = round((bits / n) * ln 2)
//! ```
//!
//! Hash positions come from double hashing over a single sha256 digest of
//! the key: `h_i = h1 + i * h2 (mod bits)`. The filter never reports a
//! false negative; saturation only degrades it toward answering "possibly
//! known" for everything, which costs extra exact lookups but never admits
//! a duplicate.

use lifeline_core::DedupKey;
use sha2::{Digest, Sha256};

/// Space-efficient "possibly present" membership filter
#[derive(Debug, Clone)]
pub struct PreFilter {
    words: Vec<u64>,
    bit_count: usize,
    hash_count: u32,
    set_bits: usize,
}

impl PreFilter {
    /// Create a filter sized for `expected_insertions` keys at the given
    /// target false-positive rate
    pub fn new(expected_insertions: usize, fp_rate: f64) -> Self {
        let n = expected_insertions.max(1) as f64;
        let p = fp_rate.clamp(1e-6, 0.5);

        let ln2 = std::f64::consts::LN_2;
        let bit_count = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as usize;
        let hash_count = ((bit_count as f64 / n) * ln2).round().max(1.0) as u32;

        let words = vec![0u64; bit_count.div_ceil(64)];
        Self {
            words,
            bit_count,
            hash_count,
            set_bits: 0,
        }
    }

    /// Mark a key as present
    pub fn insert(&mut self, key: &DedupKey) {
        let (h1, h2) = Self::hash_pair(key);
        for i in 0..self.hash_count {
            let bit = self.position(h1, h2, i);
            let word = bit / 64;
            let mask = 1u64 << (bit % 64);
            if self.words[word] & mask == 0 {
                self.words[word] |= mask;
                self.set_bits += 1;
            }
        }
    }

    /// `false` means definitely never inserted; `true` means possibly known
    pub fn maybe_contains(&self, key: &DedupKey) -> bool {
        let (h1, h2) = Self::hash_pair(key);
        (0..self.hash_count).all(|i| {
            let bit = self.position(h1, h2, i);
            self.words[bit / 64] & (1u64 << (bit % 64)) != 0
        })
    }

    /// Fraction of bits set, in `[0.0, 1.0]`
    pub fn fill_ratio(&self) -> f64 {
        self.set_bits as f64 / self.bit_count as f64
    }

    /// Reset every bit
    pub fn clear(&mut self) {
        self.words.fill(0);
        self.set_bits = 0;
    }

    /// Total bits in the filter
    pub fn bit_count(&self) -> usize {
        self.bit_count
    }

    /// Number of hash positions probed per key
    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    fn position(&self, h1: u64, h2: u64, i: u32) -> usize {
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.bit_count as u64) as usize
    }

    fn hash_pair(key: &DedupKey) -> (u64, u64) {
        let digest = Sha256::digest(key.as_str().as_bytes());
        let h1 = u64::from_be_bytes(digest[..8].try_into().unwrap());
        // Force h2 odd so the probe sequence covers the full bit space
        let h2 = u64::from_be_bytes(digest[8..16].try_into().unwrap()) | 1;
        (h1, h2)
    }
}
