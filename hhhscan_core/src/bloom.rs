//! Time-windowed Bloom gate for distinct-flow counting.
//!
//! Each tree layer owns a pair of Bloom filters, one per child branch,
//! keyed by `(node prefix, destination)`. A layer is wiped wholesale when
//! its window elapses. When every depth shares one window width the
//! layers collapse into a single shared pair; prefix length is part of the
//! key so different depths still never alias.

use crate::config::BloomParams;
use crate::helpers::advance_window;
use crate::types::Prefix;
use log::info;
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Fixed-size Bloom filter using double hashing over two seeded xxHash64 digests.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    pub fn with_params(params: &BloomParams) -> Self {
        let (num_bits, num_hashes) = Self::sizing(params);
        let words = num_bits.div_ceil(64) as usize;
        Self {
            bits: vec![0u64; words],
            num_bits,
            num_hashes,
        }
    }

    /// Optimal bits and hash count for the projected load, with the bit
    /// count then capped at `max_bits` and the hash count refit to it.
    pub fn sizing(params: &BloomParams) -> (u64, u32) {
        let n = params.projected_elements.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let optimal_bits = (-(n * params.false_positive.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let optimal_hashes = Self::hashes_for(optimal_bits, n);

        let bits = optimal_bits.min(params.max_bits.max(1));
        let hashes = Self::hashes_for(bits, n);
        info!(
            "bloom-filter: {} ({}) hashes, {} ({}) bits",
            hashes, optimal_hashes, bits, optimal_bits
        );
        (bits, hashes)
    }

    fn hashes_for(bits: u64, n: f64) -> u32 {
        ((bits as f64 / n) * std::f64::consts::LN_2).round().max(1.0) as u32
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    fn digests(key: &[u8]) -> (u64, u64) {
        let mut h1 = XxHash64::with_seed(0);
        h1.write(key);
        let mut h2 = XxHash64::with_seed(0x9E37_79B9);
        h2.write(key);
        (h1.finish(), h2.finish() | 1)
    }

    fn positions(&self, key: &[u8]) -> impl Iterator<Item = u64> + '_ {
        let (h1, h2) = Self::digests(key);
        (0..self.num_hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }

    pub fn insert(&mut self, key: &[u8]) {
        let positions: Vec<u64> = self.positions(key).collect();
        for bit in positions {
            self.bits[(bit / 64) as usize] |= 1u64 << (bit % 64);
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.positions(key)
            .all(|bit| self.bits[(bit / 64) as usize] & (1u64 << (bit % 64)) != 0)
    }

    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|w| *w = 0);
    }
}

/// Which increments a candidate update may apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub child: bool,
    pub summary: bool,
}

impl Admission {
    pub const ALL: Admission = Admission {
        child: true,
        summary: true,
    };

    /// Apply the admission to a raw increment, yielding `(child, summary)`.
    #[inline]
    pub fn apply(&self, increment: u64) -> (u64, u64) {
        (
            if self.child { increment } else { 0 },
            if self.summary { increment } else { 0 },
        )
    }
}

#[derive(Debug, Clone)]
struct GateLayer {
    window_start: u64,
    branches: [BloomFilter; 2],
}

#[derive(Debug, Clone)]
pub struct BloomGate {
    last_len: u8,
    layers: Vec<GateLayer>,
}

impl BloomGate {
    /// Allocate the filters once. With `shared` a single layer serves all
    /// depths; otherwise there is one per prefix length in `first..=last`.
    pub fn new(params: &BloomParams, first_len: u8, last_len: u8, shared: bool) -> Self {
        let count = if shared {
            1
        } else {
            (last_len - first_len) as usize + 1
        };
        let blueprint = BloomFilter::with_params(params);
        let layers = (0..count)
            .map(|_| GateLayer {
                window_start: 0,
                branches: [blueprint.clone(), blueprint.clone()],
            })
            .collect();
        Self { last_len, layers }
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    fn key(prefix: &Prefix, dst: &Prefix) -> [u8; 9] {
        let p = prefix.value().to_be_bytes();
        let d = dst.value().to_be_bytes();
        [p[0], p[1], p[2], p[3], prefix.len(), d[0], d[1], d[2], d[3]]
    }

    /// Test and record one `(prefix, dst)` observation on branch `child`.
    ///
    /// The summary increment is suppressed if the pair was already seen on
    /// either branch in the current window, the child increment if it was
    /// seen on this branch.
    pub fn admit(&mut self, now: u64, window: u64, prefix: &Prefix, dst: &Prefix, child: bool) -> Admission {
        let index = if self.layers.len() == 1 {
            0
        } else {
            (self.last_len.saturating_sub(prefix.len()) as usize).min(self.layers.len() - 1)
        };
        let layer = &mut self.layers[index];

        if layer.window_start.saturating_add(window) <= now {
            layer.window_start = advance_window(layer.window_start, window, now);
            layer.branches[0].clear();
            layer.branches[1].clear();
        }

        let key = Self::key(prefix, dst);
        let seen = [layer.branches[0].contains(&key), layer.branches[1].contains(&key)];
        layer.branches[child as usize].insert(&key);

        Admission {
            child: !seen[child as usize],
            summary: !(seen[0] || seen[1]),
        }
    }

    pub fn clear(&mut self) {
        for layer in &mut self.layers {
            layer.window_start = 0;
            layer.branches[0].clear();
            layer.branches[1].clear();
        }
    }
}
