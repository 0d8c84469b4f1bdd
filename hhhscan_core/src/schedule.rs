//! Per-depth windows, thresholds and hashed slot counts.
//!
//! Side tables are indexed by `last_len - len`. Accessors fall back to the
//! global value when a table is shorter than the configured depth range,
//! which is always the case when no divider or speed is configured.

use crate::config::Config;
use crate::constants::USEC_PER_SEC;
use crate::errors::{Error, Result};
use crate::helpers::layer_cap;
use log::{debug, info};

#[derive(Debug, Clone)]
pub struct Schedule {
    last_len: u8,
    active_timeout: u64,
    threshold: u64,
    atimeouts: Vec<u64>,
    thresholds: Vec<u64>,
}

impl Schedule {
    pub fn new(cfg: &Config) -> Self {
        let threshold = cfg.base_threshold();
        let mut atimeouts = Vec::new();
        let mut thresholds = Vec::new();

        if cfg.divider > 0 || cfg.speed.is_some() {
            for len in (cfg.first_len..=cfg.last_len).rev() {
                let win = depth_window(cfg.active_timeout, cfg.last_len - len, cfg.divider);
                let thr = match cfg.speed {
                    Some(speed) => speed.saturating_mul(win) / USEC_PER_SEC,
                    None => threshold,
                };
                atimeouts.push(win);
                thresholds.push(thr);
            }
            for (i, (w, t)) in atimeouts.iter().zip(&thresholds).enumerate() {
                debug!("depth {}: window={} threshold={}", i, w, t);
            }
        }

        Self {
            last_len: cfg.last_len,
            active_timeout: cfg.active_timeout,
            threshold,
            atimeouts,
            thresholds,
        }
    }

    #[inline]
    pub fn active_timeout(&self, len: u8) -> u64 {
        let index = self.last_len.saturating_sub(len) as usize;
        self.atimeouts.get(index).copied().unwrap_or(self.active_timeout)
    }

    #[inline]
    pub fn threshold(&self, len: u8) -> u64 {
        let index = self.last_len.saturating_sub(len) as usize;
        self.thresholds.get(index).copied().unwrap_or(self.threshold)
    }

    /// Whether every depth shares one window width.
    pub fn uniform_windows(&self) -> bool {
        self.atimeouts.iter().all(|w| *w == self.active_timeout)
    }
}

/// `active / max(1, depth / divider)`; a zero divider keeps the window uniform.
pub fn depth_window(active_timeout: u64, depth: u8, divider: u64) -> u64 {
    if divider == 0 {
        return active_timeout;
    }
    let coeff = depth as f64 / divider as f64;
    if coeff <= 1.0 {
        active_timeout
    } else {
        (active_timeout as f64 / coeff) as u64
    }
}

/// Split `budget` slots across the layers `first..=last`.
///
/// Each layer gets an equal share, capped at `2^len` slots; what a capped
/// layer cannot use is redistributed to the rest. A leftover smaller than
/// the number of open layers is handed out one slot at a time, shallowest
/// layer first. The result is indexed by `last - len`.
pub fn allocate_slots(budget: u64, first: u8, last: u8) -> Result<Vec<u64>> {
    let layers = (last - first) as usize + 1;
    if budget < layers as u64 {
        return Err(Error::MemoryBudgetTooSmall {
            budget,
            layers: layers as u64,
        });
    }

    // shallow first while allocating
    let caps: Vec<u64> = (first..=last).map(layer_cap).collect();
    let mut alloc = vec![0u64; layers];
    let mut open: Vec<usize> = (0..layers).collect();
    let mut remaining = budget;

    while !open.is_empty() && remaining > 0 {
        let share = remaining / open.len() as u64;
        if share == 0 {
            break;
        }
        let before = open.len();
        open.retain(|&i| {
            let room = caps[i] - alloc[i];
            if room <= share {
                alloc[i] += room;
                remaining -= room;
                false
            } else {
                true
            }
        });
        if open.len() == before {
            for &i in &open {
                alloc[i] += share;
                remaining -= share;
            }
        }
    }

    for i in 0..layers {
        if remaining == 0 {
            break;
        }
        if alloc[i] < caps[i] {
            alloc[i] += 1;
            remaining -= 1;
        }
    }

    if remaining > 0 {
        info!("memory budget exceeds addressable prefixes, {} slots unused", remaining);
    }

    alloc.reverse();
    Ok(alloc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divider_shrinks_deep_windows() {
        assert_eq!(depth_window(1_000, 0, 2), 1_000);
        assert_eq!(depth_window(1_000, 2, 2), 1_000);
        assert_eq!(depth_window(1_000, 4, 2), 500);
        assert_eq!(depth_window(1_000, 8, 0), 1_000);
    }

    #[test]
    fn schedule_falls_back_without_tables() {
        let cfg = Config { threshold: Some(77), ..Config::default() };
        let s = Schedule::new(&cfg);
        assert_eq!(s.threshold(32), 77);
        assert_eq!(s.threshold(1), 77);
        assert_eq!(s.active_timeout(7), cfg.active_timeout);
        assert!(s.uniform_windows());
    }

    #[test]
    fn speed_builds_per_depth_tables() {
        let cfg = Config {
            first_len: 24,
            last_len: 32,
            speed: Some(1_000_000),
            active_timeout: 1_000_000,
            divider: 2,
            ..Config::default()
        };
        let s = Schedule::new(&cfg);
        assert_eq!(s.active_timeout(32), 1_000_000);
        assert_eq!(s.threshold(32), 1_000_000);
        // depth 8 from the leaf: window / 4
        assert_eq!(s.active_timeout(24), 250_000);
        assert_eq!(s.threshold(24), 250_000);
        // out of range falls back to the global values
        assert_eq!(s.active_timeout(8), 1_000_000);
        assert!(!s.uniform_windows());
    }

    #[test]
    fn slots_respect_caps_and_budget() {
        let alloc = allocate_slots(100, 1, 8).unwrap();
        // index 0 is len 8
        assert_eq!(alloc.len(), 8);
        assert_eq!(alloc.iter().sum::<u64>(), 100);
        assert_eq!(alloc[7], 2); // len 1
        assert_eq!(alloc[6], 4); // len 2
        assert_eq!(alloc[5], 8); // len 3
        for (i, slots) in alloc.iter().enumerate() {
            let len = 8 - i as u8;
            assert!(*slots <= layer_cap(len));
            assert!(*slots >= 1);
        }
    }

    #[test]
    fn remainder_goes_to_shallow_layers() {
        // 5 layers at /28../32, caps are far above the share
        let alloc = allocate_slots(12, 28, 32).unwrap();
        // shallow first: /28 and /29 get the two leftover slots
        assert_eq!(alloc, vec![2, 2, 2, 3, 3]);
    }

    #[test]
    fn budget_smaller_than_layers_is_an_error() {
        assert!(allocate_slots(3, 1, 32).is_err());
    }
}
