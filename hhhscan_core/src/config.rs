//! Engine configuration.
//!
//! A [`Config`] is assembled once (TOML file, command-line overrides, or
//! plain struct literals in tests), checked with [`Config::validate`], and
//! handed by value to the engine constructor. Engines never mutate it.

use crate::constants::*;
use crate::errors::{Error, Result};
use crate::types::CountMode;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// Which storage strategy backs the adaptive tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// Exact ordered map, unbounded memory.
    #[default]
    Online,
    /// Fixed per-depth hash tables under a slot budget.
    Hashed,
    /// Batch aggregation of a whole window at flush time.
    Offline,
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "online" => Ok(EngineKind::Online),
            "hashed" => Ok(EngineKind::Hashed),
            "offline" => Ok(EngineKind::Offline),
            other => Err(Error::UnknownEngine(other.to_string())),
        }
    }
}

/// What the hashed engine does when a slot holds a different prefix than
/// the one being probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "StrategyRepr")]
pub enum CollisionStrategy {
    /// Use the slot anyway.
    Ignore,
    /// Drop the packet's contribution.
    Skip,
    /// Check the selector bit of every ancestor slot before accepting.
    #[default]
    AdaptBit,
    /// Check the full stored prefix of every ancestor slot before accepting.
    AdaptFull,
}

// Accepts both the names and the historical numeric codes 0..=3.
#[derive(Deserialize)]
#[serde(untagged)]
enum StrategyRepr {
    Code(u8),
    Name(String),
}

impl TryFrom<StrategyRepr> for CollisionStrategy {
    type Error = Error;

    fn try_from(repr: StrategyRepr) -> Result<Self> {
        match repr {
            StrategyRepr::Code(code) => CollisionStrategy::from_code(code),
            StrategyRepr::Name(name) => name.parse(),
        }
    }
}

impl CollisionStrategy {
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(CollisionStrategy::Ignore),
            1 => Ok(CollisionStrategy::Skip),
            2 => Ok(CollisionStrategy::AdaptBit),
            3 => Ok(CollisionStrategy::AdaptFull),
            other => Err(Error::UnknownCollisionStrategy(other.to_string())),
        }
    }
}

impl FromStr for CollisionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ignore" => Ok(CollisionStrategy::Ignore),
            "skip" => Ok(CollisionStrategy::Skip),
            "adapt-bit" => Ok(CollisionStrategy::AdaptBit),
            "adapt-full" => Ok(CollisionStrategy::AdaptFull),
            other => match other.parse::<u8>() {
                Ok(code) => CollisionStrategy::from_code(code),
                Err(_) => Err(Error::UnknownCollisionStrategy(other.to_string())),
            },
        }
    }
}

/// Sizing of the flow-deduplication Bloom filters (one pair per layer).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BloomParams {
    /// Upper bound on bits of a single filter.
    pub max_bits: u64,
    pub false_positive: f64,
    pub projected_elements: u64,
}

impl Default for BloomParams {
    fn default() -> Self {
        Self {
            max_bits: DEFAULT_BLOOM_MAX_BITS,
            false_positive: DEFAULT_BLOOM_FALSE_POSITIVE,
            projected_elements: DEFAULT_BLOOM_PROJECTED_ELEMENTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub engine: EngineKind,
    /// Root prefix length.
    pub first_len: u8,
    /// Leaf prefix length.
    pub last_len: u8,
    /// Accounting window of a node, in microseconds. For the offline
    /// engine this is the batch window; zero means one window for the
    /// whole stream.
    pub active_timeout: u64,
    /// Silence after which a node is stale, in microseconds.
    pub inactive_timeout: u64,
    /// Period of occupancy reports (online, `reports` on). Zero means the
    /// active timeout.
    pub report_granularity: u64,
    pub threshold: Option<u64>,
    /// Target rate (per second) the threshold is derived from.
    pub speed: Option<u64>,
    /// Offline only: threshold as a fraction of the window's total.
    pub quotient: Option<f64>,
    /// Per-depth window shrink factor, 0 = uniform windows.
    pub divider: u64,
    pub collision_strategy: CollisionStrategy,
    /// Total slots across all hashed layers.
    pub memory_budget: Option<u64>,
    pub mode: CountMode,
    pub pure_heavy: bool,
    pub reports: bool,
    pub first_shot: bool,
    /// On collapse, seed the parent with the current packet.
    pub collapse_accumulate: bool,
    /// Check staleness once on the found node instead of during lookup.
    pub new_invalidation: bool,
    pub bloom: BloomParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineKind::Online,
            first_len: DEFAULT_FIRST_LEN,
            last_len: DEFAULT_LAST_LEN,
            active_timeout: DEFAULT_ACTIVE_TIMEOUT,
            inactive_timeout: DEFAULT_INACTIVE_TIMEOUT,
            report_granularity: 0,
            threshold: None,
            speed: None,
            quotient: None,
            divider: 0,
            collision_strategy: CollisionStrategy::default(),
            memory_budget: None,
            mode: CountMode::Bytes,
            pure_heavy: false,
            reports: false,
            first_shot: false,
            collapse_accumulate: true,
            new_invalidation: true,
            bloom: BloomParams::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Number of prefix layers between root and leaf, inclusive.
    #[inline]
    pub fn layers(&self) -> usize {
        (self.last_len - self.first_len) as usize + 1
    }

    /// Threshold before any per-depth or quotient derivation.
    pub fn base_threshold(&self) -> u64 {
        match self.speed {
            Some(speed) => speed.saturating_mul(self.active_timeout) / USEC_PER_SEC,
            None => self.threshold.unwrap_or(DEFAULT_THRESHOLD),
        }
    }

    pub fn occupancy_period(&self) -> u64 {
        if self.report_granularity == 0 {
            self.active_timeout
        } else {
            self.report_granularity
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.first_len == 0 || self.first_len > self.last_len || self.last_len > V4_BITS {
            return Err(Error::InvalidLengthBounds {
                first: self.first_len,
                last: self.last_len,
            });
        }

        let sources = [
            self.threshold.is_some(),
            self.speed.is_some(),
            self.quotient.is_some(),
        ];
        if sources.iter().filter(|s| **s).count() > 1 {
            return Err(Error::ConflictingThresholds);
        }

        if let Some(q) = self.quotient {
            if self.engine != EngineKind::Offline {
                return Err(Error::QuotientRequiresOffline);
            }
            if !(q > 0.0 && q <= 1.0) {
                return Err(Error::InvalidQuotient(q));
            }
        }

        if self.engine != EngineKind::Offline {
            if self.active_timeout == 0 {
                return Err(Error::ZeroTimeout("active_timeout"));
            }
            if self.inactive_timeout == 0 {
                return Err(Error::ZeroTimeout("inactive_timeout"));
            }
            if self.mode == CountMode::Flows {
                self.validate_bloom()?;
            }
        }

        if self.engine == EngineKind::Hashed {
            let budget = self.memory_budget.ok_or(Error::MissingMemoryBudget)?;
            let layers = self.layers() as u64;
            if budget < layers {
                return Err(Error::MemoryBudgetTooSmall { budget, layers });
            }
        }

        Ok(())
    }

    fn validate_bloom(&self) -> Result<()> {
        let b = &self.bloom;
        if !(b.false_positive > 0.0 && b.false_positive < 1.0) {
            return Err(Error::InvalidBloom(format!(
                "false positive probability {} not in (0, 1)",
                b.false_positive
            )));
        }
        if b.projected_elements == 0 {
            return Err(Error::InvalidBloom("projected element count is zero".into()));
        }
        if b.max_bits == 0 {
            return Err(Error::InvalidBloom("maximum size is zero".into()));
        }
        Ok(())
    }
}
