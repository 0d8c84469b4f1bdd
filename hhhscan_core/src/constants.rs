//! Constants and defaults for the HHH engines

pub const FNV_OFFSET: u64 = 0xcbf29ce484222325;
pub const FNV_PRIME: u64 = 0x100000001b3;

/// Width of an IPv4 address in bits; the deepest usable prefix length.
pub const V4_BITS: u8 = 32;

pub const USEC_PER_SEC: u64 = 1_000_000;

pub const DEFAULT_FIRST_LEN: u8 = 1;
pub const DEFAULT_LAST_LEN: u8 = V4_BITS;
pub const DEFAULT_ACTIVE_TIMEOUT: u64 = 10 * USEC_PER_SEC;
pub const DEFAULT_INACTIVE_TIMEOUT: u64 = 60 * USEC_PER_SEC;
pub const DEFAULT_THRESHOLD: u64 = 10_000;

pub const DEFAULT_BLOOM_MAX_BITS: u64 = 10_000_000;
pub const DEFAULT_BLOOM_FALSE_POSITIVE: f64 = 0.1;
pub const DEFAULT_BLOOM_PROJECTED_ELEMENTS: u64 = 100_000;

/// Size of one binary trace record on disk.
pub const RECORD_LEN: usize = 24;
