//! Bit and hashing helpers shared by the prefix type and the hashed tables

use crate::constants::{FNV_OFFSET, FNV_PRIME, V4_BITS};

/// Network mask keeping the top `prefix_len` bits of an IPv4 value.
#[inline]
pub fn mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else if prefix_len >= V4_BITS {
        !0u32
    } else {
        !(!0u32 >> prefix_len)
    }
}

// Canonicalise a value: zero host bits beyond `plen`.
#[inline(always)]
pub fn canonical(value: u32, plen: u8) -> u32 {
    value & mask(plen)
}

/// Bit at `index` counted from the most significant bit (0 = MSB).
/// Indices past the address width read as zero.
#[inline]
pub fn get_bit(value: u32, index: u8) -> bool {
    if index >= V4_BITS {
        return false;
    }
    (value >> (V4_BITS - 1 - index)) & 1 == 1
}

pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut h = FNV_OFFSET;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

/// Slot index of a (value, length) pair in a table of `slots` entries.
#[inline]
pub fn slot_index(value: u32, prefix_len: u8, slots: usize) -> usize {
    debug_assert!(slots > 0);
    let v = value.to_be_bytes();
    let h = fnv1a_64(&[v[0], v[1], v[2], v[3], prefix_len]);
    (h % slots as u64) as usize
}

/// Slots a layer of the given prefix length can usefully hold (`2^len`).
#[inline]
pub fn layer_cap(prefix_len: u8) -> u64 {
    1u64 << prefix_len.min(63)
}

/// Advance a window start by whole multiples of `width` until the window
/// `[start, start + width)` covers `now`.
#[inline]
pub fn advance_window(start: u64, width: u64, now: u64) -> u64 {
    if width == 0 || now < start {
        return now.max(start);
    }
    start + ((now - start) / width) * width
}
