//! Arithmetic in the ring of integers modulo `2^width`.
//!
//! Values of every width up to 64 bits are carried in a `u64`. All operations keep the bits above
//! `width` cleared, so two shares of the same width can be compared and serialized without any
//! further normalization.

use crate::error::Error;

/// The largest supported share width in bits.
pub const MAX_WIDTH: u32 = 64;

/// Checks that `width` is a supported share width.
pub(crate) fn check_width(width: u32) -> Result<(), Error> {
    if width == 0 || width > MAX_WIDTH {
        Err(Error::InvalidWidth(width))
    } else {
        Ok(())
    }
}

/// The bit mask with the lowest `width` bits set.
#[inline]
pub fn mask(width: u32) -> u64 {
    if width >= 64 { u64::MAX } else { (1 << width) - 1 }
}

/// Reduces `v` modulo `2^width`.
#[inline]
pub fn ring(v: u64, width: u32) -> u64 {
    v & mask(width)
}

/// Returns bit `i` of `v`.
#[inline]
pub fn bit(v: u64, i: u32) -> bool {
    (v >> i) & 1 == 1
}

/// Returns `v` with bit `i` set to `b`.
#[inline]
pub fn set_bit(v: u64, i: u32, b: bool) -> u64 {
    (v & !(1 << i)) | ((b as u64) << i)
}

/// The most significant bit of `v` interpreted as a `width`-bit value.
#[inline]
pub fn sign_bit(v: u64, width: u32) -> bool {
    bit(v, width - 1)
}

#[inline]
pub(crate) fn add(x: u64, y: u64, width: u32) -> u64 {
    ring(x.wrapping_add(y), width)
}

#[inline]
pub(crate) fn sub(x: u64, y: u64, width: u32) -> u64 {
    ring(x.wrapping_sub(y), width)
}

#[inline]
pub(crate) fn mul(x: u64, y: u64, width: u32) -> u64 {
    ring(x.wrapping_mul(y), width)
}

#[inline]
pub(crate) fn neg(x: u64, width: u32) -> u64 {
    ring(x.wrapping_neg(), width)
}

/// Expands a single bit into a word with all `width` bits equal to it.
#[inline]
pub(crate) fn spread(b: bool, width: u32) -> u64 {
    if b { mask(width) } else { 0 }
}
