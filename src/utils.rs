//! Word-wise kernels over shares and an RNG adapter.
//!
//! The vectorized kernels process four 64-bit lanes at a time with [`wide::u64x4`] and fall back
//! to scalar code for the tail. Both variants produce identical results.

use std::ops::{BitAndAssign, BitXorAssign};

use rand::{CryptoRng, RngCore};
use wide::u64x4;

/// Exposes a `rand` 0.9 generator through the `rand_core` 0.6 traits that the curve arithmetic of
/// the base OTs expects.
pub(crate) struct LegacyRng<R>(pub(crate) R);

impl<R: RngCore> rand_core_0_6::RngCore for LegacyRng<R> {
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core_0_6::Error> {
        self.0.fill_bytes(dest);
        Ok(())
    }
}

impl<R: CryptoRng> rand_core_0_6::CryptoRng for LegacyRng<R> {}

pub(crate) fn xor_inplace<T: Copy + BitXorAssign>(a: &mut [T], b: &[T]) {
    a.iter_mut().zip(b).for_each(|(a, b)| {
        *a ^= *b;
    });
}

pub(crate) fn and_inplace<T: Copy + BitAndAssign>(a: &mut [T], b: &[T]) {
    a.iter_mut().zip(b).for_each(|(a, b)| {
        *a &= *b;
    });
}

fn lanes_inplace(
    a: &mut [u64],
    b: &[u64],
    op: impl Fn(u64x4, u64x4) -> u64x4,
    tail: impl Fn(&mut [u64], &[u64]),
) {
    let split = a.len().min(b.len()) / 4 * 4;
    let (head, rest) = a.split_at_mut(split);
    let head: &mut [[u64; 4]] = bytemuck::cast_slice_mut(head);
    let other: &[[u64; 4]] = bytemuck::cast_slice(&b[..split]);
    for (x, y) in head.iter_mut().zip(other) {
        *x = op(u64x4::from(*x), u64x4::from(*y)).to_array();
    }
    tail(rest, &b[split..]);
}

/// `a ^= b`, lane by lane.
pub(crate) fn xor_words(a: &mut [u64], b: &[u64], simd: bool) {
    if simd {
        lanes_inplace(a, b, |x, y| x ^ y, xor_inplace::<u64>);
    } else {
        xor_inplace(a, b);
    }
}

/// `a &= b`, lane by lane.
pub(crate) fn and_words(a: &mut [u64], b: &[u64], simd: bool) {
    if simd {
        lanes_inplace(a, b, |x, y| x & y, and_inplace::<u64>);
    } else {
        and_inplace(a, b);
    }
}

/// `a ^ b` as a new vector.
pub(crate) fn xor_of(a: &[u64], b: &[u64], simd: bool) -> Vec<u64> {
    let mut out = a.to_vec();
    xor_words(&mut out, b, simd);
    out
}

/// `a & b` as a new vector.
pub(crate) fn and_of(a: &[u64], b: &[u64], simd: bool) -> Vec<u64> {
    let mut out = a.to_vec();
    and_words(&mut out, b, simd);
    out
}
