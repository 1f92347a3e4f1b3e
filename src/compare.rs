//! Secure comparison.
//!
//! [`less_than`] compares XOR-shared unsigned values with a parallel prefix over the bits. Bit `i`
//! *generates* a result if `x_i < y_i` and *propagates* the result of the lower bits if
//! `x_i == y_i`. Kogge-Stone combines the pairs over doubling distances, so a `width`-bit
//! comparison takes `ceil(log2(width))` rounds of batched ANDs. The top generate bit is the result.

use tracing::debug;

use crate::{convert, error::Error, gates, party::Party, ring, tag::Task};

/// XOR-shared `x < y` for unsigned `width`-bit values, as 1-bit shares.
pub(crate) async fn less_than(
    party: &Party,
    task: &mut Task,
    width: u32,
    x: &[u64],
    y: &[u64],
) -> Result<Vec<u64>, Error> {
    ring::check_width(width)?;
    gates::check_len(x.len(), y.len())?;
    let n = x.len();
    let rank = party.rank();
    let m = ring::mask(width);
    let simd = party.config().enable_simd;

    let not_x = gates::not(rank, x, width);
    let mut g = gates::and(party, task, width, &not_x, y).await?;
    let mut p = gates::not(rank, &gates::xor(x, y, simd), width);

    let mut d = 1;
    let mut rounds = 0;
    while d < width {
        let shifted_g: Vec<u64> = g.iter().map(|g| (g << d) & m).collect();
        if 2 * d < width {
            // lower positions have nothing to propagate into, their span is the identity
            let low = if rank == 0 { ring::mask(d) } else { 0 };
            let shifted_p: Vec<u64> = p.iter().map(|p| ((p << d) & m) | low).collect();
            let lhs = [p.as_slice(), p.as_slice()].concat();
            let rhs = [shifted_g, shifted_p].concat();
            let both = gates::and(party, task, width, &lhs, &rhs).await?;
            let (carried, spans) = both.split_at(n);
            g.iter_mut().zip(carried).for_each(|(g, c)| *g ^= c);
            p = spans.to_vec();
        } else {
            let carried = gates::and(party, task, width, &p, &shifted_g).await?;
            g.iter_mut().zip(&carried).for_each(|(g, c)| *g ^= c);
        }
        d *= 2;
        rounds += 1;
    }
    debug!(rank, size = n, width, rounds, "compared");
    Ok(g.iter().map(|g| (g >> (width - 1)) & 1).collect())
}

/// XOR-shared `x < y` for additively shared values, as 1-bit shares.
///
/// The result is the sign bit of `x - y`, so it interprets both operands as two's complement and
/// is correct as long as `x - y` does not overflow `width - 1` bits.
pub(crate) async fn arith_less_than(
    party: &Party,
    task: &mut Task,
    width: u32,
    x: &[u64],
    y: &[u64],
) -> Result<Vec<u64>, Error> {
    gates::check_len(x.len(), y.len())?;
    let diff = gates::sub(x, y, width);
    let bits = convert::arith_to_bool(party, task, width, &diff).await?;
    Ok(bits.iter().map(|b| (b >> (width - 1)) & 1).collect())
}

/// XOR-shared `x == y` for unsigned `width`-bit values, as 1-bit shares.
///
/// Equal values are neither smaller nor larger: `!(x < y) & !(y < x)`, with both comparisons in
/// one batch.
pub(crate) async fn equal(
    party: &Party,
    task: &mut Task,
    width: u32,
    x: &[u64],
    y: &[u64],
) -> Result<Vec<u64>, Error> {
    gates::check_len(x.len(), y.len())?;
    let less = less_than(party, task, width, &[x, y].concat(), &[y, x].concat()).await?;
    neither(party, task, &less).await
}

/// XOR-shared `x == y` for additively shared values, as 1-bit shares.
///
/// Unlike [`arith_less_than`] this is exact for all inputs: for `x != y` the differences `x - y`
/// and `y - x` cannot both have a clear sign bit.
pub(crate) async fn arith_equal(
    party: &Party,
    task: &mut Task,
    width: u32,
    x: &[u64],
    y: &[u64],
) -> Result<Vec<u64>, Error> {
    gates::check_len(x.len(), y.len())?;
    let less = arith_less_than(party, task, width, &[x, y].concat(), &[y, x].concat()).await?;
    neither(party, task, &less).await
}

/// `!a & !b` of the two halves of `less`.
async fn neither(party: &Party, task: &mut Task, less: &[u64]) -> Result<Vec<u64>, Error> {
    let rank = party.rank();
    let (a, b) = less.split_at(less.len() / 2);
    gates::and(party, task, 1, &gates::not(rank, a, 1), &gates::not(rank, b, 1)).await
}
