//! Elementary gates over secret shares.
//!
//! All gates work on slices of shares, one element per instance, and are evaluated within a single
//! task cursor. Linear gates are local. AND and MUL consume one Beaver triple per element and take
//! one round: both compute parties open `e = x - a` and `f = y - b` (XOR for boolean shares) and
//! compute `z = rank * e * f + f * a + e * b + c`.

use rand::Rng;
use tracing::trace;

use crate::{
    error::Error,
    party::Party,
    ring,
    tag::Task,
    triples::{ArithTriple, BoolTriple},
    utils::{and_of, xor_of, xor_words},
};

/// How a value is split between the two compute parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sharing {
    /// Additive shares modulo `2^width`.
    Arith,
    /// Bitwise XOR shares.
    Bool,
}

impl Sharing {
    fn split(self, value: u64, r: u64, width: u32) -> u64 {
        match self {
            Sharing::Arith => ring::sub(value, r, width),
            Sharing::Bool => ring::ring(value ^ r, width),
        }
    }

    fn join(self, a: u64, b: u64, width: u32) -> u64 {
        match self {
            Sharing::Arith => ring::add(a, b, width),
            Sharing::Bool => ring::ring(a ^ b, width),
        }
    }
}

pub(crate) fn check_len(expected: usize, actual: usize) -> Result<(), Error> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::LengthMismatch { expected, actual })
    }
}

/// Shares `values` of the party `owner` between the two compute parties.
///
/// The owner passes its plaintext values, everybody else passes `n` placeholders. Compute parties
/// return their shares, clients return zeros.
pub(crate) async fn share(
    party: &Party,
    task: &mut Task,
    sharing: Sharing,
    width: u32,
    owner: usize,
    values: &[u64],
) -> Result<Vec<u64>, Error> {
    ring::check_width(width)?;
    let comm = party.comm();
    if owner >= comm.parties() {
        return Err(Error::InvalidRank(owner));
    }
    let rank = party.rank();
    let n = values.len();
    if owner >= 2 {
        let tag = task.client_tag(owner)?;
        if rank == owner {
            let (r, rest) = random_split(sharing, values, width);
            let to_first = comm.send_async(0, tag, &r)?;
            comm.send_to(1, tag, &rest).await?;
            to_first.wait().await?;
            trace!(rank, size = n, "shared client values");
            Ok(vec![0; n])
        } else if rank < 2 {
            comm.recv_vec_from(owner, tag, n).await
        } else {
            Ok(vec![0; n])
        }
    } else if rank < 2 {
        let tag = task.next_tag()?;
        if rank == owner {
            let (r, rest) = random_split(sharing, values, width);
            comm.server_send(tag, &rest).await?;
            Ok(r)
        } else {
            comm.recv_vec_from(owner, tag, n).await
        }
    } else {
        Ok(vec![0; n])
    }
}

fn random_split(sharing: Sharing, values: &[u64], width: u32) -> (Vec<u64>, Vec<u64>) {
    let mut rng = rand::rng();
    values
        .iter()
        .map(|v| {
            let r = ring::ring(rng.random(), width);
            (r, sharing.split(ring::ring(*v, width), r, width))
        })
        .unzip()
}

/// Opens `shares` to the party `receiver`, which gets `Some(values)`. All others get `None`.
pub(crate) async fn reconstruct(
    party: &Party,
    task: &mut Task,
    sharing: Sharing,
    width: u32,
    receiver: usize,
    shares: &[u64],
) -> Result<Option<Vec<u64>>, Error> {
    ring::check_width(width)?;
    let comm = party.comm();
    if receiver >= comm.parties() {
        return Err(Error::InvalidRank(receiver));
    }
    let rank = party.rank();
    let n = shares.len();
    if receiver >= 2 {
        let tag = task.client_tag(receiver)?;
        if rank < 2 {
            comm.send_to(receiver, tag, &shares.to_vec()).await?;
            Ok(None)
        } else if rank == receiver {
            let a: Vec<u64> = comm.recv_vec_from(0, tag, n).await?;
            let b: Vec<u64> = comm.recv_vec_from(1, tag, n).await?;
            Ok(Some(
                a.iter().zip(&b).map(|(a, b)| sharing.join(*a, *b, width)).collect(),
            ))
        } else {
            Ok(None)
        }
    } else if rank < 2 {
        let tag = task.next_tag()?;
        if rank == receiver {
            let theirs: Vec<u64> = comm.server_recv(tag).await?;
            check_len(n, theirs.len())?;
            Ok(Some(
                shares
                    .iter()
                    .zip(&theirs)
                    .map(|(a, b)| sharing.join(*a, *b, width))
                    .collect(),
            ))
        } else {
            comm.server_send(tag, &shares.to_vec()).await?;
            Ok(None)
        }
    } else {
        Ok(None)
    }
}

pub(crate) fn xor(x: &[u64], y: &[u64], simd: bool) -> Vec<u64> {
    xor_of(x, y, simd)
}

/// Flips all `width` bits, which only rank 0 applies to its share.
pub(crate) fn not(rank: usize, x: &[u64], width: u32) -> Vec<u64> {
    if rank == 0 {
        x.iter().map(|x| ring::ring(!x, width)).collect()
    } else {
        x.to_vec()
    }
}

pub(crate) fn add(x: &[u64], y: &[u64], width: u32) -> Vec<u64> {
    x.iter().zip(y).map(|(x, y)| ring::add(*x, *y, width)).collect()
}

pub(crate) fn sub(x: &[u64], y: &[u64], width: u32) -> Vec<u64> {
    x.iter().zip(y).map(|(x, y)| ring::sub(*x, *y, width)).collect()
}

pub(crate) fn neg(x: &[u64], width: u32) -> Vec<u64> {
    x.iter().map(|x| ring::neg(*x, width)).collect()
}

/// Bitwise AND of XOR-shared words, consuming one boolean triple word per element.
pub(crate) async fn and(
    party: &Party,
    task: &mut Task,
    width: u32,
    x: &[u64],
    y: &[u64],
) -> Result<Vec<u64>, Error> {
    check_len(x.len(), y.len())?;
    let triples = party.bool_triples(task, width, x.len()).await?;
    and_with(party, task, width, x, y, &triples).await
}

/// Like [`and`], using caller-supplied triples.
pub(crate) async fn and_with(
    party: &Party,
    task: &mut Task,
    width: u32,
    x: &[u64],
    y: &[u64],
    triples: &[BoolTriple],
) -> Result<Vec<u64>, Error> {
    let n = x.len();
    check_len(n, y.len())?;
    if triples.len() != n {
        return Err(Error::TripleCountMismatch {
            expected: n,
            actual: triples.len(),
        });
    }
    let simd = party.config().enable_simd;
    let a: Vec<u64> = triples.iter().map(|t| t.a).collect();
    let b: Vec<u64> = triples.iter().map(|t| t.b).collect();
    let mut z: Vec<u64> = triples.iter().map(|t| t.c).collect();

    let mut e = xor_of(x, &a, simd);
    let mut f = xor_of(y, &b, simd);
    let msg = [e.as_slice(), f.as_slice()].concat();
    let theirs = party
        .comm()
        .exchange_vec(party.peer()?, task.next_tag()?, &msg)
        .await?;
    let (their_e, their_f) = theirs.split_at(n);
    xor_words(&mut e, their_e, simd);
    xor_words(&mut f, their_f, simd);

    xor_words(&mut z, &and_of(&f, &a, simd), simd);
    xor_words(&mut z, &and_of(&e, &b, simd), simd);
    if party.rank() == 0 {
        xor_words(&mut z, &and_of(&e, &f, simd), simd);
    }
    let m = ring::mask(width);
    z.iter_mut().for_each(|z| *z &= m);
    Ok(z)
}

/// Bitwise OR as `x ^ y ^ (x & y)`.
pub(crate) async fn or(
    party: &Party,
    task: &mut Task,
    width: u32,
    x: &[u64],
    y: &[u64],
) -> Result<Vec<u64>, Error> {
    let both = and(party, task, width, x, y).await?;
    let simd = party.config().enable_simd;
    Ok(xor_of(&xor_of(x, y, simd), &both, simd))
}

/// Product of additively shared values, consuming one arithmetic triple per element.
pub(crate) async fn mul(
    party: &Party,
    task: &mut Task,
    width: u32,
    x: &[u64],
    y: &[u64],
) -> Result<Vec<u64>, Error> {
    check_len(x.len(), y.len())?;
    let triples = party.arith_triples(task, width, x.len()).await?;
    mul_with(party, task, width, x, y, &triples).await
}

/// Like [`mul`], using caller-supplied triples.
pub(crate) async fn mul_with(
    party: &Party,
    task: &mut Task,
    width: u32,
    x: &[u64],
    y: &[u64],
    triples: &[ArithTriple],
) -> Result<Vec<u64>, Error> {
    let n = x.len();
    check_len(n, y.len())?;
    if triples.len() != n {
        return Err(Error::TripleCountMismatch {
            expected: n,
            actual: triples.len(),
        });
    }
    let mut msg = Vec::with_capacity(2 * n);
    msg.extend(x.iter().zip(triples).map(|(x, t)| ring::sub(*x, t.a, width)));
    msg.extend(y.iter().zip(triples).map(|(y, t)| ring::sub(*y, t.b, width)));
    let theirs = party
        .comm()
        .exchange_vec(party.peer()?, task.next_tag()?, &msg)
        .await?;
    let rank = party.rank() as u64;
    Ok(triples
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let e = ring::add(msg[i], theirs[i], width);
            let f = ring::add(msg[n + i], theirs[n + i], width);
            let z = rank
                .wrapping_mul(e)
                .wrapping_mul(f)
                .wrapping_add(f.wrapping_mul(t.a))
                .wrapping_add(e.wrapping_mul(t.b))
                .wrapping_add(t.c);
            ring::ring(z, width)
        })
        .collect())
}

/// Selects `x` where the 1-bit condition is set and `y` elsewhere, as `y ^ (c & (x ^ y))`.
pub(crate) async fn mux(
    party: &Party,
    task: &mut Task,
    width: u32,
    cond: &[u64],
    x: &[u64],
    y: &[u64],
) -> Result<Vec<u64>, Error> {
    check_len(x.len(), y.len())?;
    check_len(x.len(), cond.len())?;
    let simd = party.config().enable_simd;
    let spread: Vec<u64> = cond.iter().map(|c| ring::spread(c & 1 == 1, width)).collect();
    let diff = xor_of(x, y, simd);
    let picked = and(party, task, width, &spread, &diff).await?;
    Ok(xor_of(y, &picked, simd))
}

/// Selects between additively shared `x` and `y` by a XOR-shared 1-bit condition, as
/// `y + c * (x - y)` after converting the condition.
pub(crate) async fn arith_mux(
    party: &Party,
    task: &mut Task,
    width: u32,
    cond: &[u64],
    x: &[u64],
    y: &[u64],
) -> Result<Vec<u64>, Error> {
    check_len(x.len(), y.len())?;
    check_len(x.len(), cond.len())?;
    let bits: Vec<u64> = cond.iter().map(|c| c & 1).collect();
    let c = crate::convert::bool_to_arith(party, task, 1, width, &bits).await?;
    let picked = mul(party, task, width, &c, &sub(x, y, width)).await?;
    Ok(add(y, &picked, width))
}
