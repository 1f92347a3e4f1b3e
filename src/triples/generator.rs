//! Beaver triple generation from oblivious transfer.
//!
//! Both compute parties sample their own shares of `a` and `b`. The product splits into the local
//! terms `a_i∘b_i` and the cross terms `a_i∘b_j`. Each cross term is shared with one batch of OTs
//! in which the holder of `a_i` is the sender and the bits of `b_j` are the receiver's choices.
//! The two batches (one per direction) run concurrently.

use futures::future::try_join;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::debug;

use crate::{
    error::Error,
    ot::{self, pack},
    party::OtLink,
    ring,
    tag::{Tag, Task},
    triples::{ArithTriple, BoolTriple},
};

/// The tags of the two OT batches, ordered by the rank of their sender.
fn cross_tags(task: &mut Task) -> Result<[(Tag, Tag); 2], Error> {
    Ok([ot::tags(task)?, ot::tags(task)?])
}

/// Generates `n` arithmetic triples modulo `2^width`.
pub(crate) async fn arith(
    link: &OtLink,
    task: &mut Task,
    width: u32,
    n: usize,
) -> Result<Vec<ArithTriple>, Error> {
    ring::check_width(width)?;
    let comm = &*link.comm;
    let session = &*link.session;
    let rank = comm.rank();
    let tags = cross_tags(task)?;
    let w = width as usize;

    // sender side: for bit i of the peer's b, offer (x, x + (a << i)) and keep -x
    let mut rng = ChaCha20Rng::from_seed(rand::random());
    let a: Vec<u64> = (0..n).map(|_| ring::ring(rng.random(), width)).collect();
    let b: Vec<u64> = (0..n).map(|_| ring::ring(rng.random(), width)).collect();
    let mut sender_share = vec![0u64; n];
    let mut messages = Vec::with_capacity(n * w);
    for (k, a) in a.iter().enumerate() {
        for i in 0..width {
            let x = ring::ring(rng.random(), width);
            messages.push((x, ring::add(x, a << i, width)));
            sender_share[k] = ring::sub(sender_share[k], x, width);
        }
    }
    let choices: Vec<bool> = b
        .iter()
        .flat_map(|b| (0..width).map(move |i| ring::bit(*b, i)))
        .collect();

    let send = session.send_words(comm, tags[rank], &messages);
    let receive = session.receive_words(comm, tags[1 - rank], &choices);
    let ((), received) = try_join(send, receive).await?;
    link.stats.record_ots(2 * n * w);

    let triples = (0..n)
        .map(|k| {
            let receiver_share = received[k * w..(k + 1) * w]
                .iter()
                .fold(0, |acc, m| ring::add(acc, *m, width));
            let c = ring::add(
                ring::mul(a[k], b[k], width),
                ring::add(sender_share[k], receiver_share, width),
                width,
            );
            ArithTriple {
                a: a[k],
                b: b[k],
                c,
            }
        })
        .collect();
    debug!(rank, size = n, width, "generated arithmetic triples");
    Ok(triples)
}

/// Generates `n` words of `width` independent boolean triples each.
pub(crate) async fn boolean(
    link: &OtLink,
    task: &mut Task,
    width: u32,
    n: usize,
) -> Result<Vec<BoolTriple>, Error> {
    ring::check_width(width)?;
    let comm = &*link.comm;
    let session = &*link.session;
    let rank = comm.rank();
    let tags = cross_tags(task)?;
    let w = width as usize;
    let total = n * w;

    // sender side: for bit i, offer (x_i, x_i ^ a_i) and keep x_i
    let mut rng = ChaCha20Rng::from_seed(rand::random());
    let a: Vec<u64> = (0..n).map(|_| ring::ring(rng.random(), width)).collect();
    let b: Vec<u64> = (0..n).map(|_| ring::ring(rng.random(), width)).collect();
    let x: Vec<u64> = (0..n).map(|_| ring::ring(rng.random(), width)).collect();
    let m0 = pack(&spread_bits(&x, width));
    let m1 = pack(&spread_bits(
        &x.iter().zip(&a).map(|(x, a)| x ^ a).collect::<Vec<_>>(),
        width,
    ));
    let choices = pack(&spread_bits(&b, width));

    let send = session.send_bits(comm, tags[rank], &m0, &m1, total);
    let receive = session.receive_bits(comm, tags[1 - rank], &choices, total);
    let ((), received) = try_join(send, receive).await?;
    link.stats.record_ots(2 * total);

    let received = gather_bits(&received, n, width);
    let triples = (0..n)
        .map(|k| BoolTriple {
            a: a[k],
            b: b[k],
            c: (a[k] & b[k]) ^ x[k] ^ received[k],
        })
        .collect();
    debug!(rank, size = n, width, "generated boolean triples");
    Ok(triples)
}

/// Lists the lowest `width` bits of every word, word by word.
fn spread_bits(words: &[u64], width: u32) -> Vec<bool> {
    words
        .iter()
        .flat_map(|v| (0..width).map(move |i| ring::bit(*v, i)))
        .collect()
}

/// Inverse of packing [`spread_bits`]: reads `n` words of `width` bits from a packed bit vector.
fn gather_bits(packed: &[u64], n: usize, width: u32) -> Vec<u64> {
    let w = width as usize;
    (0..n)
        .map(|k| {
            (0..w).fold(0u64, |word, i| {
                let idx = k * w + i;
                word | (((packed[idx / 64] >> (idx % 64)) & 1) << i)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_inverts_spread() {
        let words = vec![0b1011, 0b0110, 0b1111, 0];
        let packed = pack(&spread_bits(&words, 4));
        assert_eq!(gather_bits(&packed, 4, 4), words);
        let wide = vec![u64::MAX, 1 << 63, 12345];
        assert_eq!(gather_bits(&pack(&spread_bits(&wide, 64)), 3, 64), wide);
    }
}
