//! A small public table of precomputed triples.
//!
//! The table is derived from a fixed seed, so anybody can recompute every entry. It only exists to
//! run protocols in tests without paying for OTs. The entry used for a triple is chosen by hashing a
//! jointly tossed seed with the tag of the consuming gate, so both parties pick the same entry
//! without exchanging messages.

use rand::{Rng, SeedableRng, random};
use rand_chacha::ChaCha20Rng;

use crate::{
    comm::Comm,
    error::Error,
    tag::{Tag, Task},
    triples::{ArithTriple, BoolTriple},
};

/// Number of entries per triple kind.
pub(crate) const TABLE_SIZE: u64 = 100;

const TABLE_SEED: u64 = 0x5eed_7ab1e;

#[derive(Debug, Clone)]
pub(crate) struct FixedTable {
    seed: [u8; 32],
}

/// The dealer's view of table entry `index`: both shares of `a` and `b`, and the mask of `c`.
fn entry(kind: u8, index: u64) -> ([u64; 2], [u64; 2], u64) {
    let mut rng = ChaCha20Rng::seed_from_u64(TABLE_SEED ^ ((kind as u64) << 56) ^ index);
    let a: [u64; 2] = rng.random();
    let b: [u64; 2] = rng.random();
    (a, b, rng.random())
}

impl FixedTable {
    /// Tosses the seed selecting table entries with the other compute party.
    pub(crate) async fn toss(comm: &Comm, task: &mut Task) -> Result<Self, Error> {
        let peer = comm.other_server()?;
        Ok(Self {
            seed: coin_toss(comm, peer, task).await?,
        })
    }

    fn index(&self, tag: Tag, j: usize) -> u64 {
        let mut hasher = blake3::Hasher::new_keyed(&self.seed);
        hasher.update(&tag.to_bytes());
        hasher.update(&(j as u64).to_le_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hasher.finalize().as_bytes()[..8]);
        u64::from_le_bytes(bytes) % TABLE_SIZE
    }

    pub(crate) fn arith(&self, rank: usize, tag: Tag, width: u32, n: usize) -> Vec<ArithTriple> {
        (0..n)
            .map(|j| arith_entry(rank, self.index(tag, j)).truncate(width))
            .collect()
    }

    pub(crate) fn boolean(&self, rank: usize, tag: Tag, width: u32, n: usize) -> Vec<BoolTriple> {
        (0..n)
            .map(|j| bool_entry(rank, self.index(tag, j)).truncate(width))
            .collect()
    }
}

/// The share of `rank` of the arithmetic table entry `index`.
pub(crate) fn arith_entry(rank: usize, index: u64) -> ArithTriple {
    let (a, b, mask) = entry(0, index);
    let c = a[0].wrapping_add(a[1]).wrapping_mul(b[0].wrapping_add(b[1]));
    let c_shares = [mask, c.wrapping_sub(mask)];
    ArithTriple {
        a: a[rank],
        b: b[rank],
        c: c_shares[rank],
    }
}

/// The share of `rank` of the boolean table entry `index`.
pub(crate) fn bool_entry(rank: usize, index: u64) -> BoolTriple {
    let (a, b, mask) = entry(1, index);
    let c = (a[0] ^ a[1]) & (b[0] ^ b[1]);
    let c_shares = [mask, c ^ mask];
    BoolTriple {
        a: a[rank],
        b: b[rank],
        c: c_shares[rank],
    }
}

fn commit(value: &[u8]) -> [u8; 32] {
    blake3::hash(value).into()
}

/// Two-party coin tossing: commit to a random seed, exchange the commitments, then open them.
pub(crate) async fn coin_toss(comm: &Comm, peer: usize, task: &mut Task) -> Result<[u8; 32], Error> {
    let (commit_tag, open_tag) = (task.next_tag()?, task.next_tag()?);
    let seed: [u8; 32] = random();
    let mut own = [0u8; 33];
    own[..32].copy_from_slice(&seed);
    own[32] = comm.rank() as u8;

    let their_commitment: [u8; 32] = comm.exchange(peer, commit_tag, &commit(&own)).await?;
    let their_seed: [u8; 32] = comm.exchange(peer, open_tag, &seed).await?;

    let mut theirs = [0u8; 33];
    theirs[..32].copy_from_slice(&their_seed);
    theirs[32] = peer as u8;
    if commit(&theirs) != their_commitment {
        return Err(Error::CommitmentCouldNotBeOpened);
    }
    let mut shared = seed;
    shared
        .iter_mut()
        .zip(their_seed)
        .for_each(|(s, t)| *s ^= t);
    Ok(shared)
}
