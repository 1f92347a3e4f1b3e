//! IKNP OT extension (cf. <https://www.iacr.org/archive/crypto2003/27290145/27290145.pdf>).
//!
//! 128 base OTs are run once per pair of compute parties, in both directions. Every later batch of
//! OTs is extended from the base keys with two messages: the receiver sends the column matrix `u`,
//! the sender answers with its messages masked by the hashed rows.
//!
//! The pseudorandom columns of a batch are derived from the base keys and the tag of its first
//! message. Tags are never reused within a run, so batches running concurrently on different tags
//! never share randomness and need no shared mutable state.

use futures::future::try_join;
use rand::{RngCore, SeedableRng, random};
use rand_chacha::ChaCha20Rng;
use subtle::{Choice, ConditionallySelectable};
use tracing::{debug, info};

use crate::{
    comm::Comm,
    error::Error,
    ot::{
        base::{self, Key},
        transpose::columns_to_rows,
    },
    tag::{Tag, Task},
};

/// The number of base OTs, i.e. the computational security parameter.
const KAPPA: usize = 128;

/// The extension state shared with one peer.
///
/// This party acts as extension sender with `sender_keys` and as extension receiver with
/// `receiver_keys`, so OTs can be run in both directions.
pub(crate) struct OtSession {
    peer: usize,
    delta: u128,
    sender_keys: Vec<Key>,
    receiver_keys: Vec<(Key, Key)>,
}

impl std::fmt::Debug for OtSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtSession").field("peer", &self.peer).finish()
    }
}

impl OtSession {
    /// Runs the base OTs with `peer` in both directions.
    ///
    /// The party with the lower rank acts as base OT sender in the first run.
    pub(crate) async fn setup(comm: &Comm, peer: usize, task: &mut Task) -> Result<Self, Error> {
        let first = (task.next_tag()?, task.next_tag()?);
        let second = (task.next_tag()?, task.next_tag()?);
        let delta: u128 = random();
        let choices: Vec<bool> = (0..KAPPA).map(|j| (delta >> j) & 1 == 1).collect();
        let (receiver_keys, sender_keys) = if comm.rank() < peer {
            try_join(
                base::send(comm, peer, first, KAPPA),
                base::receive(comm, peer, second, &choices),
            )
            .await?
        } else {
            let (sender_keys, receiver_keys) = try_join(
                base::receive(comm, peer, first, &choices),
                base::send(comm, peer, second, KAPPA),
            )
            .await?;
            (receiver_keys, sender_keys)
        };
        info!(rank = comm.rank(), peer, "base OTs done");
        Ok(Self {
            peer,
            delta,
            sender_keys,
            receiver_keys,
        })
    }

    /// Transfers one of `(m0, m1)` per pair, chosen by the peer, who runs [`OtSession::receive_words`].
    pub(crate) async fn send_words(
        &self,
        comm: &Comm,
        (u_tag, y_tag): (Tag, Tag),
        messages: &[(u64, u64)],
    ) -> Result<(), Error> {
        let n = messages.len();
        let rows = self.sender_rows(comm, u_tag, n).await?;
        let hasher = row_hasher(u_tag);
        let masked: Vec<(u64, u64)> = rows
            .iter()
            .zip(messages)
            .enumerate()
            .map(|(i, (q, (m0, m1)))| {
                (
                    m0 ^ hash_row(&hasher, i, *q),
                    m1 ^ hash_row(&hasher, i, q ^ self.delta),
                )
            })
            .collect();
        debug!(peer = self.peer, size = n, "sent word OTs");
        comm.send_to(self.peer, y_tag, &masked).await
    }

    /// Receives the messages selected by `choices` from the peer running [`OtSession::send_words`].
    pub(crate) async fn receive_words(
        &self,
        comm: &Comm,
        (u_tag, y_tag): (Tag, Tag),
        choices: &[bool],
    ) -> Result<Vec<u64>, Error> {
        let n = choices.len();
        let rows = self.receiver_rows(comm, u_tag, &pack(choices)).await?;
        let masked: Vec<(u64, u64)> = comm.recv_vec_from(self.peer, y_tag, n).await?;
        let hasher = row_hasher(u_tag);
        Ok(rows
            .iter()
            .zip(masked)
            .zip(choices)
            .enumerate()
            .map(|(i, ((t, (y0, y1)), c))| {
                u64::conditional_select(&y0, &y1, Choice::from(*c as u8)) ^ hash_row(&hasher, i, *t)
            })
            .collect())
    }

    /// Transfers `n` single bits, packed into words: OT `i` offers bit `i` of `m0` and `m1`.
    pub(crate) async fn send_bits(
        &self,
        comm: &Comm,
        (u_tag, y_tag): (Tag, Tag),
        m0: &[u64],
        m1: &[u64],
        n: usize,
    ) -> Result<(), Error> {
        let rows = self.sender_rows(comm, u_tag, n).await?;
        let hasher = row_hasher(u_tag);
        let words = n.div_ceil(64);
        let mut y0 = vec![0u64; words];
        let mut y1 = vec![0u64; words];
        for (i, q) in rows.iter().enumerate() {
            let (w, b) = (i / 64, i % 64);
            let h0 = hash_row(&hasher, i, *q) & 1;
            let h1 = hash_row(&hasher, i, q ^ self.delta) & 1;
            y0[w] |= (((m0[w] >> b) & 1) ^ h0) << b;
            y1[w] |= (((m1[w] >> b) & 1) ^ h1) << b;
        }
        debug!(peer = self.peer, size = n, "sent bit OTs");
        comm.send_to(self.peer, y_tag, &(y0, y1)).await
    }

    /// Receives `n` bits selected by the packed `choices` from the peer running
    /// [`OtSession::send_bits`], packed into words.
    pub(crate) async fn receive_bits(
        &self,
        comm: &Comm,
        (u_tag, y_tag): (Tag, Tag),
        choices: &[u64],
        n: usize,
    ) -> Result<Vec<u64>, Error> {
        let words = n.div_ceil(64);
        let rows = self.receiver_rows(comm, u_tag, &choices[..words]).await?;
        let (y0, y1): (Vec<u64>, Vec<u64>) = comm.recv_from(self.peer, y_tag).await?;
        if y0.len() != words || y1.len() != words {
            return Err(Error::LengthMismatch {
                expected: words,
                actual: y0.len().min(y1.len()),
            });
        }
        let hasher = row_hasher(u_tag);
        let mut out = vec![0u64; words];
        for (i, t) in rows.iter().take(n).enumerate() {
            let (w, b) = (i / 64, i % 64);
            let c = Choice::from(((choices[w] >> b) & 1) as u8);
            let y = u64::conditional_select(&y0[w], &y1[w], c);
            out[w] |= (((y >> b) & 1) ^ (hash_row(&hasher, i, *t) & 1)) << b;
        }
        Ok(out)
    }

    /// Receives the column matrix `u` and returns the rows `q_i = t_i ^ (r_i * delta)`.
    async fn sender_rows(&self, comm: &Comm, tag: Tag, n: usize) -> Result<Vec<u128>, Error> {
        let words = n.div_ceil(64);
        let u: Vec<u64> = comm.recv_vec_from(self.peer, tag, KAPPA * words).await?;
        let mut columns = Vec::with_capacity(KAPPA * words);
        for (j, key) in self.sender_keys.iter().enumerate() {
            let mut column = expand(key, tag, words);
            if (self.delta >> j) & 1 == 1 {
                column
                    .iter_mut()
                    .zip(&u[j * words..(j + 1) * words])
                    .for_each(|(q, u)| *q ^= u);
            }
            columns.extend(column);
        }
        Ok(columns_to_rows(&columns, words, n))
    }

    /// Sends the column matrix `u = t ^ G(k1) ^ r` and returns the rows `t_i`.
    async fn receiver_rows(
        &self,
        comm: &Comm,
        tag: Tag,
        choices: &[u64],
    ) -> Result<Vec<u128>, Error> {
        let words = choices.len();
        let mut t = Vec::with_capacity(KAPPA * words);
        let mut u = Vec::with_capacity(KAPPA * words);
        for (k0, k1) in &self.receiver_keys {
            let t_j = expand(k0, tag, words);
            let g_j = expand(k1, tag, words);
            u.extend(
                t_j.iter()
                    .zip(&g_j)
                    .zip(choices)
                    .map(|((t, g), r)| t ^ g ^ r),
            );
            t.extend(t_j);
        }
        comm.send_to(self.peer, tag, &u).await?;
        Ok(columns_to_rows(&t, words, 64 * words))
    }
}

/// Expands a base key into `words` pseudorandom words for the batch identified by `tag`.
fn expand(key: &Key, tag: Tag, words: usize) -> Vec<u64> {
    let seed = blake3::keyed_hash(key, &tag.to_bytes());
    let mut rng = ChaCha20Rng::from_seed(*seed.as_bytes());
    (0..words).map(|_| rng.next_u64()).collect()
}

fn row_hasher(tag: Tag) -> blake3::Hasher {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"ot-row");
    hasher.update(&tag.to_bytes());
    hasher
}

fn hash_row(hasher: &blake3::Hasher, i: usize, row: u128) -> u64 {
    let mut hasher = hasher.clone();
    hasher.update(&(i as u64).to_le_bytes());
    hasher.update(&row.to_le_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&hasher.finalize().as_bytes()[..8]);
    u64::from_le_bytes(out)
}

/// Packs bits into little-endian words.
pub(crate) fn pack(bits: &[bool]) -> Vec<u64> {
    let mut words = vec![0u64; bits.len().div_ceil(64)];
    for (i, b) in bits.iter().enumerate() {
        words[i / 64] |= (*b as u64) << (i % 64);
    }
    words
}
