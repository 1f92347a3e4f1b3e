//! Random base OTs following Chou-Orlandi (cf. <https://eprint.iacr.org/2015/267>) over the
//! Ristretto group.
//!
//! The sender publishes `S = y·G`. For each choice bit `c` the receiver answers with
//! `R = c·S + x·G` and keeps `k_c = H(x·S)`. The sender derives `k_0 = H(y·R)` and
//! `k_1 = H(y·R - y·S)`. The index of the OT is hashed into every key, otherwise all keys of a
//! batch would be equal.

use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_TABLE,
    ristretto::{CompressedRistretto, RistrettoBasepointTable, RistrettoPoint},
    scalar::Scalar,
};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::{comm::Comm, error::Error, tag::Tag, utils::LegacyRng};

/// A 256-bit key produced by a base OT.
pub(crate) type Key = [u8; 32];

fn hash_pt(tweak: u64, pt: &RistrettoPoint) -> Key {
    *blake3::keyed_hash(pt.compress().as_bytes(), &tweak.to_le_bytes()).as_bytes()
}

fn decode_point(bytes: &[u8; 32]) -> Result<RistrettoPoint, Error> {
    CompressedRistretto(*bytes)
        .decompress()
        .ok_or(Error::InvalidOtData)
}

/// Runs `n` random OTs as sender, returning both keys of every OT.
pub(crate) async fn send(
    comm: &Comm,
    peer: usize,
    tags: (Tag, Tag),
    n: usize,
) -> Result<Vec<(Key, Key)>, Error> {
    let y = {
        let mut rng = LegacyRng(ChaCha20Rng::from_seed(rand::random()));
        Scalar::random(&mut rng)
    };
    let s = &y * RISTRETTO_BASEPOINT_TABLE;
    comm.send_to(peer, tags.0, &s.compress().to_bytes()).await?;

    let rs: Vec<[u8; 32]> = comm.recv_vec_from(peer, tags.1, n).await?;
    let ys = y * s;
    rs.iter()
        .enumerate()
        .map(|(i, r)| {
            let yr = y * decode_point(r)?;
            Ok((hash_pt(i as u64, &yr), hash_pt(i as u64, &(yr - ys))))
        })
        .collect()
}

/// Runs one random OT per choice bit as receiver, returning the chosen keys.
pub(crate) async fn receive(
    comm: &Comm,
    peer: usize,
    tags: (Tag, Tag),
    choices: &[bool],
) -> Result<Vec<Key>, Error> {
    let s_bytes: [u8; 32] = comm.recv_from(peer, tags.0).await?;
    let s = decode_point(&s_bytes)?;
    let s_table = RistrettoBasepointTable::create(&s);

    let (rs, keys): (Vec<[u8; 32]>, Vec<Key>) = {
        let mut rng = LegacyRng(ChaCha20Rng::from_seed(rand::random()));
        choices
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let x = Scalar::random(&mut rng);
                let mut r = &x * RISTRETTO_BASEPOINT_TABLE;
                if c {
                    r += s;
                }
                (r.compress().to_bytes(), hash_pt(i as u64, &(&x * &s_table)))
            })
            .unzip()
    };
    comm.send_to(peer, tags.1, &rs).await?;
    Ok(keys)
}
