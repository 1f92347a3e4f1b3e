//! Conversion between additive and XOR shares.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::debug;

use crate::{error::Error, gates, ot, party::Party, ring, tag::Task};

/// Converts additive shares of `width`-bit values into XOR shares.
///
/// Each compute party's additive share is a XOR-shared addend on its own (the other party holds
/// zeros). A ripple-carry adder sums the two addends, one bit of carry per AND round.
pub(crate) async fn arith_to_bool(
    party: &Party,
    task: &mut Task,
    width: u32,
    x: &[u64],
) -> Result<Vec<u64>, Error> {
    ring::check_width(width)?;
    let rank = party.rank();
    let zeros = vec![0; x.len()];
    let (a, b) = match rank {
        0 => (x.to_vec(), zeros),
        1 => (zeros, x.to_vec()),
        r => return Err(Error::WrongRole(r)),
    };
    let mut carry = vec![0u64; x.len()];
    for k in 0..width - 1 {
        let lhs: Vec<u64> = a.iter().zip(&carry).map(|(a, c)| ((a ^ c) >> k) & 1).collect();
        let rhs: Vec<u64> = b.iter().zip(&carry).map(|(b, c)| ((b ^ c) >> k) & 1).collect();
        let t = gates::and(party, task, 1, &lhs, &rhs).await?;
        // carry_{k+1} = ((a ^ c) & (b ^ c)) ^ c at bit k
        carry
            .iter_mut()
            .zip(&t)
            .for_each(|(c, t)| *c |= ((t ^ (*c >> k)) & 1) << (k + 1));
    }
    debug!(rank, size = x.len(), width, "converted arithmetic to boolean shares");
    Ok(a.iter()
        .zip(&b)
        .zip(&carry)
        .map(|((a, b), c)| ring::ring(a ^ b ^ c, width))
        .collect())
}

/// Converts XOR shares of `bits`-bit values into additive shares modulo `2^width`.
///
/// One OT per bit, with rank 0 as the sender: for its bit `s` and a fresh mask `r` it offers
/// `((s ^ t) << k) - r` for both choices `t` of rank 1, which chooses with its own bit.
pub(crate) async fn bool_to_arith(
    party: &Party,
    task: &mut Task,
    bits: u32,
    width: u32,
    x: &[u64],
) -> Result<Vec<u64>, Error> {
    ring::check_width(bits)?;
    ring::check_width(width)?;
    let rank = party.rank();
    let comm = party.comm();
    let session = party.ot()?;
    let tags = ot::tags(task)?;
    let n = x.len();
    let per = bits as usize;

    let shares = if rank == 0 {
        let mut rng = ChaCha20Rng::from_seed(rand::random());
        let mut shares = vec![0u64; n];
        let mut messages = Vec::with_capacity(n * per);
        for (share, x) in shares.iter_mut().zip(x) {
            for k in 0..bits {
                let r = ring::ring(rng.random(), width);
                let s = (x >> k) & 1;
                messages.push((
                    ring::sub(s << k, r, width),
                    ring::sub((s ^ 1) << k, r, width),
                ));
                *share = ring::add(*share, r, width);
            }
        }
        session.send_words(comm, tags, &messages).await?;
        shares
    } else {
        let choices: Vec<bool> = x
            .iter()
            .flat_map(|x| (0..bits).map(move |k| ring::bit(*x, k)))
            .collect();
        let received = session.receive_words(comm, tags, &choices).await?;
        received
            .chunks(per)
            .map(|c| c.iter().fold(0, |acc, m| ring::add(acc, *m, width)))
            .collect()
    };
    party.stats_handle().record_ots(n * per);
    debug!(rank, size = n, bits, width, "converted boolean to arithmetic shares");
    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        testing::{on_servers, open_arith, open_bool, parties, split_arith, split_bool},
    };

    async fn round_trip(
        party: &Party,
        task: &mut Task,
        width: u32,
        x: &[u64],
    ) -> Result<(Vec<u64>, Vec<u64>), Error> {
        let b = arith_to_bool(party, task, width, x).await?;
        let a = bool_to_arith(party, task, width, width, &b).await?;
        Ok((b, a))
    }

    #[tokio::test]
    async fn converts_both_ways() -> Result<(), Error> {
        let parties = parties(Config::default()).await?;
        for width in [1, 8, 64] {
            let max = ring::mask(width);
            let x = vec![0, 1 & max, max, 0x1234_5678_9abc_def0 & max];
            let xa = split_arith(&x, width);
            let (r0, r1) = on_servers(&parties, move |party| {
                let x = if party.rank() == 0 { xa.0.clone() } else { xa.1.clone() };
                async move {
                    let mut task = party.task(30 + width)?;
                    round_trip(&party, &mut task, width, &x).await
                }
            })
            .await?;
            assert_eq!(open_bool(&r0.0, &r1.0), x);
            assert_eq!(open_arith(&r0.1, &r1.1, width), x);
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn widens_single_bits() -> Result<(), Error> {
        let parties = parties(Config::default()).await?;
        let bits = vec![1, 0, 1, 1];
        let shared = split_bool(&bits, 1);
        let (r0, r1) = on_servers(&parties, move |party| {
            let x = if party.rank() == 0 { shared.0.clone() } else { shared.1.clone() };
            async move {
                let mut task = party.task(40)?;
                bool_to_arith(&party, &mut task, 1, 32, &x).await
            }
        })
        .await?;
        assert_eq!(open_arith(&r0, &r1, 32), bits);
        Ok(())
    }
}
