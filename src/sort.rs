//! Oblivious bitonic sort of XOR-shared or additively shared values.
//!
//! The network is padded to the next power of two. Padding elements are public, so a pair with one
//! padding element is swapped in the clear to move the padding to the end of the output, and a pair
//! of two padding elements is left alone. Every other pair is compared and exchanged with one
//! batched comparison and one batched mux per step of the network.

use tracing::debug;

use crate::{
    batch::{self, Op, Operands},
    error::Error,
    gates::Sharing,
    party::Party,
    ring,
    tag::Task,
};

/// The compare-exchange pairs `(i, l)` of the step with block size `k` and distance `j`, with
/// `true` for pairs that are ordered ascending.
fn pairs(len: usize, k: usize, j: usize, ascending: bool) -> impl Iterator<Item = (usize, usize, bool)> {
    (0..len).filter_map(move |i| {
        let l = i ^ j;
        (l > i).then_some((i, l, ((i & k) == 0) == ascending))
    })
}

/// Sorts the XOR-shared `width`-bit `values` of both compute parties in place.
pub async fn sort(
    party: &Party,
    task: &mut Task,
    width: u32,
    values: &mut [u64],
    ascending: bool,
) -> Result<(), Error> {
    network(party, task, Sharing::Bool, width, values, ascending).await
}

/// Sorts the additively shared `width`-bit `values` of both compute parties in place.
///
/// Values are ordered as two's complement numbers, which is exact as long as no two of them are
/// `2^(width - 1)` or more apart.
pub async fn sort_arith(
    party: &Party,
    task: &mut Task,
    width: u32,
    values: &mut [u64],
    ascending: bool,
) -> Result<(), Error> {
    network(party, task, Sharing::Arith, width, values, ascending).await
}

pub(crate) async fn network(
    party: &Party,
    task: &mut Task,
    sharing: Sharing,
    width: u32,
    values: &mut [u64],
    ascending: bool,
) -> Result<(), Error> {
    ring::check_width(width)?;
    let rank = party.rank();
    if rank >= 2 {
        return Err(Error::WrongRole(rank));
    }
    let n = values.len();
    if n <= 1 {
        return Ok(());
    }
    let len = n.next_power_of_two();
    let mut data = values.to_vec();
    data.resize(len, 0);
    let mut padding: Vec<bool> = (0..len).map(|i| i >= n).collect();

    let mut steps = 0;
    let mut k = 2;
    while k <= len {
        let mut j = k / 2;
        while j > 0 {
            let mut compared = vec![];
            for (i, l, local_ascending) in pairs(len, k, j, ascending) {
                match (padding[i], padding[l]) {
                    (true, true) => {}
                    (false, false) => compared.push((i, l, local_ascending)),
                    (pad_i, _) => {
                        // padding sorts last in the requested direction
                        if pad_i == (local_ascending == ascending) {
                            data.swap(i, l);
                            padding.swap(i, l);
                        }
                    }
                }
            }
            if !compared.is_empty() {
                exchange(party, task, sharing, width, &mut data, &compared).await?;
            }
            steps += 1;
            j /= 2;
        }
        k *= 2;
    }
    debug!(rank, size = n, padded = len, steps, ?sharing, "sorted");
    values.copy_from_slice(&data[..n]);
    Ok(())
}

/// Puts the smaller element of every ascending pair first and the larger one of every descending
/// pair first.
async fn exchange(
    party: &Party,
    task: &mut Task,
    sharing: Sharing,
    width: u32,
    data: &mut [u64],
    pairs: &[(usize, usize, bool)],
) -> Result<(), Error> {
    let (less_op, mux_op) = match sharing {
        Sharing::Bool => (Op::LessThan, Op::Mux),
        Sharing::Arith => (Op::ArithLessThan, Op::ArithMux),
    };
    let a: Vec<u64> = pairs.iter().map(|(i, _, _)| data[*i]).collect();
    let b: Vec<u64> = pairs.iter().map(|(_, l, _)| data[*l]).collect();
    let less = batch::run(
        party,
        task,
        less_op,
        width,
        Operands::binary(a.clone(), b.clone()),
    )
    .await?;
    let flip = party.rank() == 0;
    let keep: Vec<u64> = less
        .iter()
        .zip(pairs)
        .map(|(lt, (_, _, asc))| if !asc && flip { lt ^ 1 } else { *lt })
        .collect();
    let first = batch::run(
        party,
        task,
        mux_op,
        width,
        Operands::select(keep, a.clone(), b.clone()),
    )
    .await?;
    for (((i, l, _), first), (a, b)) in pairs.iter().zip(first).zip(a.iter().zip(&b)) {
        data[*i] = first;
        // the other element is whatever the pair holds besides `first`
        data[*l] = match sharing {
            Sharing::Bool => a ^ b ^ first,
            Sharing::Arith => ring::sub(ring::add(*a, *b, width), first, width),
        };
    }
    Ok(())
}
