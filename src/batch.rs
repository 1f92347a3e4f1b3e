//! Batched gates.
//!
//! Every interactive gate is available as an [`Op`] applied to aligned vectors of shares. A batch
//! larger than [`Config::batch_size`](crate::Config) is split into sub-batches, each running on
//! its own lane of the task. With intra-operator parallelism the sub-batches are spawned onto the
//! runtime, otherwise they are polled concurrently on the current task. Either way their messages
//! overlap on the wire and the results come back in input order.

use futures::future::try_join_all;
use tokio::task::JoinSet;
use tracing::debug;

use crate::{
    compare, convert,
    error::Error,
    gates,
    party::Party,
    ring,
    tag::Task,
    triples::{ArithTriple, BoolTriple},
};

/// An interactive gate that can be applied to a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Bitwise AND of XOR shares.
    And,
    /// Bitwise OR of XOR shares.
    Or,
    /// Product of additive shares.
    Mul,
    /// Unsigned `x < y` of XOR shares, yielding 1-bit XOR shares.
    LessThan,
    /// Signed `x < y` of additive shares, yielding 1-bit XOR shares.
    ArithLessThan,
    /// `x == y` of XOR shares, yielding 1-bit XOR shares.
    Equal,
    /// `x == y` of additive shares, yielding 1-bit XOR shares.
    ArithEqual,
    /// `cond ? x : y` of XOR shares with a 1-bit XOR-shared condition.
    Mux,
    /// `cond ? x : y` of additive shares with a 1-bit XOR-shared condition.
    ArithMux,
    /// Additive to XOR shares.
    ArithToBool,
    /// XOR to additive shares of the same width.
    BoolToArith,
}

impl Op {
    fn binary(self) -> bool {
        !matches!(self, Op::ArithToBool | Op::BoolToArith)
    }

    fn conditional(self) -> bool {
        matches!(self, Op::Mux | Op::ArithMux)
    }
}

/// The operand shares of a batch. `y` is empty for conversions and `cond` is empty unless the
/// operator is a mux.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Operands {
    /// The first operand.
    pub x: Vec<u64>,
    /// The second operand.
    pub y: Vec<u64>,
    /// The mux condition.
    pub cond: Vec<u64>,
}

impl Operands {
    /// Operands of a unary operator.
    pub fn unary(x: Vec<u64>) -> Self {
        Self {
            x,
            ..Self::default()
        }
    }

    /// Operands of a binary operator.
    pub fn binary(x: Vec<u64>, y: Vec<u64>) -> Self {
        Self {
            x,
            y,
            cond: vec![],
        }
    }

    /// Operands of a mux.
    pub fn select(cond: Vec<u64>, x: Vec<u64>, y: Vec<u64>) -> Self {
        Self { x, y, cond }
    }

    fn validate(&self, op: Op) -> Result<usize, Error> {
        let n = self.x.len();
        let expected_y = if op.binary() { n } else { 0 };
        gates::check_len(expected_y, self.y.len())?;
        let expected_cond = if op.conditional() { n } else { 0 };
        gates::check_len(expected_cond, self.cond.len())?;
        Ok(n)
    }

    fn chunks(self, size: usize) -> Vec<Operands> {
        let split = |v: Vec<u64>| -> Vec<Vec<u64>> {
            if v.is_empty() {
                vec![]
            } else {
                v.chunks(size).map(<[u64]>::to_vec).collect()
            }
        };
        let parts = self.x.len().div_ceil(size);
        let mut x = split(self.x).into_iter();
        let mut y = split(self.y).into_iter();
        let mut cond = split(self.cond).into_iter();
        (0..parts)
            .map(|_| Operands {
                x: x.next().unwrap_or_default(),
                y: y.next().unwrap_or_default(),
                cond: cond.next().unwrap_or_default(),
            })
            .collect()
    }
}

/// Evaluates `op` on a whole batch within the lane of `task`.
async fn run_kernel(
    party: &Party,
    task: &mut Task,
    op: Op,
    width: u32,
    operands: &Operands,
) -> Result<Vec<u64>, Error> {
    let Operands { x, y, cond } = operands;
    match op {
        Op::And => gates::and(party, task, width, x, y).await,
        Op::Or => gates::or(party, task, width, x, y).await,
        Op::Mul => gates::mul(party, task, width, x, y).await,
        Op::LessThan => compare::less_than(party, task, width, x, y).await,
        Op::ArithLessThan => compare::arith_less_than(party, task, width, x, y).await,
        Op::Equal => compare::equal(party, task, width, x, y).await,
        Op::ArithEqual => compare::arith_equal(party, task, width, x, y).await,
        Op::Mux => gates::mux(party, task, width, cond, x, y).await,
        Op::ArithMux => gates::arith_mux(party, task, width, cond, x, y).await,
        Op::ArithToBool => convert::arith_to_bool(party, task, width, x).await,
        Op::BoolToArith => convert::bool_to_arith(party, task, width, width, x).await,
    }
}

/// Applies `op` to every element of the batch, returning the results in input order.
///
/// Only compute parties take part. Both must call this with the same operator, width and batch
/// length on the same task cursor.
pub async fn run(
    party: &Party,
    task: &mut Task,
    op: Op,
    width: u32,
    operands: Operands,
) -> Result<Vec<u64>, Error> {
    ring::check_width(width)?;
    if !party.is_server() {
        return Err(Error::WrongRole(party.rank()));
    }
    let n = operands.validate(op)?;
    let config = party.config();
    let size = config.batch_size;
    if n == 0 {
        return Ok(vec![]);
    }
    // never ask for more lanes than the task has left, joined lanes come back after each call
    let parts = if size == 0 { 1 } else { n.div_ceil(size).min(task.available_lanes()) };
    if parts <= 1 {
        return run_kernel(party, task, op, width, &operands).await;
    }
    let parts = operands.chunks(n.div_ceil(parts));
    let lanes = task.fork(parts.len())?;
    debug!(
        rank = party.rank(),
        task = task.id(),
        ?op,
        size = n,
        sub_batches = parts.len(),
        "running batch"
    );
    let (results, lanes): (Vec<Vec<u64>>, Vec<Task>) = if config.intra_operator_parallelism {
        let mut set = JoinSet::new();
        for (i, (mut lane, part)) in lanes.into_iter().zip(parts).enumerate() {
            let party = party.clone();
            set.spawn(async move {
                let result = run_kernel(&party, &mut lane, op, width, &part).await?;
                Ok::<_, Error>((i, result, lane))
            });
        }
        let mut joined = Vec::with_capacity(set.len());
        while let Some(next) = set.join_next().await {
            joined.push(next??);
        }
        joined.sort_unstable_by_key(|(i, _, _)| *i);
        joined.into_iter().map(|(_, result, lane)| (result, lane)).unzip()
    } else {
        try_join_all(
            lanes
                .into_iter()
                .zip(&parts)
                .map(|(mut lane, part)| async move {
                    let result = run_kernel(party, &mut lane, op, width, part).await?;
                    Ok::<_, Error>((result, lane))
                }),
        )
        .await?
        .into_iter()
        .unzip()
    };
    task.join(lanes);
    Ok(results.concat())
}

/// Batched bitwise AND.
pub async fn and(
    party: &Party,
    task: &mut Task,
    width: u32,
    x: Vec<u64>,
    y: Vec<u64>,
) -> Result<Vec<u64>, Error> {
    run(party, task, Op::And, width, Operands::binary(x, y)).await
}

/// Batched product.
pub async fn mul(
    party: &Party,
    task: &mut Task,
    width: u32,
    x: Vec<u64>,
    y: Vec<u64>,
) -> Result<Vec<u64>, Error> {
    run(party, task, Op::Mul, width, Operands::binary(x, y)).await
}

/// Batched unsigned less-than.
pub async fn less_than(
    party: &Party,
    task: &mut Task,
    width: u32,
    x: Vec<u64>,
    y: Vec<u64>,
) -> Result<Vec<u64>, Error> {
    run(party, task, Op::LessThan, width, Operands::binary(x, y)).await
}

/// Batched equality of XOR shares.
pub async fn equal(
    party: &Party,
    task: &mut Task,
    width: u32,
    x: Vec<u64>,
    y: Vec<u64>,
) -> Result<Vec<u64>, Error> {
    run(party, task, Op::Equal, width, Operands::binary(x, y)).await
}

/// Batched boolean mux.
pub async fn mux(
    party: &Party,
    task: &mut Task,
    width: u32,
    cond: Vec<u64>,
    x: Vec<u64>,
    y: Vec<u64>,
) -> Result<Vec<u64>, Error> {
    run(party, task, Op::Mux, width, Operands::select(cond, x, y)).await
}

/// Batched XOR, which is local.
pub fn xor(party: &Party, x: &[u64], y: &[u64]) -> Result<Vec<u64>, Error> {
    gates::check_len(x.len(), y.len())?;
    Ok(gates::xor(x, y, party.config().enable_simd))
}

/// Batched addition, which is local.
pub fn add(width: u32, x: &[u64], y: &[u64]) -> Result<Vec<u64>, Error> {
    ring::check_width(width)?;
    gates::check_len(x.len(), y.len())?;
    Ok(gates::add(x, y, width))
}

/// Generates `n` boolean triple words of `width` bits with the configured strategy, for a later
/// call of [`and_with_triples`].
pub async fn bool_triples(
    party: &Party,
    task: &mut Task,
    width: u32,
    n: usize,
) -> Result<Vec<BoolTriple>, Error> {
    ring::check_width(width)?;
    party.bool_triples(task, width, n).await
}

/// Generates `n` arithmetic triples of `width` bits, for a later call of [`mul_with_triples`].
pub async fn arith_triples(
    party: &Party,
    task: &mut Task,
    width: u32,
    n: usize,
) -> Result<Vec<ArithTriple>, Error> {
    ring::check_width(width)?;
    party.arith_triples(task, width, n).await
}

/// Batched AND consuming exactly one caller-supplied triple per element.
pub async fn and_with_triples(
    party: &Party,
    task: &mut Task,
    width: u32,
    x: &[u64],
    y: &[u64],
    triples: &[BoolTriple],
) -> Result<Vec<u64>, Error> {
    ring::check_width(width)?;
    gates::and_with(party, task, width, x, y, triples).await
}

/// Batched product consuming exactly one caller-supplied triple per element.
pub async fn mul_with_triples(
    party: &Party,
    task: &mut Task,
    width: u32,
    x: &[u64],
    y: &[u64],
    triples: &[ArithTriple],
) -> Result<Vec<u64>, Error> {
    ring::check_width(width)?;
    gates::mul_with(party, task, width, x, y, triples).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        testing::{on_servers, open_arith, open_bool, parties, split_arith, split_bool},
    };

    /// Runs less-than, product and mux once over the whole batch and once per element.
    async fn batch_matches_single(config: Config) -> Result<(), Error> {
        let parties = parties(config).await?;
        let width = 12;
        let x: Vec<u64> = (0..37).map(|i| (i * 97) % 4096).collect();
        let y: Vec<u64> = (0..37).map(|i| (i * 131 + 5) % 4096).collect();
        let c: Vec<u64> = (0..37).map(|i| (i / 3) % 2).collect();
        let (xb, yb, cb) = (split_bool(&x, width), split_bool(&y, width), split_bool(&c, 1));
        let (xa, ya) = (split_arith(&x, width), split_arith(&y, width));
        let (r0, r1) = on_servers(&parties, move |party| {
            let pick = |s: &(Vec<u64>, Vec<u64>)| if party.rank() == 0 { s.0.clone() } else { s.1.clone() };
            let (xb, yb, cb, xa, ya) = (pick(&xb), pick(&yb), pick(&cb), pick(&xa), pick(&ya));
            async move {
                let mut task = party.task(50)?;
                let mut batched = vec![];
                let mut single = vec![vec![], vec![], vec![]];
                batched.push(less_than(&party, &mut task, width, xb.clone(), yb.clone()).await?);
                batched.push(mul(&party, &mut task, width, xa.clone(), ya.clone()).await?);
                batched.push(mux(&party, &mut task, width, cb.clone(), xb.clone(), yb.clone()).await?);
                for i in 0..xb.len() {
                    single[0].extend(less_than(&party, &mut task, width, vec![xb[i]], vec![yb[i]]).await?);
                    single[1].extend(mul(&party, &mut task, width, vec![xa[i]], vec![ya[i]]).await?);
                    single[2].extend(
                        mux(&party, &mut task, width, vec![cb[i]], vec![xb[i]], vec![yb[i]]).await?,
                    );
                }
                Ok((batched, single))
            }
        })
        .await?;
        let less: Vec<u64> = x.iter().zip(&y).map(|(x, y)| (x < y) as u64).collect();
        let product: Vec<u64> = x.iter().zip(&y).map(|(x, y)| x * y % 4096).collect();
        let picked: Vec<u64> = (0..37).map(|i| if c[i] == 1 { x[i] } else { y[i] }).collect();
        for results in [(&r0.0, &r1.0), (&r0.1, &r1.1)] {
            assert_eq!(open_bool(&results.0[0], &results.1[0]), less);
            assert_eq!(open_arith(&results.0[1], &results.1[1], width), product);
            assert_eq!(open_bool(&results.0[2], &results.1[2]), picked);
        }
        Ok(())
    }

    #[tokio::test]
    async fn sub_batches_in_parallel() -> Result<(), Error> {
        batch_matches_single(Config::default().with_batch_size(8)).await
    }

    #[tokio::test]
    async fn sub_batches_on_one_task() -> Result<(), Error> {
        batch_matches_single(Config::default().with_batch_size(5).with_parallelism(false)).await
    }

    #[tokio::test]
    async fn single_batch_without_simd() -> Result<(), Error> {
        batch_matches_single(Config::default().with_batch_size(0).with_simd(false)).await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_op_keeps_input_order() -> Result<(), Error> {
        let parties = parties(Config::default().with_batch_size(3)).await?;
        let width = 10;
        let x: Vec<u64> = (0..11).map(|i| i * 91 % 1024).collect();
        let y: Vec<u64> = (0..11).map(|i| (i * 37 + 400) % 1024).collect();
        let c: Vec<u64> = (0..11).map(|i| i % 2).collect();
        let (xb, yb, cb) = (split_bool(&x, width), split_bool(&y, width), split_bool(&c, 1));
        let (xa, ya) = (split_arith(&x, width), split_arith(&y, width));
        let (r0, r1) = on_servers(&parties, move |party| {
            let pick = |s: &(Vec<u64>, Vec<u64>)| if party.rank() == 0 { s.0.clone() } else { s.1.clone() };
            let (xb, yb, cb, xa, ya) = (pick(&xb), pick(&yb), pick(&cb), pick(&xa), pick(&ya));
            async move {
                let mut task = party.task(51)?;
                let mut out = vec![];
                for (op, operands) in [
                    (Op::And, Operands::binary(xb.clone(), yb.clone())),
                    (Op::Or, Operands::binary(xb.clone(), yb.clone())),
                    (Op::Mul, Operands::binary(xa.clone(), ya.clone())),
                    (Op::ArithLessThan, Operands::binary(xa.clone(), ya.clone())),
                    (Op::Mux, Operands::select(cb.clone(), xb.clone(), yb.clone())),
                    (Op::ArithMux, Operands::select(cb.clone(), xa.clone(), ya.clone())),
                    (Op::ArithToBool, Operands::unary(xa.clone())),
                    (Op::BoolToArith, Operands::unary(xb.clone())),
                    (Op::Equal, Operands::binary(xb.clone(), xb.clone())),
                    (Op::ArithEqual, Operands::binary(xa.clone(), ya.clone())),
                ] {
                    out.push(run(&party, &mut task, op, width, operands).await?);
                }
                Ok(out)
            }
        })
        .await?;
        let zip = |f: fn(u64, u64) -> u64| -> Vec<u64> { x.iter().zip(&y).map(|(x, y)| f(*x, *y)).collect() };
        assert_eq!(open_bool(&r0[0], &r1[0]), zip(|x, y| x & y));
        assert_eq!(open_bool(&r0[1], &r1[1]), zip(|x, y| x | y));
        assert_eq!(open_arith(&r0[2], &r1[2], width), zip(|x, y| x * y % 1024));
        let signed_lt: Vec<u64> = x
            .iter()
            .zip(&y)
            .map(|(x, y)| ring::sign_bit(ring::sub(*x, *y, width), width) as u64)
            .collect();
        assert_eq!(open_bool(&r0[3], &r1[3]), signed_lt);
        let picked: Vec<u64> = (0..11).map(|i| if c[i] == 1 { x[i] } else { y[i] }).collect();
        assert_eq!(open_bool(&r0[4], &r1[4]), picked);
        assert_eq!(open_arith(&r0[5], &r1[5], width), picked);
        assert_eq!(open_bool(&r0[6], &r1[6]), x);
        assert_eq!(open_arith(&r0[7], &r1[7], width), x);
        assert_eq!(open_bool(&r0[8], &r1[8]), vec![1; 11]);
        assert_eq!(open_bool(&r0[9], &r1[9]), zip(|x, y| (x == y) as u64));
        Ok(())
    }

    #[tokio::test]
    async fn repeated_batches_reuse_lanes() -> Result<(), Error> {
        // 28 task bits leave 15 lanes to fork, far fewer than the calls below need in total
        let config = Config::default().with_batch_size(1).with_task_tag_bits(28);
        let parties = parties(config).await?;
        let width = 16;
        let x: Vec<u64> = (0..20).map(|i| i * 1000 + 7).collect();
        let y: Vec<u64> = (0..20).map(|i| i * 3 + 1).collect();
        let (xa, ya) = (split_arith(&x, width), split_arith(&y, width));
        let (r0, r1) = on_servers(&parties, move |party| {
            let (x, y) = if party.rank() == 0 {
                (xa.0.clone(), ya.0.clone())
            } else {
                (xa.1.clone(), ya.1.clone())
            };
            async move {
                let mut task = party.task(54)?;
                let mut out = mul(&party, &mut task, width, x.clone(), y.clone()).await?;
                for _ in 1..30 {
                    out = mul(&party, &mut task, width, x.clone(), y.clone()).await?;
                }
                assert_eq!(task.available_lanes(), 15);
                Ok(out)
            }
        })
        .await?;
        let expected: Vec<u64> = x.iter().zip(&y).map(|(x, y)| x * y % (1 << width)).collect();
        assert_eq!(open_arith(&r0, &r1, width), expected);
        Ok(())
    }

    #[tokio::test]
    async fn precomputed_triples_must_match() -> Result<(), Error> {
        let parties = parties(Config::default()).await?;
        let (x, y) = (vec![0b1100, 0b1010, 0b1111], vec![0b1010, 0b0110, 0b0001]);
        let (xb, yb) = (split_bool(&x, 4), split_bool(&y, 4));
        let (r0, r1) = on_servers(&parties, move |party| {
            let (x, y) = if party.rank() == 0 {
                (xb.0.clone(), yb.0.clone())
            } else {
                (xb.1.clone(), yb.1.clone())
            };
            async move {
                let mut task = party.task(52)?;
                let triples = bool_triples(&party, &mut task, 4, 3).await?;
                let short = and_with_triples(&party, &mut task, 4, &x, &y, &triples[..2]).await;
                assert!(matches!(short, Err(Error::TripleCountMismatch { expected: 3, actual: 2 })));
                and_with_triples(&party, &mut task, 4, &x, &y, &triples).await
            }
        })
        .await?;
        assert_eq!(open_bool(&r0, &r1), vec![0b1000, 0b0010, 0b0001]);
        Ok(())
    }

    #[tokio::test]
    async fn clients_and_mismatched_operands_are_rejected() -> Result<(), Error> {
        let parties = parties(Config::default()).await?;
        let mut task = parties[0].task(53)?;
        let uneven = run(&parties[0], &mut task, Op::And, 8, Operands::binary(vec![1, 2], vec![3])).await;
        assert!(matches!(uneven, Err(Error::LengthMismatch { expected: 2, actual: 1 })));
        let mut task = parties[2].task(53)?;
        let client = run(&parties[2], &mut task, Op::And, 8, Operands::binary(vec![1], vec![3])).await;
        assert!(matches!(client, Err(Error::WrongRole(2))));
        Ok(())
    }
}
