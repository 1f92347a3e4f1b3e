//! Helpers for running the compute parties of a three-party computation in unit tests.

use std::future::Future;

use rand::Rng;

use crate::{channel::SimpleChannel, config::Config, error::Error, party::Party, ring};

/// Connects two compute parties and one client over an in-memory channel mesh.
pub(crate) async fn parties(config: Config) -> Result<Vec<Party>, Error> {
    let handles: Vec<_> = SimpleChannel::channels(3)
        .into_iter()
        .enumerate()
        .map(|(rank, channel)| {
            let config = config.clone();
            tokio::spawn(async move { Party::connect(channel, rank, 3, config).await })
        })
        .collect();
    let mut parties = Vec::with_capacity(3);
    for handle in handles {
        parties.push(handle.await??);
    }
    Ok(parties)
}

/// Runs `f` on both compute parties concurrently and returns their results by rank.
pub(crate) async fn on_servers<F, Fut, T>(parties: &[Party], f: F) -> Result<(T, T), Error>
where
    F: Fn(Party) -> Fut,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
    T: Send + 'static,
{
    let a = tokio::spawn(f(parties[0].clone()));
    let b = tokio::spawn(f(parties[1].clone()));
    Ok((a.await??, b.await??))
}

/// Splits `values` into XOR shares.
pub(crate) fn split_bool(values: &[u64], width: u32) -> (Vec<u64>, Vec<u64>) {
    let mut rng = rand::rng();
    values
        .iter()
        .map(|v| {
            let r = ring::ring(rng.random(), width);
            (r, r ^ ring::ring(*v, width))
        })
        .unzip()
}

/// Splits `values` into additive shares.
pub(crate) fn split_arith(values: &[u64], width: u32) -> (Vec<u64>, Vec<u64>) {
    let mut rng = rand::rng();
    values
        .iter()
        .map(|v| {
            let r = ring::ring(rng.random(), width);
            (r, ring::sub(*v, r, width))
        })
        .unzip()
}

pub(crate) fn open_bool(a: &[u64], b: &[u64]) -> Vec<u64> {
    a.iter().zip(b).map(|(a, b)| a ^ b).collect()
}

pub(crate) fn open_arith(a: &[u64], b: &[u64], width: u32) -> Vec<u64> {
    a.iter().zip(b).map(|(a, b)| ring::add(*a, *b, width)).collect()
}
