#![allow(dead_code)]

use std::future::Future;

use duet::{Config, Error, Party, channel::SimpleChannel};
use tracing_subscriber::EnvFilter;

/// The rank of the first client.
pub const CLIENT: usize = 2;

/// Installs a test subscriber filtered by `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Connects `n` parties (two compute parties and `n - 2` clients) over an in-memory mesh.
pub async fn connect_n(n: usize, config: Config) -> Result<Vec<Party>, Error> {
    init_tracing();
    let handles: Vec<_> = SimpleChannel::channels(n)
        .into_iter()
        .enumerate()
        .map(|(rank, channel)| {
            let config = config.clone();
            tokio::spawn(async move { Party::connect(channel, rank, n, config).await })
        })
        .collect();
    let mut parties = vec![];
    for handle in handles {
        parties.push(handle.await??);
    }
    Ok(parties)
}

/// Connects two compute parties and one client.
pub async fn connect(config: Config) -> Result<Vec<Party>, Error> {
    connect_n(3, config).await
}

/// Runs the same program on every party and returns the results by rank.
pub async fn run<F, Fut, T>(parties: &[Party], program: F) -> Result<Vec<T>, Error>
where
    F: Fn(Party) -> Fut,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
    T: Send + 'static,
{
    let handles: Vec<_> = parties
        .iter()
        .cloned()
        .map(|party| tokio::spawn(program(party)))
        .collect();
    let mut results = vec![];
    for handle in handles {
        results.push(handle.await??);
    }
    Ok(results)
}

/// The value a party contributes to [`duet::Secret::with_value`]: `v` on the owner, zero elsewhere.
pub fn input(party: &Party, owner: usize, v: u64) -> u64 {
    if party.rank() == owner { v } else { 0 }
}
