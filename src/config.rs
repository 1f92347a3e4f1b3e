//! Read-only settings of a computation run.

use std::{env, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// How Beaver triples are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripleStrategy {
    /// Generate triples inline, right before the gate that consumes them.
    Jit,
    /// Generate triples in a background task that feeds a bounded queue.
    Background,
    /// Take triples from a small public table. Insecure, for tests only.
    Fixed,
}

impl FromStr for TripleStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jit" => Ok(TripleStrategy::Jit),
            "background" => Ok(TripleStrategy::Background),
            "fixed" => Ok(TripleStrategy::Fixed),
            _ => Err(Error::InvalidConfig {
                key: "triple_strategy",
                value: s.to_string(),
            }),
        }
    }
}

/// The configuration of a [`crate::Party`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// How Beaver triples are produced.
    pub triple_strategy: TripleStrategy,
    /// Number of instances per sub-batch of a batch operator, `0` disables splitting.
    pub batch_size: usize,
    /// Run the sub-batches of a batch operator on the thread pool.
    pub intra_operator_parallelism: bool,
    /// Use the vectorized XOR/AND kernels.
    pub enable_simd: bool,
    /// Number of bits of the task id space.
    pub task_tag_bits: u32,
    /// Upper bound of pre-generated triples held by the background queue, per triple kind.
    pub max_queued_triples: usize,
    /// Number of triples generated per round of the background producer.
    pub background_chunk: usize,
    /// Timeout of a single receive, `None` waits forever.
    pub recv_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            triple_strategy: TripleStrategy::Jit,
            batch_size: 1024,
            intra_operator_parallelism: true,
            enable_simd: true,
            task_tag_bits: 16,
            max_queued_triples: 10_000,
            background_chunk: 256,
            recv_timeout: None,
        }
    }
}

impl Config {
    /// Sets the triple strategy.
    pub fn with_triple_strategy(mut self, strategy: TripleStrategy) -> Self {
        self.triple_strategy = strategy;
        self
    }

    /// Sets the sub-batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enables or disables running sub-batches in parallel.
    pub fn with_parallelism(mut self, enabled: bool) -> Self {
        self.intra_operator_parallelism = enabled;
        self
    }

    /// Enables or disables the vectorized kernels.
    pub fn with_simd(mut self, enabled: bool) -> Self {
        self.enable_simd = enabled;
        self
    }

    /// Sets the number of task id bits.
    pub fn with_task_tag_bits(mut self, bits: u32) -> Self {
        self.task_tag_bits = bits;
        self
    }

    /// Sets the bound of the background triple queue.
    pub fn with_max_queued_triples(mut self, max: usize) -> Self {
        self.max_queued_triples = max;
        self
    }

    /// Sets the number of triples generated per round of the background producer.
    pub fn with_background_chunk(mut self, chunk: usize) -> Self {
        self.background_chunk = chunk;
        self
    }

    /// Sets the timeout of a single receive.
    pub fn with_recv_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.recv_timeout = timeout;
        self
    }

    /// Reads the defaults, overridden by `DUET_*` environment variables.
    ///
    /// Recognized variables are `DUET_TRIPLE_STRATEGY`, `DUET_BATCH_SIZE`, `DUET_PARALLELISM`,
    /// `DUET_SIMD`, `DUET_TASK_TAG_BITS`, `DUET_MAX_QUEUED_TRIPLES`, `DUET_BACKGROUND_CHUNK` and
    /// `DUET_RECV_TIMEOUT_MS`, where `0` disables the timeout.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Config::default();
        if let Some(v) = lookup("DUET_TRIPLE_STRATEGY") {
            config.triple_strategy = v.parse()?;
        }
        if let Some(v) = lookup("DUET_BATCH_SIZE") {
            config.batch_size = parse("batch_size", &v)?;
        }
        if let Some(v) = lookup("DUET_PARALLELISM") {
            config.intra_operator_parallelism = parse("intra_operator_parallelism", &v)?;
        }
        if let Some(v) = lookup("DUET_SIMD") {
            config.enable_simd = parse("enable_simd", &v)?;
        }
        if let Some(v) = lookup("DUET_TASK_TAG_BITS") {
            config.task_tag_bits = parse("task_tag_bits", &v)?;
        }
        if let Some(v) = lookup("DUET_MAX_QUEUED_TRIPLES") {
            config.max_queued_triples = parse("max_queued_triples", &v)?;
        }
        if let Some(v) = lookup("DUET_BACKGROUND_CHUNK") {
            config.background_chunk = parse("background_chunk", &v)?;
        }
        if let Some(v) = lookup("DUET_RECV_TIMEOUT_MS") {
            let millis: u64 = parse("recv_timeout", &v)?;
            config.recv_timeout = (millis > 0).then(|| Duration::from_millis(millis));
        }
        Ok(config)
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, Error> {
    value.trim().parse().map_err(|_| Error::InvalidConfig {
        key,
        value: value.to_string(),
    })
}
