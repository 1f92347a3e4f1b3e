//! The error type shared by all protocols of this crate.

use thiserror::Error;

use crate::{channel, tag::Tag};

/// Errors raised while running a protocol.
///
/// Misuse errors (invalid widths, mismatched triple counts, reconstructing a correlated value) are
/// raised immediately and are never retried. Transport errors abort the running computation.
#[derive(Debug, Error)]
pub enum Error {
    /// A message could not be sent or received.
    #[error("channel error: {0}")]
    Channel(#[from] channel::Error),
    /// A message arrived for a tag whose previous message was never consumed.
    #[error("tag collision on {0}")]
    TagCollision(Tag),
    /// The task id does not fit into the configured task id space.
    #[error("task id {task} does not fit into {bits} task tag bits")]
    TaskIdOutOfRange {
        /// The requested task id.
        task: u32,
        /// The configured number of task tag bits.
        bits: u32,
    },
    /// The task id is reserved for internal protocols.
    #[error("task id {0} is reserved")]
    ReservedTaskId(u32),
    /// The task id is already used by another live task.
    #[error("task id {0} is already in use")]
    TaskInUse(u32),
    /// A task ran out of lanes or message sequence numbers.
    #[error("tag space of task {0} is exhausted")]
    TagSpaceExhausted(u32),
    /// The share width is not in `1..=64`.
    #[error("invalid share width {0}")]
    InvalidWidth(u32),
    /// The rank does not name a party with the required role.
    #[error("invalid rank {0}")]
    InvalidRank(usize),
    /// Two operands of a batch operator have different lengths.
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// The expected number of elements.
        expected: usize,
        /// The number of elements that was supplied.
        actual: usize,
    },
    /// The number of precomputed triples does not match the number the operator consumes.
    #[error("expected {expected} precomputed triples, got {actual}")]
    TripleCountMismatch {
        /// The number of triples the operator consumes.
        expected: usize,
        /// The number of triples that were supplied.
        actual: usize,
    },
    /// The configured triple strategy cannot be used in this build.
    #[error("unsupported triple strategy: {0}")]
    UnsupportedStrategy(&'static str),
    /// The value is derived from an oblivious transfer and has no reconstructible counterpart.
    #[error("value is a correlated OT output and cannot be reconstructed")]
    NotReconstructible,
    /// The operation is only defined for a compute party or only for a client.
    #[error("operation is not available to rank {0}")]
    WrongRole(usize),
    /// The OT message could not be decoded into a valid group element.
    #[error("invalid OT data")]
    InvalidOtData,
    /// A coin tossing commitment could not be opened.
    #[error("commitment could not be opened")]
    CommitmentCouldNotBeOpened,
    /// The background triple producer has stopped.
    #[error("background triple producer stopped")]
    ProducerStopped,
    /// A spawned sub-task panicked or was cancelled.
    #[error("sub-task failed: {0}")]
    Join(String),
    /// A configuration value could not be parsed.
    #[error("invalid configuration value for {key}: {value}")]
    InvalidConfig {
        /// The configuration key.
        key: &'static str,
        /// The rejected value.
        value: String,
    },
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Join(e.to_string())
    }
}
