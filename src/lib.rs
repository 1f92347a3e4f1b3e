//! Three-party secure computation over secret shares.
//!
//! Two compute parties (ranks `0` and `1`) hold complementary shares of values contributed by
//! clients (ranks `2` and up). Shares are either additive modulo `2^width` or bitwise XOR, for any
//! width from 1 to 64 bits. The compute parties evaluate gates on their shares without learning
//! any plaintext, and open results only to the party that should receive them.
//!
//! ## Main Components
//!
//! * [`Party`]: the per-run context. It connects the parties over a [`channel::Channel`], runs the
//!   base OTs and owns the [`Config`], the task cursors and the source of Beaver triples.
//! * [`Secret`]: handles to shared values ([`ArithSecret`], [`BoolSecret`]) with the gates as
//!   methods, and [`sort()`] for an oblivious bitonic sort.
//! * [`batch`]: the same gates over vectors of shares, split into sub-batches that run
//!   concurrently.
//! * [`comm`]: tagged messages, which let many protocol instances share one channel.
//!
//! Multiplications and ANDs consume Beaver triples, generated from IKNP OT extension on top of
//! Chou-Orlandi base OTs. The [`TripleStrategy`] decides whether they are generated on demand, by
//! a background producer, or taken from an insecure public table (tests only).
//!
//! ## Example
//!
//! ```no_run
//! use duet::{BoolSecret, Config, Error, Party, channel::SimpleChannel};
//!
//! # async fn example() -> Result<(), Error> {
//! let mut handles = vec![];
//! for (rank, channel) in SimpleChannel::channels(3).into_iter().enumerate() {
//!     handles.push(tokio::spawn(async move {
//!         let party = Party::connect(channel, rank, 3, Config::default()).await?;
//!         let x = BoolSecret::new(&party, 8, 4)?.with_value(200).share(2).await?;
//!         let y = BoolSecret::new(&party, 8, 4)?.with_value(200).share(2).await?;
//!         x.less_than(&y).await?.reconstruct(2).await
//!     }));
//! }
//! # Ok(())
//! # }
//! ```
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod batch;
pub mod channel;
pub mod comm;
mod compare;
pub mod config;
mod convert;
pub mod error;
mod gates;
mod ot;
pub mod party;
pub mod ring;
pub mod secret;
mod sort;
pub mod tag;
#[cfg(test)]
mod testing;
pub mod triples;
mod utils;

pub use config::{Config, TripleStrategy};
pub use error::Error;
pub use party::{Party, Stats, StatsSnapshot, TaskLease};
pub use secret::{ArithSecret, BoolSecret, Origin, Secret, sort};
pub use sort::{sort as sort_shares, sort_arith as sort_arith_shares};
pub use tag::{FIRST_USER_TASK, Tag, TagAllocator, Task};
