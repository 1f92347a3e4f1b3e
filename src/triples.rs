//! Beaver multiplication triples and the strategies producing them.

mod fixed;
pub(crate) mod generator;
pub(crate) mod store;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    comm::Comm,
    config::{Config, TripleStrategy},
    error::Error,
    party::{OtLink, Party},
    ring,
    tag::{BACKGROUND_ARITH_TASK, BACKGROUND_BOOL_TASK, Task},
};

use self::{fixed::FixedTable, store::TripleStore};

/// One party's share of an arithmetic triple `c = a * b mod 2^width`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArithTriple {
    /// Share of `a`.
    pub a: u64,
    /// Share of `b`.
    pub b: u64,
    /// Share of `c`.
    pub c: u64,
}

/// One party's share of a word of independent boolean triples `c_i = a_i & b_i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolTriple {
    /// Share of `a`.
    pub a: u64,
    /// Share of `b`.
    pub b: u64,
    /// Share of `c`.
    pub c: u64,
}

impl ArithTriple {
    /// Reduces the triple to a narrower ring, which keeps `c = a * b` intact.
    pub fn truncate(self, width: u32) -> Self {
        Self {
            a: ring::ring(self.a, width),
            b: ring::ring(self.b, width),
            c: ring::ring(self.c, width),
        }
    }
}

impl BoolTriple {
    /// Drops all bit triples above `width`.
    pub fn truncate(self, width: u32) -> Self {
        Self {
            a: ring::ring(self.a, width),
            b: ring::ring(self.b, width),
            c: ring::ring(self.c, width),
        }
    }
}

/// Where the gates of a compute party take their triples from.
pub(crate) enum TripleSource {
    Jit,
    Background {
        arith: Arc<TripleStore<ArithTriple>>,
        boolean: Arc<TripleStore<BoolTriple>>,
        chunk: usize,
    },
    Fixed(FixedTable),
}

impl TripleSource {
    pub(crate) async fn new(config: &Config, comm: &Comm, task: &mut Task) -> Result<Self, Error> {
        match config.triple_strategy {
            TripleStrategy::Jit => Ok(TripleSource::Jit),
            TripleStrategy::Background => {
                let capacity = config.max_queued_triples.max(1);
                Ok(TripleSource::Background {
                    arith: Arc::new(TripleStore::new(capacity)),
                    boolean: Arc::new(TripleStore::new(capacity)),
                    chunk: config.background_chunk.clamp(1, capacity),
                })
            }
            TripleStrategy::Fixed => {
                if cfg!(any(test, feature = "insecure-fixed-triples")) {
                    warn!("using the insecure fixed triple table");
                    Ok(TripleSource::Fixed(FixedTable::toss(comm, task).await?))
                } else {
                    Err(Error::UnsupportedStrategy(
                        "fixed triples require the insecure-fixed-triples feature",
                    ))
                }
            }
        }
    }

    /// Spawns the background producers, one per triple kind.
    pub(crate) fn start_producers(&self, party: &Party) -> Result<Vec<JoinHandle<()>>, Error> {
        let TripleSource::Background {
            arith,
            boolean,
            chunk,
        } = self
        else {
            return Ok(vec![]);
        };
        let tags = party.tags();
        let arith_task = tags.open_reserved(BACKGROUND_ARITH_TASK)?;
        let bool_task = tags.open_reserved(BACKGROUND_BOOL_TASK)?;
        let link = party.ot_link()?;
        Ok(vec![
            tokio::spawn(produce(
                link.clone(),
                Arc::clone(arith),
                arith_task,
                *chunk,
                |link, task, n| Box::pin(async move { generator::arith(&link, task, 64, n).await }),
            )),
            tokio::spawn(produce(
                link,
                Arc::clone(boolean),
                bool_task,
                *chunk,
                |link, task, n| Box::pin(async move { generator::boolean(&link, task, 64, n).await }),
            )),
        ])
    }

    pub(crate) async fn arith(
        &self,
        party: &Party,
        task: &mut Task,
        width: u32,
        n: usize,
    ) -> Result<Vec<ArithTriple>, Error> {
        match self {
            TripleSource::Jit => generator::arith(&party.ot_link()?, task, width, n).await,
            TripleSource::Background { arith, .. } => Ok(take_queued(party, task, arith, n)
                .await?
                .into_iter()
                .map(|t| t.truncate(width))
                .collect()),
            TripleSource::Fixed(table) => Ok(table.arith(party.rank(), task.next_tag()?, width, n)),
        }
    }

    pub(crate) async fn boolean(
        &self,
        party: &Party,
        task: &mut Task,
        width: u32,
        n: usize,
    ) -> Result<Vec<BoolTriple>, Error> {
        match self {
            TripleSource::Jit => generator::boolean(&party.ot_link()?, task, width, n).await,
            TripleSource::Background { boolean, .. } => Ok(take_queued(party, task, boolean, n)
                .await?
                .into_iter()
                .map(|t| t.truncate(width))
                .collect()),
            TripleSource::Fixed(table) => {
                Ok(table.boolean(party.rank(), task.next_tag()?, width, n))
            }
        }
    }
}

/// Takes `n` queued triples, with rank 0 deciding which positions of the sequence to use.
async fn take_queued<T>(
    party: &Party,
    task: &mut Task,
    store: &TripleStore<T>,
    n: usize,
) -> Result<Vec<T>, Error> {
    let tag = task.next_tag()?;
    let start = if party.rank() == 0 {
        let start = store.reserve(n);
        party.comm().send_to(1, tag, &start).await?;
        start
    } else {
        party.comm().recv_from(0, tag).await?
    };
    store.take(start, n).await
}

type Generate<T> = fn(
    OtLink,
    &mut Task,
    usize,
) -> std::pin::Pin<Box<dyn Future<Output = Result<Vec<T>, Error>> + Send + '_>>;

/// Keeps `store` filled until the producer is aborted or generation fails.
async fn produce<T>(
    link: OtLink,
    store: Arc<TripleStore<T>>,
    mut task: Task,
    chunk: usize,
    generate: Generate<T>,
) {
    let rank = link.comm.rank();
    loop {
        if store.wait_for_room(chunk).await.is_err() {
            break;
        }
        match generate(link.clone(), &mut task, chunk).await {
            Ok(triples) => {
                debug!(rank, size = triples.len(), "queued background triples");
                store.push(triples);
            }
            Err(e) => {
                warn!(rank, "background triple producer failed: {e}");
                store.stop();
                break;
            }
        }
    }
}
