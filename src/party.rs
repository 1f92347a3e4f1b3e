//! The per-run context of one party.
//!
//! A [`Party`] bundles everything a protocol needs: the rank, the read-only [`Config`], the tagged
//! [`Comm`], the task cursors, the OT session with the other compute party and the source of Beaver
//! triples. It is created once per computation and passed to every operation by reference. Cloning
//! is cheap and yields a handle to the same context.

use std::{
    collections::HashMap,
    ops::{Deref, DerefMut},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    channel::Channel,
    comm::Comm,
    config::{Config, TripleStrategy},
    error::Error,
    ot::OtSession,
    tag::{BASE_OT_TASK, COIN_TOSS_TASK, TagAllocator, Task},
    triples::{ArithTriple, BoolTriple, TripleSource},
};

/// Counters of the work done by a party.
#[derive(Debug, Default)]
pub struct Stats {
    messages: AtomicU64,
    bytes: AtomicU64,
    ots: AtomicU64,
    arith_triples: AtomicU64,
    bool_triples: AtomicU64,
}

/// A point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Messages sent.
    pub messages: u64,
    /// Bytes sent, including framing.
    pub bytes: u64,
    /// Extended OTs run as sender or receiver.
    pub ots: u64,
    /// Arithmetic triples consumed by gates.
    pub arith_triples: u64,
    /// Boolean triple words consumed by gates.
    pub bool_triples: u64,
}

impl Stats {
    pub(crate) fn record_message(&self, bytes: usize) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_ots(&self, n: usize) {
        self.ots.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_arith_triples(&self, n: usize) {
        self.arith_triples.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_bool_triples(&self, n: usize) {
        self.bool_triples.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Reads all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            ots: self.ots.load(Ordering::Relaxed),
            arith_triples: self.arith_triples.load(Ordering::Relaxed),
            bool_triples: self.bool_triples.load(Ordering::Relaxed),
        }
    }
}

struct Inner {
    rank: usize,
    config: Config,
    comm: Arc<Comm>,
    ot: Option<Arc<OtSession>>,
    stats: Arc<Stats>,
    triples: TripleSource,
    tags: Arc<TagAllocator>,
    tasks: Mutex<HashMap<u32, Option<Task>>>,
    producers: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let producers = self.producers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for producer in producers.iter() {
            producer.abort();
        }
    }
}

/// One party of a computation: compute party `0` or `1`, or a client with rank `>= 2`.
#[derive(Clone)]
pub struct Party {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Party")
            .field("rank", &self.inner.rank)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Party {
    /// Connects this party to the others over `channel`.
    ///
    /// Compute parties run the base OTs with each other (and a coin toss for the fixed triple
    /// table), then start the background triple producers if configured. Clients only set up
    /// their message routing. All parties of a computation must call this concurrently.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, the triple strategy is not available in this build,
    /// or the setup messages cannot be exchanged.
    pub async fn connect<C>(
        channel: C,
        rank: usize,
        parties: usize,
        config: Config,
    ) -> Result<Self, Error>
    where
        C: Channel + Send + Sync + 'static,
    {
        if parties < 3 || rank >= parties {
            return Err(Error::InvalidRank(rank));
        }
        let tags = TagAllocator::new(config.task_tag_bits)?;
        let stats = Arc::new(Stats::default());
        let comm = Comm::new(channel, rank, parties, config.recv_timeout, Arc::clone(&stats));
        let (ot, triples) = if rank < 2 {
            let peer = 1 - rank;
            let mut task = tags.open_reserved(BASE_OT_TASK)?;
            let ot = OtSession::setup(&comm, peer, &mut task).await?;
            let mut coin_task = tags.open_reserved(COIN_TOSS_TASK)?;
            let triples =
                TripleSource::new(&config, &comm, &mut coin_task).await?;
            (Some(Arc::new(ot)), triples)
        } else {
            (None, TripleSource::Jit)
        };
        info!(rank, parties, strategy = ?config.triple_strategy, "party connected");
        let party = Party {
            inner: Arc::new(Inner {
                rank,
                config,
                comm: Arc::new(comm),
                ot,
                stats,
                triples,
                tags,
                tasks: Mutex::new(HashMap::new()),
                producers: Mutex::new(vec![]),
            }),
        };
        if rank < 2 && party.inner.config.triple_strategy == TripleStrategy::Background {
            let producers = party.inner.triples.start_producers(&party)?;
            *party
                .inner
                .producers
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = producers;
        }
        Ok(party)
    }

    /// The rank of this party.
    pub fn rank(&self) -> usize {
        self.inner.rank
    }

    /// Whether this party is one of the two compute parties.
    pub fn is_server(&self) -> bool {
        self.inner.rank < 2
    }

    /// The configuration of this run.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The tagged messaging layer.
    pub fn comm(&self) -> &Comm {
        &self.inner.comm
    }

    /// The work counters of this party.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Checks out the cursor of task `id`, opening it on first use.
    ///
    /// The cursor is returned when the lease is dropped, so consecutive operations of one task
    /// continue its message sequence.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TaskInUse`] if another operation currently holds the task.
    pub fn task(&self, id: u32) -> Result<TaskLease, Error> {
        let mut tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let task = match tasks.get_mut(&id) {
            Some(slot) => slot.take().ok_or(Error::TaskInUse(id))?,
            None => {
                let task = self.inner.tags.open(id)?;
                tasks.insert(id, None);
                task
            }
        };
        Ok(TaskLease {
            party: Arc::clone(&self.inner),
            task: Some(task),
        })
    }

    pub(crate) fn ot(&self) -> Result<&OtSession, Error> {
        self.inner.ot.as_deref().ok_or(Error::WrongRole(self.inner.rank))
    }

    /// The pieces needed to run OTs with the other compute party, detached from this context.
    pub(crate) fn ot_link(&self) -> Result<OtLink, Error> {
        let session = self.inner.ot.as_ref().ok_or(Error::WrongRole(self.inner.rank))?;
        Ok(OtLink {
            comm: Arc::clone(&self.inner.comm),
            session: Arc::clone(session),
            stats: Arc::clone(&self.inner.stats),
        })
    }

    /// The rank of the other compute party, fails for clients.
    pub(crate) fn peer(&self) -> Result<usize, Error> {
        self.inner.comm.other_server()
    }

    pub(crate) fn tags(&self) -> &Arc<TagAllocator> {
        &self.inner.tags
    }

    pub(crate) fn stats_handle(&self) -> &Stats {
        &self.inner.stats
    }

    /// Returns `n` arithmetic triples of `width` bits.
    pub(crate) async fn arith_triples(
        &self,
        task: &mut Task,
        width: u32,
        n: usize,
    ) -> Result<Vec<ArithTriple>, Error> {
        let triples = self.inner.triples.arith(self, task, width, n).await?;
        self.inner.stats.record_arith_triples(n);
        Ok(triples)
    }

    /// Returns `n` boolean triple words of `width` bits.
    pub(crate) async fn bool_triples(
        &self,
        task: &mut Task,
        width: u32,
        n: usize,
    ) -> Result<Vec<BoolTriple>, Error> {
        let triples = self.inner.triples.boolean(self, task, width, n).await?;
        self.inner.stats.record_bool_triples(n);
        Ok(triples)
    }
}

/// The messaging layer, OT session and counters of a compute party.
///
/// Background producers hold this instead of a [`Party`], so dropping the last [`Party`] handle
/// drops the context and stops them even while they wait for the peer.
#[derive(Clone)]
pub(crate) struct OtLink {
    pub(crate) comm: Arc<Comm>,
    pub(crate) session: Arc<OtSession>,
    pub(crate) stats: Arc<Stats>,
}

/// A checked-out task cursor, see [`Party::task`].
pub struct TaskLease {
    party: Arc<Inner>,
    task: Option<Task>,
}

impl Deref for TaskLease {
    type Target = Task;

    fn deref(&self) -> &Task {
        self.task.as_ref().unwrap_or_else(|| unreachable!("task is only taken on drop"))
    }
}

impl DerefMut for TaskLease {
    fn deref_mut(&mut self) -> &mut Task {
        self.task.as_mut().unwrap_or_else(|| unreachable!("task is only taken on drop"))
    }
}

impl Drop for TaskLease {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.party
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(task.id(), Some(task));
        }
    }
}
