//! Tags that keep concurrently running protocol instances apart on one channel.
//!
//! Every message carries a [`Tag`] made of three parts:
//!
//! - the task id, chosen by the caller (or reserved for internal protocols),
//! - the lane, which separates sub-batches forked from one task that run concurrently,
//! - the sequence number, incremented for every message sent within a lane.
//!
//! Messages exchanged with a client use a dedicated lane with one sequence counter per client, as
//! clients only take part in sharing and reconstruction.
//!
//! Both compute parties run the same control flow, so they assign identical tags to matching
//! messages as long as every [`Task`] cursor is advanced sequentially. Forks are only allowed on
//! the root cursor of a task, which keeps the lane numbering deterministic on both sides.

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Task id of the background producer for arithmetic triples.
pub(crate) const BACKGROUND_ARITH_TASK: u32 = 0;
/// Task id of the background producer for boolean triples.
pub(crate) const BACKGROUND_BOOL_TASK: u32 = 1;
/// Task id of the base OTs run on connection setup.
pub(crate) const BASE_OT_TASK: u32 = 2;
/// Task id of the coin tossing run on connection setup.
pub(crate) const COIN_TOSS_TASK: u32 = 3;
/// The first task id available to callers.
pub const FIRST_USER_TASK: u32 = 4;
/// The lane carrying the messages exchanged with clients.
pub(crate) const CLIENT_LANE: u32 = u32::MAX;

/// The composite key under which a message is sent and received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    /// The id of the task the message belongs to.
    pub task: u32,
    /// The concurrently running sub-batch of the task.
    pub lane: u32,
    /// The position of the message within the lane.
    pub seq: u32,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.task, self.lane, self.seq)
    }
}

impl Tag {
    pub(crate) fn to_bytes(self) -> [u8; 12] {
        let mut bytes = [0; 12];
        bytes[..4].copy_from_slice(&self.task.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.lane.to_le_bytes());
        bytes[8..].copy_from_slice(&self.seq.to_le_bytes());
        bytes
    }
}

/// Hands out task cursors and rejects ids that would alias a live task.
#[derive(Debug)]
pub struct TagAllocator {
    bits: u32,
    live: Mutex<HashSet<u32>>,
}

impl TagAllocator {
    /// Creates an allocator for task ids below `2^bits`.
    pub fn new(bits: u32) -> Result<Arc<Self>, Error> {
        if !(1..=31).contains(&bits) {
            return Err(Error::InvalidConfig {
                key: "task_tag_bits",
                value: bits.to_string(),
            });
        }
        Ok(Arc::new(Self {
            bits,
            live: Mutex::new(HashSet::new()),
        }))
    }

    /// Opens the root cursor of a caller-chosen task.
    ///
    /// # Errors
    ///
    /// Fails if the id is reserved, does not fit into the task tag bits, or belongs to a task that
    /// is still live.
    pub fn open(self: &Arc<Self>, task: u32) -> Result<Task, Error> {
        if task < FIRST_USER_TASK {
            return Err(Error::ReservedTaskId(task));
        }
        self.register(task)
    }

    pub(crate) fn open_reserved(self: &Arc<Self>, task: u32) -> Result<Task, Error> {
        debug_assert!(task < FIRST_USER_TASK);
        self.register(task)
    }

    /// Returns true if a cursor for the task is still alive.
    pub fn is_live(&self, task: u32) -> bool {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&task)
    }

    fn register(self: &Arc<Self>, task: u32) -> Result<Task, Error> {
        if task >> self.bits != 0 {
            return Err(Error::TaskIdOutOfRange {
                task,
                bits: self.bits,
            });
        }
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if !live.insert(task) {
            return Err(Error::TaskInUse(task));
        }
        Ok(Task {
            id: task,
            lane: 0,
            seq: 0,
            next_lane: 1,
            max_lanes: 1u64 << (32 - self.bits),
            idle: BTreeMap::new(),
            client_seqs: BTreeMap::new(),
            _guard: Arc::new(LiveTask {
                task,
                allocator: Arc::clone(self),
            }),
        })
    }
}

#[derive(Debug)]
struct LiveTask {
    task: u32,
    allocator: Arc<TagAllocator>,
}

impl Drop for LiveTask {
    fn drop(&mut self) {
        self.allocator
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.task);
    }
}

/// A cursor handing out the tags of one lane of a task.
///
/// The task id stays reserved until the root cursor and all its forks are dropped.
#[derive(Debug)]
pub struct Task {
    id: u32,
    lane: u32,
    seq: u32,
    next_lane: u64,
    max_lanes: u64,
    /// Lanes whose forks were joined, with the sequence number to resume from.
    idle: BTreeMap<u32, u32>,
    client_seqs: BTreeMap<usize, u32>,
    _guard: Arc<LiveTask>,
}

impl Task {
    /// The task id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the tag for the next message of this lane.
    pub fn next_tag(&mut self) -> Result<Tag, Error> {
        let tag = Tag {
            task: self.id,
            lane: self.lane,
            seq: self.seq,
        };
        self.seq = self
            .seq
            .checked_add(1)
            .ok_or(Error::TagSpaceExhausted(self.id))?;
        Ok(tag)
    }

    /// Returns the tag for the next message exchanged with the client `client`.
    pub fn client_tag(&mut self, client: usize) -> Result<Tag, Error> {
        let seq = self.client_seqs.entry(client).or_insert(0);
        let tag = Tag {
            task: self.id,
            lane: CLIENT_LANE,
            seq: *seq,
        };
        *seq = seq.checked_add(1).ok_or(Error::TagSpaceExhausted(self.id))?;
        Ok(tag)
    }

    /// Whether this cursor may fork into concurrent lanes.
    pub fn can_fork(&self) -> bool {
        self.lane == 0
    }

    /// The number of lanes a fork of this cursor can still use.
    pub fn available_lanes(&self) -> usize {
        if !self.can_fork() {
            return 0;
        }
        let fresh = self.max_lanes.saturating_sub(self.next_lane);
        usize::try_from(fresh)
            .unwrap_or(usize::MAX)
            .saturating_add(self.idle.len())
    }

    /// Creates `n` cursors on lanes of the same task.
    ///
    /// Lanes given back with [`Task::join`] are used first, in ascending order, and continue
    /// their message sequence. Only then are fresh lanes opened.
    ///
    /// # Errors
    ///
    /// Fails if the task has run out of lanes. Forking a forked cursor returns
    /// [`Error::TagSpaceExhausted`] as well, callers should check [`Task::can_fork`] first.
    pub fn fork(&mut self, n: usize) -> Result<Vec<Task>, Error> {
        if n > self.available_lanes() {
            return Err(Error::TagSpaceExhausted(self.id));
        }
        let mut lanes = Vec::with_capacity(n);
        while lanes.len() < n {
            match self.idle.pop_first() {
                Some(lane) => lanes.push(lane),
                None => {
                    lanes.push((self.next_lane as u32, 0));
                    self.next_lane += 1;
                }
            }
        }
        Ok(lanes
            .into_iter()
            .map(|(lane, seq)| Task {
                id: self.id,
                lane,
                seq,
                next_lane: 0,
                max_lanes: 0,
                idle: BTreeMap::new(),
                client_seqs: BTreeMap::new(),
                _guard: Arc::clone(&self._guard),
            })
            .collect())
    }

    /// Takes back forks whose messages have all been exchanged, so later forks can reuse their
    /// lanes. Cursors of other tasks and the root cursor itself are ignored.
    pub fn join(&mut self, forks: impl IntoIterator<Item = Task>) {
        for fork in forks {
            if fork.id == self.id && fork.lane != self.lane {
                self.idle.insert(fork.lane, fork.seq);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_sequential() -> Result<(), Error> {
        let tags = TagAllocator::new(8)?;
        let mut task = tags.open(7)?;
        let a = task.next_tag()?;
        let b = task.next_tag()?;
        assert_eq!(a, Tag { task: 7, lane: 0, seq: 0 });
        assert_eq!(b, Tag { task: 7, lane: 0, seq: 1 });
        Ok(())
    }

    #[test]
    fn rejects_live_and_reserved_ids() -> Result<(), Error> {
        let tags = TagAllocator::new(8)?;
        let task = tags.open(9)?;
        assert!(matches!(tags.open(9), Err(Error::TaskInUse(9))));
        assert!(matches!(tags.open(BASE_OT_TASK), Err(Error::ReservedTaskId(_))));
        assert!(matches!(
            tags.open(256),
            Err(Error::TaskIdOutOfRange { task: 256, bits: 8 })
        ));
        drop(task);
        assert!(!tags.is_live(9));
        tags.open(9)?;
        Ok(())
    }

    #[test]
    fn forks_use_fresh_lanes() -> Result<(), Error> {
        let tags = TagAllocator::new(8)?;
        let mut root = tags.open(5)?;
        let mut forks = root.fork(3)?;
        let lanes: Vec<u32> = forks.iter_mut().map(|t| t.next_tag().unwrap().lane).collect();
        assert_eq!(lanes, vec![1, 2, 3]);
        assert_eq!(root.fork(1)?[0].lane, 4);
        assert!(!forks[0].can_fork());
        assert!(forks[0].fork(1).is_err());
        drop(root);
        assert!(tags.is_live(5));
        drop(forks);
        assert!(!tags.is_live(5));
        Ok(())
    }

    #[test]
    fn client_lane_counts_per_client() -> Result<(), Error> {
        let tags = TagAllocator::new(8)?;
        let mut task = tags.open(6)?;
        task.next_tag()?;
        assert_eq!(task.client_tag(2)?, Tag { task: 6, lane: CLIENT_LANE, seq: 0 });
        assert_eq!(task.client_tag(3)?.seq, 0);
        assert_eq!(task.client_tag(2)?.seq, 1);
        assert_eq!(task.next_tag()?.seq, 1);
        Ok(())
    }

    #[test]
    fn joined_lanes_are_reused() -> Result<(), Error> {
        // 30 task bits leave 4 lanes, the root lane and three forks
        let tags = TagAllocator::new(30)?;
        let mut root = tags.open(12)?;
        for round in 0..100 {
            assert_eq!(root.available_lanes(), 3);
            let mut forks = root.fork(3)?;
            let first = forks[0].next_tag()?;
            assert_eq!(first.lane, 1);
            assert_eq!(first.seq, round);
            root.join(forks);
        }
        let mut forks = root.fork(2)?;
        assert_eq!(forks[0].next_tag()?, Tag { task: 12, lane: 1, seq: 100 });
        assert_eq!(forks[1].next_tag()?, Tag { task: 12, lane: 2, seq: 0 });
        assert_eq!(root.available_lanes(), 1);
        assert!(matches!(root.fork(2), Err(Error::TagSpaceExhausted(12))));
        Ok(())
    }

    #[test]
    fn lanes_are_bounded_by_tag_bits() -> Result<(), Error> {
        // 31 task bits leave 2 lanes, the root lane and one fork
        let tags = TagAllocator::new(31)?;
        let mut root = tags.open(100)?;
        root.fork(1)?;
        assert!(matches!(root.fork(1), Err(Error::TagSpaceExhausted(100))));
        Ok(())
    }
}
