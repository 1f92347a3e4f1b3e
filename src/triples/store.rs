//! The bounded queue between a background triple producer and the gates consuming its triples.
//!
//! Both compute parties produce the same sequence of triples, so a triple is identified by its
//! position in that sequence. Rank 0 reserves the positions a gate will consume and tells rank 1
//! which ones it took. Concurrent gates may therefore consume ranges out of order, the queue keeps
//! a hole for every triple that is not consumed yet.

use std::{
    collections::VecDeque,
    pin::pin,
    sync::{Mutex, PoisonError},
};

use tokio::sync::Notify;

use crate::error::Error;

struct State<T> {
    /// Position of `buf[0]` in the sequence.
    base: u64,
    buf: VecDeque<Option<T>>,
    next_reserved: u64,
    stopped: bool,
}

pub(crate) struct TripleStore<T> {
    state: Mutex<State<T>>,
    changed: Notify,
    capacity: usize,
}

impl<T> TripleStore<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                base: 0,
                buf: VecDeque::new(),
                next_reserved: 0,
                stopped: false,
            }),
            changed: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Waits until `n` more triples fit into the queue.
    pub(crate) async fn wait_for_room(&self, n: usize) -> Result<(), Error> {
        self.wait_until(|state| state.buf.len() + n <= self.capacity)
            .await
    }

    /// Appends produced triples, the caller must have waited for room.
    pub(crate) fn push(&self, triples: Vec<T>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.buf.extend(triples.into_iter().map(Some));
        drop(state);
        self.changed.notify_waiters();
    }

    /// Reserves the next `n` positions of the sequence and returns the first one.
    pub(crate) fn reserve(&self, n: usize) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let start = state.next_reserved;
        state.next_reserved += n as u64;
        start
    }

    /// Removes the triples at positions `start..start + n`, waiting for them to be produced.
    ///
    /// Triples are taken as soon as they arrive, which frees room for the producer even if `n`
    /// exceeds the capacity.
    pub(crate) async fn take(&self, start: u64, n: usize) -> Result<Vec<T>, Error> {
        let mut out = Vec::with_capacity(n);
        let mut pos = start;
        let end = start + n as u64;
        while pos < end {
            self.wait_until(|state| state.base + state.buf.len() as u64 > pos)
                .await?;
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let available = (state.base + state.buf.len() as u64).min(end);
            for p in pos..available {
                let idx = (p - state.base) as usize;
                let triple = state.buf[idx].take().ok_or(Error::TripleCountMismatch {
                    expected: n,
                    actual: out.len(),
                })?;
                out.push(triple);
            }
            while let Some(None) = state.buf.front() {
                state.buf.pop_front();
                state.base += 1;
            }
            drop(state);
            self.changed.notify_waiters();
            pos = available;
        }
        Ok(out)
    }

    /// Wakes up all waiters with [`Error::ProducerStopped`].
    pub(crate) fn stop(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stopped = true;
        self.changed.notify_waiters();
    }

    async fn wait_until(&self, ready: impl Fn(&State<T>) -> bool) -> Result<(), Error> {
        loop {
            let mut changed = pin!(self.changed.notified());
            changed.as_mut().enable();
            {
                let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if ready(&state) {
                    return Ok(());
                }
                if state.stopped {
                    return Err(Error::ProducerStopped);
                }
            }
            changed.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    #[tokio::test]
    async fn takes_in_sequence_order() -> Result<(), Error> {
        let store = TripleStore::new(8);
        store.push(vec![0, 1, 2, 3]);
        let first = store.reserve(2);
        let second = store.reserve(2);
        assert_eq!(store.take(second, 2).await?, vec![2, 3]);
        assert_eq!(store.take(first, 2).await?, vec![0, 1]);
        Ok(())
    }

    #[tokio::test]
    async fn consumer_blocks_until_produced() -> Result<(), Error> {
        let store = Arc::new(TripleStore::new(4));
        let consumer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.take(0, 6).await })
        };
        for chunk in [vec![10, 11, 12], vec![13, 14, 15]] {
            store.wait_for_room(chunk.len()).await?;
            store.push(chunk);
        }
        assert_eq!(consumer.await??, vec![10, 11, 12, 13, 14, 15]);
        Ok(())
    }

    #[tokio::test]
    async fn producer_blocks_when_full() -> Result<(), Error> {
        let store = TripleStore::new(2);
        store.push(vec![1, 2]);
        let blocked = tokio::time::timeout(Duration::from_millis(20), store.wait_for_room(1)).await;
        assert!(blocked.is_err());
        store.take(0, 1).await?;
        store.wait_for_room(1).await?;
        Ok(())
    }

    #[tokio::test]
    async fn stopping_wakes_consumers() {
        let store = TripleStore::<u64>::new(2);
        store.stop();
        assert!(matches!(store.take(0, 1).await, Err(Error::ProducerStopped)));
    }
}
