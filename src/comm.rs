//! Tagged point-to-point messaging on top of a [`Channel`].
//!
//! A [`Comm`] owns one reader and one writer task per peer. Readers decode incoming frames and park
//! their payload in an inbox keyed by `(sender, tag)`, so protocol instances running concurrently
//! under different tags can receive in any order, while every receive of one instance still sees
//! exactly the message sent under its tag.

use std::{
    collections::{HashMap, HashSet},
    pin::pin,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::{
    sync::{Notify, mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tracing::{trace, warn};

use crate::{
    channel::{self, Channel, ErrorKind},
    error::Error,
    party::Stats,
    tag::Tag,
};

/// A message on the wire: the tag it was sent under and its serialized payload.
#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    tag: Tag,
    payload: Vec<u8>,
}

struct Outgoing {
    bytes: Vec<u8>,
    tag: Tag,
    ack: oneshot::Sender<Result<(), String>>,
}

#[derive(Default)]
struct InboxState {
    messages: HashMap<(usize, Tag), Vec<u8>>,
    collisions: HashSet<(usize, Tag)>,
    failed: HashMap<usize, String>,
}

#[derive(Default)]
struct Inbox {
    state: Mutex<InboxState>,
    notify: Notify,
}

impl Inbox {
    fn deliver(&self, from: usize, frame: Frame) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (from, frame.tag);
        if state.messages.contains_key(&key) {
            warn!(from, tag = %frame.tag, "second message for an unconsumed tag");
            state.collisions.insert(key);
        } else {
            state.messages.insert(key, frame.payload);
        }
        drop(state);
        self.notify.notify_waiters();
    }

    fn fail(&self, from: usize, reason: String) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failed
            .insert(from, reason);
        self.notify.notify_waiters();
    }

    fn take(&self, from: usize, tag: Tag) -> Option<Result<Vec<u8>, Error>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.collisions.remove(&(from, tag)) {
            state.messages.remove(&(from, tag));
            return Some(Err(Error::TagCollision(tag)));
        }
        if let Some(msg) = state.messages.remove(&(from, tag)) {
            return Some(Ok(msg));
        }
        state.failed.get(&from).map(|reason| {
            Err(channel::Error::new(tag.to_string(), ErrorKind::RecvError(reason.clone())).into())
        })
    }
}

/// A handle to a message handed to the writer task, see [`Comm::send_async`].
#[derive(Debug)]
#[must_use = "a send handle should be awaited to observe transport errors"]
pub struct SendHandle {
    tag: Tag,
    ack: oneshot::Receiver<Result<(), String>>,
}

impl SendHandle {
    /// Waits until the message has been passed to the underlying channel.
    pub async fn wait(self) -> Result<(), Error> {
        let phase = self.tag.to_string();
        match self.ack.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(channel::Error::new(phase, ErrorKind::SendError(reason)).into()),
            Err(_) => Err(channel::Error::new(phase, ErrorKind::Closed).into()),
        }
    }
}

/// Tagged messaging between the parties of one computation.
pub struct Comm {
    rank: usize,
    parties: usize,
    outgoing: Vec<Option<mpsc::UnboundedSender<Outgoing>>>,
    inbox: Arc<Inbox>,
    tasks: Vec<JoinHandle<()>>,
    recv_timeout: Option<Duration>,
    stats: Arc<Stats>,
}

impl std::fmt::Debug for Comm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comm")
            .field("rank", &self.rank)
            .field("parties", &self.parties)
            .finish()
    }
}

impl Drop for Comm {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Comm {
    /// Starts the reader and writer tasks for all peers of `rank`.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn new<C>(
        channel: C,
        rank: usize,
        parties: usize,
        recv_timeout: Option<Duration>,
        stats: Arc<Stats>,
    ) -> Self
    where
        C: Channel + Send + Sync + 'static,
    {
        let channel = Arc::new(channel);
        let inbox = Arc::new(Inbox::default());
        let mut outgoing = Vec::with_capacity(parties);
        let mut tasks = Vec::with_capacity(2 * parties);
        for peer in 0..parties {
            if peer == rank {
                outgoing.push(None);
                continue;
            }
            let (tx, rx) = mpsc::unbounded_channel();
            outgoing.push(Some(tx));
            tasks.push(tokio::spawn(write_loop(Arc::clone(&channel), peer, rx)));
            tasks.push(tokio::spawn(read_loop(
                Arc::clone(&channel),
                peer,
                Arc::clone(&inbox),
            )));
        }
        Self {
            rank,
            parties,
            outgoing,
            inbox,
            tasks,
            recv_timeout,
            stats,
        }
    }

    /// The rank of this party.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// The number of parties connected by this comm.
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// The rank of the other compute party.
    pub fn other_server(&self) -> Result<usize, Error> {
        match self.rank {
            0 => Ok(1),
            1 => Ok(0),
            r => Err(Error::WrongRole(r)),
        }
    }

    /// Serializes `msg` and queues it for `to` without waiting for the transport.
    pub fn send_async(&self, to: usize, tag: Tag, msg: &impl Serialize) -> Result<SendHandle, Error> {
        let phase = tag.to_string();
        let payload = bincode::serialize(msg)
            .map_err(|e| channel::Error::new(&phase, ErrorKind::SerdeError(format!("{e:?}"))))?;
        let bytes = bincode::serialize(&Frame { tag, payload })
            .map_err(|e| channel::Error::new(&phase, ErrorKind::SerdeError(format!("{e:?}"))))?;
        let sender = self
            .outgoing
            .get(to)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidRank(to))?;
        self.stats.record_message(bytes.len());
        trace!(from = self.rank, to, %tag, size = bytes.len(), "queueing message");
        let (ack_tx, ack_rx) = oneshot::channel();
        sender
            .send(Outgoing {
                bytes,
                tag,
                ack: ack_tx,
            })
            .map_err(|_| channel::Error::new(&phase, ErrorKind::Closed))?;
        Ok(SendHandle { tag, ack: ack_rx })
    }

    /// Sends `msg` to `to` under `tag`.
    pub async fn send_to(&self, to: usize, tag: Tag, msg: &impl Serialize) -> Result<(), Error> {
        self.send_async(to, tag, msg)?.wait().await
    }

    /// Receives the message sent by `from` under `tag`.
    pub async fn recv_from<T: DeserializeOwned>(&self, from: usize, tag: Tag) -> Result<T, Error> {
        if from >= self.parties || from == self.rank {
            return Err(Error::InvalidRank(from));
        }
        let bytes = match self.recv_timeout {
            Some(limit) => timeout(limit, self.wait_for(from, tag))
                .await
                .map_err(|_| {
                    channel::Error::new(tag.to_string(), ErrorKind::RecvError("timeout".into()))
                })??,
            None => self.wait_for(from, tag).await?,
        };
        bincode::deserialize(&bytes).map_err(|e| {
            channel::Error::new(tag.to_string(), ErrorKind::SerdeError(format!("{e:?}"))).into()
        })
    }

    /// Receives a Vec from `from` under `tag` and checks its length.
    pub async fn recv_vec_from<T: DeserializeOwned>(
        &self,
        from: usize,
        tag: Tag,
        len: usize,
    ) -> Result<Vec<T>, Error> {
        let v: Vec<T> = self.recv_from(from, tag).await?;
        if v.len() == len {
            Ok(v)
        } else {
            Err(channel::Error::new(tag.to_string(), ErrorKind::InvalidLength).into())
        }
    }

    /// Sends `msg` to `peer` and receives the peer's message under the same tag.
    pub async fn exchange<T: Serialize + DeserializeOwned>(
        &self,
        peer: usize,
        tag: Tag,
        msg: &T,
    ) -> Result<T, Error> {
        let sent = self.send_async(peer, tag, msg)?;
        let received = self.recv_from(peer, tag).await?;
        sent.wait().await?;
        Ok(received)
    }

    /// Like [`Comm::exchange`] for a Vec, checking the length of the received Vec.
    pub async fn exchange_vec<T: Serialize + DeserializeOwned>(
        &self,
        peer: usize,
        tag: Tag,
        msg: &Vec<T>,
    ) -> Result<Vec<T>, Error> {
        let sent = self.send_async(peer, tag, msg)?;
        let received = self.recv_vec_from(peer, tag, msg.len()).await?;
        sent.wait().await?;
        Ok(received)
    }

    /// Sends `msg` to the other compute party.
    pub async fn server_send(&self, tag: Tag, msg: &impl Serialize) -> Result<(), Error> {
        self.send_to(self.other_server()?, tag, msg).await
    }

    /// Receives a message from the other compute party.
    pub async fn server_recv<T: DeserializeOwned>(&self, tag: Tag) -> Result<T, Error> {
        self.recv_from(self.other_server()?, tag).await
    }

    async fn wait_for(&self, from: usize, tag: Tag) -> Result<Vec<u8>, Error> {
        loop {
            let mut notified = pin!(self.inbox.notify.notified());
            notified.as_mut().enable();
            if let Some(result) = self.inbox.take(from, tag) {
                return result;
            }
            notified.await;
        }
    }
}

async fn write_loop<C: Channel>(
    channel: Arc<C>,
    peer: usize,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(Outgoing { bytes, tag, ack }) = rx.recv().await {
        let phase = tag.to_string();
        let result = channel
            .send_bytes_to(peer, bytes, &phase)
            .await
            .map_err(|e| format!("{e:?}"));
        let failed = result.is_err();
        // the sender of a fire-and-forget message may have dropped its handle
        let _ = ack.send(result);
        if failed {
            break;
        }
    }
}

async fn read_loop<C: Channel>(channel: Arc<C>, peer: usize, inbox: Arc<Inbox>) {
    loop {
        let bytes = match channel.recv_bytes_from(peer, "frame").await {
            Ok(bytes) => bytes,
            Err(e) => {
                inbox.fail(peer, format!("{e:?}"));
                break;
            }
        };
        match bincode::deserialize::<Frame>(&bytes) {
            Ok(frame) => inbox.deliver(peer, frame),
            Err(e) => {
                inbox.fail(peer, format!("malformed frame: {e:?}"));
                break;
            }
        }
    }
}
