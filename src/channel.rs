//! A communication channel used to send/receive raw messages to/from another party.
//!
//! The [`Channel`] trait is the only transport boundary of this crate: any reliable, ordered,
//! point-to-point transport can implement it. Framing by protocol tags happens one layer above, in
//! [`crate::comm`].

use std::{fmt, future::Future, time::Duration};

use thiserror::Error;
use tokio::{
    sync::{
        Mutex,
        mpsc::{Receiver, Sender, channel, error::SendError},
    },
    time::timeout,
};
use tracing::trace;

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug, Error)]
#[error("{reason} during {phase}")]
pub struct Error {
    /// The protocol phase during which the error occurred.
    pub phase: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// The (serialized) message could not be received over the channel.
    #[error("receive failed: {0}")]
    RecvError(String),
    /// The (serialized) message could not be sent over the channel.
    #[error("send failed: {0}")]
    SendError(String),
    /// The message could not be (de-)serialized.
    #[error("serialization failed: {0}")]
    SerdeError(String),
    /// The message is a Vec, but not of the expected length.
    #[error("message has an invalid length")]
    InvalidLength,
    /// The channel to the party has been closed.
    #[error("channel closed")]
    Closed,
}

impl Error {
    pub(crate) fn new(phase: impl Into<String>, reason: ErrorKind) -> Self {
        Self {
            phase: phase.into(),
            reason,
        }
    }
}

/// A communication channel used to send/receive messages to/from another party.
///
/// Implementations must deliver the messages sent to one party in the order they were sent.
pub trait Channel {
    /// The error that can occur sending messages over the channel.
    type SendError: fmt::Debug;
    /// The error that can occur receiving messages over the channel.
    type RecvError: fmt::Debug;

    /// Sends a message to the party with the given rank.
    fn send_bytes_to(
        &self,
        party: usize,
        msg: Vec<u8>,
        phase: &str,
    ) -> impl Future<Output = Result<(), Self::SendError>> + Send;

    /// Awaits the next message from the party with the given rank.
    fn recv_bytes_from(
        &self,
        party: usize,
        phase: &str,
    ) -> impl Future<Output = Result<Vec<u8>, Self::RecvError>> + Send;
}

/// A simple in-memory channel using [`Sender`] and [`Receiver`].
#[derive(Debug)]
pub struct SimpleChannel {
    s: Vec<Option<Sender<Vec<u8>>>>,
    r: Vec<Option<Mutex<Receiver<Vec<u8>>>>>,
    recv_timeout: Duration,
}

impl SimpleChannel {
    /// Creates channels for N parties to communicate with each other.
    pub fn channels(parties: usize) -> Vec<Self> {
        Self::channels_with_timeout(parties, Duration::from_secs(10 * 60))
    }

    /// Creates channels for N parties whose receives fail after `recv_timeout`.
    pub fn channels_with_timeout(parties: usize, recv_timeout: Duration) -> Vec<Self> {
        let buffer_capacity = 1024;
        let mut channels: Vec<_> = (0..parties)
            .map(|_| SimpleChannel {
                s: (0..parties).map(|_| None).collect(),
                r: (0..parties).map(|_| None).collect(),
                recv_timeout,
            })
            .collect();
        for a in 0..parties {
            for b in (a + 1)..parties {
                let (send_a_to_b, recv_a_to_b) = channel(buffer_capacity);
                let (send_b_to_a, recv_b_to_a) = channel(buffer_capacity);
                channels[a].s[b] = Some(send_a_to_b);
                channels[b].s[a] = Some(send_b_to_a);
                channels[a].r[b] = Some(Mutex::new(recv_b_to_a));
                channels[b].r[a] = Some(Mutex::new(recv_a_to_b));
            }
        }
        channels
    }
}

/// The error raised by `recv` calls of a [`SimpleChannel`].
#[derive(Debug)]
pub enum AsyncRecvError {
    /// The channel has been closed.
    Closed,
    /// No message was received before the timeout.
    TimeoutElapsed,
    /// There is no channel to the given party.
    NoSuchParty(usize),
}

/// The error raised by `send` calls of a [`SimpleChannel`].
#[derive(Debug)]
pub enum AsyncSendError {
    /// The receiving side has been dropped.
    Closed(SendError<Vec<u8>>),
    /// There is no channel to the given party.
    NoSuchParty(usize),
}

impl Channel for SimpleChannel {
    type SendError = AsyncSendError;
    type RecvError = AsyncRecvError;

    async fn send_bytes_to(&self, p: usize, msg: Vec<u8>, phase: &str) -> Result<(), AsyncSendError> {
        trace!(to = p, size = msg.len(), phase, "sending bytes");
        let sender = self
            .s
            .get(p)
            .and_then(Option::as_ref)
            .ok_or(AsyncSendError::NoSuchParty(p))?;
        sender.send(msg).await.map_err(AsyncSendError::Closed)
    }

    async fn recv_bytes_from(&self, p: usize, phase: &str) -> Result<Vec<u8>, AsyncRecvError> {
        let receiver = self
            .r
            .get(p)
            .and_then(Option::as_ref)
            .ok_or(AsyncRecvError::NoSuchParty(p))?;
        let mut receiver = receiver.lock().await;
        match timeout(self.recv_timeout, receiver.recv()).await {
            Ok(Some(bytes)) => {
                trace!(from = p, size = bytes.len(), phase, "received bytes");
                Ok(bytes)
            }
            Ok(None) => Err(AsyncRecvError::Closed),
            Err(_) => Err(AsyncRecvError::TimeoutElapsed),
        }
    }
}
