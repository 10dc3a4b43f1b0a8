//! A communication channel used to send/receive messages to/from another endpoint.
//!
//! Endpoints are addressed by a fixed public index: [`FIRST_PARTY`],
//! [`SECOND_PARTY`] and the correlated-randomness [`DEALER`].

use std::{fmt, future::Future, io, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::mpsc::{Receiver, Sender, channel, error::SendError},
    time::timeout,
};

use crate::exec::Role;

/// Endpoint index of the party holding the [`Role::FirstParty`] role.
pub const FIRST_PARTY: usize = 0;
/// Endpoint index of the party holding the [`Role::SecondParty`] role.
pub const SECOND_PARTY: usize = 1;
/// Endpoint index of the correlated-randomness dealer.
pub const DEALER: usize = 2;

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug, thiserror::Error)]
#[error("channel error during {phase}: {reason}")]
pub struct Error {
    /// The protocol phase during which the error occurred.
    pub phase: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// The (serialized) message could not be received over the channel.
    #[error("recv failed: {0}")]
    RecvError(String),
    /// The (serialized) message could not be sent over the channel.
    #[error("send failed: {0}")]
    SendError(String),
    /// The message could not be (de-)serialized.
    #[error("serde failed: {0}")]
    SerdeError(String),
    /// The message is a Vec, but not of the expected length.
    #[error("message has an unexpected length")]
    InvalidLength,
}

/// A communication channel used to send/receive messages to/from other endpoints.
pub trait Channel: Send {
    /// The error that can occur sending messages over the channel.
    type SendError: fmt::Debug;
    /// The error that can occur receiving messages over the channel.
    type RecvError: fmt::Debug;

    /// Sends a message to the endpoint with the given index.
    fn send_bytes_to(
        &mut self,
        endpoint: usize,
        msg: Vec<u8>,
    ) -> impl Future<Output = Result<(), Self::SendError>> + Send;

    /// Awaits a response from the endpoint with the given index.
    fn recv_bytes_from(
        &mut self,
        endpoint: usize,
    ) -> impl Future<Output = Result<Vec<u8>, Self::RecvError>> + Send;
}

/// A wrapper around [`Channel`] that takes care of (de-)serializing messages.
#[derive(Debug)]
pub(crate) struct MsgChannel<C: Channel>(pub C);

impl<C: Channel> MsgChannel<C> {
    /// Serializes and sends a protocol message to the given endpoint.
    pub(crate) async fn send_to(
        &mut self,
        endpoint: usize,
        phase: &str,
        msg: &impl Serialize,
    ) -> Result<(), Error> {
        let msg = bincode::serialize(msg).map_err(|e| Error {
            phase: format!("sending {phase}"),
            reason: ErrorKind::SerdeError(format!("{e:?}")),
        })?;
        self.0
            .send_bytes_to(endpoint, msg)
            .await
            .map_err(|e| Error {
                phase: phase.to_string(),
                reason: ErrorKind::SendError(format!("{e:?}")),
            })
    }

    /// Receives and deserializes a protocol message from the given endpoint.
    pub(crate) async fn recv_from<T: DeserializeOwned>(
        &mut self,
        endpoint: usize,
        phase: &str,
    ) -> Result<T, Error> {
        let msg = self.0.recv_bytes_from(endpoint).await.map_err(|e| Error {
            phase: phase.to_string(),
            reason: ErrorKind::RecvError(format!("{e:?}")),
        })?;
        bincode::deserialize(&msg).map_err(|e| Error {
            phase: format!("receiving {phase}"),
            reason: ErrorKind::SerdeError(format!("{e:?}")),
        })
    }

    /// Receives and deserializes a Vec from the given endpoint (while checking the length).
    pub(crate) async fn recv_vec_from<T: DeserializeOwned>(
        &mut self,
        endpoint: usize,
        phase: &str,
        len: usize,
    ) -> Result<Vec<T>, Error> {
        let v: Vec<T> = self.recv_from(endpoint, phase).await?;
        if v.len() == len {
            Ok(v)
        } else {
            Err(Error {
                phase: phase.to_string(),
                reason: ErrorKind::InvalidLength,
            })
        }
    }
}

/// A simple in-process channel using [`Sender`] and [`Receiver`].
#[derive(Debug)]
pub struct SimpleChannel {
    s: Vec<Option<Sender<Vec<u8>>>>,
    r: Vec<Option<Receiver<Vec<u8>>>>,
}

impl SimpleChannel {
    /// Creates channels for N endpoints to communicate with each other.
    pub fn channels(endpoints: usize) -> Vec<Self> {
        let buffer_capacity = 1024;
        let mut channels = vec![];
        for _ in 0..endpoints {
            let mut s = vec![];
            let mut r = vec![];
            for _ in 0..endpoints {
                s.push(None);
                r.push(None);
            }
            channels.push(SimpleChannel { s, r });
        }
        for a in 0..endpoints {
            for b in 0..endpoints {
                if a == b {
                    continue;
                }
                let (send_a_to_b, recv_a_to_b) = channel(buffer_capacity);
                let (send_b_to_a, recv_b_to_a) = channel(buffer_capacity);
                channels[a].s[b] = Some(send_a_to_b);
                channels[b].s[a] = Some(send_b_to_a);
                channels[a].r[b] = Some(recv_b_to_a);
                channels[b].r[a] = Some(recv_a_to_b);
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
}

impl Channel for SimpleChannel {
    type SendError = SendError<Vec<u8>>;
    type RecvError = AsyncRecvError;

    async fn send_bytes_to(&mut self, p: usize, msg: Vec<u8>) -> Result<(), SendError<Vec<u8>>> {
        self.s[p]
            .as_ref()
            .unwrap_or_else(|| panic!("No sender for endpoint {p}"))
            .send(msg)
            .await
    }

    async fn recv_bytes_from(&mut self, p: usize) -> Result<Vec<u8>, AsyncRecvError> {
        let msg = self.r[p]
            .as_mut()
            .unwrap_or_else(|| panic!("No receiver for endpoint {p}"))
            .recv();
        match timeout(Duration::from_secs(10 * 60), msg).await {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => Err(AsyncRecvError::Closed),
            Err(_) => Err(AsyncRecvError::TimeoutElapsed),
        }
    }
}

/// A channel between the run's endpoints using length-prefixed frames over TCP.
///
/// One stream per remote endpoint, established once per run and torn down at
/// the end of the run or on fatal failure.
#[derive(Debug)]
pub struct TcpChannel {
    streams: Vec<Option<TcpStream>>,
}

impl TcpChannel {
    /// Establishes the channels for one party of the protocol.
    ///
    /// The [`Role::FirstParty`] listens on `server_addr` for the second
    /// party, the [`Role::SecondParty`] connects to it. Both parties connect
    /// to the dealer endpoint at `dealer_addr`.
    pub async fn connect_party(
        role: Role,
        server_addr: impl ToSocketAddrs,
        dealer_addr: impl ToSocketAddrs,
    ) -> io::Result<Self> {
        let mut streams: Vec<Option<TcpStream>> = vec![None, None, None];
        let peer = match role {
            Role::FirstParty => {
                let listener = TcpListener::bind(server_addr).await?;
                let (mut stream, _) = listener.accept().await?;
                let id = stream.read_u8().await?;
                if id as usize != SECOND_PARTY {
                    return Err(io::Error::other(format!(
                        "expected the second party to connect, got endpoint id {id}"
                    )));
                }
                stream
            }
            Role::SecondParty => {
                let mut stream = TcpStream::connect(server_addr).await?;
                stream.write_u8(SECOND_PARTY as u8).await?;
                stream
            }
        };
        streams[role.peer().index()] = Some(peer);
        let mut dealer = TcpStream::connect(dealer_addr).await?;
        dealer.write_u8(role.index() as u8).await?;
        streams[DEALER] = Some(dealer);
        Ok(TcpChannel { streams })
    }

    /// Establishes the channels for the dealer endpoint: listens on `addr`
    /// and accepts a connection from each of the two parties.
    pub async fn bind_dealer(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let mut streams: Vec<Option<TcpStream>> = vec![None, None, None];
        for _ in 0..2 {
            let (mut stream, _) = listener.accept().await?;
            let id = stream.read_u8().await? as usize;
            if id >= DEALER || streams[id].is_some() {
                return Err(io::Error::other(format!(
                    "unexpected endpoint id {id} connecting to the dealer"
                )));
            }
            streams[id] = Some(stream);
        }
        Ok(TcpChannel { streams })
    }

    fn stream(&mut self, p: usize) -> io::Result<&mut TcpStream> {
        self.streams
            .get_mut(p)
            .and_then(|s| s.as_mut())
            .ok_or_else(|| io::Error::other(format!("No stream for endpoint {p}")))
    }
}

impl Channel for TcpChannel {
    type SendError = io::Error;
    type RecvError = io::Error;

    async fn send_bytes_to(&mut self, p: usize, msg: Vec<u8>) -> io::Result<()> {
        let stream = self.stream(p)?;
        stream.write_u32(msg.len() as u32).await?;
        stream.write_all(&msg).await?;
        stream.flush().await
    }

    async fn recv_bytes_from(&mut self, p: usize) -> io::Result<Vec<u8>> {
        let stream = self.stream(p)?;
        let len = stream.read_u32().await? as usize;
        let mut msg = vec![0; len];
        stream.read_exact(&mut msg).await?;
        Ok(msg)
    }
}
