//! # Message Bus
//!
//! Commands arrive as two-frame messages (mode, JSON request) and replies
//! leave as two-frame messages (function code, JSON response).
//!
//! [`ZmqBus`] binds a SUB socket for commands and a PUB socket for replies.
//! [`ChannelBus`] carries the same frames over in-process channels.

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use zeromq::{PubSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

use crate::error::{ModbusError, ModbusResult};

/// An inbound command message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub mode: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Build from raw frames; missing frames read as empty
    pub fn from_frames<I, F>(frames: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: AsRef<[u8]>,
    {
        let mut frames = frames.into_iter();
        let mode = frames
            .next()
            .map(|f| String::from_utf8_lossy(f.as_ref()).into_owned())
            .unwrap_or_default();
        let payload = frames.next().map(|f| f.as_ref().to_vec()).unwrap_or_default();
        Self { mode, payload }
    }
}

/// Two-frame command transport
#[async_trait]
pub trait MessageBus: Send {
    /// Next command, or `None` once the bus is closed
    async fn recv(&mut self) -> ModbusResult<Option<BusMessage>>;

    /// Publish a reply
    async fn send(&mut self, function_code: i64, payload: String) -> ModbusResult<()>;
}

/// ZeroMQ PUB/SUB bus
pub struct ZmqBus {
    sub: SubSocket,
    publisher: PubSocket,
}

impl ZmqBus {
    /// Bind both sockets and subscribe to every topic
    pub async fn bind(sub_endpoint: &str, pub_endpoint: &str) -> ModbusResult<Self> {
        let mut sub = SubSocket::new();
        sub.bind(sub_endpoint)
            .await
            .map_err(|e| ModbusError::bus(format!("bind {}: {}", sub_endpoint, e)))?;
        sub.subscribe("").await?;

        let mut publisher = PubSocket::new();
        publisher
            .bind(pub_endpoint)
            .await
            .map_err(|e| ModbusError::bus(format!("bind {}: {}", pub_endpoint, e)))?;

        info!("bus bound: sub {} pub {}", sub_endpoint, pub_endpoint);
        Ok(Self { sub, publisher })
    }
}

#[async_trait]
impl MessageBus for ZmqBus {
    async fn recv(&mut self) -> ModbusResult<Option<BusMessage>> {
        let msg = self.sub.recv().await?;
        if msg.len() < 2 {
            warn!("received message with {} frame(s)", msg.len());
        }
        Ok(Some(BusMessage::from_frames(msg.into_vec())))
    }

    async fn send(&mut self, function_code: i64, payload: String) -> ModbusResult<()> {
        let mut msg = ZmqMessage::from(function_code.to_string());
        msg.push_back(Bytes::from(payload));
        self.publisher.send(msg).await?;
        Ok(())
    }
}

/// In-process bus
pub struct ChannelBus {
    inbound: mpsc::Receiver<Vec<Vec<u8>>>,
    outbound: mpsc::Sender<(String, String)>,
}

/// Client end of a [`ChannelBus`]
pub struct ChannelClient {
    requests: mpsc::Sender<Vec<Vec<u8>>>,
    replies: mpsc::Receiver<(String, String)>,
}

impl ChannelBus {
    pub fn pair(capacity: usize) -> (ChannelBus, ChannelClient) {
        let (req_tx, req_rx) = mpsc::channel(capacity);
        let (rep_tx, rep_rx) = mpsc::channel(capacity);
        (
            ChannelBus {
                inbound: req_rx,
                outbound: rep_tx,
            },
            ChannelClient {
                requests: req_tx,
                replies: rep_rx,
            },
        )
    }
}

#[async_trait]
impl MessageBus for ChannelBus {
    async fn recv(&mut self) -> ModbusResult<Option<BusMessage>> {
        Ok(self.inbound.recv().await.map(BusMessage::from_frames))
    }

    async fn send(&mut self, function_code: i64, payload: String) -> ModbusResult<()> {
        self.outbound
            .send((function_code.to_string(), payload))
            .await
            .map_err(|_| ModbusError::bus("reply channel closed"))
    }
}

impl ChannelClient {
    /// Send a two-frame command
    pub async fn request(&self, mode: &str, payload: &str) -> ModbusResult<()> {
        self.send_frames(vec![mode.as_bytes().to_vec(), payload.as_bytes().to_vec()])
            .await
    }

    /// Send arbitrary frames
    pub async fn send_frames(&self, frames: Vec<Vec<u8>>) -> ModbusResult<()> {
        debug!("channel bus request with {} frame(s)", frames.len());
        self.requests
            .send(frames)
            .await
            .map_err(|_| ModbusError::bus("request channel closed"))
    }

    /// Next published reply: (function code frame, JSON frame)
    pub async fn reply(&mut self) -> Option<(String, String)> {
        self.replies.recv().await
    }
}
