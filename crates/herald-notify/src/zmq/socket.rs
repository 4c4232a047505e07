//! Socket abstraction for the ZeroMQ transport and its `zeromq` backend.

use std::fmt::{self, Debug};

use bytes::Bytes;
use zeromq::{PushSocket, ReqSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use super::{SocketType, ZeromqSettings};
use crate::error::{NotifyError, Result};

/// Creates connected sockets from service settings.
#[async_trait::async_trait]
pub trait SocketFactory: Send + Sync + Debug {
    /// Connects a socket of the configured type to the configured address.
    async fn connect(&self, settings: &ZeromqSettings) -> Result<Box<dyn NotifySocket>>;
}

/// A connected socket.
#[async_trait::async_trait]
pub trait NotifySocket: Send + Debug {
    /// Sends a single-frame message.
    async fn send(&mut self, body: Bytes) -> Result<()>;

    /// Receives the first frame of the next message.
    async fn receive(&mut self) -> Result<Bytes>;

    /// Closes the socket. Later sends fail.
    async fn close(&mut self);
}

/// Connects sockets with the pure-Rust `zeromq` implementation.
#[derive(Debug, Clone, Default)]
pub struct ZmqSocketFactory;

#[async_trait::async_trait]
impl SocketFactory for ZmqSocketFactory {
    async fn connect(&self, settings: &ZeromqSettings) -> Result<Box<dyn NotifySocket>> {
        let inner = match settings.socket_type {
            SocketType::Push => {
                let mut socket = PushSocket::new();
                socket.connect(&settings.address).await.map_err(connect_error)?;
                ZmqInner::Push(socket)
            },
            SocketType::Reply => {
                let mut socket = ReqSocket::new();
                socket.connect(&settings.address).await.map_err(connect_error)?;
                ZmqInner::Req(socket)
            },
        };

        Ok(Box::new(ZmqSocket { address: settings.address.clone(), inner: Some(inner) }))
    }
}

fn connect_error(error: zeromq::ZmqError) -> NotifyError {
    NotifyError::connection(format!("failed to connect socket: {error}"))
}

enum ZmqInner {
    Push(PushSocket),
    Req(ReqSocket),
}

struct ZmqSocket {
    address: String,
    inner: Option<ZmqInner>,
}

impl Debug for ZmqSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner {
            Some(ZmqInner::Push(_)) => "push",
            Some(ZmqInner::Req(_)) => "req",
            None => "closed",
        };
        f.debug_struct("ZmqSocket").field("address", &self.address).field("kind", &kind).finish()
    }
}

#[async_trait::async_trait]
impl NotifySocket for ZmqSocket {
    async fn send(&mut self, body: Bytes) -> Result<()> {
        let message = ZmqMessage::from(body);
        let sent = match self.inner.as_mut() {
            Some(ZmqInner::Push(socket)) => socket.send(message).await,
            Some(ZmqInner::Req(socket)) => socket.send(message).await,
            None => return Err(NotifyError::socket("socket is closed")),
        };
        sent.map_err(|e| NotifyError::socket(e.to_string()))
    }

    async fn receive(&mut self) -> Result<Bytes> {
        let message = match self.inner.as_mut() {
            Some(ZmqInner::Req(socket)) => {
                socket.recv().await.map_err(|e| NotifyError::socket(e.to_string()))?
            },
            Some(ZmqInner::Push(_)) => {
                return Err(NotifyError::socket("push sockets cannot receive"));
            },
            None => return Err(NotifyError::socket("socket is closed")),
        };

        Ok(message.get(0).cloned().unwrap_or_default())
    }

    async fn close(&mut self) {
        let _errors = match self.inner.take() {
            Some(ZmqInner::Push(socket)) => socket.close().await,
            Some(ZmqInner::Req(socket)) => socket.close().await,
            None => return,
        };
    }
}
