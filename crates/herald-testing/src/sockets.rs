//! Scripted ZeroMQ sockets.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use herald_notify::{
    zmq::{NotifySocket, SocketFactory, ZeromqSettings},
    NotifyError, Result,
};

/// Scripted answer to a receive.
#[derive(Debug, Clone)]
pub enum SocketReply {
    /// Returns this frame.
    Frame(Bytes),
    /// Fails the receive.
    Fail(String),
    /// Never completes.
    Hang,
}

impl SocketReply {
    /// Text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Frame(Bytes::from(text.into()))
    }
}

/// Everything the sockets observed.
#[derive(Debug, Clone, Default)]
pub struct SocketLog {
    /// Addresses of connected sockets, in connection order.
    pub connects: Vec<String>,
    /// Sent messages by address.
    pub sent: Vec<(String, Bytes)>,
    /// Number of closed sockets.
    pub closed: usize,
}

#[derive(Debug, Default)]
struct SocketState {
    log: SocketLog,
    replies: VecDeque<SocketReply>,
    fail_connect: bool,
    fail_send: bool,
}

/// Socket factory whose sockets follow a shared script.
#[derive(Debug, Clone, Default)]
pub struct MockSocketFactory {
    state: Arc<Mutex<SocketState>>,
}

impl MockSocketFactory {
    /// Creates a factory with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SocketState) -> T) -> T {
        f(&mut self.state.lock().unwrap_or_else(|p| p.into_inner()))
    }

    /// Queues the answer to the next receive on any socket.
    pub fn push_reply(&self, reply: SocketReply) {
        self.with_state(|state| state.replies.push_back(reply));
    }

    /// Refuses new connections.
    pub fn fail_connections(&self, fail: bool) {
        self.with_state(|state| state.fail_connect = fail);
    }

    /// Fails every send.
    pub fn fail_sends(&self, fail: bool) {
        self.with_state(|state| state.fail_send = fail);
    }

    /// Snapshot of the socket log.
    pub fn log(&self) -> SocketLog {
        self.with_state(|state| state.log.clone())
    }
}

#[async_trait::async_trait]
impl SocketFactory for MockSocketFactory {
    async fn connect(&self, settings: &ZeromqSettings) -> Result<Box<dyn NotifySocket>> {
        let address = settings.address.clone();
        self.with_state(|state| {
            if state.fail_connect {
                return Err(NotifyError::connection("connection refused"));
            }
            state.log.connects.push(address.clone());
            Ok(())
        })?;

        Ok(Box::new(MockSocket { address, factory: self.clone(), closed: false }))
    }
}

#[derive(Debug)]
struct MockSocket {
    address: String,
    factory: MockSocketFactory,
    closed: bool,
}

#[async_trait::async_trait]
impl NotifySocket for MockSocket {
    async fn send(&mut self, body: Bytes) -> Result<()> {
        if self.closed {
            return Err(NotifyError::socket("socket is closed"));
        }

        let address = self.address.clone();
        self.factory.with_state(|state| {
            if state.fail_send {
                return Err(NotifyError::socket("send failed"));
            }
            state.log.sent.push((address, body));
            Ok(())
        })
    }

    async fn receive(&mut self) -> Result<Bytes> {
        let next = self.factory.with_state(|state| state.replies.pop_front());
        match next {
            Some(SocketReply::Frame(frame)) => Ok(frame),
            Some(SocketReply::Fail(message)) => Err(NotifyError::socket(message)),
            Some(SocketReply::Hang) | None => futures::future::pending().await,
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.factory.with_state(|state| state.log.closed += 1);
        }
    }
}
