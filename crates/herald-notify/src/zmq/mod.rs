//! ZeroMQ transport.
//!
//! Best-effort delivery over one cached socket per service. `push` services
//! get a PUSH socket and never reply; `reply` services get a REQ socket and
//! answer every message with exactly one message. A directive with
//! `wait_for_reply = false` still completes the exchange but yields no reply.
//!
//! Send and receive failures are logged and reported as "no reply". The
//! failed socket is evicted and closed so the next notification reconnects;
//! a REQ socket that missed its reply cannot send again.

mod socket;

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use herald_core::{Notify, Process, ServicesConfig};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error};

pub use self::socket::{NotifySocket, SocketFactory, ZmqSocketFactory};
use crate::{
    error::{NotifyError, Result},
    message::Payload,
    registry::NotifyProvider,
};

fn default_receive_timeout() -> u64 {
    30_000
}

/// Messaging pattern of a ZeroMQ service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketType {
    /// One-way PUSH socket.
    Push,
    /// REQ socket; every send is followed by one receive.
    Reply,
}

/// Per-service ZeroMQ settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ZeromqSettings {
    /// Messaging pattern.
    #[serde(rename = "type")]
    pub socket_type: SocketType,

    /// Endpoint to connect to, e.g. `tcp://127.0.0.1:5555`.
    pub address: String,

    /// Milliseconds to wait for a reply.
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_ms: u64,
}

impl ZeromqSettings {
    /// Reads the ZeroMQ settings of `service`.
    pub fn for_service(services: &ServicesConfig, service: &str) -> Result<Self> {
        let config =
            services.get(service).ok_or_else(|| NotifyError::unconfigured_service(service))?;
        config.settings().map_err(|e| NotifyError::invalid_settings(service, e.to_string()))
    }
}

type SharedSocket = Arc<Mutex<Box<dyn NotifySocket>>>;

/// ZeroMQ transport with one socket per service.
#[derive(Debug)]
pub struct ZeromqProvider {
    services: Arc<ServicesConfig>,
    factory: Arc<dyn SocketFactory>,
    sockets: Mutex<HashMap<String, SharedSocket>>,
}

impl ZeromqProvider {
    /// Creates a transport that connects sockets through `factory`.
    pub fn new(services: Arc<ServicesConfig>, factory: Arc<dyn SocketFactory>) -> Self {
        Self { services, factory, sockets: Mutex::new(HashMap::new()) }
    }

    /// Number of cached sockets.
    pub async fn socket_count(&self) -> usize {
        self.sockets.lock().await.len()
    }

    async fn socket(&self, service: &str, settings: &ZeromqSettings) -> Result<SharedSocket> {
        let mut sockets = self.sockets.lock().await;
        if let Some(socket) = sockets.get(service) {
            return Ok(socket.clone());
        }

        let socket = Arc::new(Mutex::new(self.factory.connect(settings).await?));
        debug!(service, address = %settings.address, "connected ZeroMQ socket");
        sockets.insert(service.to_string(), socket.clone());
        Ok(socket)
    }

    async fn evict(&self, service: &str, socket: &SharedSocket) {
        let mut sockets = self.sockets.lock().await;
        if sockets.get(service).is_some_and(|cached| Arc::ptr_eq(cached, socket)) {
            sockets.remove(service);
        }
        drop(sockets);

        socket.lock().await.close().await;
    }

    async fn exchange(
        socket: &SharedSocket,
        settings: &ZeromqSettings,
        body: Bytes,
    ) -> Result<Option<Value>> {
        // REQ sockets must alternate send and receive.
        let mut socket = socket.lock().await;
        socket.send(body).await?;

        if settings.socket_type == SocketType::Push {
            return Ok(None);
        }

        let frame = tokio::time::timeout(
            Duration::from_millis(settings.receive_timeout_ms),
            socket.receive(),
        )
        .await
        .map_err(|_| NotifyError::timeout(settings.receive_timeout_ms))??;

        Ok(Some(Value::String(String::from_utf8_lossy(&frame).into_owned())))
    }

    /// Closes every cached socket.
    pub async fn shutdown(&self) {
        let sockets: Vec<_> = self.sockets.lock().await.drain().collect();
        for (service, socket) in sockets {
            socket.lock().await.close().await;
            debug!(service = %service, "closed ZeroMQ socket");
        }
    }
}

#[async_trait::async_trait]
impl NotifyProvider for ZeromqProvider {
    async fn notify(&self, process: &Process, directive: &Notify) -> Result<Option<Value>> {
        let service = directive.service.as_str();
        let settings = ZeromqSettings::for_service(&self.services, service)?;
        let payload = Payload::for_directive(process, directive)?;

        let socket = match self.socket(service, &settings).await {
            Ok(socket) => socket,
            Err(e) => {
                error!(service, error = %e, "failed to connect ZeroMQ socket");
                return Ok(None);
            },
        };

        match Self::exchange(&socket, &settings, payload.to_bytes()).await {
            Ok(reply) => {
                // The REQ receive still ran, so the socket stays usable.
                let reply = reply.filter(|_| directive.wait_for_reply != Some(false));
                debug!(
                    service,
                    process = %process.id,
                    replied = reply.is_some(),
                    "sent notification"
                );
                Ok(reply)
            },
            Err(e) => {
                error!(service, error = %e, "ZeroMQ notification failed");
                self.evict(service, &socket).await;
                Ok(None)
            },
        }
    }

    async fn shutdown(&self) {
        ZeromqProvider::shutdown(self).await;
    }
}

#[cfg(test)]
mod tests {
    use herald_core::ServiceConfig;
    use serde_json::json;

    use super::*;

    #[test]
    fn reply_settings_parsed() {
        let services = ServicesConfig::new().with_service(
            "reply",
            ServiceConfig::new("zeromq")
                .with("type", json!("reply"))
                .with("address", json!("tcp://127.0.0.1:5555")),
        );

        let settings = ZeromqSettings::for_service(&services, "reply").unwrap();
        assert_eq!(settings.socket_type, SocketType::Reply);
        assert_eq!(settings.receive_timeout_ms, 30_000);
    }

    #[test]
    fn unknown_socket_type_rejected() {
        let services = ServicesConfig::new().with_service(
            "pub",
            ServiceConfig::new("zeromq")
                .with("type", json!("publish"))
                .with("address", json!("tcp://127.0.0.1:5555")),
        );

        let error = ZeromqSettings::for_service(&services, "pub").unwrap_err();
        assert!(matches!(error, NotifyError::InvalidSettings { .. }));
    }
}
