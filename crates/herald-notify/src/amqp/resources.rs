//! Connection and channel caches for the AMQP transport.
//!
//! Connections are shared per broker URL, channels per service. Both live for
//! the lifetime of the transport instance and are closed on shutdown, channels
//! first.

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    broker::{AmqpChannel, AmqpConnection, AmqpConnector},
    AmqpSettings,
};
use crate::error::Result;

/// Owns the broker resources of one AMQP transport.
#[derive(Debug)]
pub struct AmqpResources {
    connector: Arc<dyn AmqpConnector>,
    connections: Mutex<HashMap<String, Arc<dyn AmqpConnection>>>,
    channels: Mutex<HashMap<String, Arc<dyn AmqpChannel>>>,
}

impl AmqpResources {
    /// Creates empty caches backed by `connector`.
    pub fn new(connector: Arc<dyn AmqpConnector>) -> Self {
        Self {
            connector,
            connections: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the connection for `url`, connecting on first use.
    pub async fn connection(&self, url: &str) -> Result<Arc<dyn AmqpConnection>> {
        let mut connections = self.connections.lock().await;
        if let Some(connection) = connections.get(url) {
            return Ok(connection.clone());
        }

        let connection = self.connector.connect(url).await?;
        debug!("opened AMQP connection");
        connections.insert(url.to_string(), connection.clone());
        Ok(connection)
    }

    /// Returns the channel for `service`, opening it on first use.
    ///
    /// Opening a channel declares the service's exchange when one is set.
    pub async fn channel(
        &self,
        service: &str,
        settings: &AmqpSettings,
    ) -> Result<Arc<dyn AmqpChannel>> {
        if let Some(channel) = self.channels.lock().await.get(service) {
            return Ok(channel.clone());
        }

        let connection = self.connection(&settings.url).await?;
        let channel = connection.create_channel().await?;
        if let Some(exchange) = settings.exchange() {
            channel.declare_exchange(exchange).await?;
        }

        let existing = match self.channels.lock().await.entry(service.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(slot) => {
                debug!(service, "opened AMQP channel");
                return Ok(slot.insert(channel).clone());
            },
        };

        // Lost a race with a concurrent first use.
        if let Err(e) = channel.close().await {
            debug!(service, error = %e, "failed to close surplus channel");
        }
        Ok(existing)
    }

    /// Number of cached connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Number of cached channels.
    pub async fn channel_count(&self) -> usize {
        self.channels.lock().await.len()
    }

    /// Closes every channel, then every connection, and empties the caches.
    pub async fn close_all(&self) {
        let channels: Vec<_> = self.channels.lock().await.drain().collect();
        for (service, channel) in channels {
            if let Err(e) = channel.close().await {
                warn!(service = %service, error = %e, "failed to close AMQP channel");
            }
        }

        let connections: Vec<_> = self.connections.lock().await.drain().collect();
        for (_, connection) in connections {
            if let Err(e) = connection.close().await {
                warn!(error = %e, "failed to close AMQP connection");
            }
        }
    }
}
