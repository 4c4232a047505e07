//! Broker abstraction for the AMQP transport.
//!
//! The transport talks to the broker through these traits so that caching,
//! correlation and timeout behavior can be exercised without a running broker.
//! The production implementation lives in [`super::lapin_broker`].

use std::{fmt::Debug, sync::Arc};

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::Result;

/// Metadata attached to every published notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishProperties {
    /// Publishing application.
    pub app_id: String,
    /// Message id; the process fingerprint.
    pub message_id: String,
    /// MIME type of the body.
    pub content_type: String,
    /// Publish time in unix seconds.
    pub timestamp: u64,
    /// Whether the broker should persist the message.
    pub persistent: bool,
    /// Queue the service should reply to.
    pub reply_to: Option<String>,
    /// Per-message TTL as understood by the broker.
    pub expiration: Option<String>,
}

/// Message received on a reply queue.
#[derive(Debug, Clone)]
pub struct InboundDelivery {
    /// Channel-scoped tag used to acknowledge the message.
    pub delivery_tag: u64,
    /// Correlation id linking the reply to its request.
    pub correlation_id: Option<String>,
    /// MIME type of the body.
    pub content_type: Option<String>,
    /// Raw body.
    pub body: Bytes,
}

/// Stream of messages from a queue consumer.
pub type DeliveryStream = BoxStream<'static, Result<InboundDelivery>>;

/// Opens broker connections.
#[async_trait::async_trait]
pub trait AmqpConnector: Send + Sync + Debug {
    /// Connects to the broker at `url`.
    async fn connect(&self, url: &str) -> Result<Arc<dyn AmqpConnection>>;
}

/// An open broker connection.
#[async_trait::async_trait]
pub trait AmqpConnection: Send + Sync + Debug {
    /// Opens a new channel on this connection.
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>>;

    /// Closes the connection.
    async fn close(&self) -> Result<()>;
}

/// An open channel.
#[async_trait::async_trait]
pub trait AmqpChannel: Send + Sync + Debug {
    /// Declares a durable direct exchange.
    async fn declare_exchange(&self, exchange: &str) -> Result<()>;

    /// Declares a private reply queue: exclusive, auto-deleting, with a
    /// bounded message TTL.
    async fn declare_reply_queue(&self, queue: &str) -> Result<()>;

    /// Publishes a message and waits for the broker to accept it.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Bytes,
        properties: PublishProperties,
    ) -> Result<()>;

    /// Starts a manually acknowledged consumer on `queue`.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    /// Acknowledges a delivery.
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// Negatively acknowledges a delivery without requeueing it.
    async fn reject(&self, delivery_tag: u64) -> Result<()>;

    /// Closes the channel.
    async fn close(&self) -> Result<()>;
}
