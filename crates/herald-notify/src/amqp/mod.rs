//! AMQP transport.
//!
//! Publishes notifications to a broker exchange and optionally waits for a
//! correlated reply on a private queue.
//!
//! ```text
//!  notify(process, directive)
//!        │
//!        ├─ channel(service) ── cached per service, connection cached per URL
//!        │
//!        ├─ fire-and-forget ──▶ publish ──▶ None
//!        │
//!        └─ request/reply
//!             ├─ ensure reply consumer (one per service)
//!             ├─ register fingerprint in the reply queue's PendingReplies
//!             ├─ publish with reply_to + message_id = fingerprint
//!             └─ await reply ≤ response timeout ──▶ Some(reply) | timeout error
//! ```
//!
//! The correlation id is the process fingerprint. Every service gets its own
//! private reply queue, declared on its own channel, and pending replies are
//! tracked per reply queue, so directives to different services in one state
//! correlate independently. Two reply requests for the same process state
//! and queue share an id; the second is rejected while the first is pending.

pub mod broker;
pub mod correlation;
pub mod lapin_broker;
pub mod resources;

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use herald_core::{Notify, Process, ServicesConfig};
use serde::Deserialize;
use serde_json::Value;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use self::{
    broker::{
        AmqpChannel, AmqpConnection, AmqpConnector, DeliveryStream, InboundDelivery,
        PublishProperties,
    },
    correlation::PendingReplies,
    lapin_broker::LapinConnector,
    resources::AmqpResources,
};
use crate::{
    error::{NotifyError, Result},
    message::{decode_reply, Payload},
    registry::NotifyProvider,
};

/// Default publishing application id.
pub const DEFAULT_APP_ID: &str = "herald";

/// TTL of messages in the private reply queue.
pub const REPLY_QUEUE_MESSAGE_TTL_MS: u32 = 3_600_000;

fn default_response_timeout() -> u64 {
    30
}

fn default_publish_timeout() -> u64 {
    10_000
}

fn default_persistent() -> bool {
    true
}

fn default_app_id() -> String {
    DEFAULT_APP_ID.to_string()
}

/// Per-service AMQP settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AmqpSettings {
    /// Broker URL.
    pub url: String,

    /// Exchange to publish to; the default exchange when unset.
    #[serde(default)]
    pub exchange: Option<String>,

    /// Routing key; empty when unset.
    #[serde(default)]
    pub routing_key: Option<String>,

    /// Wait for a reply on the transport's private reply queue.
    #[serde(default)]
    pub reply: bool,

    /// Wait for a reply on this queue instead of the private one.
    #[serde(default)]
    pub reply_to: Option<String>,

    /// Seconds to wait for a correlated reply.
    #[serde(default = "default_response_timeout")]
    pub response_timeout_seconds: u64,

    /// Ask the broker to persist messages.
    #[serde(default = "default_persistent")]
    pub persistent: bool,

    /// Milliseconds allowed for the broker to accept a publish.
    #[serde(default = "default_publish_timeout")]
    pub timeout_ms: u64,

    /// Application id stamped on every message.
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Per-message expiration passed to the broker.
    #[serde(default)]
    pub expiration: Option<String>,
}

impl AmqpSettings {
    /// Reads the AMQP settings of `service`.
    ///
    /// # Errors
    ///
    /// Returns `UnconfiguredService` for an unknown service and
    /// `InvalidSettings` when the settings cannot be parsed.
    pub fn for_service(services: &ServicesConfig, service: &str) -> Result<Self> {
        let config =
            services.get(service).ok_or_else(|| NotifyError::unconfigured_service(service))?;
        config.settings().map_err(|e| NotifyError::invalid_settings(service, e.to_string()))
    }

    /// Exchange name, if a non-empty one is configured.
    pub fn exchange(&self) -> Option<&str> {
        self.exchange.as_deref().filter(|e| !e.is_empty())
    }

    /// Whether the service replies when a directive does not say.
    pub fn expects_reply(&self) -> bool {
        self.reply || self.reply_to.is_some()
    }
}

/// AMQP transport with cached broker resources and correlated replies.
#[derive(Debug)]
pub struct AmqpProvider {
    services: Arc<ServicesConfig>,
    resources: AmqpResources,
    pending: Mutex<HashMap<String, Arc<PendingReplies>>>,
    consumers: Mutex<HashMap<String, JoinHandle<()>>>,
    reply_queue_prefix: String,
}

impl AmqpProvider {
    /// Creates a transport that connects through `connector`.
    pub fn new(services: Arc<ServicesConfig>, connector: Arc<dyn AmqpConnector>) -> Self {
        Self {
            services,
            resources: AmqpResources::new(connector),
            pending: Mutex::new(HashMap::new()),
            consumers: Mutex::new(HashMap::new()),
            reply_queue_prefix: format!("reply-{}", Uuid::new_v4().simple()),
        }
    }

    /// Name of the private reply queue of `service` on this transport
    /// instance.
    pub fn private_reply_queue(&self, service: &str) -> String {
        format!("{}-{service}", self.reply_queue_prefix)
    }

    /// Broker resource caches.
    pub fn resources(&self) -> &AmqpResources {
        &self.resources
    }

    /// Replies awaited on `queue`.
    pub async fn pending(&self, queue: &str) -> Arc<PendingReplies> {
        self.pending.lock().await.entry(queue.to_string()).or_default().clone()
    }

    /// Number of replies awaited across all reply queues.
    pub async fn pending_count(&self) -> usize {
        let tables: Vec<_> = self.pending.lock().await.values().cloned().collect();
        let mut count = 0;
        for table in tables {
            count += table.len().await;
        }
        count
    }

    async fn publish(
        &self,
        channel: &Arc<dyn AmqpChannel>,
        settings: &AmqpSettings,
        body: Bytes,
        properties: PublishProperties,
    ) -> Result<()> {
        let exchange = settings.exchange().unwrap_or_default();
        let routing_key = settings.routing_key.as_deref().unwrap_or_default();

        tokio::time::timeout(
            Duration::from_millis(settings.timeout_ms),
            channel.publish(exchange, routing_key, body, properties),
        )
        .await
        .map_err(|_| NotifyError::timeout(settings.timeout_ms))?
    }

    /// Starts the reply consumer for `service` unless it is running and
    /// returns the pending table of `queue`.
    async fn ensure_consumer(
        &self,
        service: &str,
        channel: &Arc<dyn AmqpChannel>,
        queue: &str,
    ) -> Result<Arc<PendingReplies>> {
        let pending = self.pending(queue).await;

        let mut consumers = self.consumers.lock().await;
        if consumers.get(service).is_some_and(|handle| !handle.is_finished()) {
            return Ok(pending);
        }

        if queue == self.private_reply_queue(service) {
            channel.declare_reply_queue(queue).await?;
        }

        let consumer_tag = format!("herald-{service}-{}", Uuid::new_v4().simple());
        let deliveries = channel.consume(queue, &consumer_tag).await?;
        let handle = tokio::spawn(consume_replies(
            service.to_string(),
            channel.clone(),
            deliveries,
            pending.clone(),
        ));
        consumers.insert(service.to_string(), handle);

        info!(service, queue, "started reply consumer");
        Ok(pending)
    }

    #[allow(clippy::too_many_arguments)]
    async fn request_reply(
        &self,
        service: &str,
        pending: &PendingReplies,
        channel: &Arc<dyn AmqpChannel>,
        settings: &AmqpSettings,
        body: Bytes,
        properties: PublishProperties,
        timeout_seconds: u64,
    ) -> Result<Option<Value>> {
        let correlation_id = properties.message_id.clone();

        // A reply may arrive before publish returns.
        let mut receiver = pending.register(&correlation_id).await?;

        if let Err(e) = self.publish(channel, settings, body, properties).await {
            pending.remove(&correlation_id).await;
            return Err(e);
        }

        match tokio::time::timeout(Duration::from_secs(timeout_seconds), &mut receiver).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(_)) => Err(NotifyError::ShutdownRequested),
            Err(_) => {
                if pending.remove(&correlation_id).await {
                    warn!(
                        service,
                        correlation_id = %correlation_id,
                        timeout_seconds,
                        "response timeout exceeded"
                    );
                    return Err(NotifyError::response_timeout(
                        service,
                        correlation_id,
                        timeout_seconds,
                    ));
                }

                // The consumer took the entry as the timer fired.
                receiver.await.map(Some).map_err(|_| NotifyError::ShutdownRequested)
            },
        }
    }

    /// Stops reply consumers, abandons pending replies and closes every
    /// channel and connection.
    pub async fn shutdown(&self) {
        for (_, handle) in self.consumers.lock().await.drain() {
            handle.abort();
        }

        let tables: Vec<_> = self.pending.lock().await.drain().map(|(_, table)| table).collect();
        let mut abandoned = 0;
        for table in tables {
            abandoned += table.abandon_all().await;
        }
        if abandoned > 0 {
            info!(abandoned, "abandoned pending AMQP replies");
        }

        self.resources.close_all().await;
    }
}

#[async_trait::async_trait]
impl NotifyProvider for AmqpProvider {
    async fn notify(&self, process: &Process, directive: &Notify) -> Result<Option<Value>> {
        let service = directive.service.as_str();
        let settings = AmqpSettings::for_service(&self.services, service)?;
        let payload = Payload::for_directive(process, directive)?;
        let channel = self.resources.channel(service, &settings).await?;

        let mut properties = PublishProperties {
            app_id: settings.app_id.clone(),
            message_id: process.fingerprint(),
            content_type: payload.content_type().to_string(),
            timestamp: u64::try_from(Utc::now().timestamp()).unwrap_or_default(),
            persistent: settings.persistent,
            reply_to: None,
            expiration: settings.expiration.clone(),
        };

        if !directive.wait_for_reply.unwrap_or_else(|| settings.expects_reply()) {
            self.publish(&channel, &settings, payload.to_bytes(), properties).await?;
            debug!(service, process = %process.id, "published notification");
            return Ok(None);
        }

        let reply_queue =
            settings.reply_to.clone().unwrap_or_else(|| self.private_reply_queue(service));
        let pending = self.ensure_consumer(service, &channel, &reply_queue).await?;
        properties.reply_to = Some(reply_queue);

        let timeout_seconds = directive.response_timeout.unwrap_or(settings.response_timeout_seconds);
        self.request_reply(
            service,
            &pending,
            &channel,
            &settings,
            payload.to_bytes(),
            properties,
            timeout_seconds,
        )
        .await
    }

    async fn shutdown(&self) {
        AmqpProvider::shutdown(self).await;
    }
}

/// Routes replies on a queue to their waiting callers.
///
/// A reply without a pending entry is rejected without requeueing; a matched
/// reply resolves its caller and is then acknowledged.
async fn consume_replies(
    service: String,
    channel: Arc<dyn AmqpChannel>,
    mut deliveries: DeliveryStream,
    pending: Arc<PendingReplies>,
) {
    while let Some(next) = deliveries.next().await {
        let delivery = match next {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(service = %service, error = %e, "reply consumer failed");
                break;
            },
        };

        let waiter = match delivery.correlation_id.as_deref() {
            Some(correlation_id) => pending.take(correlation_id).await,
            None => None,
        };

        let Some(waiter) = waiter else {
            debug!(
                service = %service,
                correlation_id = delivery.correlation_id.as_deref(),
                "rejecting uncorrelated reply"
            );
            if let Err(e) = channel.reject(delivery.delivery_tag).await {
                warn!(service = %service, error = %e, "failed to reject reply");
            }
            continue;
        };

        let reply = decode_reply(delivery.content_type.as_deref(), &delivery.body);
        if waiter.send(reply).is_err() {
            debug!(service = %service, "reply arrived after its caller stopped waiting");
        }

        if let Err(e) = channel.ack(delivery.delivery_tag).await {
            warn!(service = %service, error = %e, "failed to acknowledge reply");
        }
    }

    debug!(service = %service, "reply consumer stopped");
}
