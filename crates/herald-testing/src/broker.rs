//! In-memory AMQP broker.
//!
//! Implements the transport's broker traits and records every operation.
//! Replies are pushed into reply-queue consumers either by a scripted
//! responder, invoked on each publish, or explicitly through
//! [`MockBroker::deliver`]. Like a real broker, an exclusive reply queue
//! belongs to the connection that declared it first.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use bytes::Bytes;
use herald_notify::{
    amqp::{
        AmqpChannel, AmqpConnection, AmqpConnector, DeliveryStream, InboundDelivery,
        PublishProperties,
    },
    NotifyError, Result,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};

/// A message accepted by the broker.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    /// Target exchange; empty for the default exchange.
    pub exchange: String,
    /// Routing key.
    pub routing_key: String,
    /// Raw body.
    pub body: Bytes,
    /// Message metadata.
    pub properties: PublishProperties,
}

impl PublishedMessage {
    /// Body decoded as JSON; `Value::Null` when it is not JSON.
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    /// Body as text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A reply to push into a reply queue.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Correlation id; the request's message id to match it.
    pub correlation_id: Option<String>,
    /// MIME type.
    pub content_type: Option<String>,
    /// Raw body.
    pub body: Bytes,
}

impl Reply {
    /// JSON reply correlated to `correlation_id`.
    pub fn json(correlation_id: impl Into<String>, value: &Value) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            content_type: Some("application/json".to_string()),
            body: Bytes::from(value.to_string()),
        }
    }

    /// Text reply correlated to `correlation_id`.
    pub fn text(correlation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            content_type: Some("text/plain".to_string()),
            body: Bytes::from(text.into()),
        }
    }
}

/// Everything the broker observed, in order.
#[derive(Debug, Clone, Default)]
pub struct BrokerLog {
    /// URLs of opened connections.
    pub connections: Vec<String>,
    /// Number of opened channels.
    pub channels_opened: usize,
    /// Declared exchanges.
    pub exchanges: Vec<String>,
    /// Declared private reply queues.
    pub reply_queues: Vec<String>,
    /// Queues consumers were started on.
    pub consumers: Vec<String>,
    /// Accepted publishes.
    pub published: Vec<PublishedMessage>,
    /// Acknowledged delivery tags.
    pub acked: Vec<u64>,
    /// Rejected delivery tags.
    pub rejected: Vec<u64>,
    /// Number of closed channels.
    pub channels_closed: usize,
    /// Number of closed connections.
    pub connections_closed: usize,
}

type Responder = Box<dyn Fn(&PublishedMessage) -> Vec<Reply> + Send + Sync>;
type QueueSender = mpsc::UnboundedSender<Result<InboundDelivery>>;

struct BrokerState {
    log: watch::Sender<BrokerLog>,
    queues: Mutex<HashMap<String, (usize, QueueSender)>>,
    responder: Mutex<Option<Responder>>,
    exclusive_queues: Mutex<HashMap<String, usize>>,
    next_tag: AtomicU64,
    next_channel: AtomicUsize,
    next_connection: AtomicUsize,
    fail_connect: AtomicBool,
    fail_publish: AtomicBool,
    hang_publish: AtomicBool,
}

impl BrokerState {
    fn record(&self, update: impl FnOnce(&mut BrokerLog)) {
        self.log.send_modify(update);
    }

    fn push(&self, queue: &str, reply: Reply) -> Option<u64> {
        let queues = self.queues.lock().unwrap_or_else(|p| p.into_inner());
        let (_, sender) = queues.get(queue)?;

        let delivery_tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        let delivery = InboundDelivery {
            delivery_tag,
            correlation_id: reply.correlation_id,
            content_type: reply.content_type,
            body: reply.body,
        };
        sender.send(Ok(delivery)).ok().map(|()| delivery_tag)
    }
}

/// In-memory broker shared by every connection it opens.
#[derive(Clone)]
pub struct MockBroker {
    state: Arc<BrokerState>,
}

impl std::fmt::Debug for MockBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBroker").field("log", &*self.state.log.borrow()).finish()
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    /// Creates a broker that never replies on its own.
    pub fn new() -> Self {
        let (log, _) = watch::channel(BrokerLog::default());
        Self {
            state: Arc::new(BrokerState {
                log,
                queues: Mutex::new(HashMap::new()),
                responder: Mutex::new(None),
                exclusive_queues: Mutex::new(HashMap::new()),
                next_tag: AtomicU64::new(0),
                next_channel: AtomicUsize::new(0),
                next_connection: AtomicUsize::new(0),
                fail_connect: AtomicBool::new(false),
                fail_publish: AtomicBool::new(false),
                hang_publish: AtomicBool::new(false),
            }),
        }
    }

    /// Answers every publish that carries `reply_to` with the replies the
    /// closure returns, delivered in order to that queue.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&PublishedMessage) -> Vec<Reply> + Send + Sync + 'static,
    {
        *self.state.responder.lock().unwrap_or_else(|p| p.into_inner()) = Some(Box::new(responder));
    }

    /// Refuses new connections.
    pub fn fail_connections(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Fails every publish.
    pub fn fail_publishes(&self, fail: bool) {
        self.state.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Never confirms publishes.
    pub fn hang_publishes(&self, hang: bool) {
        self.state.hang_publish.store(hang, Ordering::SeqCst);
    }

    /// Pushes a reply into `queue`; returns its delivery tag, or `None`
    /// without a consumer on the queue.
    pub fn deliver(&self, queue: &str, reply: Reply) -> Option<u64> {
        self.state.push(queue, reply)
    }

    /// Snapshot of the broker log.
    pub fn log(&self) -> BrokerLog {
        self.state.log.borrow().clone()
    }

    /// Accepted publishes.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.log.borrow().published.clone()
    }

    /// Waits until the log satisfies `condition`.
    pub async fn wait_until(&self, mut condition: impl FnMut(&BrokerLog) -> bool) -> BrokerLog {
        let mut log = self.state.log.subscribe();
        let snapshot =
            log.wait_for(|current| condition(current)).await.map(|current| current.clone());
        // The sender lives as long as `self`.
        snapshot.unwrap_or_else(|_| self.log())
    }

    /// Waits until at least `count` messages were published.
    pub async fn wait_for_publishes(&self, count: usize) -> Vec<PublishedMessage> {
        self.wait_until(|log| log.published.len() >= count).await.published
    }
}

#[async_trait::async_trait]
impl AmqpConnector for MockBroker {
    async fn connect(&self, url: &str) -> Result<Arc<dyn AmqpConnection>> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(NotifyError::connection("connection refused"));
        }

        let id = self.state.next_connection.fetch_add(1, Ordering::SeqCst);
        self.state.record(|log| log.connections.push(url.to_string()));
        Ok(Arc::new(MockConnection { id, state: self.state.clone() }))
    }
}

struct MockConnection {
    id: usize,
    state: Arc<BrokerState>,
}

impl std::fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnection").field("id", &self.id).finish()
    }
}

#[async_trait::async_trait]
impl AmqpConnection for MockConnection {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>> {
        let id = self.state.next_channel.fetch_add(1, Ordering::SeqCst);
        self.state.record(|log| log.channels_opened += 1);
        Ok(Arc::new(MockChannel { id, connection: self.id, state: self.state.clone() }))
    }

    async fn close(&self) -> Result<()> {
        self.state
            .exclusive_queues
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|_, owner| *owner != self.id);
        self.state.record(|log| log.connections_closed += 1);
        Ok(())
    }
}

struct MockChannel {
    id: usize,
    connection: usize,
    state: Arc<BrokerState>,
}

impl std::fmt::Debug for MockChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockChannel").field("id", &self.id).finish()
    }
}

#[async_trait::async_trait]
impl AmqpChannel for MockChannel {
    async fn declare_exchange(&self, exchange: &str) -> Result<()> {
        self.state.record(|log| log.exchanges.push(exchange.to_string()));
        Ok(())
    }

    async fn declare_reply_queue(&self, queue: &str) -> Result<()> {
        {
            let mut owners =
                self.state.exclusive_queues.lock().unwrap_or_else(|p| p.into_inner());
            let owner = *owners.entry(queue.to_string()).or_insert(self.connection);
            if owner != self.connection {
                return Err(NotifyError::consume(format!(
                    "RESOURCE_LOCKED - cannot obtain exclusive access to queue '{queue}'"
                )));
            }
        }
        self.state.record(|log| log.reply_queues.push(queue.to_string()));
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Bytes,
        properties: PublishProperties,
    ) -> Result<()> {
        if self.state.hang_publish.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.state.fail_publish.load(Ordering::SeqCst) {
            return Err(NotifyError::publish("channel closed by broker"));
        }

        let message = PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body,
            properties,
        };

        let replies = self
            .state
            .responder
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|respond| respond(&message))
            .unwrap_or_default();
        let reply_to = message.properties.reply_to.clone();

        self.state.record(|log| log.published.push(message));

        if let Some(queue) = reply_to {
            for reply in replies {
                self.state.push(&queue, reply);
            }
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state
            .queues
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(queue.to_string(), (self.id, sender));
        self.state.record(|log| log.consumers.push(queue.to_string()));

        let deliveries = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|delivery| (delivery, receiver))
        });
        Ok(Box::pin(deliveries))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.state.record(|log| log.acked.push(delivery_tag));
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64) -> Result<()> {
        self.state.record(|log| log.rejected.push(delivery_tag));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state
            .queues
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|_, (channel, _)| *channel != self.id);
        self.state.record(|log| log.channels_closed += 1);
        Ok(())
    }
}
