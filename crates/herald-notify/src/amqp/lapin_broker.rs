//! Broker implementation backed by `lapin`.

use std::{fmt, sync::Arc};

use bytes::Bytes;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        ConfirmSelectOptions, ExchangeDeclareOptions, QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};

use super::{
    broker::{
        AmqpChannel, AmqpConnection, AmqpConnector, DeliveryStream, InboundDelivery,
        PublishProperties,
    },
    REPLY_QUEUE_MESSAGE_TTL_MS,
};
use crate::error::{NotifyError, Result};

const REPLY_SUCCESS: u16 = 200;

/// Opens real broker connections.
#[derive(Debug, Clone, Default)]
pub struct LapinConnector;

#[async_trait::async_trait]
impl AmqpConnector for LapinConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn AmqpConnection>> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| NotifyError::connection(format!("failed to connect to broker: {e}")))?;

        Ok(Arc::new(LapinConnection { connection }))
    }
}

struct LapinConnection {
    connection: Connection,
}

impl fmt::Debug for LapinConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LapinConnection")
            .field("state", &self.connection.status().state())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl AmqpConnection for LapinConnection {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| NotifyError::connection(format!("failed to open channel: {e}")))?;

        channel.confirm_select(ConfirmSelectOptions::default()).await.map_err(|e| {
            NotifyError::connection(format!("failed to enable publisher confirms: {e}"))
        })?;

        Ok(Arc::new(LapinChannel { channel }))
    }

    async fn close(&self) -> Result<()> {
        self.connection
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|e| NotifyError::connection(e.to_string()))
    }
}

struct LapinChannel {
    channel: Channel,
}

impl fmt::Debug for LapinChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LapinChannel").field("id", &self.channel.id()).finish_non_exhaustive()
    }
}

fn basic_properties(properties: PublishProperties) -> BasicProperties {
    let delivery_mode = if properties.persistent { 2 } else { 1 };
    let mut basic = BasicProperties::default()
        .with_app_id(properties.app_id.into())
        .with_message_id(properties.message_id.into())
        .with_content_type(properties.content_type.into())
        .with_timestamp(properties.timestamp)
        .with_delivery_mode(delivery_mode);

    if let Some(reply_to) = properties.reply_to {
        basic = basic.with_reply_to(reply_to.into());
    }
    if let Some(expiration) = properties.expiration {
        basic = basic.with_expiration(expiration.into());
    }
    basic
}

/// Only a broker ack counts as delivered. `NotRequested` means the channel
/// is not in confirm mode, so delivery is unknown.
fn confirmation_result(confirmation: &Confirmation) -> Result<()> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err(NotifyError::publish("broker rejected the message")),
        Confirmation::NotRequested => {
            Err(NotifyError::publish("publish was not confirmed by the broker"))
        },
    }
}

#[async_trait::async_trait]
impl AmqpChannel for LapinChannel {
    async fn declare_exchange(&self, exchange: &str) -> Result<()> {
        let options = ExchangeDeclareOptions { durable: true, ..Default::default() };
        self.channel
            .exchange_declare(exchange, ExchangeKind::Direct, options, FieldTable::default())
            .await
            .map_err(|e| NotifyError::connection(format!("failed to declare exchange: {e}")))
    }

    async fn declare_reply_queue(&self, queue: &str) -> Result<()> {
        let options = QueueDeclareOptions { exclusive: true, auto_delete: true, ..Default::default() };
        let mut arguments = FieldTable::default();
        arguments.insert("x-message-ttl".into(), AMQPValue::LongUInt(REPLY_QUEUE_MESSAGE_TTL_MS));

        self.channel
            .queue_declare(queue, options, arguments)
            .await
            .map(|_| ())
            .map_err(|e| NotifyError::consume(format!("failed to declare reply queue: {e}")))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Bytes,
        properties: PublishProperties,
    ) -> Result<()> {
        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                basic_properties(properties),
            )
            .await
            .map_err(|e| NotifyError::publish(e.to_string()))?;

        let confirmation = confirm.await.map_err(|e| NotifyError::publish(e.to_string()))?;
        confirmation_result(&confirmation)
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(queue, consumer_tag, BasicConsumeOptions::default(), FieldTable::default())
            .await
            .map_err(|e| NotifyError::consume(e.to_string()))?;

        let deliveries = consumer.map(|next| {
            next.map(|delivery| InboundDelivery {
                delivery_tag: delivery.delivery_tag,
                correlation_id: delivery
                    .properties
                    .correlation_id()
                    .as_ref()
                    .map(|id| id.as_str().to_string()),
                content_type: delivery
                    .properties
                    .content_type()
                    .as_ref()
                    .map(|ct| ct.as_str().to_string()),
                body: Bytes::from(delivery.data),
            })
            .map_err(|e| NotifyError::consume(e.to_string()))
        });

        Ok(Box::pin(deliveries))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| NotifyError::consume(e.to_string()))
    }

    async fn reject(&self, delivery_tag: u64) -> Result<()> {
        let options = BasicNackOptions { multiple: false, requeue: false };
        self.channel
            .basic_nack(delivery_tag, options)
            .await
            .map_err(|e| NotifyError::consume(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.channel
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|e| NotifyError::connection(e.to_string()))
    }
}
