// src/rabbitmq/lapin_transport.rs

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicGetOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::tcp::{RustlsConnector, TcpStream};
use lapin::types::FieldTable;
use lapin::uri::AMQPUri;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::time::timeout;
use tracing::{debug, info};

use super::errors::{ClientError, Result};
use super::transport::{
    BrokerChannel, BrokerConnection, ConnectionParams, Connector, DeliveryStream, Envelope,
    InboundMessage, MessageHeaders,
};

const REPLY_SUCCESS: u16 = 200;

/// Opens real broker connections through lapin.
#[derive(Debug, Default, Clone)]
pub struct LapinConnector;

#[async_trait]
impl Connector for LapinConnector {
    async fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn BrokerConnection>> {
        let properties =
            ConnectionProperties::default().with_connection_name(params.connection_name.clone().into());

        let connecting = async {
            match &params.tls {
                Some(tls) => connect_tls(&params.url, tls.clone(), properties).await,
                None => Connection::connect(&params.url, properties)
                    .await
                    .map_err(ClientError::from),
            }
        };
        let connection = timeout(params.connect_timeout, connecting).await??;

        info!(
            connection_name = %params.connection_name,
            secure = params.tls.is_some(),
            "Connected to RabbitMQ"
        );
        Ok(Box::new(LapinConnection { inner: connection }))
    }
}

async fn connect_tls(
    url: &str,
    tls: Arc<tokio_rustls::rustls::ClientConfig>,
    properties: ConnectionProperties,
) -> Result<Connection> {
    let uri: AMQPUri = url
        .parse()
        .map_err(|e: String| ClientError::Config(format!("Invalid broker URL: {}", e)))?;
    let host = uri.authority.host.clone();
    let port = uri.authority.port;
    let connector = RustlsConnector::from(tls);

    Connection::connector(
        uri,
        Box::new(move |_| TcpStream::connect((host.as_str(), port))?.into_rustls(&connector, &host)),
        properties,
    )
    .await
    .map_err(ClientError::from)
}

pub struct LapinConnection {
    inner: Connection,
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        let channel = self.inner.create_channel().await?;
        debug!(channel_id = channel.id(), "Opened channel");
        Ok(Arc::new(LapinChannel { inner: channel }))
    }

    async fn close(&self) -> Result<()> {
        self.inner.close(REPLY_SUCCESS, "Normal shutdown").await?;
        Ok(())
    }
}

pub struct LapinChannel {
    inner: Channel,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn queue_declare(&self, queue: &str, durable: bool) -> Result<()> {
        self.inner
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        headers: MessageHeaders,
    ) -> Result<()> {
        let mut properties = BasicProperties::default().with_headers(headers.headers);
        if let Some(content_type) = headers.content_type {
            properties = properties.with_content_type(content_type.into());
        }
        if let Some(message_id) = headers.message_id {
            properties = properties.with_message_id(message_id.into());
        }
        if let Some(timestamp) = headers.timestamp {
            properties = properties.with_timestamp(timestamp);
        }

        self.inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?;
        Ok(())
    }

    async fn basic_get(&self, queue: &str) -> Result<Option<InboundMessage>> {
        let message = self
            .inner
            .basic_get(queue, BasicGetOptions::default())
            .await?;

        Ok(message.map(|message| {
            let message_count = message.message_count;
            let mut inbound = inbound_from_delivery(message.delivery, None);
            inbound.envelope.message_count = Some(message_count);
            inbound
        }))
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<()> {
        self.inner
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.inner
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..BasicNackOptions::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<()> {
        self.inner
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await?;
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        auto_ack: bool,
    ) -> Result<DeliveryStream> {
        let consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: auto_ack,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        let tag = consumer_tag.to_string();
        let stream = consumer.map(move |delivery| {
            delivery
                .map(|delivery| inbound_from_delivery(delivery, Some(tag.clone())))
                .map_err(ClientError::from)
        });
        Ok(Box::pin(stream))
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<()> {
        self.inner
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.close(REPLY_SUCCESS, "Normal shutdown").await?;
        Ok(())
    }
}

fn inbound_from_delivery(delivery: Delivery, consumer_tag: Option<String>) -> InboundMessage {
    let properties = &delivery.properties;
    let headers = MessageHeaders {
        content_type: properties.content_type().as_ref().map(|v| v.as_str().to_string()),
        message_id: properties.message_id().as_ref().map(|v| v.as_str().to_string()),
        timestamp: *properties.timestamp(),
        headers: properties.headers().clone().unwrap_or_default(),
    };

    InboundMessage {
        envelope: Envelope {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.as_str().to_string(),
            routing_key: delivery.routing_key.as_str().to_string(),
            redelivered: delivery.redelivered,
            consumer_tag,
            message_count: None,
        },
        headers,
        body: delivery.data,
    }
}
