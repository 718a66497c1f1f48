// src/rabbitmq/transport.rs
//
// Boundary between the client state machine and the broker protocol library.
// The production implementation lives in `lapin_transport`; tests plug in an
// in-memory broker.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use lapin::types::FieldTable;
use tokio_rustls::rustls::ClientConfig;

use super::errors::Result;

/// Everything needed to open one connection, derived from the client config.
#[derive(Clone)]
pub struct ConnectionParams {
    pub url: String,
    pub connection_name: String,
    pub connect_timeout: Duration,
    /// Present only for `amqps://` URLs.
    pub tls: Option<Arc<ClientConfig>>,
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("connection_name", &self.connection_name)
            .field("connect_timeout", &self.connect_timeout)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// Delivery metadata: the broker's method frame for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub consumer_tag: Option<String>,
    /// Messages left in the queue, only reported by `basic_get`.
    pub message_count: Option<u32>,
}

/// Message properties carried alongside the body.
#[derive(Debug, Clone, Default)]
pub struct MessageHeaders {
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<u64>,
    pub headers: FieldTable,
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub envelope: Envelope,
    pub headers: MessageHeaders,
    pub body: Vec<u8>,
}

pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<InboundMessage>> + Send>>;

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn BrokerConnection>>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync {
    fn is_open(&self) -> bool;

    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>>;

    async fn close(&self) -> Result<()>;
}

/// The subset of channel operations the client drives. Implementations must
/// only be driven from the task that owns the connection; other tasks go
/// through `ClientHandle`.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    fn is_open(&self) -> bool;

    async fn queue_declare(&self, queue: &str, durable: bool) -> Result<()>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        headers: MessageHeaders,
    ) -> Result<()>;

    async fn basic_get(&self, queue: &str) -> Result<Option<InboundMessage>>;

    async fn basic_ack(&self, delivery_tag: u64) -> Result<()>;

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;

    async fn basic_qos(&self, prefetch_count: u16) -> Result<()>;

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        auto_ack: bool,
    ) -> Result<DeliveryStream>;

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
