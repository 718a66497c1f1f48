// src/rabbitmq/mod.rs
// Resilient client over lapin: connection lifecycle, publish path, consume loop

pub mod errors;
pub mod connection;
pub mod reconnect;
pub mod transport;
pub mod tls;
pub mod dispatch;
pub mod handle;
pub mod consumer;
mod amqp_client;
mod lapin_transport;

// Re-export specific items to simplify imports elsewhere
pub use amqp_client::AmqpClient;
pub use connection::ConnectionManager;
pub use consumer::{generate_consumer_tag, ConsumeOptions, ConsumeOutcome};
pub use dispatch::{
    callback_from_fn, BoundedDispatcher, DeliveryContext, Dispatcher, MessageCallback,
    SpawnPerMessage,
};
pub use errors::{ClientError, Result};
pub use handle::{ChannelCommand, ClientHandle};
pub use lapin_transport::LapinConnector;
pub use reconnect::ReconnectState;
pub use transport::{
    BrokerChannel, BrokerConnection, ConnectionParams, Connector, DeliveryStream, Envelope,
    InboundMessage, MessageHeaders,
};
