//! Resilient AMQP 0-9-1 client.
//!
//! A single connection/channel pair managed with reconnect backoff, one-shot
//! publish helpers that open and close their own connection, and a consume
//! loop that survives connection and channel faults while dispatching every
//! delivery to its own task. Acknowledgements from those tasks are marshaled
//! back to the task that owns the channel through a [`ClientHandle`].

pub mod config;
pub mod rabbitmq;
pub mod shutdown;

pub use config::AmqpConfig;
pub use rabbitmq::{
    AmqpClient, ClientError, ClientHandle, ConsumeOptions, ConsumeOutcome, DeliveryContext,
};
pub use shutdown::setup_signal_handlers;
