// src/rabbitmq/consumer.rs

use std::future::Future;

use futures_lite::StreamExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::amqp_client::AmqpClient;
use super::dispatch::{callback_from_fn, DeliveryContext, MessageCallback};
use super::errors::{ClientError, Result};
use super::handle::ChannelCommand;
use super::transport::{DeliveryStream, InboundMessage};

pub const CONSUMER_TAG_PREFIX: &str = "pika-amqp-client";

pub fn generate_consumer_tag() -> String {
    format!("{}-{}", CONSUMER_TAG_PREFIX, Uuid::new_v4())
}

/// Options for `AmqpClient::consume`.
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    /// Let the broker consider messages acknowledged on delivery.
    pub auto_ack: bool,
    /// Generated as `pika-amqp-client-<uuid>` when not set.
    pub consumer_tag: Option<String>,
    /// Declare the queue (durable) before consuming.
    pub declare_queue: bool,
    pub qos_count: u16,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            auto_ack: false,
            consumer_tag: None,
            declare_queue: true,
            qos_count: 1,
        }
    }
}

/// How a `consume` call ended.
#[derive(Debug, Clone)]
pub enum ConsumeOutcome {
    /// Stopped through `stop_consuming_threadsafe`, or the broker cancelled
    /// the consumer.
    Cancelled,
    /// Closed through `close_threadsafe` (e.g. by a signal hook).
    Shutdown,
    /// An error that is not recovered from automatically.
    Failed(ClientError),
}

impl ConsumeOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ConsumeOutcome::Failed(_))
    }
}

enum Event {
    Command(Option<ChannelCommand>),
    Delivery(Option<Result<InboundMessage>>),
}

impl AmqpClient {
    /// Consume `queue` until a terminal condition, calling `callback` once
    /// per delivered message through the configured dispatcher.
    ///
    /// Connection losses restart the whole sequence (connect, declare, qos,
    /// register) and channel-state faults reopen the channel; neither returns
    /// to the caller. Every other error stops consumption and is reported as
    /// `ConsumeOutcome::Failed`.
    pub async fn consume<F, Fut>(&mut self, queue: &str, callback: F, options: ConsumeOptions) -> ConsumeOutcome
    where
        F: Fn(DeliveryContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.consume_with(queue, callback_from_fn(callback), options)
            .await
    }

    pub async fn consume_with(
        &mut self,
        queue: &str,
        callback: MessageCallback,
        options: ConsumeOptions,
    ) -> ConsumeOutcome {
        let consumer_tag = options
            .consumer_tag
            .clone()
            .unwrap_or_else(generate_consumer_tag);

        loop {
            // connect() retries transient failures itself; what comes back
            // from ensure_open is either fatal or a channel-level problem.
            let result = match self.manager.ensure_open().await {
                Ok(_) => {
                    self.run_consumer(queue, &consumer_tag, &callback, &options)
                        .await
                }
                Err(err) => Err(err),
            };

            let err = match result {
                Ok(outcome) => return outcome,
                Err(err) => err,
            };

            match err {
                ClientError::Connection(_) => {
                    warn!(queue, consumer_tag = %consumer_tag, "Connection lost while consuming, restarting: {}", err);
                    self.consumer_tag = None;
                    self.manager.close().await;
                }
                ClientError::ChannelState(_) => {
                    warn!(queue, consumer_tag = %consumer_tag, "Channel unusable while consuming, reopening: {}", err);
                    self.stop_consuming().await;
                    if let Err(reopen_err) = self.manager.reconnect_channel().await {
                        if !reopen_err.is_retryable() {
                            error!(queue, consumer_tag = %consumer_tag, "Recovery failed, not retrying: {}", reopen_err);
                            return ConsumeOutcome::Failed(reopen_err);
                        }
                        warn!("Failed to reopen channel: {}", reopen_err);
                    }
                }
                _ => {
                    error!(queue, consumer_tag = %consumer_tag, "Consuming stopped on error: {:?}", err);
                    self.stop_consuming().await;
                    return ConsumeOutcome::Failed(err);
                }
            }
        }
    }

    async fn run_consumer(
        &mut self,
        queue: &str,
        consumer_tag: &str,
        callback: &MessageCallback,
        options: &ConsumeOptions,
    ) -> Result<ConsumeOutcome> {
        let channel = self.manager.channel()?;
        let generation = self.manager.channel_generation();

        if options.declare_queue {
            channel.queue_declare(queue, true).await?;
        }
        channel.basic_qos(options.qos_count).await?;

        let mut deliveries: DeliveryStream = channel
            .basic_consume(queue, consumer_tag, options.auto_ack)
            .await?;
        self.consumer_tag = Some(consumer_tag.to_string());
        info!(queue, consumer_tag, generation, "Started consuming");

        let handle = self.handle.bound_to(generation);

        loop {
            let event = tokio::select! {
                biased;
                command = self.commands.recv() => Event::Command(command),
                delivery = deliveries.next() => Event::Delivery(delivery),
            };

            match event {
                Event::Command(Some(command)) => {
                    let stop_consuming = matches!(command, ChannelCommand::StopConsuming);
                    if self.execute_command(command).await {
                        return Ok(if stop_consuming {
                            ConsumeOutcome::Cancelled
                        } else {
                            ConsumeOutcome::Shutdown
                        });
                    }
                }
                // The client always holds a sender, so the queue never closes.
                Event::Command(None) => {}
                Event::Delivery(Some(Ok(message))) => {
                    let delivery = DeliveryContext::new(handle.clone(), channel.clone(), message);
                    self.dispatcher.dispatch(delivery, callback.clone());
                }
                Event::Delivery(Some(Err(err))) => return Err(err),
                Event::Delivery(None) => {
                    if !self.manager.is_connection_alive() {
                        return Err(ClientError::Connection(
                            "Delivery stream ended with the connection".to_string(),
                        ));
                    }
                    if !channel.is_open() {
                        return Err(ClientError::ChannelState(
                            "Delivery stream ended with the channel".to_string(),
                        ));
                    }
                    info!(queue, consumer_tag, "Consumer cancelled by the broker");
                    self.consumer_tag = None;
                    return Ok(ConsumeOutcome::Cancelled);
                }
            }
        }
    }
}
