// src/rabbitmq/amqp_client.rs

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connection::ConnectionManager;
use super::dispatch::{Dispatcher, SpawnPerMessage};
use super::errors::{ClientError, Result};
use super::handle::{command_queue, ChannelCommand, ClientHandle, CommandReceiver};
use super::lapin_transport::LapinConnector;
use super::transport::{BrokerChannel, Connector, InboundMessage, MessageHeaders};
use crate::config::AmqpConfig;

/// Resilient AMQP client: one connection, one channel, lazily (re)opened.
///
/// One-shot operations (`queue_declare`, `send_message`, `get_message`,
/// `ack_message`, `nack_message`) open a connection when none is alive and
/// close it again before returning; an existing connection is reused and left
/// open. `consume` keeps the connection for its whole lifetime.
pub struct AmqpClient {
    pub(crate) manager: ConnectionManager,
    pub(crate) consumer_tag: Option<String>,
    pub(crate) dispatcher: Arc<dyn Dispatcher>,
    pub(crate) handle: ClientHandle,
    pub(crate) commands: CommandReceiver,
}

impl AmqpClient {
    pub fn new(url: &str) -> Self {
        Self::from_config(AmqpConfig::new(url))
    }

    pub fn from_config(config: AmqpConfig) -> Self {
        Self::with_connector(config, Arc::new(LapinConnector))
    }

    /// Build a client over any transport implementation.
    pub fn with_connector(config: AmqpConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands_tx, commands) = command_queue();
        AmqpClient {
            manager: ConnectionManager::new(config, connector),
            consumer_tag: None,
            dispatcher: Arc::new(SpawnPerMessage),
            handle: ClientHandle::new(commands_tx),
            commands,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Handle for other tasks; its operations are executed by the task
    /// currently driving this client.
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &AmqpConfig {
        self.manager.config()
    }

    pub async fn connect(&mut self, retry_if_failed: bool) -> Result<()> {
        self.manager.connect(retry_if_failed).await
    }

    pub fn is_connection_alive(&self) -> bool {
        self.manager.is_connection_alive()
    }

    pub async fn reconnect_channel(&mut self) -> Result<()> {
        self.manager.reconnect_channel().await
    }

    pub fn reconnect_delay_secs(&self) -> u64 {
        self.manager.reconnect_delay_secs()
    }

    pub fn consumer_tag(&self) -> Option<&str> {
        self.consumer_tag.as_deref()
    }

    pub fn is_consuming(&self) -> bool {
        self.consumer_tag.is_some()
    }

    /// Stop consuming if needed, then close the connection. Idempotent.
    pub async fn close(&mut self) {
        if self.is_consuming() {
            self.stop_consuming().await;
        }
        self.manager.close().await;
    }

    /// Cancel the active consumer registration, if any.
    pub async fn stop_consuming(&mut self) {
        let Some(tag) = self.consumer_tag.take() else {
            return;
        };

        if !(self.manager.is_connection_alive() && self.manager.is_channel_open()) {
            debug!(consumer_tag = %tag, "Channel already gone, nothing to cancel");
            return;
        }
        match self.manager.channel() {
            Ok(channel) => match channel.basic_cancel(&tag).await {
                Ok(()) => info!(consumer_tag = %tag, "Consumer cancelled"),
                Err(err) => warn!(consumer_tag = %tag, "Failed to cancel consumer: {}", err),
            },
            Err(err) => warn!(consumer_tag = %tag, "Failed to cancel consumer: {}", err),
        }
    }

    pub async fn queue_declare(&mut self, queue: &str, durable: bool) -> Result<()> {
        self.with_auto_connection(|channel| async move {
            channel.queue_declare(queue, durable).await?;
            info!(queue, durable, "Queue declared");
            Ok(())
        })
        .await
    }

    /// Publish to `exchange` (the default exchange when empty).
    pub async fn send_message(&mut self, routing_key: &str, message: &[u8], exchange: &str) -> Result<()> {
        let headers = MessageHeaders {
            message_id: Some(Uuid::new_v4().to_string()),
            timestamp: Some(chrono::Utc::now().timestamp() as u64),
            ..MessageHeaders::default()
        };

        self.with_auto_connection(|channel| async move {
            channel
                .basic_publish(exchange, routing_key, message, headers)
                .await?;
            info!(
                "Published message to exchange '{}' with routing key '{}'",
                exchange, routing_key
            );
            Ok(())
        })
        .await
    }

    /// Fetch a single message without waiting. The message is acknowledged
    /// before it is returned.
    pub async fn get_message(&mut self, queue: &str) -> Result<Option<InboundMessage>> {
        self.with_auto_connection(|channel| async move {
            let Some(message) = channel.basic_get(queue).await? else {
                debug!(queue, "No message waiting");
                return Ok(None);
            };
            channel.basic_ack(message.envelope.delivery_tag).await?;
            Ok(Some(message))
        })
        .await
    }

    pub async fn ack_message(&mut self, delivery_tag: u64) -> Result<()> {
        self.with_auto_connection(|channel| async move { channel.basic_ack(delivery_tag).await })
            .await
    }

    pub async fn nack_message(&mut self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.with_auto_connection(|channel| async move {
            channel.basic_nack(delivery_tag, requeue).await
        })
        .await
    }

    /// Execute commands queued through `ClientHandle` while no consume loop
    /// is draining them. Returns how many were handled.
    pub async fn process_pending_commands(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(command) = self.commands.try_recv() {
            self.execute_command(command).await;
            handled += 1;
        }
        handled
    }

    /// Run one marshaled command on the owner task. Returns `true` when the
    /// command ends consumption.
    pub(crate) async fn execute_command(&mut self, command: ChannelCommand) -> bool {
        match command {
            ChannelCommand::Ack {
                delivery_tag,
                generation,
            } => {
                if self.is_stale(generation, delivery_tag) {
                    return false;
                }
                if let Err(err) = self.ack_on_live_channel(delivery_tag).await {
                    warn!(delivery_tag, "Failed to acknowledge message: {}", err);
                }
                false
            }
            ChannelCommand::Nack {
                delivery_tag,
                requeue,
                generation,
            } => {
                if self.is_stale(generation, delivery_tag) {
                    return false;
                }
                if let Err(err) = self.nack_on_live_channel(delivery_tag, requeue).await {
                    warn!(delivery_tag, "Failed to reject message: {}", err);
                }
                false
            }
            ChannelCommand::StopConsuming => {
                self.stop_consuming().await;
                true
            }
            ChannelCommand::Close { done } => {
                self.close().await;
                if let Some(done) = done {
                    let _ = done.send(());
                }
                true
            }
        }
    }

    fn is_stale(&self, generation: Option<u64>, delivery_tag: u64) -> bool {
        match generation {
            Some(generation) if generation != self.manager.channel_generation() => {
                warn!(
                    delivery_tag,
                    generation,
                    current = self.manager.channel_generation(),
                    "Dropping ack/nack for a delivery from a previous channel"
                );
                true
            }
            _ => false,
        }
    }

    // Marshaled acks never open a connection: a delivery tag only means
    // something on the channel that produced it.
    async fn ack_on_live_channel(&self, delivery_tag: u64) -> Result<()> {
        self.live_channel()?.basic_ack(delivery_tag).await
    }

    async fn nack_on_live_channel(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.live_channel()?.basic_nack(delivery_tag, requeue).await
    }

    fn live_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        if !self.manager.is_connection_alive() {
            return Err(ClientError::Connection("Connection is closed".to_string()));
        }
        self.manager.channel()
    }

    /// Run `op` on a live channel, opening a connection first when needed and
    /// closing it afterwards if this call opened it.
    async fn with_auto_connection<T, F, Fut>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn BrokerChannel>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let auto_opened = self.manager.ensure_open().await?;
        let result = match self.manager.channel() {
            Ok(channel) => op(channel).await,
            Err(err) => Err(err),
        };
        if auto_opened {
            debug!("Closing connection opened for a one-shot operation");
            self.manager.close().await;
        }
        result
    }
}
