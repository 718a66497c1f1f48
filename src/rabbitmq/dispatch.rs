// src/rabbitmq/dispatch.rs

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::errors::Result;
use super::handle::ClientHandle;
use super::transport::{BrokerChannel, Envelope, InboundMessage, MessageHeaders};

/// What a worker receives for one delivered message.
#[derive(Clone)]
pub struct DeliveryContext {
    pub handle: ClientHandle,
    pub channel: Arc<dyn BrokerChannel>,
    pub envelope: Envelope,
    pub headers: MessageHeaders,
    pub body: Vec<u8>,
}

impl DeliveryContext {
    pub(crate) fn new(
        handle: ClientHandle,
        channel: Arc<dyn BrokerChannel>,
        message: InboundMessage,
    ) -> Self {
        Self {
            handle,
            channel,
            envelope: message.envelope,
            headers: message.headers,
            body: message.body,
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.envelope.delivery_tag
    }

    /// Acknowledge this delivery through the owner task.
    pub fn ack(&self) -> Result<()> {
        self.handle.ack_message_threadsafe(self.delivery_tag())
    }

    pub fn nack(&self, requeue: bool) -> Result<()> {
        self.handle
            .nack_message_threadsafe(self.delivery_tag(), requeue)
    }
}

impl std::fmt::Debug for DeliveryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryContext")
            .field("envelope", &self.envelope)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}

pub type MessageCallback = Arc<dyn Fn(DeliveryContext) -> BoxFuture<'static, ()> + Send + Sync>;

pub fn callback_from_fn<F, Fut>(handler: F) -> MessageCallback
where
    F: Fn(DeliveryContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |delivery| Box::pin(handler(delivery)))
}

/// Strategy deciding how a delivered message is processed. The consume loop
/// calls `dispatch` once per delivery and never waits for the callback.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, delivery: DeliveryContext, callback: MessageCallback);
}

/// One detached task per message, no upper bound. Back-pressure comes only
/// from the broker's prefetch count.
#[derive(Debug, Default, Clone)]
pub struct SpawnPerMessage;

impl Dispatcher for SpawnPerMessage {
    fn dispatch(&self, delivery: DeliveryContext, callback: MessageCallback) {
        debug!(delivery_tag = delivery.delivery_tag(), "Spawning worker");
        tokio::spawn(callback(delivery));
    }
}

/// Still one task per message, but at most `limit` callbacks run at once;
/// the rest wait for a permit.
#[derive(Debug, Clone)]
pub struct BoundedDispatcher {
    permits: Arc<Semaphore>,
}

impl BoundedDispatcher {
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Dispatcher for BoundedDispatcher {
    fn dispatch(&self, delivery: DeliveryContext, callback: MessageCallback) {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let delivery_tag = delivery.delivery_tag();
            match permits.acquire_owned().await {
                Ok(_permit) => callback(delivery).await,
                Err(_) => warn!(delivery_tag, "Dispatcher closed, dropping delivery"),
            }
        });
    }
}
