// src/rabbitmq/handle.rs
//
// Cross-task access to the client. Channel operations are never executed on
// the caller's task: they are queued and run by the task that owns the
// connection (the consume loop, or `process_pending_commands`).

use tokio::sync::{mpsc, oneshot};

use super::errors::{ClientError, Result};

#[derive(Debug)]
pub enum ChannelCommand {
    Ack {
        delivery_tag: u64,
        generation: Option<u64>,
    },
    Nack {
        delivery_tag: u64,
        requeue: bool,
        generation: Option<u64>,
    },
    StopConsuming,
    Close {
        done: Option<oneshot::Sender<()>>,
    },
}

pub(crate) type CommandSender = mpsc::UnboundedSender<ChannelCommand>;
pub(crate) type CommandReceiver = mpsc::UnboundedReceiver<ChannelCommand>;

pub(crate) fn command_queue() -> (CommandSender, CommandReceiver) {
    mpsc::unbounded_channel()
}

/// Cloneable handle usable from any task or thread.
///
/// Handles given to delivery callbacks are bound to the channel generation
/// that delivered the message: if the channel has been replaced by the time
/// the owner drains the command, the ack/nack is dropped rather than applied
/// to an unrelated delivery tag on the new channel.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: CommandSender,
    generation: Option<u64>,
}

impl ClientHandle {
    pub(crate) fn new(commands: CommandSender) -> Self {
        Self {
            commands,
            generation: None,
        }
    }

    pub(crate) fn bound_to(&self, generation: u64) -> Self {
        Self {
            commands: self.commands.clone(),
            generation: Some(generation),
        }
    }

    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    pub fn ack_message_threadsafe(&self, delivery_tag: u64) -> Result<()> {
        self.send(ChannelCommand::Ack {
            delivery_tag,
            generation: self.generation,
        })
    }

    pub fn nack_message_threadsafe(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.send(ChannelCommand::Nack {
            delivery_tag,
            requeue,
            generation: self.generation,
        })
    }

    /// Ask the owner to cancel the active consumer; `consume()` then returns
    /// `ConsumeOutcome::Cancelled`.
    pub fn stop_consuming_threadsafe(&self) -> Result<()> {
        self.send(ChannelCommand::StopConsuming)
    }

    /// Ask the owner to close the client and wait until it has done so.
    pub async fn close_threadsafe(&self) -> Result<()> {
        let (done, closed) = oneshot::channel();
        self.send(ChannelCommand::Close { done: Some(done) })?;
        closed.await.map_err(|_| ClientError::Closed)
    }

    fn send(&self, command: ChannelCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }
}
