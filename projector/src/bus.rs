//! The command mailbox: an ordered queue with a single consumer.

use crate::command_handler::CommandHandler;
use projector_core::command::Command;
use tokio::sync::{mpsc, watch};

/// Producer side of the mailbox. Cheap to clone; every runner and observer holds one.
#[derive(Debug, Clone)]
pub(crate) struct CommandBus {
    sender: mpsc::UnboundedSender<Command>,
}

/// Consumer side of the mailbox.
#[derive(Debug)]
pub(crate) struct Mailbox {
    receiver: mpsc::UnboundedReceiver<Command>,
}

pub(crate) fn channel() -> (CommandBus, Mailbox) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (CommandBus { sender }, Mailbox { receiver })
}

impl CommandBus {
    /// Enqueues a command without waiting. Never fails: once the mailbox has stopped, commands
    /// are dropped.
    pub(crate) fn queue(&self, command: impl Into<Command>) {
        if let Err(error) = self.sender.send(command.into()) {
            log::debug!("Mailbox stopped, dropping {:?}", error.0);
        }
    }
}

impl Mailbox {
    /// Drains commands in arrival order, handling each to completion before taking the next,
    /// until `shutdown` flips to `true` or is dropped.
    pub(crate) async fn run(
        mut self,
        mut handler: CommandHandler,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let command = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                command = self.receiver.recv() => command,
            };
            let Some(command) = command else {
                break;
            };

            log::trace!("Handling {:?}", command);
            handler.handle(command).await;
        }

        log::debug!("Mailbox stopping");
        self.receiver.close();
        handler.shutdown().await;
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<Command> {
        self.receiver.try_recv().ok()
    }

    #[cfg(test)]
    pub(crate) fn drain(&mut self) -> Vec<Command> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
