//! Single consumer queue between the bus listener and the control loop.
//!
//! Only the control loop touches hardware. Everything else hands it
//! [`Command`]s through this queue.

use crate::command::Command;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("command queue is full")]
    Full,
    #[error("control loop is no longer running")]
    Closed,
}

/// Bounded command queue
///
/// `STOP` also raises the shared interrupt flag so that a motion already in
/// progress is aborted before the command itself reaches the front of the queue.
pub fn command_queue(capacity: usize) -> (CommandSender, CommandReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let interrupt = Arc::new(AtomicBool::new(false));
    (
        CommandSender {
            sender,
            interrupt: interrupt.clone(),
        },
        CommandReceiver {
            receiver,
            interrupt,
        },
    )
}

#[derive(Clone)]
pub struct CommandSender {
    sender: mpsc::Sender<Command>,
    interrupt: Arc<AtomicBool>,
}

impl CommandSender {
    /// Never blocks, a full queue is reported back to the caller
    pub fn submit(&self, command: Command) -> Result<(), QueueError> {
        if command == Command::EmergencyStop {
            self.interrupt.store(true, Ordering::Release);
        }
        self.sender.try_send(command).map_err(|error| match error {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Abort any motion in progress without queueing a command
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

pub struct CommandReceiver {
    receiver: mpsc::Receiver<Command>,
    interrupt: Arc<AtomicBool>,
}

impl CommandReceiver {
    pub fn try_next(&mut self) -> Option<Command> {
        self.receiver.try_recv().ok()
    }

    /// Flag raised by every submitted `STOP`
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn interrupt_requested(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }

    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::Release);
    }
}
