//! Per-task bounded FIFO mailboxes — the inter-task message fabric.

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

/// Opaque message payload. Callers pick the wire shape; the kernel never
/// inspects contents, only moves them FIFO.
pub type Message = serde_json::Value;

/// One task's mailbox: a non-blocking, FIFO, optionally bounded queue.
///
/// `send` never blocks: a full bounded mailbox rejects the message rather
/// than stalling the sender, and `recv` returns immediately with `None`
/// when empty rather than waiting for a message to arrive.
pub struct Mailbox {
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl Mailbox {
    /// Create a mailbox. `capacity = None` is unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        let (tx, rx) = match capacity {
            Some(cap) => crossbeam_channel::bounded(cap),
            None => crossbeam_channel::unbounded(),
        };
        Self { tx, rx }
    }

    /// Enqueue a message. Returns `false` if the mailbox is at bounded
    /// capacity; never blocks.
    pub fn send(&self, msg: Message) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Dequeue the next message, or `None` if empty; never blocks.
    pub fn recv(&self) -> Option<Message> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}
