//! Per-agent FIFO mailbox

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

use crate::message::Message;

/// Handle to one agent's queue
///
/// Cloning yields another handle to the same queue. The queue is unbounded
/// and lives only as long as the process.
#[derive(Debug, Clone)]
pub struct Mailbox {
    agent_id: Arc<str>,
    sender: UnboundedSender<Message>,
    receiver: Arc<Mutex<UnboundedReceiver<Message>>>,
    pending: Arc<AtomicUsize>,
}

impl Mailbox {
    pub(crate) fn new(agent_id: &str) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            agent_id: Arc::from(agent_id),
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Enqueue without waiting; false only if the queue has been torn down
    pub(crate) fn deliver(&self, message: Message) -> bool {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(message).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Wait at most `timeout` for the next message
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<Message> {
        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Some(message)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Some(message)
            }
            _ => None,
        }
    }

    /// Take the next message if one is already queued
    pub async fn try_recv(&self) -> Option<Message> {
        let mut receiver = self.receiver.lock().await;
        let message = receiver.try_recv().ok()?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(message)
    }

    /// Drain everything currently queued
    pub async fn drain(&self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = self.try_recv().await {
            messages.push(message);
        }
        messages
    }

    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
