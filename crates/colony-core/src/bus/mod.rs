//! Message bus
//!
//! In-process router between agents. Each registered agent owns one FIFO
//! [`Mailbox`]; a message is delivered either to its single target or, when
//! the target is `"broadcast"`, to every registered agent except the sender.
//! The bus also hosts the [`LockTable`] agents use to claim spatial resources.
//!
//! ```text
//!   publish(msg) ──validate──▶ route ──┬──▶ mailbox[target]
//!                                      └──▶ mailbox[*] \ {source}   (broadcast)
//! ```
//!
//! Delivery is at-most-once and never blocks on capacity. Nothing is retried.

mod locks;
mod mailbox;

pub use locks::{LockTable, ResourceKey};
pub use mailbox::Mailbox;

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::ColonyError;
use crate::message::{types, Message};

/// Shared router and lock table
#[derive(Debug, Default)]
pub struct MessageBus {
    mailboxes: RwLock<HashMap<String, Mailbox>>,
    locks: LockTable,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `agent_id`, or return its existing mailbox
    pub async fn subscribe(&self, agent_id: &str) -> Mailbox {
        let mut mailboxes = self.mailboxes.write().await;
        mailboxes
            .entry(agent_id.to_string())
            .or_insert_with(|| {
                debug!(agent_id, "Subscribed");
                Mailbox::new(agent_id)
            })
            .clone()
    }

    /// Validate and route; failures are logged and reported as `false`
    pub async fn publish(&self, message: Message) -> bool {
        let message_type = message.message_type.clone();
        let source = message.source.clone();
        match self.try_publish(message).await {
            Ok(_) => true,
            Err(e) => {
                warn!(message_type = %message_type, source = %source, error = %e, "Publish failed");
                false
            }
        }
    }

    /// Validate and route, returning the number of mailboxes reached
    pub async fn try_publish(&self, message: Message) -> Result<usize, ColonyError> {
        message.validate()?;

        if !message.is_versioned() || !types::is_known(&message.message_type) {
            warn!(
                message_type = %message.message_type,
                "Message type is outside the known catalogue"
            );
        }

        let mailboxes = self.mailboxes.read().await;

        if message.is_broadcast() {
            let mut delivered = 0;
            for (agent_id, mailbox) in mailboxes.iter() {
                if *agent_id == message.source {
                    continue;
                }
                if mailbox.deliver(message.clone()) {
                    delivered += 1;
                }
            }
            debug!(
                message_type = %message.message_type,
                source = %message.source,
                delivered,
                "Broadcast"
            );
            return Ok(delivered);
        }

        let mailbox = mailboxes
            .get(&message.target)
            .ok_or_else(|| ColonyError::routing(&message.target))?;
        debug!(
            message_type = %message.message_type,
            source = %message.source,
            recipient = %message.target,
            "Delivered"
        );
        Ok(usize::from(mailbox.deliver(message)))
    }

    /// Publish a message still in wire form
    pub async fn publish_value(&self, value: Value) -> bool {
        match Message::from_value(value) {
            Ok(message) => self.publish(message).await,
            Err(e) => {
                warn!(error = %e, "Rejected malformed message");
                false
            }
        }
    }

    /// Non-blocking test-and-set on `key`
    pub async fn request_lock(&self, agent_id: &str, key: &ResourceKey) -> bool {
        let granted = self.locks.acquire(agent_id, key).await;
        if granted {
            debug!(agent_id, key = %key, "Lock granted");
        } else {
            debug!(agent_id, key = %key, "Lock conflict");
        }
        granted
    }

    /// Release everything `agent_id` owns
    pub async fn release_locks(&self, agent_id: &str) -> usize {
        let released = self.locks.release_all(agent_id).await;
        if released > 0 {
            debug!(agent_id, released, "Locks released");
        }
        released
    }

    pub async fn lock_owner(&self, key: &ResourceKey) -> Option<String> {
        self.locks.owner(key).await
    }

    pub async fn locks_held_by(&self, agent_id: &str) -> Vec<ResourceKey> {
        self.locks.held_by(agent_id).await
    }

    pub async fn is_registered(&self, agent_id: &str) -> bool {
        self.mailboxes.read().await.contains_key(agent_id)
    }

    /// Registered agent ids, sorted
    pub async fn registered_agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.mailboxes.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
