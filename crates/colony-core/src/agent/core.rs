//! Shared agent machinery
//!
//! [`AgentCore`] owns what every agent has in common (id, lifecycle state,
//! inventory, transition log) plus handles to the bus, the checkpoint store
//! and the world. Every state change goes through [`AgentCore::set_state`],
//! which applies its side effects in a fixed order:
//!
//! 1. record and log the transition
//! 2. release locks when entering a terminal state
//! 3. persist a checkpoint
//! 4. broadcast `state.update.v1` (when enabled)

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, info_span, warn, Span};

use super::{AgentState, Transition};
use crate::bus::{Mailbox, MessageBus, ResourceKey};
use crate::checkpoint::{CheckpointStore, Recovered};
use crate::config::RuntimeConfig;
use crate::inventory::Inventory;
use crate::message::{types, Message, Payload, BROADCAST};
use crate::world::World;

/// Collaborators handed to every agent at construction
#[derive(Clone)]
pub struct AgentEnv {
    pub bus: Arc<MessageBus>,
    pub checkpoints: CheckpointStore,
    pub world: Arc<dyn World>,
    pub config: RuntimeConfig,
}

impl AgentEnv {
    pub fn new(
        bus: Arc<MessageBus>,
        checkpoints: CheckpointStore,
        world: Arc<dyn World>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            bus,
            checkpoints,
            world,
            config,
        }
    }
}

/// State and capabilities common to all agents
pub struct AgentCore {
    agent_id: String,
    state: AgentState,
    inventory: Inventory,
    transitions: Vec<Transition>,
    bus: Arc<MessageBus>,
    checkpoints: CheckpointStore,
    world: Arc<dyn World>,
    config: RuntimeConfig,
    mailbox: Mailbox,
    span: Span,
}

impl AgentCore {
    /// Register `agent_id` on the bus and build its core
    pub async fn new(agent_id: impl Into<String>, env: AgentEnv) -> Self {
        let agent_id = agent_id.into();
        let mailbox = env.bus.subscribe(&agent_id).await;
        let span = info_span!("agent", agent_id = %agent_id);
        Self {
            agent_id,
            state: AgentState::Idle,
            inventory: Inventory::new(),
            transitions: Vec::new(),
            bus: env.bus,
            checkpoints: env.checkpoints,
            world: env.world,
            config: env.config,
            mailbox,
            span,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn inventory_mut(&mut self) -> &mut Inventory {
        &mut self.inventory
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn world(&self) -> &dyn World {
        self.world.as_ref()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Apply a transition; returns false if `next` is already the state
    pub async fn set_state(&mut self, next: AgentState, reason: &str) -> bool {
        let previous = self.state;
        if previous == next {
            return false;
        }

        self.state = next;
        self.transitions.push(Transition {
            from: previous,
            to: next,
            reason: reason.to_string(),
            at: Utc::now(),
        });
        info!(
            agent_id = %self.agent_id,
            from = %previous,
            to = %next,
            reason,
            "TRANSITION"
        );

        if next.is_terminal() {
            self.bus.release_locks(&self.agent_id).await;
        }

        self.save_checkpoint().await;

        if self.config.notify_peers {
            let mut payload = Payload::new();
            payload.insert("new_state".into(), json!(next));
            let update = Message::new(types::STATE_UPDATE, &self.agent_id, BROADCAST, payload)
                .with_context("previous_state", json!(previous))
                .with_context("reason", reason);
            self.bus.publish(update).await;
        }

        true
    }

    /// Snapshot the current state and inventory
    pub async fn save_checkpoint(&self) -> bool {
        self.checkpoints
            .save(&self.agent_id, self.state, &self.inventory)
            .await
    }

    /// Load the stored snapshot without adopting it
    pub async fn load_checkpoint(&self) -> Recovered {
        self.checkpoints.load(&self.agent_id).await
    }

    /// Startup recovery: adopt the stored inventory, start `IDLE`
    pub async fn restore(&mut self) -> bool {
        let recovered = self.load_checkpoint().await;
        self.state = recovered.state;
        if recovered.restored {
            self.inventory = recovered.inventory;
        }
        recovered.restored
    }

    /// Publish a message from this agent
    pub async fn send(&self, message_type: &str, target: &str, payload: Payload) -> bool {
        self.send_message(Message::new(message_type, &self.agent_id, target, payload))
            .await
    }

    /// Publish a pre-built message (status or context already set)
    pub async fn send_message(&self, message: Message) -> bool {
        self.bus.publish(message).await
    }

    /// Lock key of the region containing world column `(x, z)`
    pub fn region_key(&self, x: i32, z: i32) -> ResourceKey {
        ResourceKey::region_of(x, z, self.config.region_size)
    }

    pub async fn request_lock(&self, key: &ResourceKey) -> bool {
        self.bus.request_lock(&self.agent_id, key).await
    }

    pub async fn release_locks(&self) -> usize {
        self.bus.release_locks(&self.agent_id).await
    }

    /// Post on the chat side channel, prefixed with the agent id
    pub async fn report(&self, text: &str) {
        let line = format!("[{}] {}", self.agent_id, text);
        if let Err(e) = self.world.post_text(&line).await {
            warn!(agent_id = %self.agent_id, error = %e, "Chat report failed");
        }
    }

    /// Deliberate pause between units of world work
    pub async fn pace(&self) {
        if !self.config.act_pacing.is_zero() {
            tokio::time::sleep(self.config.act_pacing).await;
        }
    }

    /// One-line status for `status` replies
    pub fn status_line(&self) -> String {
        format!(
            "{} | inventory {}",
            self.state,
            Value::Object(self.inventory.to_payload())
        )
    }
}

impl std::fmt::Debug for AgentCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCore")
            .field("agent_id", &self.agent_id)
            .field("state", &self.state)
            .field("inventory", &self.inventory)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::MemoryWorld;

    async fn core(bus: &Arc<MessageBus>, store: &CheckpointStore) -> AgentCore {
        let env = AgentEnv::new(
            bus.clone(),
            store.clone(),
            Arc::new(MemoryWorld::default()),
            RuntimeConfig::fast(),
        );
        AgentCore::new("MinerBot-1", env).await
    }

    #[tokio::test]
    async fn test_same_state_is_noop() {
        let bus = Arc::new(MessageBus::new());
        let store = CheckpointStore::memory();
        let mut core = core(&bus, &store).await;

        assert!(!core.set_state(AgentState::Idle, "noop").await);
        assert!(core.transitions().is_empty());
        assert!(store.backend().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transition_side_effects() {
        let bus = Arc::new(MessageBus::new());
        let store = CheckpointStore::memory();
        let observer = bus.subscribe("observer").await;
        let mut core = core(&bus, &store).await;
        core.inventory_mut().add("stone", 3);

        assert!(core.set_state(AgentState::Running, "start command").await);

        let transition = &core.transitions()[0];
        assert_eq!(transition.from, AgentState::Idle);
        assert_eq!(transition.to, AgentState::Running);
        assert_eq!(transition.reason, "start command");

        let stored = store.backend().load("MinerBot-1").await.unwrap().unwrap();
        assert_eq!(stored.state, AgentState::Running);
        assert_eq!(stored.inventory.count("stone"), 3);

        let update = observer.try_recv().await.unwrap();
        assert_eq!(update.message_type, types::STATE_UPDATE);
        assert_eq!(update.source, "MinerBot-1");
        assert_eq!(update.target, BROADCAST);
        assert_eq!(update.payload["new_state"], "RUNNING");
        assert_eq!(update.context["previous_state"], "IDLE");
        assert_eq!(update.context["reason"], "start command");
    }

    #[tokio::test]
    async fn test_terminal_state_releases_locks() {
        let bus = Arc::new(MessageBus::new());
        let store = CheckpointStore::memory();
        let mut core = core(&bus, &store).await;

        let key = core.region_key(100, 100);
        assert!(core.request_lock(&key).await);
        core.set_state(AgentState::Running, "start").await;
        assert_eq!(bus.lock_owner(&key).await.as_deref(), Some("MinerBot-1"));

        core.set_state(AgentState::Error, "boom").await;
        assert!(bus.lock_owner(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_notify_peers_disabled() {
        let bus = Arc::new(MessageBus::new());
        let observer = bus.subscribe("observer").await;
        let env = AgentEnv::new(
            bus.clone(),
            CheckpointStore::memory(),
            Arc::new(MemoryWorld::default()),
            RuntimeConfig::fast().with_notify_peers(false),
        );
        let mut core = AgentCore::new("quiet", env).await;

        core.set_state(AgentState::Running, "start").await;
        assert!(observer.is_empty());
    }

    #[tokio::test]
    async fn test_restore_adopts_inventory() {
        let bus = Arc::new(MessageBus::new());
        let store = CheckpointStore::memory();
        store
            .save("MinerBot-1", AgentState::Running, &[("stone", 9)].into_iter().collect())
            .await;

        let mut core = core(&bus, &store).await;
        assert!(core.restore().await);
        assert_eq!(core.state(), AgentState::Idle);
        assert_eq!(core.inventory().count("stone"), 9);
    }

    #[tokio::test]
    async fn test_report_goes_to_chat() {
        let bus = Arc::new(MessageBus::new());
        let world = Arc::new(MemoryWorld::default());
        let env = AgentEnv::new(
            bus,
            CheckpointStore::memory(),
            world.clone(),
            RuntimeConfig::fast(),
        );
        let core = AgentCore::new("MinerBot-1", env).await;

        core.report("hello").await;
        assert_eq!(world.posted().await, vec!["[MinerBot-1] hello"]);
    }
}
