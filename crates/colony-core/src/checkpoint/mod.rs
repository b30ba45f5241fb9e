//! Checkpoint store
//!
//! One snapshot per agent id, overwritten in place on every applied
//! transition. Snapshots are read back once at startup and on `resume`.
//!
//! ```text
//! {
//!   "agent_id": "MinerBot-1",
//!   "state": "RUNNING",
//!   "inventory": {"stone": 12},
//!   "timestamp": "2025-10-21T15:30:00Z"
//! }
//! ```
//!
//! A snapshot never resumes work: whatever state was stored, a recovered
//! agent starts `IDLE` with only its inventory restored.

mod file;

pub use file::FileCheckpointer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::AgentState;
use crate::error::ColonyError;
use crate::inventory::Inventory;

/// Persisted agent snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub agent_id: String,
    pub state: AgentState,
    pub inventory: Inventory,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(agent_id: impl Into<String>, state: AgentState, inventory: Inventory) -> Self {
        Self {
            agent_id: agent_id.into(),
            state,
            inventory,
            timestamp: Utc::now(),
        }
    }
}

/// Storage backend for checkpoints
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Write the snapshot, replacing any previous one for the same agent
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), ColonyError>;

    /// Read the snapshot for `agent_id`; `None` if there is none
    async fn load(&self, agent_id: &str) -> Result<Option<Checkpoint>, ColonyError>;

    async fn delete(&self, agent_id: &str) -> Result<(), ColonyError>;

    /// Agent ids with a stored snapshot, sorted
    async fn list(&self) -> Result<Vec<String>, ColonyError>;
}

/// Backend selection for [`create_checkpointer`]
#[derive(Debug, Clone, Default)]
pub enum CheckpointerConfig {
    /// In-memory, not durable
    #[default]
    Memory,

    /// One JSON file per agent
    File {
        /// Directory holding checkpoint files
        path: PathBuf,
        /// Compress with zstd
        compression: bool,
    },
}

/// In-memory checkpointer for tests
#[derive(Debug, Default)]
pub struct MemoryCheckpointer {
    checkpoints: tokio::sync::RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), ColonyError> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.insert(checkpoint.agent_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, agent_id: &str) -> Result<Option<Checkpoint>, ColonyError> {
        Ok(self.checkpoints.read().await.get(agent_id).cloned())
    }

    async fn delete(&self, agent_id: &str) -> Result<(), ColonyError> {
        self.checkpoints.write().await.remove(agent_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, ColonyError> {
        let mut ids: Vec<String> = self.checkpoints.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Create a checkpointer from configuration
pub fn create_checkpointer(config: CheckpointerConfig) -> Arc<dyn Checkpointer> {
    match config {
        CheckpointerConfig::Memory => Arc::new(MemoryCheckpointer::new()),
        CheckpointerConfig::File { path, compression } => {
            Arc::new(FileCheckpointer::new(path, compression))
        }
    }
}

/// Result of a recovery attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered {
    /// Always `IDLE`
    pub state: AgentState,
    pub inventory: Inventory,
    /// Whether a usable snapshot was found
    pub restored: bool,
}

impl Recovered {
    fn fresh() -> Self {
        Self {
            state: AgentState::Idle,
            inventory: Inventory::new(),
            restored: false,
        }
    }
}

/// Best-effort persistence shared by all agents
///
/// Failures are logged and swallowed; nothing here ever fails an agent.
#[derive(Clone)]
pub struct CheckpointStore {
    backend: Arc<dyn Checkpointer>,
}

impl CheckpointStore {
    pub fn new(backend: Arc<dyn Checkpointer>) -> Self {
        Self { backend }
    }

    pub fn from_config(config: CheckpointerConfig) -> Self {
        Self::new(create_checkpointer(config))
    }

    /// In-memory store
    pub fn memory() -> Self {
        Self::from_config(CheckpointerConfig::Memory)
    }

    pub fn backend(&self) -> &Arc<dyn Checkpointer> {
        &self.backend
    }

    /// Snapshot `state` and `inventory`; returns whether the write succeeded
    pub async fn save(&self, agent_id: &str, state: AgentState, inventory: &Inventory) -> bool {
        let checkpoint = Checkpoint::new(agent_id, state, inventory.clone());
        match self.backend.save(&checkpoint).await {
            Ok(()) => {
                debug!(agent_id, state = %state, "Checkpoint saved");
                true
            }
            Err(e) => {
                warn!(agent_id, error = %e, "Checkpoint save failed");
                false
            }
        }
    }

    /// Read back the snapshot for `agent_id`, forcing `IDLE`
    pub async fn load(&self, agent_id: &str) -> Recovered {
        match self.backend.load(agent_id).await {
            Ok(Some(checkpoint)) if checkpoint.agent_id == agent_id => {
                info!(
                    agent_id,
                    stored_state = %checkpoint.state,
                    "Recovered from checkpoint"
                );
                Recovered {
                    state: AgentState::Idle,
                    inventory: checkpoint.inventory,
                    restored: true,
                }
            }
            Ok(Some(checkpoint)) => {
                warn!(
                    agent_id,
                    found = %checkpoint.agent_id,
                    "Checkpoint belongs to another agent, starting fresh"
                );
                Recovered::fresh()
            }
            Ok(None) => {
                debug!(agent_id, "No checkpoint found");
                Recovered::fresh()
            }
            Err(e) => {
                warn!(agent_id, error = %e, "Checkpoint unreadable, starting fresh");
                Recovered::fresh()
            }
        }
    }
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_impl_all!(CheckpointStore: Send, Sync, Clone);

    #[test]
    fn test_checkpoint_wire_format() {
        let inventory: Inventory = [("stone", 12)].into_iter().collect();
        let checkpoint = Checkpoint::new("MinerBot-1", AgentState::Running, inventory);
        let json = serde_json::to_value(&checkpoint).unwrap();

        assert_eq!(json["agent_id"], "MinerBot-1");
        assert_eq!(json["state"], "RUNNING");
        assert_eq!(json["inventory"]["stone"], 12);
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_memory_checkpointer_overwrites() {
        let backend = MemoryCheckpointer::new();
        backend
            .save(&Checkpoint::new("a", AgentState::Running, Inventory::new()))
            .await
            .unwrap();
        backend
            .save(&Checkpoint::new("a", AgentState::Paused, Inventory::new()))
            .await
            .unwrap();

        assert_eq!(backend.list().await.unwrap(), vec!["a"]);
        let loaded = backend.load("a").await.unwrap().unwrap();
        assert_eq!(loaded.state, AgentState::Paused);

        backend.delete("a").await.unwrap();
        assert!(backend.load("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_forces_idle() {
        let store = CheckpointStore::memory();
        let inventory: Inventory = [("stone", 7)].into_iter().collect();
        assert!(store.save("MinerBot-1", AgentState::Running, &inventory).await);

        let recovered = store.load("MinerBot-1").await;
        assert!(recovered.restored);
        assert_eq!(recovered.state, AgentState::Idle);
        assert_eq!(recovered.inventory.count("stone"), 7);
    }

    #[tokio::test]
    async fn test_store_missing_is_fresh() {
        let store = CheckpointStore::memory();
        let recovered = store.load("nobody").await;
        assert!(!recovered.restored);
        assert_eq!(recovered.state, AgentState::Idle);
        assert!(recovered.inventory.is_empty());
    }

    #[tokio::test]
    async fn test_store_rejects_foreign_snapshot() {
        let backend = Arc::new(MemoryCheckpointer::new());
        let mut foreign = Checkpoint::new("a", AgentState::Idle, [("stone", 1)].into_iter().collect());
        foreign.agent_id = "b".into();
        backend.checkpoints.write().await.insert("a".into(), foreign);

        let store = CheckpointStore::new(backend);
        assert!(!store.load("a").await.restored);
    }
}
