//! colony-core: cooperating agents over a shared world
//!
//! Several long-running agents coordinate through an in-process message bus
//! and persist their lifecycle state so a restart picks up where they left.
//! - MessageBus: per-agent FIFO mailboxes, broadcast, spatial lock table
//! - CheckpointStore: one snapshot per agent, memory or file backed
//! - Agent trait + runtime: perceive/decide/act loop with a state machine
//! - ExplorerBot, BuilderBot, MinerBot: the survey → build → mine pipeline
//! - ChatListener: turns player chat commands into control messages
//!
//! # Example
//!
//! ```rust,ignore
//! use colony_core::{AgentEnv, CheckpointStore, MemoryWorld, MessageBus, MinerBot, RuntimeConfig};
//!
//! let env = AgentEnv::new(
//!     Arc::new(MessageBus::new()),
//!     CheckpointStore::memory(),
//!     Arc::new(MemoryWorld::default()),
//!     RuntimeConfig::default(),
//! );
//! let miner = MinerBot::new("MinerBot-1", env).await?;
//! let handle = spawn_agent(Box::new(miner), shutdown_rx);
//! ```

pub mod error;
pub mod config;
pub mod message;
pub mod inventory;
pub mod world;
pub mod bus;
pub mod checkpoint;
pub mod agent;
pub mod strategy;
pub mod chat;
pub mod agents;

// Re-exports for convenience
pub use error::{ColonyError, ValidationError};
pub use config::RuntimeConfig;
pub use message::{types, Message, MessageStatus, Payload, BROADCAST, USER};
pub use inventory::{BillOfMaterials, Inventory};
pub use world::{BlockId, MemoryWorld, Position, World};
pub use bus::{LockTable, Mailbox, MessageBus, ResourceKey};
pub use checkpoint::{
    create_checkpointer, Checkpoint, CheckpointStore, Checkpointer, CheckpointerConfig,
    FileCheckpointer, MemoryCheckpointer, Recovered,
};
pub use agent::{
    run_agent, spawn_agent, Agent, AgentCore, AgentEnv, AgentReport, AgentState,
    CommandOutcome, ControlCommand, StateChange, Transition,
};
pub use strategy::{GridMining, MiningStrategy, StrategyOutcome, StrategyRegistry, VerticalMining};
pub use chat::{ChatCommand, ChatListener, CommandParser, ParseError};
pub use agents::{BuilderBot, ExplorerBot, MinerBot, Structure, BUILDER_ID, EXPLORER_ID, MINER_ID};
