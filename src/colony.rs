//! # Colony Bootstrap
//!
//! Builds the shared world, bus and checkpoint store, registers the three
//! agents and runs them until Ctrl-C or end of input.
//!
//! ```text
//!  stdin ──▶ world chat ──▶ ChatListener ──▶ MessageBus ──▶ agents
//!                                                 ▲             │
//!                                                 └─────────────┘
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use colony_core::{
    spawn_agent, AgentEnv, AgentReport, BuilderBot, ChatListener, CheckpointStore, CommandParser,
    ExplorerBot, MemoryWorld, MessageBus, MinerBot,
};

use crate::config::Config;

/// Everything the running colony owns
pub struct Colony {
    world: Arc<MemoryWorld>,
    bus: Arc<MessageBus>,
    agents: Vec<JoinHandle<AgentReport>>,
    listener: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl Colony {
    /// Wire and spawn every agent plus the chat listener.
    ///
    /// # Rust Concept: Trait Objects
    ///
    /// The three bots are different types, but `spawn_agent` takes a
    /// `Box<dyn Agent>`, so they all run through the same loop.
    pub async fn start(config: &Config) -> Result<Self> {
        let world = Arc::new(MemoryWorld::new(config.surface_height));
        let bus = Arc::new(MessageBus::new());
        let store = CheckpointStore::from_config(config.checkpointer());
        let env = AgentEnv::new(bus.clone(), store, world.clone(), config.runtime.clone());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let explorer = ExplorerBot::new(&config.explorer_id, env.clone())
            .await
            .with_builder(&config.builder_id);
        let builder = BuilderBot::new(&config.builder_id, env.clone())
            .await
            .with_miner(&config.miner_id);
        let miner = MinerBot::new(&config.miner_id, env)
            .await
            .context("Failed to create miner")?;

        let agents = vec![
            spawn_agent(Box::new(explorer), shutdown_rx.clone()),
            spawn_agent(Box::new(builder), shutdown_rx.clone()),
            spawn_agent(Box::new(miner), shutdown_rx.clone()),
        ];

        let parser = CommandParser::new(&config.miner_id)
            .with_alias("miner", &config.miner_id)
            .with_alias("builder", &config.builder_id)
            .with_alias("explorer", &config.explorer_id);
        let listener = ChatListener::new(world.clone(), bus.clone(), parser);
        let listener = tokio::spawn(listener.run(shutdown_rx));

        info!(agents = ?bus.registered_agents().await, "Colony started");
        Ok(Self {
            world,
            bus,
            agents,
            listener,
            shutdown,
        })
    }

    /// Feed stdin lines into the world chat until EOF or Ctrl-C
    pub async fn run_until_shutdown(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line.context("Failed to read from stdin")? {
                        Some(line) if !line.trim().is_empty() => self.world.push_chat(line).await,
                        Some(_) => {}
                        None => {
                            info!("End of input");
                            return Ok(());
                        }
                    }
                }
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed to listen for Ctrl-C")?;
                    info!("Interrupted");
                    return Ok(());
                }
            }
        }
    }

    /// Signal every task and collect the agents' final reports
    pub async fn shutdown(self) -> Vec<AgentReport> {
        if self.shutdown.send(true).is_err() {
            warn!("Every task already stopped");
        }

        let mut reports = Vec::with_capacity(self.agents.len());
        for handle in self.agents {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(error = %e, "Agent task failed to join"),
            }
        }
        if let Err(e) = self.listener.await {
            warn!(error = %e, "Chat listener failed to join");
        }

        let mut held = 0;
        for id in self.bus.registered_agents().await {
            held += self.bus.locks_held_by(&id).await.len();
        }
        info!(agents = reports.len(), locks_held = held, "Colony stopped");
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colony_core::AgentState;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.checkpoint_dir = Some(dir.path().to_path_buf());
        config.runtime = colony_core::RuntimeConfig::fast();

        let colony = Colony::start(&config).await.unwrap();
        colony.world.push_chat("/miner status").await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let reports = colony.shutdown().await;
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.final_state == AgentState::Stopped));
        assert!(dir.path().join("MinerBot-1.json").exists());
    }
}
