//! Agent lifecycle
//!
//! An agent is a long-running task that alternates between three phases:
//!
//! - `perceive`: absorb one incoming data message
//! - `decide`: optionally request a state change from the current state
//! - `act`: do one unit of world work while `RUNNING`
//!
//! The runtime in [`runtime`] drives these phases, routes control commands
//! through the table in [`command`] and turns failures into `ERROR`.

mod command;
mod core;
pub mod runtime;
mod state;

pub use self::command::{CommandOutcome, ControlCommand, HELP_TEXT};
pub use self::core::{AgentCore, AgentEnv};
pub use self::runtime::{run_agent, spawn_agent, AgentReport};
pub use self::state::{AgentState, StateChange, Transition};

use async_trait::async_trait;

use crate::error::ColonyError;
use crate::message::{Message, Payload};

/// Domain behaviour plugged into the agent runtime
#[async_trait]
pub trait Agent: Send + Sync {
    fn core(&self) -> &AgentCore;

    fn core_mut(&mut self) -> &mut AgentCore;

    fn agent_id(&self) -> &str {
        self.core().agent_id()
    }

    /// Absorb one data message
    async fn perceive(&mut self, message: Message) -> Result<(), ColonyError> {
        Err(ColonyError::not_implemented(format!(
            "{} cannot perceive {}",
            self.core().agent_id(),
            message.message_type
        )))
    }

    /// Request a transition based on current state; applied by the runtime
    fn decide(&self) -> Result<Option<StateChange>, ColonyError> {
        Ok(None)
    }

    /// One unit of world work
    async fn act(&mut self) -> Result<(), ColonyError> {
        Err(ColonyError::not_implemented(format!(
            "{} cannot act",
            self.core().agent_id()
        )))
    }

    /// Take parameters from an accepted `start` or `update` command
    ///
    /// Return [`ColonyError::CommandRejected`] to refuse the parameters without
    /// failing the agent.
    async fn on_control(
        &mut self,
        _command: &ControlCommand,
        _params: &Payload,
    ) -> Result<(), ColonyError> {
        Ok(())
    }

    /// Text posted in reply to `status`
    fn describe(&self) -> String {
        self.core().status_line()
    }
}
