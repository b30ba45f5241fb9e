//! Agent lifecycle states

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an agent
///
/// ```text
///   IDLE ──start──▶ RUNNING ──pause──▶ PAUSED
///                   │  ▲   ◀──resume──
///                   ▼  │
///                  WAITING
///
///   (non-terminal) ──stop──▶ STOPPED
///   (non-terminal) ──failure──▶ ERROR
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    #[default]
    Idle,
    Running,
    Paused,
    Waiting,
    Stopped,
    Error,
}

impl AgentState {
    /// Terminal states end the agent loop
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Stopped | AgentState::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "IDLE",
            AgentState::Running => "RUNNING",
            AgentState::Paused => "PAUSED",
            AgentState::Waiting => "WAITING",
            AgentState::Stopped => "STOPPED",
            AgentState::Error => "ERROR",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One applied state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: AgentState,
    pub to: AgentState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// A transition requested by `decide`, applied by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub next: AgentState,
    pub reason: String,
}

impl StateChange {
    pub fn new(next: AgentState, reason: impl Into<String>) -> Self {
        Self {
            next,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(AgentState::Stopped.is_terminal());
        assert!(AgentState::Error.is_terminal());
        assert!(!AgentState::Waiting.is_terminal());
        assert!(!AgentState::Idle.is_terminal());
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_value(AgentState::Waiting).unwrap(), "WAITING");
        let state: AgentState = serde_json::from_value("PAUSED".into()).unwrap();
        assert_eq!(state, AgentState::Paused);
        assert_eq!(AgentState::default().to_string(), "IDLE");
    }

    #[test]
    fn test_unknown_state_rejected() {
        assert!(serde_json::from_value::<AgentState>("SLEEPING".into()).is_err());
    }
}
