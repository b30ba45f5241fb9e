//! Control commands and the control sub-state-machine

use std::fmt;

use super::AgentState;
use crate::message::Message;

/// A control verb addressed to an agent (`command.<verb>.v1`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Pause,
    Resume,
    Stop,
    Update,
    Status,
    Help,
    Other(String),
}

impl ControlCommand {
    pub fn from_verb(verb: &str) -> Self {
        match verb {
            "start" => ControlCommand::Start,
            "pause" => ControlCommand::Pause,
            "resume" => ControlCommand::Resume,
            "stop" => ControlCommand::Stop,
            "update" => ControlCommand::Update,
            "status" => ControlCommand::Status,
            "help" => ControlCommand::Help,
            other => ControlCommand::Other(other.to_string()),
        }
    }

    /// `None` unless the message is a well-formed `command.<verb>.v<N>`
    pub fn from_message(message: &Message) -> Option<Self> {
        message.command_verb().map(Self::from_verb)
    }

    pub fn verb(&self) -> &str {
        match self {
            ControlCommand::Start => "start",
            ControlCommand::Pause => "pause",
            ControlCommand::Resume => "resume",
            ControlCommand::Stop => "stop",
            ControlCommand::Update => "update",
            ControlCommand::Status => "status",
            ControlCommand::Help => "help",
            ControlCommand::Other(verb) => verb,
        }
    }

    /// What this command means for an agent currently in `state`
    pub fn resolve(&self, state: AgentState) -> CommandOutcome {
        use AgentState::*;
        match (self, state) {
            (ControlCommand::Status, _) => CommandOutcome::ReportStatus,
            (ControlCommand::Help, _) => CommandOutcome::ReportHelp,
            (_, Stopped | Error) => CommandOutcome::Rejected,
            (ControlCommand::Start, Idle) => CommandOutcome::Start,
            (ControlCommand::Pause, Running) => CommandOutcome::Pause,
            (ControlCommand::Resume, Paused) => CommandOutcome::Resume,
            (ControlCommand::Stop, _) => CommandOutcome::Stop,
            (ControlCommand::Update, _) => CommandOutcome::Update,
            _ => CommandOutcome::Rejected,
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Resolved effect of a control command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// IDLE → RUNNING
    Start,
    /// Checkpoint, then RUNNING → PAUSED
    Pause,
    /// Reload checkpoint, then PAUSED → RUNNING
    Resume,
    /// → STOPPED
    Stop,
    /// Hand parameters to the agent, no state change
    Update,
    ReportStatus,
    ReportHelp,
    /// Not valid for the current state
    Rejected,
}

/// Text posted in reply to `help`
pub const HELP_TEXT: &str =
    "Commands: start [k=v ...], pause, resume, stop, update [k=v ...], status, help";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{types, Payload, USER};

    #[test]
    fn test_command_table() {
        use AgentState::*;
        let cases = [
            (ControlCommand::Start, Idle, CommandOutcome::Start),
            (ControlCommand::Start, Running, CommandOutcome::Rejected),
            (ControlCommand::Pause, Running, CommandOutcome::Pause),
            (ControlCommand::Pause, Idle, CommandOutcome::Rejected),
            (ControlCommand::Resume, Paused, CommandOutcome::Resume),
            (ControlCommand::Resume, Running, CommandOutcome::Rejected),
            (ControlCommand::Stop, Waiting, CommandOutcome::Stop),
            (ControlCommand::Stop, Paused, CommandOutcome::Stop),
            (ControlCommand::Stop, Stopped, CommandOutcome::Rejected),
            (ControlCommand::Update, Waiting, CommandOutcome::Update),
            (ControlCommand::Update, Error, CommandOutcome::Rejected),
            (ControlCommand::Status, Error, CommandOutcome::ReportStatus),
            (ControlCommand::Help, Idle, CommandOutcome::ReportHelp),
            (ControlCommand::Other("dance".into()), Idle, CommandOutcome::Rejected),
        ];
        for (command, state, expected) in cases {
            assert_eq!(command.resolve(state), expected, "{command} in {state}");
        }
    }

    #[test]
    fn test_from_message() {
        let msg = Message::new(types::command("resume"), USER, "MinerBot-1", Payload::new());
        assert_eq!(ControlCommand::from_message(&msg), Some(ControlCommand::Resume));

        let msg = Message::new(types::command("dance"), USER, "MinerBot-1", Payload::new());
        assert_eq!(
            ControlCommand::from_message(&msg),
            Some(ControlCommand::Other("dance".into()))
        );

        let msg = Message::new(types::MAP, "ExplorerBot-1", "BuilderBot-1", Payload::new());
        assert_eq!(ControlCommand::from_message(&msg), None);
    }
}
