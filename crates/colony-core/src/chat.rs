//! Chat command source
//!
//! Players drive the colony by typing slash commands in the game chat:
//!
//! ```text
//! /miner start stone=20 x=10 z=-4     → MinerBot-1   command.start.v1
//! /builder update structure=tower     → BuilderBot-1 command.update.v1
//! /agent status                       → default agent command.status.v1
//! /agent explorer start range=8       → ExplorerBot-1 command.start.v1
//! /agent                              → default agent command.help.v1
//! ```
//!
//! `key=value` parameters become the payload; integer values are sent as
//! numbers. Lines that do not start with `/` are ordinary chat and ignored.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::MessageBus;
use crate::error::ColonyError;
use crate::message::{types, Message, Payload, USER};
use crate::world::World;

static PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)=(.*)$").expect("static regex")
});

/// Prefix addressing whichever agent is the default
const GENERIC_PREFIX: &str = "agent";

/// Verbs accepted directly after `/agent`
const VERBS: [&str; 7] = ["start", "pause", "resume", "stop", "update", "status", "help"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown command prefix /{0}")]
    UnknownPrefix(String),
}

/// A parsed chat command
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCommand {
    pub target: String,
    pub verb: String,
    pub params: Payload,
}

impl ChatCommand {
    /// `command.<verb>.v1` from `User`, remembering the chat line
    pub fn into_message(self, source_chat: &str) -> Message {
        Message::new(types::command(&self.verb), USER, self.target, self.params)
            .with_context("source_chat", source_chat)
    }
}

/// Turns chat lines into commands using an alias → agent id table
#[derive(Debug, Clone)]
pub struct CommandParser {
    aliases: BTreeMap<String, String>,
    default_agent: String,
}

impl CommandParser {
    pub fn new(default_agent: impl Into<String>) -> Self {
        Self {
            aliases: BTreeMap::new(),
            default_agent: default_agent.into(),
        }
    }

    /// Route `/<alias> ...` to `agent_id`
    pub fn with_alias(mut self, alias: impl Into<String>, agent_id: impl Into<String>) -> Self {
        self.aliases
            .insert(alias.into().to_lowercase(), agent_id.into());
        self
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    /// `Ok(None)` for ordinary chat
    pub fn parse(&self, line: &str) -> Result<Option<ChatCommand>, ParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(prefix) = parts.first().and_then(|p| p.strip_prefix('/')) else {
            return Ok(None);
        };
        let prefix = prefix.to_lowercase();
        let word = |i: usize| parts.get(i).map(|p| p.to_lowercase());

        let (target, verb, params_from) = if let Some(agent_id) = self.aliases.get(&prefix) {
            match word(1) {
                Some(verb) => (agent_id.clone(), verb, 2),
                None => (agent_id.clone(), "help".to_string(), parts.len()),
            }
        } else if prefix == GENERIC_PREFIX {
            match (word(1), word(2)) {
                (Some(verb), _) if VERBS.contains(&verb.as_str()) => {
                    (self.default_agent.clone(), verb, 2)
                }
                (Some(alias), Some(verb)) if self.aliases.contains_key(&alias) => {
                    (self.aliases[&alias].clone(), verb, 3)
                }
                _ => (self.default_agent.clone(), "help".to_string(), parts.len()),
            }
        } else {
            return Err(ParseError::UnknownPrefix(prefix));
        };

        let params = parts
            .iter()
            .skip(params_from)
            .filter_map(|part| PARAM.captures(part))
            .map(|caps| {
                let value = caps[2]
                    .parse::<i64>()
                    .map(Value::from)
                    .unwrap_or_else(|_| Value::from(&caps[2]));
                (caps[1].to_string(), value)
            })
            .collect();

        debug!(recipient = %target, verb = %verb, "Parsed chat command");
        Ok(Some(ChatCommand {
            target,
            verb,
            params,
        }))
    }
}

/// Polls the world chat and publishes parsed commands
pub struct ChatListener {
    world: Arc<dyn World>,
    bus: Arc<MessageBus>,
    parser: CommandParser,
    interval: Duration,
}

impl ChatListener {
    pub fn new(world: Arc<dyn World>, bus: Arc<MessageBus>, parser: CommandParser) -> Self {
        Self {
            world,
            bus,
            parser,
            interval: Duration::from_millis(50),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Parse and publish one line; returns whether a command was delivered
    pub async fn handle_line(&self, line: &str) -> bool {
        let command = match self.parser.parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return false,
            Err(e) => {
                warn!(line, error = %e, "Unparsable chat command");
                self.reply(&e.to_string()).await;
                return false;
            }
        };

        let target = command.target.clone();
        match self.bus.try_publish(command.into_message(line)).await {
            Ok(_) => {
                info!(line, recipient = %target, "Chat command published");
                true
            }
            Err(ColonyError::Routing { target }) => {
                self.reply(&format!("no agent named {target}")).await;
                false
            }
            Err(e) => {
                warn!(line, error = %e, "Chat command rejected");
                self.reply(&e.to_string()).await;
                false
            }
        }
    }

    /// Drain pending chat lines; returns how many commands were delivered
    pub async fn poll_once(&self) -> Result<usize, ColonyError> {
        let mut delivered = 0;
        for line in self.world.poll_chat().await? {
            if self.handle_line(&line).await {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Chat listener started");
        loop {
            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "Chat poll failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Chat listener stopped");
    }

    async fn reply(&self, text: &str) {
        if let Err(e) = self.world.post_text(text).await {
            warn!(error = %e, "Chat reply failed");
        }
    }
}
