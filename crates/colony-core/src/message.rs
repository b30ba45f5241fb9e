//! Message envelope exchanged between agents
//!
//! Every message on the bus carries the same six required fields plus an
//! optional free-form context:
//!
//! ```text
//! {
//!   "type": "<namespace>.<verb>.v<N>",
//!   "source": "<agent-id-or-User>",
//!   "target": "<agent-id-or-broadcast>",
//!   "timestamp": "<ISO-8601 UTC, trailing Z>",
//!   "payload": { ... },
//!   "status": "PENDING|RUNNING|SUCCESS|ERROR|COMPLETED",
//!   "context": { ... }
//! }
//! ```
//!
//! Wire input goes through [`Message::from_value`], which rejects anything
//! incomplete before it can be delivered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Free-form JSON object carried in `payload` and `context`
pub type Payload = serde_json::Map<String, Value>;

/// Target literal that fans a message out to every other agent
pub const BROADCAST: &str = "broadcast";

/// Source used for commands typed by a human
pub const USER: &str = "User";

/// Fields every message must carry (`context` is optional)
pub const REQUIRED_FIELDS: [&str; 6] = ["type", "source", "target", "timestamp", "payload", "status"];

/// Message type names
pub mod types {
    pub const MAP: &str = "map.v1";
    pub const MATERIALS_REQUIREMENTS: &str = "materials.requirements.v1";
    pub const INVENTORY: &str = "inventory.v1";
    pub const INVENTORY_UPDATE: &str = "inventory.update.v1";
    pub const MINING_COMPLETE: &str = "mining.complete.v1";
    pub const BUILD: &str = "build.v1";
    pub const STATE_UPDATE: &str = "state.update.v1";

    /// Prefix shared by all control commands
    pub const COMMAND_PREFIX: &str = "command.";

    /// Build a `command.<verb>.v1` type
    pub fn command(verb: &str) -> String {
        format!("{COMMAND_PREFIX}{verb}.v1")
    }

    /// Whether a type belongs to the known catalogue
    pub fn is_known(message_type: &str) -> bool {
        matches!(
            message_type,
            MAP | MATERIALS_REQUIREMENTS
                | INVENTORY
                | INVENTORY_UPDATE
                | MINING_COMPLETE
                | BUILD
                | STATE_UPDATE
        ) || message_type.starts_with(COMMAND_PREFIX)
    }
}

/// Processing status attached to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    #[default]
    Pending,
    Running,
    Success,
    Error,
    Completed,
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageStatus::Pending => "PENDING",
            MessageStatus::Running => "RUNNING",
            MessageStatus::Success => "SUCCESS",
            MessageStatus::Error => "ERROR",
            MessageStatus::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}

/// Immutable envelope routed by the message bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: String,
    pub source: String,
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Payload,
    pub status: MessageStatus,
    #[serde(default)]
    pub context: Payload,
}

impl Message {
    /// Create a pending message stamped with the current time
    pub fn new(
        message_type: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            message_type: message_type.into(),
            source: source.into(),
            target: target.into(),
            timestamp: Utc::now(),
            payload,
            status: MessageStatus::Pending,
            context: Payload::new(),
        }
    }

    /// Set the status
    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }

    /// Add one context entry
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Override the timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Check the invariants a typed message can still violate
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.message_type.trim().is_empty() {
            return Err(ValidationError::EmptyField("type"));
        }
        if self.source.trim().is_empty() {
            return Err(ValidationError::EmptyField("source"));
        }
        if self.target.trim().is_empty() {
            return Err(ValidationError::EmptyField("target"));
        }
        Ok(())
    }

    /// Parse and validate a message from its wire form
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        let object = value.as_object().ok_or(ValidationError::NotAnObject)?;

        let missing: Vec<String> = REQUIRED_FIELDS
            .iter()
            .filter(|field| !object.contains_key(**field))
            .map(|field| field.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields(missing));
        }

        let timestamp = match &object["timestamp"] {
            Value::String(raw) => parse_timestamp(raw)?,
            other => return Err(ValidationError::InvalidTimestamp(other.to_string())),
        };

        let message = Message {
            message_type: string_field(object, "type")?,
            source: string_field(object, "source")?,
            target: string_field(object, "target")?,
            timestamp,
            payload: object_field(object, "payload")?,
            status: serde_json::from_value(object["status"].clone()).map_err(|e| {
                ValidationError::InvalidField {
                    field: "status",
                    reason: e.to_string(),
                }
            })?,
            context: match object.get("context") {
                None | Some(Value::Null) => Payload::new(),
                Some(_) => object_field(object, "context")?,
            },
        };

        message.validate()?;
        Ok(message)
    }

    /// Wire form of this message
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Whether this message is a control command
    pub fn is_command(&self) -> bool {
        self.message_type.starts_with(types::COMMAND_PREFIX)
    }

    /// Whether this message fans out to every other agent
    pub fn is_broadcast(&self) -> bool {
        self.target == BROADCAST
    }

    /// The `<verb>` of a `command.<verb>.v<N>` type
    pub fn command_verb(&self) -> Option<&str> {
        let rest = self.message_type.strip_prefix(types::COMMAND_PREFIX)?;
        let (verb, version) = rest.rsplit_once('.')?;
        if verb.is_empty() || !is_version(version) {
            return None;
        }
        Some(verb)
    }

    /// Whether the type ends in a `.v<N>` version segment
    pub fn is_versioned(&self) -> bool {
        self.message_type
            .rsplit_once('.')
            .map(|(_, version)| is_version(version))
            .unwrap_or(false)
    }
}

fn is_version(segment: &str) -> bool {
    segment
        .strip_prefix('v')
        .map(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// Parse an ISO-8601 instant; a `Z` or explicit offset is mandatory
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| ValidationError::InvalidTimestamp(format!("{raw}: {e}")))
}

fn string_field(
    object: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<String, ValidationError> {
    match &object[field] {
        Value::String(s) => Ok(s.clone()),
        other => Err(ValidationError::InvalidField {
            field,
            reason: format!("expected string, found {other}"),
        }),
    }
}

fn object_field(
    object: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<Payload, ValidationError> {
    match &object[field] {
        Value::Object(map) => Ok(map.clone()),
        other => Err(ValidationError::InvalidField {
            field,
            reason: format!("expected object, found {other}"),
        }),
    }
}
