//! Error types for the colony runtime
//!
//! Validation and routing failures surface at publish time, checkpoint
//! failures are recovered locally, and domain failures drive an agent into
//! `ERROR` without touching the bus or its peers.

use thiserror::Error;

/// Reasons a message is refused before it reaches any mailbox
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The wire value was not a JSON object
    #[error("Message is not a JSON object")]
    NotAnObject,

    /// One or more required fields are absent
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    /// A required string field is present but empty
    #[error("Field `{0}` must not be empty")]
    EmptyField(&'static str),

    /// The timestamp is not an ISO-8601 instant with a `Z` or offset suffix
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A field has the wrong shape (e.g. a payload that is not an object)
    #[error("Invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Errors that can occur inside the colony runtime
#[derive(Debug, Error)]
pub enum ColonyError {
    /// Malformed message rejected at publish time
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Publish target is not a registered agent
    #[error("Unknown target agent: {target}")]
    Routing { target: String },

    /// Persisted snapshot could not be read back
    #[error("Corrupt checkpoint for {agent_id}: {reason}")]
    CheckpointCorruption { agent_id: String, reason: String },

    /// Checkpoint backend failure (I/O, serialization)
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// An agent's perceive/decide/act failed
    #[error("Domain failure in {agent_id}: {message}")]
    Domain { agent_id: String, message: String },

    /// A capability the agent does not provide was invoked
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// A control command was refused by the agent's domain logic
    #[error("Command rejected: {0}")]
    CommandRejected(String),

    /// World I/O failure
    #[error("World error: {0}")]
    World(String),

    /// Invalid runtime configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ColonyError {
    /// Create a routing error
    pub fn routing(target: impl Into<String>) -> Self {
        Self::Routing {
            target: target.into(),
        }
    }

    /// Create a checkpoint corruption error
    pub fn corruption(agent_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CheckpointCorruption {
            agent_id: agent_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a checkpoint backend error
    pub fn checkpoint(message: impl Into<String>) -> Self {
        Self::Checkpoint(message.into())
    }

    /// Create a domain failure
    pub fn domain(agent_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Domain {
            agent_id: agent_id.into(),
            message: message.into(),
        }
    }

    /// Create a not implemented error
    pub fn not_implemented(capability: impl Into<String>) -> Self {
        Self::NotImplemented(capability.into())
    }

    /// Create a command rejection
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::CommandRejected(reason.into())
    }

    /// Create a world error
    pub fn world(message: impl Into<String>) -> Self {
        Self::World(message.into())
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error should push the owning agent into `ERROR`
    ///
    /// Command rejections are reported back to the user instead.
    pub fn is_agent_fatal(&self) -> bool {
        !matches!(self, ColonyError::CommandRejected(_))
    }
}

#[cfg(test)]
mod tests {
    static_assertions::assert_impl_all!(super::ColonyError: Send, Sync);
    use super::*;

    #[test]
    fn test_missing_fields_display() {
        let err = ValidationError::MissingFields(vec!["status".into(), "timestamp".into()]);
        assert_eq!(err.to_string(), "Missing required fields: status, timestamp");
    }

    #[test]
    fn test_validation_converts_into_colony_error() {
        let err: ColonyError = ValidationError::EmptyField("type").into();
        assert!(matches!(err, ColonyError::Validation(_)));
        assert!(err.to_string().contains("`type`"));
    }

    #[test]
    fn test_routing_error() {
        let err = ColonyError::routing("GhostBot");
        match err {
            ColonyError::Routing { target } => assert_eq!(target, "GhostBot"),
            _ => panic!("Wrong error type"),
        }
    }

    #[test]
    fn test_domain_error_display() {
        let err = ColonyError::domain("MinerBot-1", "pickaxe broke");
        assert_eq!(
            err.to_string(),
            "Domain failure in MinerBot-1: pickaxe broke"
        );
    }

    #[test]
    fn test_is_agent_fatal() {
        assert!(ColonyError::not_implemented("act").is_agent_fatal());
        assert!(ColonyError::domain("a", "b").is_agent_fatal());
        assert!(!ColonyError::rejected("unknown structure").is_agent_fatal());
    }
}
