//! Runtime configuration
//!
//! Timing and coordination knobs shared by every agent loop.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ColonyError;

/// Agent runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Bounded wait on the mailbox per quantum
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,

    /// Pause between two quanta of the same agent
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Deliberate delay inside `act` after a unit of world work
    #[serde(with = "humantime_serde")]
    pub act_pacing: Duration,

    /// Publish `state.update.v1` on every applied transition
    pub notify_peers: bool,

    /// Edge length (in blocks) of the square regions used as lock keys
    pub region_size: i32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            tick_interval: Duration::from_millis(100),
            act_pacing: Duration::from_millis(500),
            notify_peers: true,
            region_size: 16,
        }
    }
}

impl RuntimeConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Near-zero timings, used by tests and demos
    pub fn fast() -> Self {
        Self {
            poll_timeout: Duration::from_millis(10),
            tick_interval: Duration::ZERO,
            act_pacing: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Set the mailbox poll timeout
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the pause between quanta
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the pacing delay inside `act`
    pub fn with_act_pacing(mut self, pacing: Duration) -> Self {
        self.act_pacing = pacing;
        self
    }

    /// Enable or disable `state.update.v1` notifications
    pub fn with_notify_peers(mut self, enabled: bool) -> Self {
        self.notify_peers = enabled;
        self
    }

    /// Set the lock region size
    pub fn with_region_size(mut self, size: i32) -> Self {
        self.region_size = size.max(1);
        self
    }

    /// Reject configurations the runtime cannot honour
    pub fn validate(&self) -> Result<(), ColonyError> {
        if self.poll_timeout.is_zero() {
            return Err(ColonyError::config("poll_timeout must be greater than zero"));
        }
        if self.region_size < 1 {
            return Err(ColonyError::config("region_size must be at least 1"));
        }
        Ok(())
    }
}
