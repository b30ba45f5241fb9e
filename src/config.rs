//! # Configuration Module
//!
//! Process configuration loaded from environment variables (and `.env`).
//! The library-facing knobs end up in a [`RuntimeConfig`]; the rest decides
//! how the colony is wired together.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use colony_core::{CheckpointerConfig, RuntimeConfig, BUILDER_ID, EXPLORER_ID, MINER_ID};

// =============================================================================
// CONFIGURATION STRUCT
// =============================================================================
/// Main configuration for the colony process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for checkpoint files; `None` keeps checkpoints in memory
    pub checkpoint_dir: Option<PathBuf>,

    /// zstd-compress checkpoint files
    pub compression: bool,

    /// Agent loop timing and coordination
    pub runtime: RuntimeConfig,

    /// Height of the flat in-memory world
    pub surface_height: i32,

    pub miner_id: String,
    pub builder_id: String,
    pub explorer_id: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            checkpoint_dir: Some(PathBuf::from("checkpoints")),
            compression: false,
            runtime: RuntimeConfig::default(),
            surface_height: 64,
            miner_id: MINER_ID.to_string(),
            builder_id: BUILDER_ID.to_string(),
            explorer_id: EXPLORER_ID.to_string(),
        }
    }
}

// =============================================================================
// CONFIGURATION LOADING
// =============================================================================
impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Rust Concept: Early Returns with Context
    ///
    /// Each numeric variable is parsed with `.context(...)`, so a bad value
    /// aborts startup with a message naming the variable instead of a bare
    /// "invalid digit found in string".
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (silently ignore if not found)
        let _ = dotenvy::dotenv();

        let mut config = Config::default();

        if let Ok(val) = env::var("COLONY_CHECKPOINT_DIR") {
            config.checkpoint_dir = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        if let Ok(val) = env::var("COLONY_CHECKPOINT_COMPRESSION") {
            config.compression = parse_flag(&val)
                .context("COLONY_CHECKPOINT_COMPRESSION must be true/false (or 1/0)")?;
        }

        if let Some(timeout) = millis("COLONY_POLL_TIMEOUT_MS")? {
            config.runtime = config.runtime.with_poll_timeout(timeout);
        }
        if let Some(tick) = millis("COLONY_TICK_MS")? {
            config.runtime = config.runtime.with_tick_interval(tick);
        }
        if let Some(pacing) = millis("COLONY_ACT_PACING_MS")? {
            config.runtime = config.runtime.with_act_pacing(pacing);
        }

        if let Ok(val) = env::var("COLONY_SURFACE_HEIGHT") {
            config.surface_height = val
                .parse()
                .context("COLONY_SURFACE_HEIGHT must be an integer block height")?;
        }

        if let Ok(val) = env::var("COLONY_MINER_ID") {
            config.miner_id = val;
        }
        if let Ok(val) = env::var("COLONY_BUILDER_ID") {
            config.builder_id = val;
        }
        if let Ok(val) = env::var("COLONY_EXPLORER_ID") {
            config.explorer_id = val;
        }

        Ok(config)
    }

    /// Validate the configuration before anything is spawned.
    pub fn validate(&self) -> Result<()> {
        self.runtime.validate()?;

        if !(5..=255).contains(&self.surface_height) {
            anyhow::bail!(
                "Surface height must be between 5 and 255, got: {}",
                self.surface_height
            );
        }

        let ids = [&self.miner_id, &self.builder_id, &self.explorer_id];
        if ids.iter().any(|id| id.trim().is_empty()) {
            anyhow::bail!("Agent ids cannot be empty");
        }
        if ids[0] == ids[1] || ids[0] == ids[2] || ids[1] == ids[2] {
            anyhow::bail!("Agent ids must be distinct, got: {:?}", ids);
        }

        Ok(())
    }

    /// Checkpoint backend selection
    pub fn checkpointer(&self) -> CheckpointerConfig {
        match &self.checkpoint_dir {
            Some(path) => CheckpointerConfig::File {
                path: path.clone(),
                compression: self.compression,
            },
            None => CheckpointerConfig::Memory,
        }
    }
}

fn parse_flag(val: &str) -> Result<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("not a boolean: {other}"),
    }
}

fn millis(var: &str) -> Result<Option<Duration>> {
    match env::var(var) {
        Ok(val) => {
            let ms: u64 = val
                .parse()
                .with_context(|| format!("{var} must be a whole number of milliseconds"))?;
            Ok(Some(Duration::from_millis(ms)))
        }
        Err(_) => Ok(None),
    }
}
