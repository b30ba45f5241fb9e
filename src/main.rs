//! # Craft Colony
//!
//! Runs an explorer, a builder and a miner against a shared in-memory world.
//! Type chat commands on stdin to drive them:
//!
//! ```bash
//! cargo run -- --memory-checkpoints
//! /explorer start x=0 y=60 z=0 range=8
//! /miner status
//! /builder update structure=tower
//! ```

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Configuration management
mod config;

/// Wiring of world, bus, store and agents
mod colony;

// =============================================================================
// IMPORTS
// =============================================================================
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::colony::Colony;
use crate::config::Config;

// =============================================================================
// CLI ARGUMENTS
// =============================================================================
#[derive(Parser, Debug)]
#[command(
    name = "craft-colony",
    version = "0.1.0",
    about = "Cooperating explorer, builder and miner agents over a shared message bus",
    long_about = r#"
Craft Colony - agents that survey, mine and build together.

Every line read from stdin is treated as a chat line. Slash commands are
routed to agents:
  /<miner|builder|explorer> <start|pause|resume|stop|update|status|help> [key=value ...]
  /agent <verb>              (default agent: the miner)
  /agent <alias> <verb>

Agents checkpoint their state on every transition and recover their
inventory on restart.

EXAMPLES:
  # Survey around the origin, the builder and miner take it from there
  /explorer start x=0 y=60 z=0 range=8

  # Mine 20 stone with the grid strategy
  /miner start stone=20
  /miner update strategy=grid
"#
)]
struct Args {
    /// Directory for checkpoint files (overrides COLONY_CHECKPOINT_DIR)
    #[arg(long = "checkpoint-dir", value_name = "DIR")]
    checkpoint_dir: Option<PathBuf>,

    /// Keep checkpoints in memory only
    #[arg(
        long = "memory-checkpoints",
        help = "Keep checkpoints in memory (nothing survives a restart)",
        default_value = "false",
        conflicts_with = "checkpoint_dir"
    )]
    memory_checkpoints: bool,

    /// zstd-compress checkpoint files
    #[arg(
        long = "compress",
        help = "Compress checkpoint files with zstd",
        env = "COLONY_CHECKPOINT_COMPRESSION",
        default_value = "false"
    )]
    compress: bool,

    /// Verbose output (debug logging)
    #[arg(
        short = 'v',
        long = "verbose",
        help = "Enable verbose/debug logging",
        default_value = "false"
    )]
    verbose: bool,
}

// =============================================================================
// MAIN FUNCTION
// =============================================================================
/// # Rust Concept: Runtime Flavors
///
/// Agents cooperate through the bus and never need parallelism, so a
/// single-threaded runtime is enough. Every agent is still its own task and
/// interleaves with the others at each `.await`.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose)?;

    info!("Craft Colony starting up...");

    let mut config = Config::from_env()?;
    if let Some(dir) = args.checkpoint_dir {
        info!(dir = %dir.display(), "Using checkpoint directory from command line");
        config.checkpoint_dir = Some(dir);
    }
    if args.memory_checkpoints {
        config.checkpoint_dir = None;
    }
    config.compression |= args.compress;

    config.validate()?;

    info!(
        checkpoints = ?config.checkpoint_dir,
        compression = config.compression,
        surface = config.surface_height,
        "Configuration loaded"
    );

    let colony = Colony::start(&config).await?;
    let outcome = colony.run_until_shutdown().await;

    let reports = colony.shutdown().await;
    for report in &reports {
        info!(
            agent_id = %report.agent_id,
            final_state = %report.final_state,
            quanta = report.quanta,
            transitions = report.transitions.len(),
            "Agent report"
        );
    }

    outcome
}

// =============================================================================
// LOGGING INITIALIZATION
// =============================================================================
/// Initialize the tracing subscriber for structured logging.
///
/// `RUST_LOG` wins when set; otherwise `--verbose` picks debug over info.
fn init_logging(verbose: bool) -> Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true) // Show the module that logged
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
