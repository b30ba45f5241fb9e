//! World I/O capability
//!
//! Agents read terrain, place and clear blocks and talk to players through
//! the [`World`] trait. [`MemoryWorld`] is a flat in-memory terrain used by
//! tests and by the CLI when no game server is attached.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::ColonyError;

/// Integer block coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Numeric block id, as used by the game protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u16);

impl BlockId {
    pub const AIR: BlockId = BlockId(0);
    pub const STONE: BlockId = BlockId(1);
    pub const GRASS: BlockId = BlockId(2);
    pub const DIRT: BlockId = BlockId(3);
    pub const COBBLESTONE: BlockId = BlockId(4);
    pub const BEDROCK: BlockId = BlockId(7);

    pub fn is_air(&self) -> bool {
        *self == BlockId::AIR
    }

    /// Block that cannot be mined
    pub fn is_unbreakable(&self) -> bool {
        *self == BlockId::BEDROCK
    }

    /// Material name collected when this block is mined
    ///
    /// Grass drops dirt; unknown ids are reported by number.
    pub fn material(&self) -> Option<String> {
        match *self {
            BlockId::AIR | BlockId::BEDROCK => None,
            BlockId::STONE => Some("stone".into()),
            BlockId::GRASS | BlockId::DIRT => Some("dirt".into()),
            BlockId::COBBLESTONE => Some("cobblestone".into()),
            BlockId(id) => Some(format!("block_{id}")),
        }
    }

    /// Block placed when building with a material
    pub fn for_material(material: &str) -> Option<BlockId> {
        match material {
            "stone" => Some(BlockId::STONE),
            "dirt" => Some(BlockId::DIRT),
            "cobblestone" => Some(BlockId::COBBLESTONE),
            _ => None,
        }
    }
}

/// World I/O used by agents and strategies
#[async_trait]
pub trait World: Send + Sync {
    /// Y of the highest non-air block in the column
    async fn get_height(&self, x: i32, z: i32) -> Result<i32, ColonyError>;

    async fn get_block(&self, pos: Position) -> Result<BlockId, ColonyError>;

    async fn set_block(&self, pos: Position, block: BlockId) -> Result<(), ColonyError>;

    /// Current tile position of the player
    async fn player_position(&self) -> Result<Position, ColonyError>;

    /// Side channel back to the humans (in-game chat)
    async fn post_text(&self, text: &str) -> Result<(), ColonyError>;

    /// Chat lines posted since the last poll
    async fn poll_chat(&self) -> Result<Vec<String>, ColonyError>;
}

/// Highest Y the flat world stores
pub const WORLD_TOP: i32 = 255;

/// Flat in-memory world
///
/// Layers from the bottom: bedrock at y=0, stone, three layers of dirt and a
/// grass top at `surface - 1`. Everything from `surface` up is air unless
/// overridden by `set_block`.
pub struct MemoryWorld {
    surface: i32,
    overrides: RwLock<HashMap<Position, BlockId>>,
    player: RwLock<Position>,
    chat_inbox: RwLock<VecDeque<String>>,
    chat_outbox: RwLock<Vec<String>>,
}

impl MemoryWorld {
    pub fn new(surface: i32) -> Self {
        let surface = surface.clamp(5, WORLD_TOP);
        Self {
            surface,
            overrides: RwLock::new(HashMap::new()),
            player: RwLock::new(Position::new(0, surface, 0)),
            chat_inbox: RwLock::new(VecDeque::new()),
            chat_outbox: RwLock::new(Vec::new()),
        }
    }

    pub fn surface(&self) -> i32 {
        self.surface
    }

    fn natural_block(&self, y: i32) -> BlockId {
        match y {
            y if y <= 0 => BlockId::BEDROCK,
            y if y >= self.surface => BlockId::AIR,
            y if y == self.surface - 1 => BlockId::GRASS,
            y if y >= self.surface - 4 => BlockId::DIRT,
            _ => BlockId::STONE,
        }
    }

    /// Queue a chat line as if a player had typed it
    pub async fn push_chat(&self, line: impl Into<String>) {
        self.chat_inbox.write().await.push_back(line.into());
    }

    /// Everything posted through `post_text` so far
    pub async fn posted(&self) -> Vec<String> {
        self.chat_outbox.read().await.clone()
    }

    pub async fn set_player_position(&self, pos: Position) {
        *self.player.write().await = pos;
    }
}

impl Default for MemoryWorld {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl World for MemoryWorld {
    async fn get_height(&self, x: i32, z: i32) -> Result<i32, ColonyError> {
        let overrides = self.overrides.read().await;
        for y in (0..=WORLD_TOP).rev() {
            let pos = Position::new(x, y, z);
            let block = overrides
                .get(&pos)
                .copied()
                .unwrap_or_else(|| self.natural_block(y));
            if !block.is_air() {
                return Ok(y);
            }
        }
        Ok(0)
    }

    async fn get_block(&self, pos: Position) -> Result<BlockId, ColonyError> {
        if !(0..=WORLD_TOP).contains(&pos.y) {
            return Ok(BlockId::AIR);
        }
        let overrides = self.overrides.read().await;
        Ok(overrides
            .get(&pos)
            .copied()
            .unwrap_or_else(|| self.natural_block(pos.y)))
    }

    async fn set_block(&self, pos: Position, block: BlockId) -> Result<(), ColonyError> {
        if !(0..=WORLD_TOP).contains(&pos.y) {
            return Err(ColonyError::world(format!("y out of range at {pos}")));
        }
        self.overrides.write().await.insert(pos, block);
        Ok(())
    }

    async fn player_position(&self) -> Result<Position, ColonyError> {
        Ok(*self.player.read().await)
    }

    async fn post_text(&self, text: &str) -> Result<(), ColonyError> {
        info!(target: "chat", "{}", text);
        self.chat_outbox.write().await.push(text.to_string());
        Ok(())
    }

    async fn poll_chat(&self) -> Result<Vec<String>, ColonyError> {
        Ok(self.chat_inbox.write().await.drain(..).collect())
    }
}
