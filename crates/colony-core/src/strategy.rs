//! Mining strategies
//!
//! A strategy mines one batch of blocks around a site and moves the site on
//! for the next batch. Strategies are looked up by name in a
//! [`StrategyRegistry`] populated once at startup.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::ColonyError;
use crate::inventory::Inventory;
use crate::world::{BlockId, Position, World};

/// What one batch produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyOutcome {
    pub mined: Inventory,
    /// The site hit bedrock and should be moved
    pub exhausted: bool,
}

#[async_trait]
pub trait MiningStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Mine one batch at `site`, advancing it for the next call
    async fn execute(
        &self,
        world: &dyn World,
        site: &mut Position,
    ) -> Result<StrategyOutcome, ColonyError>;
}

/// Clear one block, adding its material to `mined`
///
/// Returns false if the block cannot be mined.
async fn dig(world: &dyn World, pos: Position, mined: &mut Inventory) -> Result<bool, ColonyError> {
    let block = world.get_block(pos).await?;
    if block.is_unbreakable() {
        return Ok(false);
    }
    if let Some(material) = block.material() {
        world.set_block(pos, BlockId::AIR).await?;
        mined.add(material, 1);
    }
    Ok(true)
}

/// Drill straight down three blocks per batch
#[derive(Debug, Default, Clone, Copy)]
pub struct VerticalMining;

impl VerticalMining {
    pub const DEPTH: i32 = 3;
}

#[async_trait]
impl MiningStrategy for VerticalMining {
    fn name(&self) -> &'static str {
        "vertical"
    }

    async fn execute(
        &self,
        world: &dyn World,
        site: &mut Position,
    ) -> Result<StrategyOutcome, ColonyError> {
        let mut outcome = StrategyOutcome::default();
        for dy in 0..Self::DEPTH {
            let pos = site.offset(0, -dy, 0);
            if pos.y <= 0 || !dig(world, pos, &mut outcome.mined).await? {
                outcome.exhausted = true;
                break;
            }
        }
        site.y -= Self::DEPTH;
        debug!(site = %site, mined = ?outcome.mined, "Vertical batch");
        Ok(outcome)
    }
}

/// Clear a 5×5 layer under the site per batch
#[derive(Debug, Default, Clone, Copy)]
pub struct GridMining;

impl GridMining {
    pub const RADIUS: i32 = 2;
}

#[async_trait]
impl MiningStrategy for GridMining {
    fn name(&self) -> &'static str {
        "grid"
    }

    async fn execute(
        &self,
        world: &dyn World,
        site: &mut Position,
    ) -> Result<StrategyOutcome, ColonyError> {
        let mut outcome = StrategyOutcome::default();
        let layer = site.y - 1;
        if layer <= 0 {
            outcome.exhausted = true;
            return Ok(outcome);
        }
        for dx in -Self::RADIUS..=Self::RADIUS {
            for dz in -Self::RADIUS..=Self::RADIUS {
                let pos = Position::new(site.x + dx, layer, site.z + dz);
                if !dig(world, pos, &mut outcome.mined).await? {
                    outcome.exhausted = true;
                }
            }
        }
        site.y -= 1;
        debug!(site = %site, mined = ?outcome.mined, "Grid batch");
        Ok(outcome)
    }
}

type StrategyFactory = fn() -> Box<dyn MiningStrategy>;

/// Name → strategy constructor
#[derive(Clone)]
pub struct StrategyRegistry {
    factories: BTreeMap<&'static str, StrategyFactory>,
}

impl StrategyRegistry {
    pub const DEFAULT: &'static str = "vertical";

    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry holding `vertical` and `grid`
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("vertical", || Box::new(VerticalMining));
        registry.register("grid", || Box::new(GridMining));
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: StrategyFactory) {
        self.factories.insert(name, factory);
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn MiningStrategy>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("names", &self.names())
            .finish()
    }
}
