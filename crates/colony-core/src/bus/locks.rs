//! Exclusive ownership of spatial resources

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::Mutex;

/// Key of a lockable resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKey {
    /// Discretized region coordinates
    Cell { x: i32, z: i32 },
    /// Free-form named resource
    Region(String),
}

impl ResourceKey {
    /// Region containing world column `(x, z)`; floors toward negative infinity
    pub fn region_of(x: i32, z: i32, region_size: i32) -> Self {
        let size = region_size.max(1);
        ResourceKey::Cell {
            x: x.div_euclid(size),
            z: z.div_euclid(size),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        ResourceKey::Region(name.into())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Cell { x, z } => write!(f, "cell({x},{z})"),
            ResourceKey::Region(name) => write!(f, "region({name})"),
        }
    }
}

/// Owner per resource key, at most one each
///
/// All mutations go through a single mutex so test-and-set is atomic.
#[derive(Debug, Default)]
pub struct LockTable {
    owners: Mutex<HashMap<ResourceKey, String>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the key if free; re-entrant for the current owner
    pub async fn acquire(&self, agent_id: &str, key: &ResourceKey) -> bool {
        let mut owners = self.owners.lock().await;
        match owners.get(key) {
            Some(owner) => owner == agent_id,
            None => {
                owners.insert(key.clone(), agent_id.to_string());
                true
            }
        }
    }

    /// Drop every key held by `agent_id`, returning how many were held
    pub async fn release_all(&self, agent_id: &str) -> usize {
        let mut owners = self.owners.lock().await;
        let before = owners.len();
        owners.retain(|_, owner| owner != agent_id);
        before - owners.len()
    }

    pub async fn owner(&self, key: &ResourceKey) -> Option<String> {
        self.owners.lock().await.get(key).cloned()
    }

    pub async fn held_by(&self, agent_id: &str) -> Vec<ResourceKey> {
        self.owners
            .lock()
            .await
            .iter()
            .filter(|(_, owner)| owner.as_str() == agent_id)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.owners.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
