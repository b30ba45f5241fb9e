//! Material counts carried by agents and requested between them

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::message::Payload;
use crate::world::Position;

/// Payload keys that carry coordinates rather than quantities
const COORDINATE_KEYS: [&str; 3] = ["x", "y", "z"];

fn counts_from_payload(payload: &Payload, skip_coordinates: bool) -> BTreeMap<String, u64> {
    payload
        .iter()
        .filter(|(key, _)| !(skip_coordinates && COORDINATE_KEYS.contains(&key.as_str())))
        .filter_map(|(key, value)| value.as_u64().map(|count| (key.clone(), count)))
        .collect()
}

fn counts_to_payload(counts: &BTreeMap<String, u64>) -> Payload {
    counts
        .iter()
        .map(|(material, count)| (material.clone(), Value::from(*count)))
        .collect()
}

/// Accumulated materials, serialized as `{"stone": 5, ...}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inventory(BTreeMap<String, u64>);

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a message payload, ignoring entries that are not counts
    pub fn from_payload(payload: &Payload) -> Self {
        Self(counts_from_payload(payload, false))
    }

    pub fn to_payload(&self) -> Payload {
        counts_to_payload(&self.0)
    }

    pub fn count(&self, material: &str) -> u64 {
        self.0.get(material).copied().unwrap_or(0)
    }

    /// Add to a count, saturating at `u64::MAX`
    pub fn add(&mut self, material: impl Into<String>, amount: u64) {
        if amount == 0 {
            return;
        }
        let count = self.0.entry(material.into()).or_insert(0);
        *count = count.saturating_add(amount);
    }

    /// Merge another inventory into this one
    pub fn absorb(&mut self, other: &Inventory) {
        for (material, count) in &other.0 {
            self.add(material.clone(), *count);
        }
    }

    /// Remove what a bill of materials consumes (saturating at zero)
    pub fn deduct(&mut self, bom: &BillOfMaterials) {
        for (material, required) in bom.iter() {
            if let Some(count) = self.0.get_mut(material) {
                *count = count.saturating_sub(required);
                if *count == 0 {
                    self.0.remove(material);
                }
            }
        }
    }

    /// Whether every requested quantity is on hand
    pub fn satisfies(&self, bom: &BillOfMaterials) -> bool {
        bom.iter()
            .all(|(material, required)| self.count(material) >= required)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<K: Into<String>> FromIterator<(K, u64)> for Inventory {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        let mut inventory = Inventory::new();
        for (material, count) in iter {
            inventory.add(material, count);
        }
        inventory
    }
}

/// Requested quantities per material (a BOM)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BillOfMaterials(BTreeMap<String, u64>);

impl BillOfMaterials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a `materials.requirements.v1` payload
    ///
    /// Coordinate keys and non-integer values are not quantities.
    pub fn from_payload(payload: &Payload) -> Self {
        Self(counts_from_payload(payload, true))
    }

    pub fn with(mut self, material: impl Into<String>, quantity: u64) -> Self {
        self.set(material, quantity);
        self
    }

    pub fn set(&mut self, material: impl Into<String>, quantity: u64) {
        let material = material.into();
        if quantity == 0 {
            self.0.remove(&material);
        } else {
            self.0.insert(material, quantity);
        }
    }

    pub fn quantity(&self, material: &str) -> u64 {
        self.0.get(material).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn to_payload(&self) -> Payload {
        counts_to_payload(&self.0)
    }

    /// Requirements payload including the site where materials should come from
    pub fn with_site(&self, site: Position) -> Payload {
        let mut payload = self.to_payload();
        payload.insert("x".into(), Value::from(site.x));
        payload.insert("y".into(), Value::from(site.y));
        payload.insert("z".into(), Value::from(site.z));
        payload
    }
}
