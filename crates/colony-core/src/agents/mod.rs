//! Concrete agents
//!
//! - [`ExplorerBot`] surveys terrain and hands a height map to the builder
//! - [`BuilderBot`] turns a map into a bill of materials and builds once supplied
//! - [`MinerBot`] mines materials on request and delivers them

mod builder;
mod explorer;
mod miner;

pub use builder::{BuilderBot, Structure};
pub use explorer::ExplorerBot;
pub use miner::MinerBot;

use crate::message::Payload;
use crate::world::Position;

pub const EXPLORER_ID: &str = "ExplorerBot-1";
pub const BUILDER_ID: &str = "BuilderBot-1";
pub const MINER_ID: &str = "MinerBot-1";

/// Integer parameter, if present and in range
pub(crate) fn int_param(params: &Payload, key: &str) -> Option<i32> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .and_then(|v| i32::try_from(v).ok())
}

/// Position from three coordinate keys, falling back per axis to `default`
pub(crate) fn position_param(params: &Payload, keys: [&str; 3], default: Position) -> Position {
    Position::new(
        int_param(params, keys[0]).unwrap_or(default.x),
        int_param(params, keys[1]).unwrap_or(default.y),
        int_param(params, keys[2]).unwrap_or(default.z),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_position_param_falls_back_per_axis() {
        let params = json!({"x": 5, "z": "north"}).as_object().cloned().unwrap();
        let pos = position_param(&params, ["x", "y", "z"], Position::new(1, 2, 3));
        assert_eq!(pos, Position::new(5, 2, 3));
    }

    #[test]
    fn test_int_param_range() {
        let params = json!({"big": 10_000_000_000i64, "ok": -7}).as_object().cloned().unwrap();
        assert_eq!(int_param(&params, "big"), None);
        assert_eq!(int_param(&params, "ok"), Some(-7));
        assert_eq!(int_param(&params, "missing"), None);
    }
}
