//! Terrain surveyor

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{int_param, position_param, BUILDER_ID};
use crate::agent::{Agent, AgentCore, AgentEnv, AgentState, ControlCommand};
use crate::error::ColonyError;
use crate::message::{types, Message, Payload};
use crate::world::Position;

/// Survey area requested by `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Survey {
    origin: Position,
    range: i32,
}

/// Scans a square of terrain and sends the result as `map.v1`
pub struct ExplorerBot {
    core: AgentCore,
    builder_id: String,
    survey: Option<Survey>,
}

impl ExplorerBot {
    pub const DEFAULT_Y: i32 = 63;
    pub const DEFAULT_RANGE: i32 = 10;
    /// Largest square side one survey quantum will scan
    pub const MAX_RANGE: i32 = 64;

    pub async fn new(agent_id: impl Into<String>, env: AgentEnv) -> Self {
        Self {
            core: AgentCore::new(agent_id, env).await,
            builder_id: BUILDER_ID.to_string(),
            survey: None,
        }
    }

    /// Send maps to `builder_id` instead of the default builder
    pub fn with_builder(mut self, builder_id: impl Into<String>) -> Self {
        self.builder_id = builder_id.into();
        self
    }

    /// Survey square requested by `params`
    ///
    /// Ranges above [`Self::MAX_RANGE`] and squares running past the edge of
    /// the coordinate space are refused.
    async fn survey_from(&self, params: &Payload) -> Result<Survey, ColonyError> {
        let player = self.core.world().player_position().await?;
        let default = Position::new(player.x, Self::DEFAULT_Y, player.z);
        let origin = position_param(params, ["x", "y", "z"], default);
        let range = int_param(params, "range")
            .unwrap_or(Self::DEFAULT_RANGE)
            .max(1);

        if range > Self::MAX_RANGE {
            return Err(ColonyError::rejected(format!(
                "range {range} too large (max {})",
                Self::MAX_RANGE
            )));
        }
        if origin.x.checked_add(range).is_none() || origin.z.checked_add(range).is_none() {
            return Err(ColonyError::rejected(format!(
                "survey at {origin} range {range} leaves the world"
            )));
        }
        Ok(Survey { origin, range })
    }

    /// Heights of every column in the survey square, keeping those at or
    /// above the requested level
    async fn scan(&self, survey: Survey) -> Result<(Vec<Position>, f64), ColonyError> {
        let Survey { origin, range } = survey;
        let mut dry_land = Vec::new();
        for x in origin.x..origin.x.saturating_add(range) {
            for z in origin.z..origin.z.saturating_add(range) {
                let y = self.core.world().get_height(x, z).await?;
                if y >= origin.y {
                    dry_land.push(Position::new(x, y, z));
                }
            }
        }

        let avg_height = if dry_land.is_empty() {
            f64::from(origin.y)
        } else {
            dry_land.iter().map(|p| f64::from(p.y)).sum::<f64>() / dry_land.len() as f64
        };
        Ok((dry_land, avg_height))
    }
}

#[async_trait]
impl Agent for ExplorerBot {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    async fn perceive(&mut self, message: Message) -> Result<(), ColonyError> {
        debug!(message_type = %message.message_type, source = %message.source, "Ignored");
        Ok(())
    }

    async fn act(&mut self) -> Result<(), ColonyError> {
        let survey = match self.survey {
            Some(survey) => survey,
            None => self.survey_from(&Payload::new()).await?,
        };
        info!(origin = %survey.origin, range = survey.range, "Surveying");

        let (dry_land, avg_height) = self.scan(survey).await?;
        let data: Vec<Value> = dry_land
            .iter()
            .map(|p| json!({"x": p.x, "y": p.y, "z": p.z}))
            .collect();

        let mut payload = Payload::new();
        payload.insert("center".into(), json!(survey.origin));
        payload.insert("size".into(), json!(survey.range));
        payload.insert("avg_height".into(), json!(avg_height));
        payload.insert("data".into(), Value::Array(data));

        if !self.core.send(types::MAP, &self.builder_id, payload).await {
            return Err(ColonyError::domain(
                self.core.agent_id(),
                format!("map could not be delivered to {}", self.builder_id),
            ));
        }
        info!(tiles = dry_land.len(), avg_height, "Map sent");

        self.core.pace().await;
        self.survey = None;
        self.core.set_state(AgentState::Idle, "survey complete").await;
        Ok(())
    }

    async fn on_control(
        &mut self,
        command: &ControlCommand,
        params: &Payload,
    ) -> Result<(), ColonyError> {
        if matches!(command, ControlCommand::Start | ControlCommand::Update) {
            self.survey = Some(self.survey_from(params).await?);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        match self.survey {
            Some(survey) => format!(
                "{} | survey at {} range {}",
                self.core.status_line(),
                survey.origin,
                survey.range
            ),
            None => self.core.status_line(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::checkpoint::CheckpointStore;
    use crate::config::RuntimeConfig;
    use crate::world::{BlockId, MemoryWorld, World};
    use std::sync::Arc;

    async fn explorer(world: Arc<MemoryWorld>, bus: Arc<MessageBus>) -> ExplorerBot {
        let env = AgentEnv::new(bus, CheckpointStore::memory(), world, RuntimeConfig::fast());
        ExplorerBot::new("ExplorerBot-1", env).await
    }

    fn params(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_survey_sends_map() {
        let world = Arc::new(MemoryWorld::new(64));
        world.set_block(Position::new(1, 64, 1), BlockId::STONE).await.unwrap();
        let bus = Arc::new(MessageBus::new());
        let builder = bus.subscribe(BUILDER_ID).await;

        let mut explorer = explorer(world, bus.clone()).await;
        explorer
            .on_control(&ControlCommand::Start, &params(json!({"x": 0, "y": 64, "z": 0, "range": 3})))
            .await
            .unwrap();
        explorer.core_mut().set_state(AgentState::Running, "start").await;
        explorer.act().await.unwrap();

        let map = builder.try_recv().await.unwrap();
        assert_eq!(map.message_type, types::MAP);
        assert_eq!(map.payload["center"], json!({"x": 0, "y": 64, "z": 0}));
        assert_eq!(map.payload["size"], 3);
        assert_eq!(map.payload["avg_height"], 64.0);
        assert_eq!(map.payload["data"], json!([{"x": 1, "y": 64, "z": 1}]));
        assert_eq!(explorer.core().state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn test_defaults_from_player() {
        let world = Arc::new(MemoryWorld::new(64));
        world.set_player_position(Position::new(40, 64, -8)).await;
        let bus = Arc::new(MessageBus::new());
        let explorer = explorer(world, bus).await;

        let survey = explorer.survey_from(&Payload::new()).await.unwrap();
        assert_eq!(survey.origin, Position::new(40, ExplorerBot::DEFAULT_Y, -8));
        assert_eq!(survey.range, ExplorerBot::DEFAULT_RANGE);
    }

    #[tokio::test]
    async fn test_oversized_range_rejected() {
        let world = Arc::new(MemoryWorld::new(64));
        let bus = Arc::new(MessageBus::new());
        let mut explorer = explorer(world, bus).await;

        let err = explorer
            .on_control(&ControlCommand::Start, &params(json!({"range": 100_000})))
            .await
            .unwrap_err();
        assert!(matches!(err, ColonyError::CommandRejected(ref m) if m.contains("too large")));
        assert!(!err.is_agent_fatal());
        assert!(explorer.survey.is_none());

        explorer
            .on_control(&ControlCommand::Start, &params(json!({"range": ExplorerBot::MAX_RANGE})))
            .await
            .unwrap();
        assert_eq!(explorer.survey.map(|s| s.range), Some(ExplorerBot::MAX_RANGE));
    }

    #[tokio::test]
    async fn test_survey_past_world_edge_rejected() {
        let world = Arc::new(MemoryWorld::new(64));
        let bus = Arc::new(MessageBus::new());
        let mut explorer = explorer(world, bus).await;

        let err = explorer
            .on_control(
                &ControlCommand::Start,
                &params(json!({"x": 2_147_483_640, "z": 0, "range": 10})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ColonyError::CommandRejected(_)));
        assert!(explorer.survey.is_none());
        assert_eq!(explorer.core().state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn test_empty_scan_averages_to_requested_level() {
        let world = Arc::new(MemoryWorld::new(64));
        let bus = Arc::new(MessageBus::new());
        let explorer = explorer(world, bus).await;

        let survey = Survey {
            origin: Position::new(0, 80, 0),
            range: 2,
        };
        let (tiles, avg) = explorer.scan(survey).await.unwrap();
        assert!(tiles.is_empty());
        assert_eq!(avg, 80.0);
    }

    #[tokio::test]
    async fn test_undeliverable_map_is_domain_error() {
        let world = Arc::new(MemoryWorld::new(64));
        let bus = Arc::new(MessageBus::new());
        let mut explorer = explorer(world, bus).await.with_builder("Nobody");
        assert!(matches!(
            explorer.act().await,
            Err(ColonyError::Domain { .. })
        ));
    }
}
