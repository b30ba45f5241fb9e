//! Structure builder
//!
//! A `map.v1` fixes the build site. The builder then asks the miner for the
//! structure's bill of materials and waits. Once enough material has been
//! supplied it builds the structure one layer per quantum and announces
//! `build.v1` when done.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{int_param, position_param, MINER_ID};
use crate::agent::{Agent, AgentCore, AgentEnv, AgentState, ControlCommand, StateChange};
use crate::error::ColonyError;
use crate::inventory::{BillOfMaterials, Inventory};
use crate::message::{types, Message, MessageStatus, Payload, BROADCAST};
use crate::world::{BlockId, Position};

/// A rectangular block of one material
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Structure {
    pub name: &'static str,
    pub width: i32,
    pub depth: i32,
    pub height: i32,
    pub material: &'static str,
}

impl Structure {
    pub const WALL: Structure = Structure::new("wall", 5, 2, 2);
    pub const PLATFORM: Structure = Structure::new("platform", 5, 5, 1);
    pub const TOWER: Structure = Structure::new("tower", 3, 3, 4);

    pub const CATALOGUE: [Structure; 3] = [Self::WALL, Self::PLATFORM, Self::TOWER];

    const fn new(name: &'static str, width: i32, depth: i32, height: i32) -> Self {
        Self {
            name,
            width,
            depth,
            height,
            material: "stone",
        }
    }

    pub fn by_name(name: &str) -> Option<Structure> {
        Self::CATALOGUE.into_iter().find(|s| s.name == name)
    }

    pub fn blocks_per_layer(&self) -> u64 {
        (self.width * self.depth) as u64
    }

    pub fn bill_of_materials(&self) -> BillOfMaterials {
        BillOfMaterials::new().with(self.material, self.blocks_per_layer() * self.height as u64)
    }
}

/// Builds structures from mined materials
pub struct BuilderBot {
    core: AgentCore,
    miner_id: String,
    structure: Structure,
    site: Position,
    quarry: Option<Position>,
    required: BillOfMaterials,
    /// Latest stock reported by suppliers
    supplied: Inventory,
    layers_built: i32,
}

impl BuilderBot {
    pub const DEFAULT_SITE: Position = Position::new(100, 70, 100);

    pub async fn new(agent_id: impl Into<String>, env: AgentEnv) -> Self {
        Self {
            core: AgentCore::new(agent_id, env).await,
            miner_id: MINER_ID.to_string(),
            structure: Structure::WALL,
            site: Self::DEFAULT_SITE,
            quarry: None,
            required: BillOfMaterials::new(),
            supplied: Inventory::new(),
            layers_built: 0,
        }
    }

    /// Request materials from `miner_id` instead of the default miner
    pub fn with_miner(mut self, miner_id: impl Into<String>) -> Self {
        self.miner_id = miner_id.into();
        self
    }

    pub fn structure(&self) -> Structure {
        self.structure
    }

    pub fn site(&self) -> Position {
        self.site
    }

    pub fn required(&self) -> &BillOfMaterials {
        &self.required
    }

    fn quarry(&self) -> Position {
        self.quarry.unwrap_or(self.site)
    }

    fn is_building(&self) -> bool {
        self.layers_built > 0
    }

    /// Materials on hand or reported by the supplier, whichever is larger
    fn available(&self, material: &str) -> u64 {
        self.core
            .inventory()
            .count(material)
            .max(self.supplied.count(material))
    }

    fn is_supplied(&self) -> bool {
        self.required
            .iter()
            .all(|(material, quantity)| self.available(material) >= quantity)
    }

    /// Ask the miner for the current structure and wait
    async fn request_materials(&mut self) -> Result<(), ColonyError> {
        self.required = self.structure.bill_of_materials();
        let payload = self.required.with_site(self.quarry());
        info!(
            structure = self.structure.name,
            site = %self.site,
            bom = ?self.required,
            "Requesting materials"
        );
        if !self
            .core
            .send(types::MATERIALS_REQUIREMENTS, &self.miner_id, payload)
            .await
        {
            return Err(ColonyError::domain(
                self.core.agent_id(),
                format!("no miner named {} to supply materials", self.miner_id),
            ));
        }
        self.core
            .set_state(AgentState::Waiting, "waiting for materials")
            .await;
        Ok(())
    }

    fn site_from_map(payload: &Payload) -> Option<Position> {
        let center = payload.get("center")?.as_object()?;
        let x = int_param(center, "x")?;
        let z = int_param(center, "z")?;
        let ground = payload
            .get("avg_height")
            .and_then(Value::as_f64)
            .map(|h| h.round() as i32)
            .or_else(|| int_param(center, "y"))?;
        Some(Position::new(x, ground + 1, z))
    }

    async fn place_layer(&self, layer: i32) -> Result<(), ColonyError> {
        let block = BlockId::for_material(self.structure.material).ok_or_else(|| {
            ColonyError::domain(
                self.core.agent_id(),
                format!("cannot place {}", self.structure.material),
            )
        })?;
        for dx in 0..self.structure.width {
            for dz in 0..self.structure.depth {
                self.core
                    .world()
                    .set_block(self.site.offset(dx, layer, dz), block)
                    .await?;
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), ColonyError> {
        let consumed = std::mem::take(&mut self.required);
        self.core.inventory_mut().deduct(&consumed);
        self.supplied.deduct(&consumed);
        self.layers_built = 0;

        let mut payload = Payload::new();
        payload.insert("status".into(), json!(MessageStatus::Completed));
        payload.insert("structure".into(), json!(self.structure.name));
        payload.insert("site".into(), json!(self.site));
        let announcement = Message::new(types::BUILD, self.core.agent_id(), BROADCAST, payload)
            .with_status(MessageStatus::Completed);
        self.core.send_message(announcement).await;

        self.core.release_locks().await;
        self.core.report(&format!("{} built at {}", self.structure.name, self.site)).await;
        self.core.set_state(AgentState::Idle, "build complete").await;
        Ok(())
    }
}

#[async_trait]
impl Agent for BuilderBot {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    async fn perceive(&mut self, message: Message) -> Result<(), ColonyError> {
        match message.message_type.as_str() {
            types::MAP => {
                if self.is_building() {
                    warn!(source = %message.source, "Map ignored while building");
                    return Ok(());
                }
                match Self::site_from_map(&message.payload) {
                    Some(site) => self.site = site,
                    None => warn!("Map without a usable center, keeping site"),
                }
                info!(site = %self.site, "Map received");
                if matches!(
                    self.core.state(),
                    AgentState::Idle | AgentState::Waiting | AgentState::Running
                ) {
                    self.request_materials().await?;
                }
            }
            types::INVENTORY if message.status == MessageStatus::Error => {
                warn!(source = %message.source, payload = ?message.payload, "Supplier dropped request");
                self.supplied = Inventory::new();
                if self.core.state() == AgentState::Waiting {
                    self.required = BillOfMaterials::new();
                    self.core
                        .report(&format!("{} dropped the materials request", message.source))
                        .await;
                    self.core
                        .set_state(AgentState::Idle, "supplier dropped request")
                        .await;
                }
            }
            types::INVENTORY | types::INVENTORY_UPDATE => {
                self.supplied = Inventory::from_payload(&message.payload);
                debug!(supplied = ?self.supplied, "Supply updated");
            }
            types::MINING_COMPLETE => {
                let delivered = Inventory::from_payload(&message.payload);
                info!(delivered = ?delivered, "Materials delivered");
                self.core.inventory_mut().absorb(&delivered);
            }
            _ => {
                debug!(message_type = %message.message_type, source = %message.source, "Ignored");
            }
        }
        Ok(())
    }

    fn decide(&self) -> Result<Option<StateChange>, ColonyError> {
        if self.core.state() == AgentState::Waiting
            && !self.required.is_empty()
            && self.is_supplied()
        {
            return Ok(Some(StateChange::new(
                AgentState::Running,
                "materials available",
            )));
        }
        Ok(None)
    }

    async fn act(&mut self) -> Result<(), ColonyError> {
        if self.required.is_empty() || !self.is_supplied() {
            return self.request_materials().await;
        }

        let key = self.core.region_key(self.site.x, self.site.z);
        if !self.core.request_lock(&key).await {
            debug!(key = %key, "Site locked by another agent, backing off");
            self.core.pace().await;
            return Ok(());
        }

        self.place_layer(self.layers_built).await?;
        self.layers_built += 1;
        info!(
            layer = self.layers_built,
            of = self.structure.height,
            structure = self.structure.name,
            "Layer built"
        );
        self.core.pace().await;

        if self.layers_built >= self.structure.height {
            self.finish().await?;
        }
        Ok(())
    }

    async fn on_control(
        &mut self,
        command: &ControlCommand,
        params: &Payload,
    ) -> Result<(), ColonyError> {
        if let Some(name) = params.get("structure").and_then(Value::as_str) {
            if self.is_building() {
                return Err(ColonyError::rejected("cannot change structure while building"));
            }
            self.structure = Structure::by_name(name)
                .ok_or_else(|| ColonyError::rejected(format!("unknown structure {name}")))?;
        }
        self.site = position_param(params, ["x", "y", "z"], self.site);
        if ["qx", "qy", "qz"].iter().any(|k| params.contains_key(*k)) {
            self.quarry = Some(position_param(params, ["qx", "qy", "qz"], self.quarry()));
        }
        debug!(command = %command, structure = self.structure.name, site = %self.site, "Parameters set");
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "{} | {} at {} | layers {}/{} | needs {}",
            self.core.status_line(),
            self.structure.name,
            self.site,
            self.layers_built,
            self.structure.height,
            Value::Object(self.required.to_payload())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Mailbox, MessageBus};
    use crate::checkpoint::CheckpointStore;
    use crate::config::RuntimeConfig;
    use crate::world::{MemoryWorld, World};
    use std::sync::Arc;

    struct Fixture {
        world: Arc<MemoryWorld>,
        bus: Arc<MessageBus>,
        miner: Mailbox,
        builder: BuilderBot,
    }

    async fn fixture() -> Fixture {
        let world = Arc::new(MemoryWorld::new(64));
        let bus = Arc::new(MessageBus::new());
        let miner = bus.subscribe(MINER_ID).await;
        let env = AgentEnv::new(
            bus.clone(),
            CheckpointStore::memory(),
            world.clone(),
            RuntimeConfig::fast().with_notify_peers(false),
        );
        let builder = BuilderBot::new("BuilderBot-1", env).await;
        Fixture {
            world,
            bus,
            miner,
            builder,
        }
    }

    fn message(message_type: &str, payload: Value) -> Message {
        Message::new(
            message_type,
            "someone",
            "BuilderBot-1",
            payload.as_object().cloned().unwrap(),
        )
    }

    #[test]
    fn test_structure_catalogue() {
        assert_eq!(Structure::WALL.bill_of_materials().quantity("stone"), 20);
        assert_eq!(Structure::PLATFORM.bill_of_materials().quantity("stone"), 25);
        assert_eq!(Structure::TOWER.bill_of_materials().quantity("stone"), 36);
        assert_eq!(Structure::by_name("tower"), Some(Structure::TOWER));
        assert_eq!(Structure::by_name("castle"), None);
    }

    #[tokio::test]
    async fn test_map_requests_materials() {
        let mut f = fixture().await;
        let map = message(
            types::MAP,
            json!({"center": {"x": 10, "y": 63, "z": 20}, "size": 10, "avg_height": 63.4, "data": []}),
        );
        f.builder.perceive(map).await.unwrap();

        assert_eq!(f.builder.core().state(), AgentState::Waiting);
        assert_eq!(f.builder.site(), Position::new(10, 64, 20));

        let request = f.miner.try_recv().await.unwrap();
        assert_eq!(request.message_type, types::MATERIALS_REQUIREMENTS);
        assert_eq!(
            Value::Object(request.payload),
            json!({"stone": 20, "x": 10, "y": 64, "z": 20})
        );
    }

    #[tokio::test]
    async fn test_waits_until_supplied() {
        let mut f = fixture().await;
        f.builder.perceive(message(types::MAP, json!({}))).await.unwrap();
        assert_eq!(f.builder.site(), BuilderBot::DEFAULT_SITE);
        assert_eq!(f.builder.decide().unwrap(), None);

        f.builder
            .perceive(message(types::INVENTORY, json!({"stone": 12})))
            .await
            .unwrap();
        assert_eq!(f.builder.decide().unwrap(), None);

        f.builder
            .perceive(message(types::MINING_COMPLETE, json!({"stone": 20})))
            .await
            .unwrap();
        let change = f.builder.decide().unwrap().unwrap();
        assert_eq!(change.next, AgentState::Running);
    }

    #[tokio::test]
    async fn test_dropped_request_returns_to_idle() {
        let mut f = fixture().await;
        f.builder.perceive(message(types::MAP, json!({}))).await.unwrap();
        assert_eq!(f.builder.core().state(), AgentState::Waiting);

        let dropped = message(types::INVENTORY, json!({"stone": 3, "reason": "displaced"}))
            .with_status(MessageStatus::Error);
        f.builder.perceive(dropped).await.unwrap();

        assert_eq!(f.builder.core().state(), AgentState::Idle);
        assert!(f.builder.required().is_empty());
        assert!(f.world.posted().await.iter().any(|l| l.contains("dropped")));
    }

    #[tokio::test]
    async fn test_huge_deliveries_do_not_overflow() {
        let mut f = fixture().await;
        for count in [u64::MAX, 1] {
            f.builder
                .perceive(message(types::MINING_COMPLETE, json!({"stone": count})))
                .await
                .unwrap();
        }
        assert_eq!(f.builder.core().inventory().count("stone"), u64::MAX);
    }

    #[tokio::test]
    async fn test_builds_layer_by_layer() {
        let mut f = fixture().await;
        f.builder.perceive(message(types::MAP, json!({}))).await.unwrap();
        f.builder
            .perceive(message(types::MINING_COMPLETE, json!({"stone": 25})))
            .await
            .unwrap();
        f.builder.core_mut().set_state(AgentState::Running, "materials available").await;
        let observer = f.bus.subscribe("observer").await;

        f.builder.act().await.unwrap();
        assert_eq!(f.builder.core().state(), AgentState::Running);
        let site = BuilderBot::DEFAULT_SITE;
        assert_eq!(f.world.get_block(site).await.unwrap(), BlockId::STONE);
        assert_eq!(f.world.get_block(site.offset(0, 1, 0)).await.unwrap(), BlockId::AIR);
        let key = f.builder.core().region_key(site.x, site.z);
        assert_eq!(f.bus.lock_owner(&key).await.as_deref(), Some("BuilderBot-1"));

        f.builder.act().await.unwrap();
        assert_eq!(f.builder.core().state(), AgentState::Idle);
        assert_eq!(f.world.get_block(site.offset(4, 1, 1)).await.unwrap(), BlockId::STONE);
        assert_eq!(f.builder.core().inventory().count("stone"), 5);
        assert!(f.bus.lock_owner(&key).await.is_none());

        let done = observer.try_recv().await.unwrap();
        assert_eq!(done.message_type, types::BUILD);
        assert_eq!(done.payload["status"], "COMPLETED");
        assert_eq!(done.status, MessageStatus::Completed);
    }

    #[tokio::test]
    async fn test_backs_off_when_site_locked() {
        let mut f = fixture().await;
        f.builder
            .perceive(message(types::MINING_COMPLETE, json!({"stone": 20})))
            .await
            .unwrap();
        f.builder.required = Structure::WALL.bill_of_materials();
        f.builder.core_mut().set_state(AgentState::Running, "test").await;

        let site = BuilderBot::DEFAULT_SITE;
        let key = f.builder.core().region_key(site.x, site.z);
        assert!(f.bus.request_lock(MINER_ID, &key).await);

        f.builder.act().await.unwrap();
        assert_eq!(f.world.get_block(site).await.unwrap(), BlockId::AIR);
        assert_eq!(f.builder.core().state(), AgentState::Running);
    }

    #[tokio::test]
    async fn test_update_parameters() {
        let mut f = fixture().await;
        let params = json!({"structure": "tower", "x": 1, "qx": 50, "qy": 40, "qz": 50});
        f.builder
            .on_control(&ControlCommand::Update, params.as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(f.builder.structure(), Structure::TOWER);
        assert_eq!(f.builder.site(), Position::new(1, 70, 100));
        assert_eq!(f.builder.quarry(), Position::new(50, 40, 50));

        let err = f
            .builder
            .on_control(&ControlCommand::Update, json!({"structure": "castle"}).as_object().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ColonyError::CommandRejected(ref m) if m.contains("unknown structure")));
        assert_eq!(f.builder.structure(), Structure::TOWER);
    }

    #[tokio::test]
    async fn test_start_without_map_requests_default_wall() {
        let mut f = fixture().await;
        f.builder.core_mut().set_state(AgentState::Running, "start command").await;
        f.builder.act().await.unwrap();

        assert_eq!(f.builder.core().state(), AgentState::Waiting);
        let request = f.miner.try_recv().await.unwrap();
        assert_eq!(request.payload["stone"], 20);
    }
}
