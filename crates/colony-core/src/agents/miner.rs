//! Material miner
//!
//! A job comes either from a `materials.requirements.v1` sent by another
//! agent or from a user `start`. Each quantum runs the active strategy once at
//! the job site; progress goes to the requester as `inventory.v1`. When the
//! bill of materials is covered the miner hands the materials over with
//! `mining.complete.v1` and goes back to `IDLE`.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{int_param, position_param};
use crate::agent::{Agent, AgentCore, AgentEnv, AgentState, ControlCommand, StateChange};
use crate::error::ColonyError;
use crate::inventory::{BillOfMaterials, Inventory};
use crate::message::{types, Message, MessageStatus, Payload, USER};
use crate::strategy::{MiningStrategy, StrategyRegistry};
use crate::world::Position;

/// An outstanding mining order
#[derive(Debug, Clone)]
struct Job {
    bom: BillOfMaterials,
    site: Position,
    /// Top of the shaft, restored when the site moves sideways
    top: i32,
    requester: String,
    task_id: String,
}

impl Job {
    fn new(bom: BillOfMaterials, site: Position, requester: impl Into<String>) -> Self {
        Self {
            bom,
            site,
            top: site.y,
            requester: requester.into(),
            task_id: Uuid::new_v4().to_string(),
        }
    }

    fn for_user(&self) -> bool {
        self.requester == USER
    }
}

/// Mines materials on request using a pluggable strategy
pub struct MinerBot {
    core: AgentCore,
    registry: StrategyRegistry,
    strategy: Box<dyn MiningStrategy>,
    job: Option<Job>,
}

impl MinerBot {
    /// Site used when a request carries no coordinates
    pub const DEFAULT_SITE: Position = Position::new(120, 60, 120);
    pub const DEFAULT_QUOTA: u64 = 64;

    pub async fn new(agent_id: impl Into<String>, env: AgentEnv) -> Result<Self, ColonyError> {
        let registry = StrategyRegistry::with_defaults();
        let strategy = registry
            .create(StrategyRegistry::DEFAULT)
            .ok_or_else(|| ColonyError::config("default mining strategy is not registered"))?;
        Ok(Self {
            core: AgentCore::new(agent_id, env).await,
            registry,
            strategy,
            job: None,
        })
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Outstanding quantities, empty when idle
    pub fn target(&self) -> BillOfMaterials {
        self.job.as_ref().map(|job| job.bom.clone()).unwrap_or_default()
    }

    pub fn site(&self) -> Option<Position> {
        self.job.as_ref().map(|job| job.site)
    }

    fn select_strategy(&mut self, name: &str) -> Result<(), ColonyError> {
        self.strategy = self.registry.create(name).ok_or_else(|| {
            ColonyError::rejected(format!(
                "unknown strategy {name} (available: {})",
                self.registry.names().join(", ")
            ))
        })?;
        info!(strategy = name, "Strategy selected");
        Ok(())
    }

    async fn accept_request(&mut self, message: &Message) -> Result<(), ColonyError> {
        let bom = BillOfMaterials::from_payload(&message.payload);
        if bom.is_empty() {
            warn!(source = %message.source, "Empty materials request ignored");
            return Ok(());
        }
        let site = position_param(&message.payload, ["x", "y", "z"], Self::DEFAULT_SITE);
        if let Some(open) = self.job.take() {
            self.core.release_locks().await;
            if open.requester != message.source {
                self.displace(&open, &message.source).await;
            }
        }
        let job = Job::new(bom, site, message.source.clone());
        info!(
            requester = %job.requester,
            task_id = %job.task_id,
            site = %job.site,
            bom = ?job.bom,
            "Mining job accepted"
        );
        self.job = Some(job);

        if self.is_satisfied() {
            return self.deliver().await;
        }
        if matches!(self.core.state(), AgentState::Idle | AgentState::Waiting) {
            self.core
                .set_state(AgentState::Running, "materials requested")
                .await;
        }
        Ok(())
    }

    /// Tell the requester of a replaced job that it will not be delivered
    async fn displace(&self, open: &Job, by: &str) {
        warn!(requester = %open.requester, task_id = %open.task_id, by, "Open job displaced");
        if open.for_user() {
            self.core
                .report(&format!("mining job dropped for a request from {by}"))
                .await;
            return;
        }
        let mut payload = self.core.inventory().to_payload();
        payload.insert("reason".into(), Value::from(format!("displaced by {by}")));
        self.send_to_requester(open, types::INVENTORY, payload, MessageStatus::Error)
            .await;
    }

    fn is_satisfied(&self) -> bool {
        self.job
            .as_ref()
            .is_some_and(|job| self.core.inventory().satisfies(&job.bom))
    }

    async fn send_to_requester(
        &self,
        job: &Job,
        message_type: &str,
        payload: Payload,
        status: MessageStatus,
    ) -> bool {
        let message = Message::new(message_type, self.core.agent_id(), &job.requester, payload)
            .with_status(status)
            .with_context("task_id", job.task_id.as_str());
        self.core.send_message(message).await
    }

    /// Hand the job's materials over and go back to `IDLE`
    async fn deliver(&mut self) -> Result<(), ColonyError> {
        let Some(job) = self.job.take() else {
            return Ok(());
        };
        self.core.release_locks().await;

        if job.for_user() {
            let mined = Value::Object(self.core.inventory().to_payload());
            self.core.report(&format!("mining complete, inventory {mined}")).await;
        } else {
            self.send_to_requester(
                &job,
                types::INVENTORY,
                self.core.inventory().to_payload(),
                MessageStatus::Completed,
            )
            .await;
            let delivered = self.send_to_requester(
                &job,
                types::MINING_COMPLETE,
                job.bom.to_payload(),
                MessageStatus::Completed,
            )
            .await;
            if delivered {
                self.core.inventory_mut().deduct(&job.bom);
            } else {
                warn!(requester = %job.requester, "Requester gone, keeping materials");
            }
        }

        info!(task_id = %job.task_id, requester = %job.requester, "Mining job complete");
        self.core.set_state(AgentState::Idle, "job complete").await;
        Ok(())
    }
}

#[async_trait]
impl Agent for MinerBot {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    async fn perceive(&mut self, message: Message) -> Result<(), ColonyError> {
        match message.message_type.as_str() {
            types::MATERIALS_REQUIREMENTS => self.accept_request(&message).await,
            _ => {
                debug!(message_type = %message.message_type, source = %message.source, "Ignored");
                Ok(())
            }
        }
    }

    fn decide(&self) -> Result<Option<StateChange>, ColonyError> {
        if self.core.state() == AgentState::Running && self.target().is_empty() {
            return Ok(Some(StateChange::new(
                AgentState::Idle,
                "no outstanding job",
            )));
        }
        Ok(None)
    }

    async fn act(&mut self) -> Result<(), ColonyError> {
        let Some(mut site) = self.site() else {
            return Ok(());
        };

        let key = self.core.region_key(site.x, site.z);
        if !self.core.request_lock(&key).await {
            debug!(key = %key, "Quarry locked by another agent, backing off");
            self.core.pace().await;
            return Ok(());
        }

        let outcome = self.strategy.execute(self.core.world(), &mut site).await?;
        self.core.inventory_mut().absorb(&outcome.mined);

        if let Some(job) = self.job.as_mut() {
            job.site = site;
            if outcome.exhausted {
                job.site = Position::new(site.x + 1, job.top, site.z);
                info!(site = %job.site, "Shaft exhausted, moving over");
            }
        }

        if self.is_satisfied() {
            return self.deliver().await;
        }

        if let Some(job) = self.job.as_ref() {
            debug!(inventory = ?self.core.inventory(), target = ?job.bom, "Mining progress");
            if !job.for_user() {
                self.send_to_requester(
                    job,
                    types::INVENTORY,
                    self.core.inventory().to_payload(),
                    MessageStatus::Running,
                )
                .await;
            }
        }
        self.core.pace().await;
        Ok(())
    }

    async fn on_control(
        &mut self,
        command: &ControlCommand,
        params: &Payload,
    ) -> Result<(), ColonyError> {
        if let Some(name) = params.get("strategy").and_then(Value::as_str) {
            self.select_strategy(name)?;
        }

        match command {
            ControlCommand::Start if self.job.is_none() => {
                let player = self.core.world().player_position().await?;
                let site = position_param(params, ["x", "y", "z"], player.offset(0, -1, 0));
                let quota = int_param(params, "stone")
                    .and_then(|n| u64::try_from(n).ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(Self::DEFAULT_QUOTA);
                let job = Job::new(BillOfMaterials::new().with("stone", quota), site, USER);
                info!(site = %job.site, quota, "Mining started by user");
                self.job = Some(job);
            }
            ControlCommand::Update => {
                if let Some(job) = self.job.as_mut() {
                    job.site = position_param(params, ["x", "y", "z"], job.site);
                    job.top = job.site.y;
                    if let Some(quota) = int_param(params, "stone").and_then(|n| u64::try_from(n).ok()) {
                        job.bom.set("stone", quota);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn describe(&self) -> String {
        match &self.job {
            Some(job) => format!(
                "{} | {} at {} for {} | target {}",
                self.core.status_line(),
                self.strategy.name(),
                job.site,
                job.requester,
                Value::Object(job.bom.to_payload())
            ),
            None => format!("{} | {} idle", self.core.status_line(), self.strategy.name()),
        }
    }
}
