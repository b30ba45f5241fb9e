//! Agent runtime loop
//!
//! Each agent runs one loop on its own task. One pass of the loop is a
//! quantum:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ recv (bounded wait)                                      │
//! │   ├── command.*  ──▶ control table ──▶ on_control        │
//! │   └── data       ──▶ perceive                            │
//! │ RUNNING ──▶ decide ──▶ act (if still RUNNING)            │
//! │ WAITING ──▶ decide                                       │
//! └──────────────────────────────────────────────────────────┘
//!        Err / panic ──▶ ERROR        shutdown ──▶ STOPPED
//! ```
//!
//! The loop ends once the agent reaches a terminal state.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use super::{Agent, AgentState, CommandOutcome, ControlCommand, Transition, HELP_TEXT};
use crate::error::ColonyError;
use crate::message::Message;

/// Summary returned when an agent loop ends
#[derive(Debug, Clone)]
pub struct AgentReport {
    pub agent_id: String,
    pub final_state: AgentState,
    /// Number of quanta executed
    pub quanta: u64,
    pub transitions: Vec<Transition>,
}

/// Spawn an agent loop on the current runtime
pub fn spawn_agent(
    mut agent: Box<dyn Agent>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<AgentReport> {
    tokio::spawn(async move { run_agent(agent.as_mut(), shutdown).await })
}

/// Drive `agent` until it reaches a terminal state
pub async fn run_agent<A>(agent: &mut A, shutdown: watch::Receiver<bool>) -> AgentReport
where
    A: Agent + ?Sized,
{
    let span = agent.core().span().clone();
    async move {
        let restored = agent.core_mut().restore().await;
        info!(restored, "Agent started");

        let mut quanta: u64 = 0;
        while !agent.core().state().is_terminal() {
            let shutting_down = *shutdown.borrow();
            if shutting_down {
                agent
                    .core_mut()
                    .set_state(AgentState::Stopped, "shutdown")
                    .await;
                break;
            }

            quanta += 1;
            let outcome = AssertUnwindSafe(run_quantum(agent)).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) if !e.is_agent_fatal() => {
                    warn!(error = %e, "Quantum refused work");
                    agent.core().report(&e.to_string()).await;
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Quantum failed");
                    agent
                        .core_mut()
                        .set_state(AgentState::Error, &e.to_string())
                        .await;
                }
                Err(panic) => {
                    let reason = format!("panic: {}", panic_message(panic.as_ref()));
                    error!(reason = %reason, "Quantum panicked");
                    agent.core_mut().set_state(AgentState::Error, &reason).await;
                }
            }

            let tick = agent.core().config().tick_interval;
            if tick.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(tick).await;
            }
        }

        let final_state = agent.core().state();
        info!(final_state = %final_state, quanta, "Agent finished");
        AgentReport {
            agent_id: agent.core().agent_id().to_string(),
            final_state,
            quanta,
            transitions: agent.core().transitions().to_vec(),
        }
    }
    .instrument(span)
    .await
}

async fn run_quantum<A>(agent: &mut A) -> Result<(), ColonyError>
where
    A: Agent + ?Sized,
{
    let timeout = agent.core().config().poll_timeout;
    let mailbox = agent.core().mailbox().clone();

    if let Some(message) = mailbox.recv_timeout(timeout).await {
        debug!(
            message_type = %message.message_type,
            source = %message.source,
            "Received"
        );
        if message.is_command() {
            dispatch_command(agent, message).await?;
        } else {
            agent.perceive(message).await?;
        }
    }

    match agent.core().state() {
        AgentState::Running => {
            apply_decision(agent).await?;
            if agent.core().state() == AgentState::Running {
                agent.act().await?;
            }
        }
        AgentState::Waiting => apply_decision(agent).await?,
        _ => {}
    }
    Ok(())
}

async fn apply_decision<A>(agent: &mut A) -> Result<(), ColonyError>
where
    A: Agent + ?Sized,
{
    if let Some(change) = agent.decide()? {
        agent
            .core_mut()
            .set_state(change.next, &change.reason)
            .await;
    }
    Ok(())
}

/// Route one control command through the control table
async fn dispatch_command<A>(agent: &mut A, message: Message) -> Result<(), ColonyError>
where
    A: Agent + ?Sized,
{
    let Some(command) = ControlCommand::from_message(&message) else {
        warn!(message_type = %message.message_type, "Malformed command type");
        agent
            .core()
            .report(&format!("unrecognised command {}", message.message_type))
            .await;
        return Ok(());
    };

    let state = agent.core().state();
    info!(command = %command, state = %state, source = %message.source, "Control command");

    match command.resolve(state) {
        CommandOutcome::Start => {
            agent.on_control(&command, &message.payload).await?;
            if agent.core().state() == AgentState::Idle {
                agent
                    .core_mut()
                    .set_state(AgentState::Running, "start command")
                    .await;
            }
        }
        CommandOutcome::Pause => {
            agent.core().save_checkpoint().await;
            agent
                .core_mut()
                .set_state(AgentState::Paused, "pause command")
                .await;
        }
        CommandOutcome::Resume => {
            let recovered = agent.core().load_checkpoint().await;
            if recovered.restored {
                *agent.core_mut().inventory_mut() = recovered.inventory;
            }
            agent
                .core_mut()
                .set_state(AgentState::Running, "resume command")
                .await;
        }
        CommandOutcome::Stop => {
            agent
                .core_mut()
                .set_state(AgentState::Stopped, "stop command")
                .await;
        }
        CommandOutcome::Update => {
            agent.on_control(&command, &message.payload).await?;
            agent.core().report("updated").await;
        }
        CommandOutcome::ReportStatus => {
            let status = agent.describe();
            agent.core().report(&status).await;
        }
        CommandOutcome::ReportHelp => {
            agent.core().report(HELP_TEXT).await;
        }
        CommandOutcome::Rejected => {
            warn!(command = %command, state = %state, "Command invalid for state");
            agent
                .core()
                .report(&format!("cannot {} while {}", command, state))
                .await;
        }
    }
    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentCore, AgentEnv, StateChange};
    use crate::bus::MessageBus;
    use crate::checkpoint::CheckpointStore;
    use crate::config::RuntimeConfig;
    use crate::message::{types, Payload, USER};
    use crate::world::MemoryWorld;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    /// Counts acts; finishes after `work` of them
    struct Counter {
        core: AgentCore,
        work: u32,
        acted: u32,
        panic_on_act: bool,
    }

    #[async_trait]
    impl Agent for Counter {
        fn core(&self) -> &AgentCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut AgentCore {
            &mut self.core
        }

        async fn perceive(&mut self, _message: Message) -> Result<(), ColonyError> {
            Ok(())
        }

        fn decide(&self) -> Result<Option<StateChange>, ColonyError> {
            if self.acted >= self.work {
                return Ok(Some(StateChange::new(AgentState::Idle, "work done")));
            }
            Ok(None)
        }

        async fn act(&mut self) -> Result<(), ColonyError> {
            if self.panic_on_act {
                panic!("pickaxe exploded");
            }
            self.acted += 1;
            self.core.inventory_mut().add("stone", 1);
            Ok(())
        }
    }

    struct Fixture {
        bus: Arc<MessageBus>,
        store: CheckpointStore,
        world: Arc<MemoryWorld>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                bus: Arc::new(MessageBus::new()),
                store: CheckpointStore::memory(),
                world: Arc::new(MemoryWorld::default()),
            }
        }

        async fn counter(&self, work: u32) -> Counter {
            let env = AgentEnv::new(
                self.bus.clone(),
                self.store.clone(),
                self.world.clone(),
                RuntimeConfig::fast(),
            );
            Counter {
                core: AgentCore::new("counter", env).await,
                work,
                acted: 0,
                panic_on_act: false,
            }
        }

        async fn command(&self, verb: &str) {
            let message = Message::new(types::command(verb), USER, "counter", Payload::new());
            assert!(self.bus.publish(message).await);
        }
    }

    async fn run_to_end(agent: &mut Counter, shutdown: watch::Receiver<bool>) -> AgentReport {
        tokio::time::timeout(Duration::from_secs(5), run_agent(agent, shutdown))
            .await
            .expect("agent loop did not finish")
    }

    #[tokio::test]
    async fn test_start_work_stop() {
        let fixture = Fixture::new();
        let mut agent = fixture.counter(3).await;
        let (_tx, rx) = watch::channel(false);

        fixture.command("start").await;
        fixture.command("status").await;
        fixture.command("stop").await;

        let report = run_to_end(&mut agent, rx).await;
        assert_eq!(report.final_state, AgentState::Stopped);
        let states: Vec<AgentState> = report.transitions.iter().map(|t| t.to).collect();
        assert_eq!(states.first(), Some(&AgentState::Running));
        assert_eq!(states.last(), Some(&AgentState::Stopped));
        assert!(agent.acted >= 1);
    }

    #[tokio::test]
    async fn test_decide_returns_to_idle() {
        let fixture = Fixture::new();
        let mut agent = fixture.counter(2).await;
        let (tx, rx) = watch::channel(false);

        fixture.command("start").await;
        let handle = tokio::spawn(async move {
            let report = run_to_end(&mut agent, rx).await;
            (report, agent.acted)
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        let (report, acted) = handle.await.unwrap();

        assert_eq!(acted, 2);
        let states: Vec<AgentState> = report.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![AgentState::Running, AgentState::Idle, AgentState::Stopped]
        );
        assert_eq!(report.transitions[1].reason, "work done");
    }

    #[tokio::test]
    async fn test_panic_in_act_becomes_error() {
        let fixture = Fixture::new();
        let mut agent = fixture.counter(5).await;
        agent.panic_on_act = true;
        let (_tx, rx) = watch::channel(false);

        let key = agent.core().region_key(0, 0);
        assert!(agent.core().request_lock(&key).await);
        fixture.command("start").await;

        let report = run_to_end(&mut agent, rx).await;
        assert_eq!(report.final_state, AgentState::Error);
        let last = report.transitions.last().unwrap();
        assert!(last.reason.contains("pickaxe exploded"));
        assert!(fixture.bus.lock_owner(&key).await.is_none());

        let stored = fixture.store.backend().load("counter").await.unwrap().unwrap();
        assert_eq!(stored.state, AgentState::Error);
    }

    #[tokio::test]
    async fn test_unimplemented_perceive_is_fatal() {
        struct Mute {
            core: AgentCore,
        }

        #[async_trait]
        impl Agent for Mute {
            fn core(&self) -> &AgentCore {
                &self.core
            }

            fn core_mut(&mut self) -> &mut AgentCore {
                &mut self.core
            }
        }

        let fixture = Fixture::new();
        let env = AgentEnv::new(
            fixture.bus.clone(),
            fixture.store.clone(),
            fixture.world.clone(),
            RuntimeConfig::fast(),
        );
        let mut agent = Mute {
            core: AgentCore::new("mute", env).await,
        };
        let (_tx, rx) = watch::channel(false);

        let data = Message::new(types::MAP, "ExplorerBot-1", "mute", Payload::new());
        fixture.bus.publish(data).await;

        let report = tokio::time::timeout(Duration::from_secs(5), run_agent(&mut agent, rx))
            .await
            .unwrap();
        assert_eq!(report.final_state, AgentState::Error);
        assert!(report.transitions[0].reason.contains("Not implemented"));
    }

    #[tokio::test]
    async fn test_invalid_command_reported_not_fatal() {
        let fixture = Fixture::new();
        let mut agent = fixture.counter(1).await;
        let (_tx, rx) = watch::channel(false);

        fixture.command("resume").await;
        fixture.command("dance").await;
        fixture.command("stop").await;

        let report = run_to_end(&mut agent, rx).await;
        assert_eq!(report.final_state, AgentState::Stopped);
        assert_eq!(report.transitions.len(), 1);

        let posted = fixture.world.posted().await;
        assert!(posted.iter().any(|line| line.contains("cannot resume while IDLE")));
        assert!(posted.iter().any(|line| line.contains("cannot dance while IDLE")));
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let fixture = Fixture::new();
        let mut agent = fixture.counter(1000).await;
        let (_tx, rx) = watch::channel(false);

        fixture.command("start").await;
        fixture.command("pause").await;
        fixture.command("resume").await;
        fixture.command("pause").await;
        fixture.command("stop").await;

        let report = run_to_end(&mut agent, rx).await;
        let states: Vec<AgentState> = report.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![
                AgentState::Running,
                AgentState::Paused,
                AgentState::Running,
                AgentState::Paused,
                AgentState::Stopped,
            ]
        );
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_idle_agent() {
        let fixture = Fixture::new();
        let mut agent = fixture.counter(1).await;
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let report = run_to_end(&mut agent, rx).await;
        assert_eq!(report.final_state, AgentState::Stopped);
        assert_eq!(report.quanta, 0);
        assert_eq!(report.transitions[0].reason, "shutdown");
    }

    #[tokio::test]
    async fn test_restores_inventory_at_start() {
        let fixture = Fixture::new();
        fixture
            .store
            .save("counter", AgentState::Running, &[("stone", 4)].into_iter().collect())
            .await;
        let mut agent = fixture.counter(1).await;
        let (_tx, rx) = watch::channel(false);
        fixture.command("stop").await;

        let report = run_to_end(&mut agent, rx).await;
        assert_eq!(report.transitions[0].from, AgentState::Idle);
        assert_eq!(agent.core().inventory().count("stone"), 4);
    }
}
