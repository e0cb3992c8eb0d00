//! Pipeline coordinator
//!
//! Owns the agent registry, the scheduler and the event listener that
//! chains stages together:
//!
//! - `BronzeInserted` → run the Reconciler
//! - `SilverUpdated` from the Reconciler → run the Scorer
//! - `SilverUpdated` → run Curators of the affected cities
//! - `GoldPublished` → notify publish listeners
//!
//! Every agent run is recorded as an AgentRun, success or failure. Agent
//! code executes in its own task, so a panicking agent ends up as a failed
//! run instead of taking the coordinator down.
//!
//! Event triggers coalesce: a trigger that arrives while its agent is
//! running marks the agent for one more run after the current one.
//!
//! # Agent states
//! `idle → running → (idle | error)`; `paused` is an operator override
//! that also cancels the agent's schedule until `resume`.

pub mod hooks;
pub mod scheduler;

use crate::agents::{AgentContext, Collector, Curator, CuratorTarget, Reconciler, Scorer};
use crate::config::{parse_optional, PipelineSettings};
use crate::db::agents as agents_db;
use crate::db::algorithms;
use crate::db::bronze;
use crate::db::quality::{self, DataQualityReport};
use crate::db::sources;
use crate::error::{PipelineError, PipelineResult};
use crate::fetchers::fetcher_from_config;
use crate::types::{Agent, AgentMetrics, RunCounters};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use hooks::{GoldPublication, GoldPublishListener, LoggingPublishListener};
use localist_common::config::{AlgorithmConfig, LocalistConfig};
use localist_common::db::models::{
    AgentKind, AgentRun, AgentState, AlgorithmWeights, BronzeKind, DataSource, RunStatus,
};
use localist_common::events::{EventBus, PipelineEvent};
use localist_common::time;
use scheduler::{ScheduleHandle, ScheduleSpec, Scheduler};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry entry for one agent
struct AgentSlot {
    agent: Arc<dyn Agent>,
    schedule_spec: Option<ScheduleSpec>,
    state: Mutex<AgentState>,
    /// Held for the duration of a run
    run_lock: Arc<tokio::sync::Mutex<()>>,
    /// Set by an event trigger, cleared by the run that serves it
    rerun_requested: AtomicBool,
    schedule: Mutex<Option<ScheduleHandle>>,
}

impl AgentSlot {
    fn new(agent: Arc<dyn Agent>, schedule_spec: Option<ScheduleSpec>) -> Self {
        Self {
            agent,
            schedule_spec,
            state: Mutex::new(AgentState::Idle),
            run_lock: Arc::new(tokio::sync::Mutex::new(())),
            rerun_requested: AtomicBool::new(false),
            schedule: Mutex::new(None),
        }
    }

    fn state(&self) -> AgentState {
        *lock(&self.state)
    }

    fn cancel_schedule(&self) {
        if let Some(handle) = lock(&self.schedule).take() {
            handle.cancel();
        }
    }

    fn take_schedule(&self) -> Option<ScheduleHandle> {
        lock(&self.schedule).take()
    }
}

/// One agent in the status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub name: String,
    pub kind: AgentKind,
    pub city: Option<String>,
    pub state: AgentState,
    pub schedule: Option<String>,
    /// False when unscheduled, paused, or the coordinator is not started
    pub schedule_active: bool,
    pub last_run: Option<AgentRun>,
    pub metrics: AgentMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub started: bool,
    pub agents: Vec<AgentStatus>,
}

/// Result of one agent inside a pipeline phase
#[derive(Debug, Clone, Serialize)]
pub struct AgentOutcome {
    pub agent: String,
    /// `None` when the agent was paused and skipped
    pub status: Option<RunStatus>,
    pub run_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseSummary {
    pub phase: String,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outcomes: Vec<AgentOutcome>,
}

impl PhaseSummary {
    /// Every agent that ran in this phase failed
    pub fn failed_entirely(&self) -> bool {
        self.failed > 0 && self.completed == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub phases: Vec<PhaseSummary>,
}

/// Process-scoped pipeline service
pub struct Coordinator {
    me: Weak<Coordinator>,
    ctx: AgentContext,
    agents: RwLock<BTreeMap<String, Arc<AgentSlot>>>,
    scheduler: Scheduler,
    listeners: RwLock<Vec<Arc<dyn GoldPublishListener>>>,
    shutdown: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Triggered and scheduled runs, drained on shutdown
    runs: TaskTracker,
}

impl Coordinator {
    pub fn new(ctx: AgentContext) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            ctx,
            agents: RwLock::new(BTreeMap::new()),
            scheduler: Scheduler::new(),
            listeners: RwLock::new(Vec::new()),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            runs: TaskTracker::new(),
        })
    }

    /// Build a coordinator with every agent the configuration describes
    ///
    /// Seeds the default curation algorithm, applies configured algorithm
    /// definitions, registers data sources and marks runs left open by a
    /// previous process as failed. Schedules stay idle until [`start`].
    ///
    /// [`start`]: Coordinator::start
    pub async fn from_config(
        pool: SqlitePool,
        config: &LocalistConfig,
        root_folder: &Path,
    ) -> PipelineResult<Arc<Self>> {
        let settings = PipelineSettings::from_config(config)?;
        let reconciler_schedule = settings.reconciler_schedule;
        let scorer_schedule = settings.scorer_schedule;
        let events = EventBus::new(settings.event_capacity);
        let ctx = AgentContext::new(pool.clone(), events, settings);
        let coordinator = Coordinator::new(ctx.clone());

        let orphaned = agents_db::fail_orphaned_runs(&pool).await?;
        if orphaned > 0 {
            warn!(runs = orphaned, "Marked interrupted agent runs as failed");
        }

        algorithms::seed_default_algorithm(&pool).await?;
        for algorithm in &config.algorithms {
            algorithms::ensure_algorithm(&pool, &algorithm.name, &weights_from_config(algorithm)).await?;
        }

        coordinator
            .register(Arc::new(Reconciler::new(ctx.clone())), reconciler_schedule)
            .await?;
        coordinator
            .register(Arc::new(Scorer::new(ctx.clone())), scorer_schedule)
            .await?;

        for source in &config.sources {
            let data_source = DataSource {
                id: source.id.clone(),
                name: source.name.clone().unwrap_or_else(|| source.id.clone()),
                source_type: source.source_type,
                authority_weight: source.authority_weight,
                min_request_interval_ms: i64::try_from(source.min_request_interval_ms).unwrap_or(i64::MAX),
                enabled: source.enabled,
            };
            sources::upsert_source(&pool, &data_source).await?;

            if !source.enabled {
                info!(source_id = %source.id, "Source disabled; no collector registered");
                continue;
            }

            let fetcher = fetcher_from_config(source, root_folder)?;
            let schedule = parse_optional(source.schedule.as_deref())?;
            let collector = Collector::new(ctx.clone(), data_source, source.city.clone(), fetcher);
            coordinator.register(Arc::new(collector), schedule).await?;
        }

        for curator in &config.curators {
            let target = CuratorTarget::from_config(curator)?;
            if algorithms::latest_algorithm(&pool, &target.algorithm).await?.is_none() {
                return Err(PipelineError::Config(format!(
                    "curator '{}' uses unknown algorithm '{}'",
                    target.slug, target.algorithm
                )));
            }
            let schedule = parse_optional(curator.schedule.as_deref())?;
            coordinator.register(Arc::new(Curator::new(ctx.clone(), target)), schedule).await?;
        }

        coordinator.add_publish_listener(Arc::new(LoggingPublishListener));

        Ok(coordinator)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.ctx.pool
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.ctx.settings
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    fn slots(&self) -> Vec<Arc<AgentSlot>> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn slot(&self, name: &str) -> PipelineResult<Arc<AgentSlot>> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::AgentNotFound(name.to_string()))
    }

    /// Registered agent names in name order
    pub fn agent_names(&self) -> Vec<String> {
        self.slots().iter().map(|s| s.agent.name().to_string()).collect()
    }

    fn names_of(&self, kind: AgentKind) -> Vec<String> {
        self.slots()
            .iter()
            .filter(|s| s.agent.kind() == kind)
            .map(|s| s.agent.name().to_string())
            .collect()
    }

    /// Add an agent to the registry
    ///
    /// Names are unique; registering a second agent under a taken name is
    /// a configuration error.
    pub async fn register(self: &Arc<Self>, agent: Arc<dyn Agent>, schedule: Option<ScheduleSpec>) -> PipelineResult<()> {
        let name = agent.name().to_string();
        let kind = agent.kind();

        if self.slot(&name).is_ok() {
            return Err(PipelineError::Config(format!("agent '{}' is already registered", name)));
        }

        let schedule_text = schedule.map(|s| s.to_string());
        agents_db::register_agent(&self.ctx.pool, &name, kind, schedule_text.as_deref()).await?;

        let slot = Arc::new(AgentSlot::new(agent, schedule));
        {
            let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
            if agents.contains_key(&name) {
                return Err(PipelineError::Config(format!("agent '{}' is already registered", name)));
            }
            agents.insert(name.clone(), slot.clone());
        }

        if self.started.load(Ordering::SeqCst) {
            self.arm_schedule(&slot);
        }

        info!(agent = %name, kind = %kind, schedule = ?schedule_text, "Registered agent");
        Ok(())
    }

    pub fn add_publish_listener(&self, listener: Arc<dyn GoldPublishListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Arm schedules and start the event listener
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let slots = self.slots();
        for slot in &slots {
            if slot.state() != AgentState::Paused {
                self.arm_schedule(slot);
            }
        }

        if self.ctx.settings.event_triggers {
            let rx = self.ctx.events.subscribe();
            let task = tokio::spawn(listen_for_events(
                Arc::downgrade(self),
                rx,
                self.shutdown.child_token(),
            ));
            lock(&self.tasks).push(task);
        }

        info!(agents = slots.len(), event_triggers = self.ctx.settings.event_triggers, "Coordinator started");
    }

    /// Cancel every schedule and stop the event listener
    ///
    /// Returns once runs already in progress have finished and been
    /// recorded. No new triggered or scheduled run starts after the call.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.scheduler.shutdown();
        for slot in self.slots() {
            if let Some(handle) = slot.take_schedule() {
                handle.stop().await;
            }
        }

        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Coordinator task ended abnormally");
            }
        }

        self.runs.close();
        if !self.runs.is_empty() {
            info!(runs = self.runs.len(), "Waiting for agent runs to finish");
        }
        self.runs.wait().await;

        self.started.store(false, Ordering::SeqCst);
        info!("Coordinator shut down");
    }

    fn arm_schedule(self: &Arc<Self>, slot: &Arc<AgentSlot>) {
        let Some(spec) = slot.schedule_spec else {
            return;
        };

        let weak = Arc::downgrade(self);
        let name = slot.agent.name().to_string();
        let job_name = name.clone();
        let handle = self.scheduler.schedule(name.clone(), spec, move || {
            let weak = weak.clone();
            let name = job_name.clone();
            async move {
                let Some(coordinator) = weak.upgrade() else {
                    return;
                };
                if coordinator.shutdown.is_cancelled() {
                    return;
                }
                let run = {
                    let coordinator = coordinator.clone();
                    let name = name.clone();
                    coordinator.runs.clone().spawn(async move { coordinator.run_agent(&name).await })
                };
                match run.await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(agent = %name, error = %e, "Scheduled run failed to start"),
                    Err(e) => warn!(agent = %name, error = %e, "Scheduled run task ended abnormally"),
                }
            }
        });

        if let Some(previous) = lock(&slot.schedule).replace(handle) {
            previous.cancel();
        }
        debug!(agent = %name, schedule = %spec, "Schedule armed");
    }

    /// Run one agent now
    ///
    /// Returns `Ok(None)` without recording a run when the agent is paused
    /// or already running.
    pub async fn run_agent(&self, name: &str) -> PipelineResult<Option<AgentRun>> {
        let slot = self.slot(name)?;

        if slot.state() == AgentState::Paused {
            info!(agent = %name, "Agent is paused; run skipped");
            return Ok(None);
        }

        let guard = match slot.run_lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                info!(agent = %name, "Agent already running; run skipped");
                return Ok(None);
            }
        };

        self.execute_slot(&slot, guard).await.map(Some)
    }

    /// Like [`run_agent`](Coordinator::run_agent), but waits for an
    /// in-progress run to finish instead of skipping
    async fn run_agent_after_current(&self, name: &str) -> PipelineResult<Option<AgentRun>> {
        let slot = self.slot(name)?;
        let guard = slot.run_lock.clone().lock_owned().await;

        if slot.state() == AgentState::Paused {
            info!(agent = %name, "Agent is paused; run skipped");
            return Ok(None);
        }

        self.execute_slot(&slot, guard).await.map(Some)
    }

    async fn execute_slot(&self, slot: &Arc<AgentSlot>, running: OwnedMutexGuard<()>) -> PipelineResult<AgentRun> {
        let name = slot.agent.name().to_string();
        let pool = &self.ctx.pool;

        let run_id = agents_db::start_run(pool, &name).await?;
        self.change_state(slot, AgentState::Running, true).await;
        info!(agent = %name, run_id = %run_id, "Agent run started");

        let started = Instant::now();
        let agent = slot.agent.clone();
        let joined = tokio::spawn(async move {
            let mut counters = RunCounters::default();
            let result = agent.execute(&mut counters).await;
            (counters, result)
        })
        .await;

        let (counters, failure) = match joined {
            Ok((counters, Ok(()))) => (counters, None),
            Ok((counters, Err(e))) => (counters, Some(e.to_string())),
            Err(join_error) if join_error.is_panic() => {
                let payload = join_error.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                (RunCounters::default(), Some(format!("agent panicked: {}", message)))
            }
            Err(join_error) => (RunCounters::default(), Some(format!("agent task aborted: {}", join_error))),
        };

        let elapsed = started.elapsed();
        slot.agent.metrics_cell().record(&counters, elapsed, failure.clone());

        let status = if failure.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        if let Err(e) = agents_db::finish_run(pool, &run_id, status, &counters, failure.as_deref()).await {
            error!(agent = %name, run_id = %run_id, error = %e, "Failed to record agent run");
        }

        match &failure {
            Some(message) => error!(
                agent = %name,
                run_id = %run_id,
                processed = counters.processed,
                failed = counters.failed,
                error = %message,
                "Agent run failed"
            ),
            None => info!(
                agent = %name,
                run_id = %run_id,
                processed = counters.processed,
                created = counters.created,
                updated = counters.updated,
                failed = counters.failed,
                skipped = counters.skipped,
                elapsed_ms = elapsed.as_millis() as u64,
                "Agent run completed"
            ),
        }

        let next = if failure.is_some() {
            AgentState::Error
        } else {
            AgentState::Idle
        };
        self.change_state(slot, next, true).await;

        self.ctx.events.emit_lossy(PipelineEvent::AgentRunFinished {
            agent_name: name,
            run_id: run_id.clone(),
            status,
            timestamp: time::now(),
        });

        // Release before checking, so a trigger either sees the lock free or
        // leaves its flag for this check
        drop(running);
        if slot.rerun_requested.load(Ordering::SeqCst) {
            self.spawn_triggered(slot.clone());
        }

        Ok(agents_db::get_run(pool, &run_id).await?)
    }

    /// Move an agent to `new_state`; with `keep_pause` a paused agent stays paused
    async fn change_state(&self, slot: &AgentSlot, new_state: AgentState, keep_pause: bool) {
        let old_state = {
            let mut state = lock(&slot.state);
            let old = *state;
            if old == new_state || (keep_pause && old == AgentState::Paused) {
                return;
            }
            *state = new_state;
            old
        };

        let name = slot.agent.name();
        if let Err(e) = agents_db::set_agent_status(&self.ctx.pool, name, new_state).await {
            warn!(agent = %name, error = %e, "Failed to persist agent state");
        }

        self.ctx.events.emit_lossy(PipelineEvent::AgentStateChanged {
            agent_name: name.to_string(),
            old_state,
            new_state,
            timestamp: time::now(),
        });
    }

    pub fn agent_state(&self, name: &str) -> PipelineResult<AgentState> {
        Ok(self.slot(name)?.state())
    }

    /// Operator pause: cancels the schedule and blocks runs until resumed
    ///
    /// A run already in progress finishes; the agent stays paused.
    pub async fn pause(&self, name: &str) -> PipelineResult<()> {
        let slot = self.slot(name)?;
        slot.cancel_schedule();
        self.change_state(&slot, AgentState::Paused, false).await;
        info!(agent = %name, "Agent paused");
        Ok(())
    }

    /// Lift a pause and re-arm the schedule; a no-op for an agent not paused
    pub async fn resume(self: &Arc<Self>, name: &str) -> PipelineResult<()> {
        let slot = self.slot(name)?;
        if slot.state() != AgentState::Paused {
            return Ok(());
        }

        let next = if slot.run_lock.try_lock().is_err() {
            AgentState::Running
        } else {
            AgentState::Idle
        };
        self.change_state(&slot, next, false).await;

        if self.started.load(Ordering::SeqCst) {
            self.arm_schedule(&slot);
        }
        info!(agent = %name, "Agent resumed");
        Ok(())
    }

    /// Collectors, then Reconciler and Scorer, then Curators
    ///
    /// A failing agent never stops its phase or the phases after it. A
    /// phase in which every agent failed is logged as an error.
    pub async fn run_full_pipeline(&self) -> PipelineSummary {
        let started_at = time::now();
        info!("Full pipeline run started");

        let mut archive = self.names_of(AgentKind::Reconciler);
        archive.extend(self.names_of(AgentKind::Scorer));

        let phases = vec![
            self.run_phase("collect", self.names_of(AgentKind::Collector), true).await,
            self.run_phase("reconcile", archive, false).await,
            self.run_phase("curate", self.names_of(AgentKind::Curator), true).await,
        ];

        let summary = PipelineSummary {
            started_at,
            finished_at: time::now(),
            phases,
        };
        info!(
            phases = summary.phases.len(),
            failed = summary.phases.iter().map(|p| p.failed).sum::<usize>(),
            "Full pipeline run finished"
        );
        summary
    }

    async fn run_phase(&self, phase: &str, names: Vec<String>, concurrent: bool) -> PhaseSummary {
        let outcomes = if concurrent {
            join_all(names.iter().map(|name| self.phase_outcome(name))).await
        } else {
            let mut outcomes = Vec::with_capacity(names.len());
            for name in &names {
                outcomes.push(self.phase_outcome(name).await);
            }
            outcomes
        };

        let completed = outcomes.iter().filter(|o| o.status == Some(RunStatus::Completed)).count();
        let failed = outcomes.iter().filter(|o| o.status == Some(RunStatus::Failed)).count();
        let skipped = outcomes.iter().filter(|o| o.status.is_none()).count();

        let summary = PhaseSummary {
            phase: phase.to_string(),
            completed,
            failed,
            skipped,
            outcomes,
        };

        if summary.failed_entirely() {
            error!(phase, failed, "Every agent in pipeline phase failed");
        } else if names.is_empty() {
            info!(phase, "No agents registered for pipeline phase");
        } else {
            info!(phase, completed, failed, skipped, "Pipeline phase finished");
        }
        summary
    }

    async fn phase_outcome(&self, name: &str) -> AgentOutcome {
        match self.run_agent_after_current(name).await {
            Ok(Some(run)) => AgentOutcome {
                agent: name.to_string(),
                status: Some(run.status),
                run_id: Some(run.id),
                error: run.error_message,
            },
            Ok(None) => AgentOutcome {
                agent: name.to_string(),
                status: None,
                run_id: None,
                error: None,
            },
            Err(e) => AgentOutcome {
                agent: name.to_string(),
                status: Some(RunStatus::Failed),
                run_id: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Registered agents with state, schedule and last run
    pub async fn status(&self) -> PipelineResult<CoordinatorStatus> {
        let mut agents = Vec::new();
        for slot in self.slots() {
            let name = slot.agent.name().to_string();
            let last_run = agents_db::runs_for_agent(&self.ctx.pool, &name, 1).await?.into_iter().next();
            let schedule_active = lock(&slot.schedule).as_ref().is_some_and(|h| !h.is_cancelled());

            agents.push(AgentStatus {
                kind: slot.agent.kind(),
                city: slot.agent.city().map(str::to_string),
                state: slot.state(),
                schedule: slot.schedule_spec.map(|s| s.to_string()),
                schedule_active,
                last_run,
                metrics: slot.agent.metrics(),
                name,
            });
        }

        Ok(CoordinatorStatus {
            started: self.started.load(Ordering::SeqCst),
            agents,
        })
    }

    /// Run history for one agent, newest first
    pub async fn agent_runs(&self, name: &str, limit: i64) -> PipelineResult<Vec<AgentRun>> {
        self.slot(name)?;
        Ok(agents_db::runs_for_agent(&self.ctx.pool, name, limit).await?)
    }

    pub async fn data_quality(&self) -> PipelineResult<DataQualityReport> {
        Ok(quality::data_quality_report(&self.ctx.pool).await?)
    }

    /// Return one Bronze record to pending; false when it is unknown or
    /// already mapped to a venue
    pub async fn reset_record(&self, kind: BronzeKind, id: &str) -> PipelineResult<bool> {
        let reset = bronze::reset_to_pending(&self.ctx.pool, kind, id).await?;
        if reset {
            info!(kind = %kind.as_str(), id, "Bronze record reset to pending");
        } else {
            warn!(kind = %kind.as_str(), id, "Bronze record not reset (unknown or already mapped)");
        }
        Ok(reset)
    }

    /// Return every errored Bronze record of a source to pending
    pub async fn retry_source_errors(&self, source_id: &str) -> PipelineResult<u64> {
        let reset = bronze::reset_errors_for_source(&self.ctx.pool, source_id).await?;
        info!(source_id, reset, "Errored Bronze records reset to pending");
        Ok(reset)
    }

    /// Curators whose city is among `cities`, plus city-less curators
    fn curators_for(&self, cities: &[String]) -> Vec<String> {
        self.slots()
            .iter()
            .filter(|s| s.agent.kind() == AgentKind::Curator)
            .filter(|s| s.agent.city().map_or(true, |city| cities.iter().any(|c| c == city)))
            .map(|s| s.agent.name().to_string())
            .collect()
    }

    /// Request a run from an event; coalesces with a run in progress
    fn trigger(&self, name: &str) {
        let Ok(slot) = self.slot(name) else {
            debug!(agent = %name, "No such agent registered; trigger ignored");
            return;
        };
        slot.rerun_requested.store(true, Ordering::SeqCst);
        self.spawn_triggered(slot);
    }

    fn spawn_triggered(&self, slot: Arc<AgentSlot>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let Some(coordinator) = self.me.upgrade() else {
            return;
        };
        self.runs.spawn(async move {
            coordinator.serve_trigger(&slot).await;
        });
    }

    async fn serve_trigger(&self, slot: &Arc<AgentSlot>) {
        let name = slot.agent.name();
        let Ok(guard) = slot.run_lock.clone().try_lock_owned() else {
            debug!(agent = %name, "Agent running; trigger queued");
            return;
        };
        if !slot.rerun_requested.swap(false, Ordering::SeqCst) {
            return;
        }
        if slot.state() == AgentState::Paused {
            info!(agent = %name, "Agent is paused; trigger dropped");
            return;
        }
        if let Err(e) = self.execute_slot(slot, guard).await {
            warn!(agent = %name, error = %e, "Triggered run failed to start");
        }
    }

    async fn handle_event(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::BronzeInserted { source_id, created, .. } => {
                debug!(source_id = %source_id, created, "Bronze inserted; triggering reconciler");
                self.trigger(Reconciler::NAME);
            }
            PipelineEvent::SilverUpdated { origin, cities, venues, .. } => {
                debug!(origin = %origin, cities = ?cities, venues, "Silver updated");
                if origin == AgentKind::Reconciler {
                    self.trigger(Scorer::NAME);
                }
                for name in self.curators_for(&cities) {
                    self.trigger(&name);
                }
            }
            PipelineEvent::GoldPublished {
                list_id,
                slug,
                city,
                category,
                item_count,
                timestamp,
            } => {
                let publication = GoldPublication {
                    list_id,
                    slug,
                    city,
                    category,
                    item_count,
                    published_at: timestamp,
                };
                let listeners: Vec<Arc<dyn GoldPublishListener>> = self
                    .listeners
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                for listener in listeners {
                    listener.on_gold_published(&publication).await;
                }
            }
            PipelineEvent::AgentStateChanged { .. } | PipelineEvent::AgentRunFinished { .. } => {}
        }
    }
}

async fn listen_for_events(
    coordinator: Weak<Coordinator>,
    mut rx: broadcast::Receiver<PipelineEvent>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            received = rx.recv() => match received {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event listener lagged; triggers dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        coordinator.handle_event(event).await;
    }
    debug!("Event listener stopped");
}

/// Weights for a configured algorithm definition
pub fn weights_from_config(config: &AlgorithmConfig) -> AlgorithmWeights {
    AlgorithmWeights {
        expert_weight: config.expert_weight,
        consumer_weight: config.consumer_weight,
        recency_weight: config.recency_weight,
        source_weights: config.source_weights.clone(),
        boost_factors: config.boost_factors.clone(),
        min_source_count: config.min_source_count,
        min_confidence_score: config.min_confidence_score,
    }
}
