//! EDRR coordinator: the recursive phase machine.
//!
//! ```text
//! advance(cycle)
//!   ├─ join: run every Running micro-cycle of this phase (siblings concurrently)
//!   ├─ select Primus, delegate (broadcast / targeted)
//!   ├─ reach consensus (majority → weighted → dialectical)
//!   ├─ Refine only: peer review of the decision
//!   ├─ join again until no child is Running, then seal the phase
//!   ├─ measure the phase, run the quality gate (failures are warnings)
//!   ├─ persist phase result + communication history (failures are warnings)
//!   └─ transition to the next phase, publish events
//! ```
//!
//! One phase of a cycle executes at a time. Cycle records live in an arena
//! guarded by a mutex that is never held across an agent call. A sealed
//! phase refuses new micro-cycles, so every child a phase reports has
//! finished. Dropping an `advance` future releases the phase again.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{join_all, BoxFuture, FutureExt};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::cycle::{
    Cycle, CycleArena, CycleHandle, CycleId, CycleSnapshot, CycleWarning, MicroCycleOutcome,
    PhaseResult, PhaseTransition,
};
use super::error::{CoordinatorError, CoordinatorResult};
use super::metrics::{run_gate, GateVerdict, PhaseMetrics, QualityGate, ThresholdGate};
use super::phase::{CycleStatus, Phase};
use super::termination::{
    ComplexityScorer, DepthOverride, RecursionCheck, RecursionDecision, RecursionGuard,
    ResourceMonitor,
};
use crate::config::OrchestratorConfig;
use crate::consensus::{AgentId, ConsensusResult, Proposal, ProposalStatus};
use crate::dialectic::critique::summarize;
use crate::events::{EdrrEvent, EventBus, SharedEventBus};
use crate::manifest::Manifest;
use crate::payload::TaskPayload;
use crate::ports::{keys, MemoryPort};
use crate::wsde::{
    AuditEntry, DelegationMode, DelegationRequest, PeerReview, ReviewStatus, SharedTeam,
    TeamError,
};

/// Wait between attempts to join a child that another caller is advancing.
const CHILD_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Everything a phase needs, captured when it starts.
struct PhasePlan {
    cycle_id: CycleId,
    phase: Phase,
    depth: u32,
    task: TaskPayload,
    instructions: String,
    context: Vec<String>,
    started: Instant,
    started_at: chrono::DateTime<Utc>,
}

/// What a phase produced before it is stamped into a [`PhaseResult`].
#[derive(Default)]
struct PhaseExecution {
    primus: Option<AgentId>,
    proposals: Vec<Proposal>,
    consensus: Option<ConsensusResult>,
    review: Option<PeerReview>,
    decision: Option<String>,
    micro_cycles: Vec<MicroCycleOutcome>,
    degraded: bool,
    warnings: Vec<CycleWarning>,
}

impl PhaseExecution {
    fn warn(&mut self, warning: CycleWarning) {
        warn!(warning = ?warning, "Phase degraded");
        self.warnings.push(warning);
    }
}

/// Releases a started phase if `advance` is dropped before it finishes.
struct PhaseGuard {
    arena: Arc<Mutex<CycleArena>>,
    cycle_id: CycleId,
    phase: Phase,
    armed: bool,
}

impl PhaseGuard {
    fn new(arena: &Arc<Mutex<CycleArena>>, plan: &PhasePlan) -> Self {
        Self {
            arena: Arc::clone(arena),
            cycle_id: plan.cycle_id.clone(),
            phase: plan.phase,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut arena) = self.arena.try_lock() {
            release_phase(&mut arena, &self.cycle_id, self.phase);
            return;
        }
        let arena = Arc::clone(&self.arena);
        let cycle_id = std::mem::take(&mut self.cycle_id);
        let phase = self.phase;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    release_phase(&mut *arena.lock().await, &cycle_id, phase);
                });
            }
            Err(_) => error!(
                cycle_id = %cycle_id,
                phase = %phase,
                "Abandoned phase not released: no runtime"
            ),
        }
    }
}

/// Clear the in-flight mark of an abandoned phase. No-op once it finished.
fn release_phase(arena: &mut CycleArena, cycle_id: &str, phase: Phase) {
    if let Some(cycle) = arena.get_mut(cycle_id) {
        if cycle.in_flight && cycle.phase == phase {
            cycle.in_flight = false;
            cycle.sealed = false;
            cycle.touch();
            warn!(cycle_id, phase = %phase, "Phase abandoned before completion");
        }
    }
}

/// Drives cycles of one cycle tree through the EDRR phases.
pub struct EdrrCoordinator {
    config: OrchestratorConfig,
    team: SharedTeam,
    memory: Arc<dyn MemoryPort>,
    guard: RecursionGuard,
    events: SharedEventBus,
    gate: Option<Arc<dyn QualityGate>>,
    arena: Arc<Mutex<CycleArena>>,
}

impl EdrrCoordinator {
    pub fn new(config: OrchestratorConfig, team: SharedTeam, memory: Arc<dyn MemoryPort>) -> Self {
        Self {
            guard: RecursionGuard::from_config(&config),
            gate: config
                .quality_gate
                .then(|| Arc::new(ThresholdGate::new()) as Arc<dyn QualityGate>),
            config,
            team,
            memory,
            events: EventBus::new().shared(),
            arena: Arc::new(Mutex::new(CycleArena::new())),
        }
    }

    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn ComplexityScorer>) -> Self {
        self.guard = self.guard.with_scorer(scorer);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.guard = self.guard.with_monitor(monitor);
        self
    }

    pub fn with_quality_gate(mut self, gate: Arc<dyn QualityGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn team(&self) -> &SharedTeam {
        &self.team
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EdrrEvent> {
        self.events.subscribe()
    }

    /// Start a root cycle from untyped input.
    ///
    /// The payload and manifest are both validated before any cycle exists.
    pub async fn start_cycle(
        &self,
        task: Value,
        manifest: Option<Value>,
    ) -> CoordinatorResult<CycleHandle> {
        let task = TaskPayload::from_value(task)?;
        let manifest = match manifest {
            Some(value) => Manifest::from_value(value)?,
            None => Manifest::default(),
        };
        self.start_with(task, manifest).await
    }

    /// Start a root cycle from an already validated task and manifest.
    pub async fn start_with(
        &self,
        task: TaskPayload,
        manifest: Manifest,
    ) -> CoordinatorResult<CycleHandle> {
        let cycle = Cycle::root(task, Arc::new(manifest));
        let handle = cycle.handle();
        let task_value = cycle.task.to_value();
        let preview = summarize(&cycle.task.description, 80);
        self.arena.lock().await.insert(cycle);

        info!(cycle_id = %handle.id, depth = 0, "Cycle started");
        if let Err(e) = self
            .memory
            .put(&handle.id, Phase::Expand, keys::TASK, task_value)
            .await
        {
            self.record_warning(
                &handle.id,
                CycleWarning::MemoryPersistence {
                    phase: Phase::Expand,
                    key: keys::TASK.to_string(),
                    error: e.to_string(),
                },
            )
            .await;
        }
        self.events.publish(EdrrEvent::CycleStarted {
            cycle_id: handle.id.clone(),
            task_preview: preview,
            timestamp: Utc::now(),
        });
        Ok(handle)
    }

    /// Execute the current phase and move to the next one.
    pub async fn advance(&self, cycle_id: &str) -> CoordinatorResult<PhaseResult> {
        let plan = self.begin_phase(cycle_id).await?;
        let guard = PhaseGuard::new(&self.arena, &plan);
        debug!(
            cycle_id = %plan.cycle_id,
            phase = %plan.phase,
            depth = plan.depth,
            "Executing phase"
        );
        let outcome = self.execute_phase(&plan).await;
        let result = self.finish_phase(plan, outcome).await;
        guard.disarm();
        result
    }

    /// Advance until the cycle leaves the Running state.
    pub async fn run_to_completion(&self, cycle_id: &str) -> CoordinatorResult<CycleSnapshot> {
        loop {
            let snapshot = self.status(cycle_id).await?;
            if snapshot.status != CycleStatus::Running {
                return Ok(snapshot);
            }
            self.advance(cycle_id).await?;
        }
    }

    /// Spawn a micro-cycle inside the parent's current phase.
    ///
    /// Refused with `RecursionLimit` past the depth ceiling, and with
    /// `PhaseInProgress` once the parent phase is sealed. Other termination
    /// criteria still create the child, already `Terminated`, so the parent
    /// phase can report it.
    pub async fn create_micro_cycle(
        &self,
        parent_id: &str,
        phase: Phase,
        sub_task: Value,
        depth_override: Option<DepthOverride>,
    ) -> CoordinatorResult<CycleHandle> {
        let task = TaskPayload::from_value(sub_task)?;

        let mut arena = self.arena.lock().await;
        let (mut child, decision) = {
            let parent = arena
                .get(parent_id)
                .ok_or_else(|| CoordinatorError::CycleNotFound(parent_id.to_string()))?;
            if !parent.is_running() {
                return Err(CoordinatorError::CycleNotRunning {
                    context: parent.context(),
                    status: parent.status,
                });
            }
            if parent.phase != phase {
                return Err(CoordinatorError::PhaseMismatch {
                    context: parent.context(),
                    requested: phase,
                });
            }
            if parent.sealed {
                return Err(CoordinatorError::PhaseInProgress {
                    context: parent.context(),
                });
            }

            let elapsed = arena.root_of(parent_id).map(Cycle::age).unwrap_or_default();
            let decision = self.guard.evaluate(&RecursionCheck {
                child_depth: parent.depth + 1,
                sub_task: &task,
                proposals: parent.latest_proposals(),
                elapsed,
                depth_override,
            });
            if let RecursionDecision::DepthExceeded { depth, max_depth } = decision {
                warn!(
                    cycle_id = %parent.id,
                    phase = %phase,
                    depth = parent.depth,
                    requested = depth,
                    max_depth,
                    "Micro-cycle refused: recursion limit"
                );
                return Err(CoordinatorError::RecursionLimit {
                    context: parent.context(),
                    requested: depth,
                    max_depth,
                });
            }
            (Cycle::child(parent, task), decision)
        };

        let termination = match decision {
            RecursionDecision::Terminate(reason) => {
                child.status = CycleStatus::Terminated;
                child.termination = Some(reason.clone());
                child.touch();
                Some(reason)
            }
            _ => None,
        };
        let handle = child.handle();
        let summary = serde_json::to_value(child.snapshot()).ok();
        arena.insert(child);
        if let Some(parent) = arena.get_mut(parent_id) {
            parent.children.push(handle.id.clone());
            if let Some(reason) = &termination {
                parent.warn(CycleWarning::RecursionTerminated {
                    phase,
                    child_id: handle.id.clone(),
                    reason: reason.clone(),
                });
            }
            parent.touch();
        }
        drop(arena);

        match termination {
            Some(reason) => {
                info!(
                    cycle_id = %handle.id,
                    parent_id,
                    phase = %phase,
                    depth = handle.depth,
                    reason = %reason,
                    "Micro-cycle terminated"
                );
                if let Some(summary) = summary {
                    self.persist_quietly(&handle.id, Phase::Completed, keys::CYCLE_SUMMARY, summary)
                        .await;
                }
                self.events.publish(EdrrEvent::CycleTerminated {
                    cycle_id: handle.id.clone(),
                    parent_id: Some(parent_id.to_string()),
                    reason,
                    timestamp: Utc::now(),
                });
            }
            None => {
                info!(
                    cycle_id = %handle.id,
                    parent_id,
                    phase = %phase,
                    depth = handle.depth,
                    "Micro-cycle spawned"
                );
                self.events.publish(EdrrEvent::MicroCycleSpawned {
                    cycle_id: handle.id.clone(),
                    parent_id: parent_id.to_string(),
                    phase,
                    depth: handle.depth,
                    timestamp: Utc::now(),
                });
            }
        }
        Ok(handle)
    }

    /// Read-only view built from stored state.
    pub async fn status(&self, cycle_id: &str) -> CoordinatorResult<CycleSnapshot> {
        self.arena
            .lock()
            .await
            .get(cycle_id)
            .map(Cycle::snapshot)
            .ok_or_else(|| CoordinatorError::CycleNotFound(cycle_id.to_string()))
    }

    pub async fn phase_result(
        &self,
        cycle_id: &str,
        phase: Phase,
    ) -> CoordinatorResult<Option<PhaseResult>> {
        self.arena
            .lock()
            .await
            .get(cycle_id)
            .map(|c| c.results.get(&phase).cloned())
            .ok_or_else(|| CoordinatorError::CycleNotFound(cycle_id.to_string()))
    }

    /// Metrics of every completed phase.
    pub async fn phase_metrics(
        &self,
        cycle_id: &str,
    ) -> CoordinatorResult<BTreeMap<Phase, PhaseMetrics>> {
        self.status(cycle_id).await.map(|snapshot| snapshot.metrics)
    }

    pub async fn audit_trail(&self, cycle_id: &str) -> Vec<AuditEntry> {
        self.team.audit_trail(cycle_id).await
    }

    async fn begin_phase(&self, cycle_id: &str) -> CoordinatorResult<PhasePlan> {
        let mut arena = self.arena.lock().await;
        let cycle = arena
            .get_mut(cycle_id)
            .ok_or_else(|| CoordinatorError::CycleNotFound(cycle_id.to_string()))?;
        if !cycle.is_running() || cycle.phase.is_terminal() {
            return Err(CoordinatorError::CycleNotRunning {
                context: cycle.context(),
                status: cycle.status,
            });
        }
        if cycle.in_flight {
            return Err(CoordinatorError::PhaseInProgress {
                context: cycle.context(),
            });
        }
        cycle.in_flight = true;

        let phase = cycle.phase;
        let instructions = cycle
            .manifest
            .instructions_for(phase)
            .map(|p| p.instructions.clone())
            .unwrap_or_else(|| phase.default_instructions().to_string());
        let context = cycle
            .manifest
            .dependencies_of(phase)
            .into_iter()
            .filter_map(|dep| {
                cycle
                    .results
                    .get(&dep)
                    .and_then(|r| r.decision.as_ref())
                    .map(|d| format!("{}: {}", dep, d))
            })
            .collect();

        Ok(PhasePlan {
            cycle_id: cycle.id.clone(),
            phase,
            depth: cycle.depth,
            task: cycle.task.clone(),
            instructions,
            context,
            started: Instant::now(),
            started_at: Utc::now(),
        })
    }

    async fn execute_phase(&self, plan: &PhasePlan) -> Result<PhaseExecution, TeamError> {
        let mut exec = PhaseExecution::default();
        self.join_children(plan, &mut exec, false).await;
        self.run_round(plan, &mut exec).await?;
        // Children spawned while the round ran.
        self.join_children(plan, &mut exec, true).await;
        if exec.degraded && exec.decision.is_none() {
            exec.decision = exec.micro_cycles.iter().find_map(|m| m.decision.clone());
        }
        Ok(exec)
    }

    async fn run_round(
        &self,
        plan: &PhasePlan,
        exec: &mut PhaseExecution,
    ) -> Result<(), TeamError> {
        let tags = relevance_tags(&plan.task);
        let primus = self
            .team
            .select_primus_for(&plan.cycle_id, plan.phase, &tags)
            .await?;
        exec.primus = Some(primus.clone());

        let mut context = plan.context.clone();
        context.extend(exec.micro_cycles.iter().filter_map(|m| {
            m.decision
                .as_ref()
                .map(|d| format!("micro-cycle {}: {}", m.cycle_id, d))
        }));

        let proposals = self
            .team
            .delegate(&DelegationRequest {
                cycle_id: plan.cycle_id.clone(),
                phase: plan.phase,
                depth: plan.depth,
                task: plan.task.clone(),
                instructions: plan.instructions.clone(),
                context,
                mode: DelegationMode::for_phase(plan.phase),
            })
            .await?;
        for p in &proposals {
            if let ProposalStatus::NoResponse { reason } = &p.status {
                exec.warn(CycleWarning::NoResponse {
                    phase: plan.phase,
                    agent_id: p.agent_id.clone(),
                    reason: format!("{:?}", reason),
                });
            }
        }
        exec.proposals = proposals;

        if !exec.proposals.iter().any(Proposal::is_response) {
            exec.degraded = true;
            exec.warn(CycleWarning::Degraded {
                phase: plan.phase,
                reason: "no agent responded".to_string(),
            });
            return Ok(());
        }

        let consensus = self
            .team
            .reach_consensus(&plan.cycle_id, plan.phase, &tags, &exec.proposals)
            .await?;
        if let Some(record) = consensus.dialectical.as_ref().filter(|r| r.budget_exhausted) {
            exec.warn(CycleWarning::BudgetExhausted {
                phase: plan.phase,
                detail: format!(
                    "dialectical reasoning stopped after {}ms",
                    record.elapsed_ms
                ),
            });
        }
        exec.decision = consensus.decision.clone();

        if plan.phase == Phase::Refine {
            if let Some(decision) = exec.decision.clone() {
                self.review_decision(plan, &primus, &consensus, decision, exec)
                    .await?;
            }
        }
        exec.consensus = Some(consensus);
        Ok(())
    }

    /// Peer-review the Refine decision; an approved revision replaces it.
    async fn review_decision(
        &self,
        plan: &PhasePlan,
        primus: &str,
        consensus: &ConsensusResult,
        decision: String,
        exec: &mut PhaseExecution,
    ) -> Result<(), TeamError> {
        let decided = consensus
            .decided_proposal
            .as_ref()
            .and_then(|id| exec.proposals.iter().find(|p| &p.id == id))
            .cloned();
        let subject = decided.unwrap_or_else(|| {
            let responded: Vec<f64> = exec
                .proposals
                .iter()
                .filter(|p| p.is_response())
                .map(|p| p.confidence)
                .collect();
            let confidence = responded.iter().sum::<f64>() / responded.len().max(1) as f64;
            Proposal::submitted(primus, &plan.cycle_id, plan.phase, decision, confidence)
        });

        match self.team.request_peer_review(&subject, &[]).await {
            Ok(review) => {
                match review.status {
                    ReviewStatus::Approved => {
                        if let Some(latest) = review.latest_proposal() {
                            exec.decision = Some(latest.content.clone());
                        }
                    }
                    status => exec.warn(CycleWarning::Degraded {
                        phase: plan.phase,
                        reason: format!("peer review finished {}", status),
                    }),
                }
                exec.review = Some(review);
                Ok(())
            }
            Err(TeamError::NoReviewers(_)) => {
                exec.warn(CycleWarning::Degraded {
                    phase: plan.phase,
                    reason: "no eligible reviewers".to_string(),
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Drive every Running child of this phase to completion, then collect
    /// outcomes of all children spawned in it.
    ///
    /// Repeats until no child is Running. With `seal`, the phase is sealed
    /// under the same lock that observed that, so no child can slip in.
    async fn join_children(&self, plan: &PhasePlan, exec: &mut PhaseExecution, seal: bool) {
        loop {
            let pending: Vec<CycleId> = {
                let mut arena = self.arena.lock().await;
                let pending: Vec<CycleId> = arena
                    .children_in(&plan.cycle_id, plan.phase)
                    .into_iter()
                    .filter(|c| c.is_running())
                    .map(|c| c.id.clone())
                    .collect();
                if pending.is_empty() {
                    exec.micro_cycles = arena
                        .children_in(&plan.cycle_id, plan.phase)
                        .into_iter()
                        .map(|child| MicroCycleOutcome {
                            cycle_id: child.id.clone(),
                            status: child.status,
                            termination: child.termination.clone(),
                            decision: child.latest_decision().map(str::to_string),
                        })
                        .collect();
                    if seal {
                        if let Some(cycle) = arena.get_mut(&plan.cycle_id) {
                            cycle.sealed = true;
                        }
                    }
                    return;
                }
                pending
            };
            debug!(
                cycle_id = %plan.cycle_id,
                phase = %plan.phase,
                children = pending.len(),
                "Joining micro-cycles"
            );

            let runs = join_all(pending.iter().map(|id| self.run_child(id.clone()))).await;
            let mut busy = false;
            for (id, run) in pending.iter().zip(runs) {
                match run {
                    Ok(_) => {}
                    Err(CoordinatorError::PhaseInProgress { .. }) => busy = true,
                    Err(e) => exec.warn(CycleWarning::Degraded {
                        phase: plan.phase,
                        reason: format!("micro-cycle {} failed: {}", id, e),
                    }),
                }
            }
            if busy {
                // Another caller is advancing a child; wait for it to finish.
                tokio::time::sleep(CHILD_RETRY_INTERVAL).await;
            }
        }
    }

    /// Boxed so that a cycle can run its children recursively.
    fn run_child(&self, cycle_id: CycleId) -> BoxFuture<'_, CoordinatorResult<CycleSnapshot>> {
        async move { self.run_to_completion(&cycle_id).await }.boxed()
    }

    async fn finish_phase(
        &self,
        plan: PhasePlan,
        outcome: Result<PhaseExecution, TeamError>,
    ) -> CoordinatorResult<PhaseResult> {
        let exec = match outcome {
            Ok(exec) => exec,
            Err(e) => return Err(self.fail_cycle(&plan, e).await),
        };

        let duration_ms = plan.started.elapsed().as_millis() as u64;
        let mut warnings = exec.warnings;
        let mut metrics = PhaseMetrics::measure(
            &exec.proposals,
            exec.consensus.as_ref(),
            exec.review.as_ref(),
            duration_ms,
        );
        let quality_gate = self.gate.as_ref().map(|gate| {
            let verdict = run_gate(gate.as_ref(), plan.phase, &mut metrics);
            match &verdict {
                GateVerdict::Passed => {}
                GateVerdict::Recovered { failures } => info!(
                    cycle_id = %plan.cycle_id,
                    phase = %plan.phase,
                    failures = ?failures,
                    "Quality gate recovered"
                ),
                GateVerdict::Failed { failures } => {
                    warn!(
                        cycle_id = %plan.cycle_id,
                        phase = %plan.phase,
                        failures = ?failures,
                        "Quality gate failed"
                    );
                    warnings.push(CycleWarning::QualityGate {
                        phase: plan.phase,
                        failures: failures.clone(),
                    });
                }
            }
            verdict
        });

        let result = PhaseResult {
            cycle_id: plan.cycle_id.clone(),
            phase: plan.phase,
            depth: plan.depth,
            instructions: plan.instructions.clone(),
            primus: exec.primus,
            delegation: DelegationMode::for_phase(plan.phase),
            proposals: exec.proposals,
            consensus: exec.consensus,
            review: exec.review,
            decision: exec.decision,
            micro_cycles: exec.micro_cycles,
            degraded: exec.degraded,
            metrics,
            quality_gate,
            started_at: plan.started_at,
            duration_ms,
        };

        // Persist before the phase is marked complete.
        let stored = match serde_json::to_value(&result) {
            Ok(value) => self
                .memory
                .put(&plan.cycle_id, plan.phase, keys::PHASE_RESULT, value)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(error) = stored {
            warn!(
                cycle_id = %plan.cycle_id,
                phase = %plan.phase,
                error = %error,
                "Phase result not persisted"
            );
            warnings.push(CycleWarning::MemoryPersistence {
                phase: plan.phase,
                key: keys::PHASE_RESULT.to_string(),
                error,
            });
        }
        if let Err(e) = self
            .team
            .persist_history(self.memory.as_ref(), &plan.cycle_id, plan.phase)
            .await
        {
            warn!(
                cycle_id = %plan.cycle_id,
                phase = %plan.phase,
                error = %e,
                "Communication history not persisted"
            );
            warnings.push(CycleWarning::MemoryPersistence {
                phase: plan.phase,
                key: keys::COMMUNICATION_HISTORY.to_string(),
                error: e.to_string(),
            });
        }

        let next = plan.phase.next();
        let summary = {
            let mut arena = self.arena.lock().await;
            let cycle = arena
                .get_mut(&plan.cycle_id)
                .ok_or_else(|| CoordinatorError::CycleNotFound(plan.cycle_id.clone()))?;
            cycle.warnings.extend(warnings);
            cycle.results.insert(plan.phase, result.clone());
            cycle.transitions.push(PhaseTransition {
                from: plan.phase,
                to: next,
                at: Utc::now(),
                duration_ms,
            });
            cycle.phase = next;
            if next.is_terminal() {
                cycle.status = CycleStatus::Completed;
            }
            cycle.in_flight = false;
            cycle.sealed = false;
            cycle.touch();
            next.is_terminal().then(|| cycle.snapshot())
        };

        info!(
            cycle_id = %plan.cycle_id,
            phase = %plan.phase,
            next = %next,
            depth = plan.depth,
            duration_ms,
            degraded = result.degraded,
            "Phase transition"
        );
        self.events.publish(EdrrEvent::PhaseCompleted {
            cycle_id: plan.cycle_id.clone(),
            phase: plan.phase,
            next,
            depth: plan.depth,
            duration_ms,
            degraded: result.degraded,
            timestamp: Utc::now(),
        });

        if let Some(snapshot) = summary {
            info!(
                cycle_id = %plan.cycle_id,
                depth = plan.depth,
                elapsed_ms = snapshot.elapsed_ms,
                warnings = snapshot.warnings.len(),
                "Cycle completed"
            );
            if let Ok(value) = serde_json::to_value(&snapshot) {
                self.persist_quietly(&plan.cycle_id, Phase::Completed, keys::CYCLE_SUMMARY, value)
                    .await;
            }
            self.events.publish(EdrrEvent::CycleCompleted {
                cycle_id: plan.cycle_id.clone(),
                depth: plan.depth,
                elapsed_ms: snapshot.elapsed_ms,
                timestamp: Utc::now(),
            });
        }
        Ok(result)
    }

    async fn fail_cycle(&self, plan: &PhasePlan, e: TeamError) -> CoordinatorError {
        let reason = e.to_string();
        let context = {
            let mut arena = self.arena.lock().await;
            match arena.get_mut(&plan.cycle_id) {
                Some(cycle) => {
                    cycle.status = CycleStatus::Failed;
                    cycle.error = Some(reason.clone());
                    cycle.in_flight = false;
                    cycle.sealed = false;
                    cycle.touch();
                    cycle.context()
                }
                None => return CoordinatorError::CycleNotFound(plan.cycle_id.clone()),
            }
        };
        error!(
            cycle_id = %plan.cycle_id,
            phase = %plan.phase,
            depth = plan.depth,
            error = %reason,
            "Phase failed"
        );
        self.events.publish(EdrrEvent::CycleFailed {
            cycle_id: plan.cycle_id.clone(),
            phase: plan.phase,
            error: reason.clone(),
            timestamp: Utc::now(),
        });
        CoordinatorError::PhaseFailed { context, reason }
    }

    async fn record_warning(&self, cycle_id: &str, warning: CycleWarning) {
        warn!(cycle_id, warning = ?warning, "Cycle warning");
        if let Some(cycle) = self.arena.lock().await.get_mut(cycle_id) {
            cycle.warn(warning);
        }
    }

    /// Write to memory; a failure becomes a warning on the cycle.
    async fn persist_quietly(&self, cycle_id: &str, phase: Phase, key: &str, value: Value) {
        if let Err(e) = self.memory.put(cycle_id, phase, key, value).await {
            self.record_warning(
                cycle_id,
                CycleWarning::MemoryPersistence {
                    phase,
                    key: key.to_string(),
                    error: e.to_string(),
                },
            )
            .await;
        }
    }
}

/// Explicit tags when given, otherwise keywords from the description.
fn relevance_tags(task: &TaskPayload) -> Vec<String> {
    if task.tags.is_empty() {
        task.keywords()
    } else {
        task.tags.clone()
    }
}
