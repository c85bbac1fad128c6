//! Cycle records and the arena that owns them.
//!
//! Cycles reference each other by id only: a child stores its parent's id,
//! a parent owns the list of child ids. The arena is the single owner of
//! every record in a cycle tree.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::error::CycleContext;
use super::metrics::{GateVerdict, PhaseMetrics};
use super::phase::{CycleStatus, Phase};
use super::termination::TerminationReason;
use crate::consensus::{AgentId, ConsensusResult, Proposal};
use crate::manifest::Manifest;
use crate::payload::TaskPayload;
use crate::wsde::{DelegationMode, PeerReview};

pub type CycleId = String;

/// Degradation recorded on a cycle. Never blocks `advance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CycleWarning {
    MemoryPersistence {
        phase: Phase,
        key: String,
        error: String,
    },
    NoResponse {
        phase: Phase,
        agent_id: AgentId,
        reason: String,
    },
    BudgetExhausted {
        phase: Phase,
        detail: String,
    },
    RecursionTerminated {
        phase: Phase,
        child_id: CycleId,
        reason: TerminationReason,
    },
    Degraded {
        phase: Phase,
        reason: String,
    },
    /// Phase metrics missed their thresholds and recovery did not help.
    QualityGate {
        phase: Phase,
        failures: Vec<String>,
    },
}

impl CycleWarning {
    pub fn phase(&self) -> Phase {
        match self {
            Self::MemoryPersistence { phase, .. }
            | Self::NoResponse { phase, .. }
            | Self::BudgetExhausted { phase, .. }
            | Self::RecursionTerminated { phase, .. }
            | Self::Degraded { phase, .. }
            | Self::QualityGate { phase, .. } => *phase,
        }
    }
}

/// What a finished or terminated micro-cycle contributed to its parent phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroCycleOutcome {
    pub cycle_id: CycleId,
    pub status: CycleStatus,
    pub termination: Option<TerminationReason>,
    /// Latest decision the child reached, if any.
    pub decision: Option<String>,
}

/// Outcome of one executed phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub cycle_id: CycleId,
    pub phase: Phase,
    pub depth: u32,
    pub instructions: String,
    pub primus: Option<AgentId>,
    pub delegation: DelegationMode,
    pub proposals: Vec<Proposal>,
    pub consensus: Option<ConsensusResult>,
    pub review: Option<PeerReview>,
    /// Content carried forward into later phases.
    pub decision: Option<String>,
    pub micro_cycles: Vec<MicroCycleOutcome>,
    /// Produced without a full consensus round.
    pub degraded: bool,
    #[serde(default)]
    pub metrics: PhaseMetrics,
    /// Gate outcome; `None` when no gate is installed.
    #[serde(default)]
    pub quality_gate: Option<GateVerdict>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// One logged phase transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Returned by cycle creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleHandle {
    pub id: CycleId,
    pub depth: u32,
    pub status: CycleStatus,
}

/// Read-only view of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSnapshot {
    pub id: CycleId,
    pub task: String,
    pub parent: Option<CycleId>,
    pub parent_phase: Option<Phase>,
    pub depth: u32,
    pub phase: Phase,
    pub status: CycleStatus,
    pub children: Vec<CycleId>,
    pub completed_phases: Vec<Phase>,
    pub decisions: BTreeMap<Phase, String>,
    pub termination: Option<TerminationReason>,
    pub warnings: Vec<CycleWarning>,
    pub transitions: Vec<PhaseTransition>,
    pub metrics: BTreeMap<Phase, PhaseMetrics>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Age of the cycle at its last state change, not at the time of the
    /// snapshot. An idle cycle reports the same value until it changes again.
    pub elapsed_ms: u64,
}

/// A cycle record. Mutated only by the coordinator.
#[derive(Debug, Clone)]
pub struct Cycle {
    pub id: CycleId,
    pub task: TaskPayload,
    pub manifest: Arc<Manifest>,
    pub phase: Phase,
    pub parent: Option<CycleId>,
    /// Parent phase this micro-cycle was spawned in.
    pub parent_phase: Option<Phase>,
    pub depth: u32,
    pub children: Vec<CycleId>,
    pub results: BTreeMap<Phase, PhaseResult>,
    pub status: CycleStatus,
    pub termination: Option<TerminationReason>,
    pub warnings: Vec<CycleWarning>,
    pub transitions: Vec<PhaseTransition>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Age at the last state change; see [`Cycle::age`] for the live value.
    pub elapsed_ms: u64,
    /// A phase of this cycle is executing.
    pub(crate) in_flight: bool,
    /// The executing phase has joined its micro-cycles for the last time and
    /// accepts no new ones.
    pub(crate) sealed: bool,
    started: Instant,
}

impl Cycle {
    pub fn root(task: TaskPayload, manifest: Arc<Manifest>) -> Self {
        Self::new(task, manifest, None, None, 0)
    }

    pub fn child(parent: &Cycle, task: TaskPayload) -> Self {
        Self::new(
            task,
            Arc::clone(&parent.manifest),
            Some(parent.id.clone()),
            Some(parent.phase),
            parent.depth + 1,
        )
    }

    fn new(
        task: TaskPayload,
        manifest: Arc<Manifest>,
        parent: Option<CycleId>,
        parent_phase: Option<Phase>,
        depth: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task,
            manifest,
            phase: Phase::Expand,
            parent,
            parent_phase,
            depth,
            children: Vec::new(),
            results: BTreeMap::new(),
            status: CycleStatus::Running,
            termination: None,
            warnings: Vec::new(),
            transitions: Vec::new(),
            error: None,
            created_at: Utc::now(),
            elapsed_ms: 0,
            in_flight: false,
            sealed: false,
            started: Instant::now(),
        }
    }

    pub fn context(&self) -> CycleContext {
        CycleContext {
            cycle_id: self.id.clone(),
            phase: self.phase,
            depth: self.depth,
        }
    }

    pub fn handle(&self) -> CycleHandle {
        CycleHandle {
            id: self.id.clone(),
            depth: self.depth,
            status: self.status,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == CycleStatus::Running
    }

    /// Time since creation, measured now.
    pub fn age(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Refresh `elapsed_ms`; call on every mutation.
    pub fn touch(&mut self) {
        self.elapsed_ms = self.started.elapsed().as_millis() as u64;
    }

    pub fn warn(&mut self, warning: CycleWarning) {
        self.warnings.push(warning);
        self.touch();
    }

    /// Most recent decision across completed phases.
    pub fn latest_decision(&self) -> Option<&str> {
        self.results
            .values()
            .rev()
            .find_map(|r| r.decision.as_deref())
    }

    /// Proposals from the most recently completed phase.
    pub fn latest_proposals(&self) -> &[Proposal] {
        self.results
            .values()
            .next_back()
            .map_or(&[], |r| r.proposals.as_slice())
    }

    pub fn snapshot(&self) -> CycleSnapshot {
        CycleSnapshot {
            id: self.id.clone(),
            task: self.task.description.clone(),
            parent: self.parent.clone(),
            parent_phase: self.parent_phase,
            depth: self.depth,
            phase: self.phase,
            status: self.status,
            children: self.children.clone(),
            completed_phases: self.results.keys().copied().collect(),
            decisions: self
                .results
                .iter()
                .filter_map(|(phase, r)| r.decision.clone().map(|d| (*phase, d)))
                .collect(),
            termination: self.termination.clone(),
            warnings: self.warnings.clone(),
            transitions: self.transitions.clone(),
            metrics: self
                .results
                .iter()
                .map(|(phase, r)| (*phase, r.metrics.clone()))
                .collect(),
            error: self.error.clone(),
            created_at: self.created_at,
            elapsed_ms: self.elapsed_ms,
        }
    }
}

/// Owner of every cycle in a tree, indexed by id.
#[derive(Debug, Default)]
pub struct CycleArena {
    cycles: HashMap<CycleId, Cycle>,
}

impl CycleArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cycle: Cycle) -> CycleId {
        let id = cycle.id.clone();
        self.cycles.insert(id.clone(), cycle);
        id
    }

    pub fn get(&self, id: &str) -> Option<&Cycle> {
        self.cycles.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Cycle> {
        self.cycles.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    /// Walk parent links up to the root.
    pub fn root_of(&self, id: &str) -> Option<&Cycle> {
        let mut current = self.cycles.get(id)?;
        while let Some(parent) = current.parent.as_deref() {
            current = self.cycles.get(parent)?;
        }
        Some(current)
    }

    /// Children spawned in `phase`, in spawn order.
    pub fn children_in(&self, id: &str, phase: Phase) -> Vec<&Cycle> {
        self.cycles.get(id).map_or_else(Vec::new, |cycle| {
            cycle
                .children
                .iter()
                .filter_map(|child| self.cycles.get(child))
                .filter(|child| child.parent_phase == Some(phase))
                .collect()
        })
    }
}
