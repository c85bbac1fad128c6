//! Cycle lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::edrr::{Phase, TerminationReason};

/// All coordinator lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdrrEvent {
    /// A root cycle started
    CycleStarted {
        cycle_id: String,
        task_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A phase finished and the cycle moved on
    PhaseCompleted {
        cycle_id: String,
        phase: Phase,
        next: Phase,
        depth: u32,
        duration_ms: u64,
        degraded: bool,
        timestamp: DateTime<Utc>,
    },

    /// A micro-cycle was spawned inside a parent phase
    MicroCycleSpawned {
        cycle_id: String,
        parent_id: String,
        phase: Phase,
        depth: u32,
        timestamp: DateTime<Utc>,
    },

    /// A micro-cycle was terminated before running
    CycleTerminated {
        cycle_id: String,
        parent_id: Option<String>,
        reason: TerminationReason,
        timestamp: DateTime<Utc>,
    },

    /// All four phases finished
    CycleCompleted {
        cycle_id: String,
        depth: u32,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Phase execution hit an internal error
    CycleFailed {
        cycle_id: String,
        phase: Phase,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl EdrrEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            EdrrEvent::CycleStarted { timestamp, .. }
            | EdrrEvent::PhaseCompleted { timestamp, .. }
            | EdrrEvent::MicroCycleSpawned { timestamp, .. }
            | EdrrEvent::CycleTerminated { timestamp, .. }
            | EdrrEvent::CycleCompleted { timestamp, .. }
            | EdrrEvent::CycleFailed { timestamp, .. } => *timestamp,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            EdrrEvent::CycleStarted { .. } => "cycle_started",
            EdrrEvent::PhaseCompleted { .. } => "phase_completed",
            EdrrEvent::MicroCycleSpawned { .. } => "micro_cycle_spawned",
            EdrrEvent::CycleTerminated { .. } => "cycle_terminated",
            EdrrEvent::CycleCompleted { .. } => "cycle_completed",
            EdrrEvent::CycleFailed { .. } => "cycle_failed",
        }
    }

    pub fn cycle_id(&self) -> &str {
        match self {
            EdrrEvent::CycleStarted { cycle_id, .. }
            | EdrrEvent::PhaseCompleted { cycle_id, .. }
            | EdrrEvent::MicroCycleSpawned { cycle_id, .. }
            | EdrrEvent::CycleTerminated { cycle_id, .. }
            | EdrrEvent::CycleCompleted { cycle_id, .. }
            | EdrrEvent::CycleFailed { cycle_id, .. } => cycle_id,
        }
    }

    /// Parent cycle, for events about micro-cycles.
    pub fn parent_id(&self) -> Option<&str> {
        match self {
            EdrrEvent::MicroCycleSpawned { parent_id, .. } => Some(parent_id),
            EdrrEvent::CycleTerminated { parent_id, .. } => parent_id.as_deref(),
            _ => None,
        }
    }
}
