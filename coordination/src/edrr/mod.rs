//! EDRR: Expand, Differentiate, Refine, Retrospect.
//!
//! Phase model, cycle records, phase metrics, recursion termination and the
//! coordinator
//! that drives cycles (and their micro-cycles) through the phases.

pub mod coordinator;
pub mod cycle;
pub mod error;
pub mod metrics;
pub mod phase;
pub mod termination;

pub use coordinator::EdrrCoordinator;
pub use cycle::{
    Cycle, CycleArena, CycleHandle, CycleId, CycleSnapshot, CycleWarning, MicroCycleOutcome,
    PhaseResult, PhaseTransition,
};
pub use error::{CoordinatorError, CoordinatorResult, CycleContext};
pub use metrics::{run_gate, GateVerdict, PhaseMetrics, PhaseThresholds, QualityGate, ThresholdGate};
pub use phase::{CycleStatus, Phase};
pub use termination::{
    ComplexityScorer, ConfidenceSpreadScorer, DepthOverride, HumanOverride, NoPressure,
    PressureGauge, RecursionCheck, RecursionDecision, RecursionGuard, ResourceMonitor,
    TerminationReason,
};
