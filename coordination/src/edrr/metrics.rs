//! Phase metrics and the quality gate checked at each transition.
//!
//! Every executed phase is measured. An installed [`QualityGate`] compares
//! the measurements with per-phase thresholds. A failing gate gets one
//! chance to recover; a phase that still fails is recorded with a warning.
//! The gate never blocks or reorders the phase sequence.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::phase::Phase;
use crate::consensus::{ConsensusResult, Proposal, RoundStatus};
use crate::wsde::PeerReview;

/// Measurements of one executed phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub duration_ms: u64,
    /// Agents asked for a proposal.
    pub proposals: usize,
    /// Agents that answered.
    pub responses: usize,
    /// Mean confidence of the responses.
    pub quality: f64,
    /// Responses over proposals requested.
    pub completeness: f64,
    /// Share of the winning content in the final tally.
    pub consistency: f64,
    /// Share of review criteria accepted in the last review round.
    pub coverage: Option<f64>,
    /// Disagreements the round had to resolve: one for a round without an
    /// outright decision, plus one per dialectical reconciliation.
    pub conflicts: usize,
}

impl PhaseMetrics {
    pub fn measure(
        proposals: &[Proposal],
        consensus: Option<&ConsensusResult>,
        review: Option<&PeerReview>,
        duration_ms: u64,
    ) -> Self {
        let confidences: Vec<f64> = proposals
            .iter()
            .filter(|p| p.is_response())
            .map(|p| p.confidence)
            .collect();
        let responses = confidences.len();
        let quality = if responses == 0 {
            0.0
        } else {
            confidences.iter().sum::<f64>() / responses as f64
        };
        let completeness = if proposals.is_empty() {
            0.0
        } else {
            responses as f64 / proposals.len() as f64
        };

        let consistency = consensus
            .and_then(|c| c.tally.first())
            .map_or(0.0, |entry| entry.share);
        let conflicts = consensus.map_or(0, |c| {
            usize::from(c.status != RoundStatus::Decided)
                + c.dialectical
                    .as_ref()
                    .map_or(0, |r| r.synthesis.reconciliations.len())
        });
        let coverage = review
            .and_then(|r| r.rounds.last())
            .filter(|round| !round.aggregate.is_empty())
            .map(|round| {
                let accepted = round.aggregate.values().filter(|ok| **ok).count();
                accepted as f64 / round.aggregate.len() as f64
            });

        Self {
            duration_ms,
            proposals: proposals.len(),
            responses,
            quality,
            completeness,
            consistency,
            coverage,
            conflicts,
        }
    }
}

/// Minimum scores a phase must reach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseThresholds {
    pub quality: f64,
    pub completeness: f64,
    pub consistency: f64,
    /// Checked only when the phase produced a review.
    pub coverage: Option<f64>,
    pub max_conflicts: usize,
}

impl PhaseThresholds {
    /// Early phases tolerate disagreement; later phases demand agreement.
    pub fn for_phase(phase: Phase) -> Self {
        let (quality, completeness, consistency, coverage, max_conflicts) = match phase {
            Phase::Expand => (0.5, 0.5, 0.5, None, 3),
            Phase::Differentiate => (0.5, 0.5, 0.7, None, 2),
            Phase::Refine => (0.7, 0.7, 0.7, Some(0.5), 1),
            Phase::Retrospect | Phase::Completed => (0.7, 0.85, 0.85, None, 0),
        };
        Self {
            quality,
            completeness,
            consistency,
            coverage,
            max_conflicts,
        }
    }

    /// Every threshold the metrics miss, as readable lines.
    pub fn failures(&self, metrics: &PhaseMetrics) -> Vec<String> {
        let mut failures = Vec::new();
        let mut floor = |name: &str, value: f64, min: f64| {
            if value < min {
                failures.push(format!("{} {:.2} < {:.2}", name, value, min));
            }
        };
        floor("quality", metrics.quality, self.quality);
        floor("completeness", metrics.completeness, self.completeness);
        floor("consistency", metrics.consistency, self.consistency);
        if let (Some(min), Some(value)) = (self.coverage, metrics.coverage) {
            floor("coverage", value, min);
        }
        if metrics.conflicts > self.max_conflicts {
            failures.push(format!(
                "conflicts {} > {}",
                metrics.conflicts, self.max_conflicts
            ));
        }
        failures
    }
}

/// Check that runs before a phase transition is committed.
pub trait QualityGate: Send + Sync {
    /// Ok when the phase is good enough, otherwise the reasons it is not.
    fn check(&self, phase: Phase, metrics: &PhaseMetrics) -> Result<(), Vec<String>>;

    /// Adjust failing metrics. Returns true when they should be checked again.
    fn recover(&self, _phase: Phase, _metrics: &mut PhaseMetrics, _failures: &[String]) -> bool {
        false
    }
}

/// Gate backed by [`PhaseThresholds`], with per-phase overrides.
#[derive(Debug, Clone, Default)]
pub struct ThresholdGate {
    overrides: BTreeMap<Phase, PhaseThresholds>,
}

impl ThresholdGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(mut self, phase: Phase, thresholds: PhaseThresholds) -> Self {
        self.overrides.insert(phase, thresholds);
        self
    }

    pub fn thresholds(&self, phase: Phase) -> PhaseThresholds {
        self.overrides
            .get(&phase)
            .cloned()
            .unwrap_or_else(|| PhaseThresholds::for_phase(phase))
    }
}

impl QualityGate for ThresholdGate {
    fn check(&self, phase: Phase, metrics: &PhaseMetrics) -> Result<(), Vec<String>> {
        let failures = self.thresholds(phase).failures(metrics);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures)
        }
    }
}

/// How a phase fared at the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum GateVerdict {
    Passed,
    /// Failed first, passed after recovery.
    Recovered { failures: Vec<String> },
    Failed { failures: Vec<String> },
}

impl GateVerdict {
    pub fn passed(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Check, recover once if needed, and check again.
pub fn run_gate(gate: &dyn QualityGate, phase: Phase, metrics: &mut PhaseMetrics) -> GateVerdict {
    let failures = match gate.check(phase, metrics) {
        Ok(()) => return GateVerdict::Passed,
        Err(failures) => failures,
    };
    if !gate.recover(phase, metrics, &failures) {
        return GateVerdict::Failed { failures };
    }
    match gate.check(phase, metrics) {
        Ok(()) => GateVerdict::Recovered { failures },
        Err(failures) => GateVerdict::Failed { failures },
    }
}
