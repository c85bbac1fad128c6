//! Recursion guard for micro-cycles.
//!
//! Evaluated before any micro-cycle is spawned. Checks, in order:
//!
//! 1. Depth cap (a refusal, unless a depth override raises the ceiling)
//! 2. Human `terminate` override
//! 3. Resource constraints: cycle-tree time budget, host memory pressure
//! 4. Delimiting principles (skipped by a human `continue` override)
//! 5. Task complexity against the configured threshold

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{DelimitingConfig, OrchestratorConfig};
use crate::consensus::Proposal;
use crate::payload::TaskPayload;

/// Human decision attached to a sub-task payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanOverride {
    /// Never recurse on this sub-task.
    Terminate,
    /// Skip the heuristic principles. Never bypasses the depth cap.
    Continue,
}

impl std::fmt::Display for HumanOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Terminate => write!(f, "terminate"),
            Self::Continue => write!(f, "continue"),
        }
    }
}

/// Human-issued permission to exceed the configured depth for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthOverride {
    /// Allow nesting up to this depth.
    RaiseTo(u32),
    /// No depth ceiling for this call.
    Unbounded,
}

impl DepthOverride {
    /// Effective ceiling given the configured one; `None` means unbounded.
    pub fn ceiling(self, configured: u32) -> Option<u32> {
        match self {
            Self::RaiseTo(depth) => Some(depth.max(configured)),
            Self::Unbounded => None,
        }
    }
}

/// Why a micro-cycle was terminated instead of run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum TerminationReason {
    HumanOverride,
    Granularity { score: f64, threshold: f64 },
    CostBenefit { ratio: f64, threshold: f64 },
    Quality { score: f64, threshold: f64 },
    ResourceUsage { usage: f64, threshold: f64 },
    Complexity { score: f64, threshold: f64 },
    TimeBudget { elapsed_ms: u64, budget_ms: u64 },
    MemoryPressure { level: f64, limit: f64 },
}

impl TerminationReason {
    /// Resource exhaustion, as opposed to a judgement about the task.
    pub fn is_resource(&self) -> bool {
        matches!(self, Self::TimeBudget { .. } | Self::MemoryPressure { .. })
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HumanOverride => write!(f, "human_override"),
            Self::Granularity { score, threshold } => {
                write!(f, "granularity ({:.2} < {:.2})", score, threshold)
            }
            Self::CostBenefit { ratio, threshold } => {
                write!(f, "cost_benefit ({:.2} > {:.2})", ratio, threshold)
            }
            Self::Quality { score, threshold } => {
                write!(f, "quality ({:.2} > {:.2})", score, threshold)
            }
            Self::ResourceUsage { usage, threshold } => {
                write!(f, "resource_usage ({:.2} > {:.2})", usage, threshold)
            }
            Self::Complexity { score, threshold } => {
                write!(f, "complexity ({:.2} > {:.2})", score, threshold)
            }
            Self::TimeBudget {
                elapsed_ms,
                budget_ms,
            } => write!(f, "time_budget ({}ms / {}ms)", elapsed_ms, budget_ms),
            Self::MemoryPressure { level, limit } => {
                write!(f, "memory_pressure ({:.2} >= {:.2})", level, limit)
            }
        }
    }
}

/// Outcome of a recursion check.
#[derive(Debug, Clone, PartialEq)]
pub enum RecursionDecision {
    Proceed,
    /// Refused: the child would be deeper than allowed.
    DepthExceeded { depth: u32, max_depth: u32 },
    /// Allowed structurally, but the child is created already terminated.
    Terminate(TerminationReason),
}

impl RecursionDecision {
    pub fn should_stop(&self) -> bool {
        !matches!(self, Self::Proceed)
    }
}

/// Scores how complex a sub-task is, in `[0, 1]`.
///
/// `None` means "no opinion", which never terminates.
pub trait ComplexityScorer: Send + Sync {
    fn score(&self, task: &TaskPayload, proposals: &[Proposal]) -> Option<f64>;
}

/// Default scorer.
///
/// An explicit `complexity_score` on the task wins. Otherwise the variance of
/// the responding agents' confidences, normalized by the maximum possible
/// variance (0.25) for values in `[0, 1]`: agents that disagree about how
/// sure they are signal a hard problem.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceSpreadScorer;

impl ComplexityScorer for ConfidenceSpreadScorer {
    fn score(&self, task: &TaskPayload, proposals: &[Proposal]) -> Option<f64> {
        if let Some(explicit) = task.score("complexity_score") {
            return Some(explicit.clamp(0.0, 1.0));
        }
        let confidences: Vec<f64> = proposals
            .iter()
            .filter(|p| p.is_response())
            .map(|p| p.confidence)
            .collect();
        if confidences.len() < 2 {
            return None;
        }
        let n = confidences.len() as f64;
        let mean = confidences.iter().sum::<f64>() / n;
        let variance = confidences.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
        Some((variance / 0.25).clamp(0.0, 1.0))
    }
}

/// Host memory-pressure signal in `[0, 1]`.
pub trait ResourceMonitor: Send + Sync {
    fn memory_pressure(&self) -> f64;
}

/// Monitor for hosts that do not report pressure.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPressure;

impl ResourceMonitor for NoPressure {
    fn memory_pressure(&self) -> f64 {
        0.0
    }
}

/// Pressure level the host can update from anywhere.
#[derive(Debug, Clone, Default)]
pub struct PressureGauge(Arc<AtomicU64>);

impl PressureGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, level: f64) {
        self.0
            .store(level.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

impl ResourceMonitor for PressureGauge {
    fn memory_pressure(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Inputs for one recursion check.
#[derive(Debug, Clone, Copy)]
pub struct RecursionCheck<'a> {
    /// Depth the new micro-cycle would have.
    pub child_depth: u32,
    pub sub_task: &'a TaskPayload,
    /// Most recent proposals seen by the parent.
    pub proposals: &'a [Proposal],
    /// Time since the root cycle started.
    pub elapsed: Duration,
    pub depth_override: Option<DepthOverride>,
}

/// Decides whether a micro-cycle may be spawned.
#[derive(Clone)]
pub struct RecursionGuard {
    max_depth: u32,
    complexity_threshold: f64,
    time_budget: Option<Duration>,
    memory_pressure_limit: f64,
    delimiting: DelimitingConfig,
    scorer: Arc<dyn ComplexityScorer>,
    monitor: Arc<dyn ResourceMonitor>,
}

impl std::fmt::Debug for RecursionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecursionGuard")
            .field("max_depth", &self.max_depth)
            .field("complexity_threshold", &self.complexity_threshold)
            .field("time_budget", &self.time_budget)
            .field("memory_pressure_limit", &self.memory_pressure_limit)
            .finish_non_exhaustive()
    }
}

impl RecursionGuard {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            max_depth: config.max_recursion_depth,
            complexity_threshold: config.complexity_threshold,
            time_budget: config.cycle_time_budget(),
            memory_pressure_limit: config.memory_pressure_limit,
            delimiting: config.delimiting.clone(),
            scorer: Arc::new(ConfidenceSpreadScorer),
            monitor: Arc::new(NoPressure),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn ComplexityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn evaluate(&self, check: &RecursionCheck<'_>) -> RecursionDecision {
        let ceiling = match check.depth_override {
            Some(o) => o.ceiling(self.max_depth),
            None => Some(self.max_depth),
        };
        if let Some(max_depth) = ceiling {
            if check.child_depth > max_depth {
                return RecursionDecision::DepthExceeded {
                    depth: check.child_depth,
                    max_depth,
                };
            }
        }

        let task = check.sub_task;
        let human = task.human_override();
        if human == Some(HumanOverride::Terminate) {
            return RecursionDecision::Terminate(TerminationReason::HumanOverride);
        }

        if let Some(budget) = self.time_budget {
            if check.elapsed >= budget {
                return RecursionDecision::Terminate(TerminationReason::TimeBudget {
                    elapsed_ms: check.elapsed.as_millis() as u64,
                    budget_ms: budget.as_millis() as u64,
                });
            }
        }
        let level = self.monitor.memory_pressure();
        if level >= self.memory_pressure_limit {
            return RecursionDecision::Terminate(TerminationReason::MemoryPressure {
                level,
                limit: self.memory_pressure_limit,
            });
        }

        if human == Some(HumanOverride::Continue) {
            return RecursionDecision::Proceed;
        }

        if let Some(reason) = self.delimit(task) {
            return RecursionDecision::Terminate(reason);
        }

        match self.scorer.score(task, check.proposals) {
            Some(score) if score > self.complexity_threshold => {
                RecursionDecision::Terminate(TerminationReason::Complexity {
                    score,
                    threshold: self.complexity_threshold,
                })
            }
            _ => RecursionDecision::Proceed,
        }
    }

    fn delimit(&self, task: &TaskPayload) -> Option<TerminationReason> {
        let d = &self.delimiting;
        if let Some(score) = task.score("granularity_score") {
            if score < d.granularity {
                return Some(TerminationReason::Granularity {
                    score,
                    threshold: d.granularity,
                });
            }
        }
        if let Some(ratio) = task.score("cost_benefit_ratio") {
            if ratio > d.cost_benefit {
                return Some(TerminationReason::CostBenefit {
                    ratio,
                    threshold: d.cost_benefit,
                });
            }
        }
        if let Some(score) = task.score("quality_score") {
            if score > d.quality {
                return Some(TerminationReason::Quality {
                    score,
                    threshold: d.quality,
                });
            }
        }
        if let Some(usage) = task.score("resource_usage") {
            if usage > d.resource {
                return Some(TerminationReason::ResourceUsage {
                    usage,
                    threshold: d.resource,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edrr::Phase;
    use serde_json::json;

    fn guard() -> RecursionGuard {
        RecursionGuard::from_config(&OrchestratorConfig::default())
    }

    fn check<'a>(depth: u32, task: &'a TaskPayload) -> RecursionCheck<'a> {
        RecursionCheck {
            child_depth: depth,
            sub_task: task,
            proposals: &[],
            elapsed: Duration::ZERO,
            depth_override: None,
        }
    }

    #[test]
    fn test_depth_cap() {
        let task = TaskPayload::new("sub");
        assert_eq!(guard().evaluate(&check(3, &task)), RecursionDecision::Proceed);
        assert_eq!(
            guard().evaluate(&check(4, &task)),
            RecursionDecision::DepthExceeded {
                depth: 4,
                max_depth: 3
            }
        );
    }

    #[test]
    fn test_depth_override_raises_ceiling() {
        let task = TaskPayload::new("sub");
        let mut c = check(4, &task);
        c.depth_override = Some(DepthOverride::RaiseTo(4));
        assert_eq!(guard().evaluate(&c), RecursionDecision::Proceed);

        c.child_depth = 5;
        assert!(matches!(
            guard().evaluate(&c),
            RecursionDecision::DepthExceeded { max_depth: 4, .. }
        ));

        c.depth_override = Some(DepthOverride::Unbounded);
        assert_eq!(guard().evaluate(&c), RecursionDecision::Proceed);
    }

    #[test]
    fn test_continue_never_bypasses_depth() {
        let task = TaskPayload::new("sub").with_field("human_override", json!("continue"));
        assert!(matches!(
            guard().evaluate(&check(4, &task)),
            RecursionDecision::DepthExceeded { .. }
        ));
    }

    #[test]
    fn test_human_terminate() {
        let task = TaskPayload::new("sub").with_field("human_override", json!("terminate"));
        assert_eq!(
            guard().evaluate(&check(1, &task)),
            RecursionDecision::Terminate(TerminationReason::HumanOverride)
        );
    }

    #[test]
    fn test_delimiting_principles() {
        let cases = [
            ("granularity_score", 0.1),
            ("cost_benefit_ratio", 0.9),
            ("quality_score", 0.95),
            ("resource_usage", 0.95),
        ];
        for (field, value) in cases {
            let task = TaskPayload::new("sub").with_field(field, json!(value));
            let decision = guard().evaluate(&check(1, &task));
            assert!(decision.should_stop(), "{} = {} should terminate", field, value);
        }

        let fine = TaskPayload::new("sub")
            .with_field("granularity_score", json!(0.5))
            .with_field("quality_score", json!(0.5));
        assert_eq!(guard().evaluate(&check(1, &fine)), RecursionDecision::Proceed);
    }

    #[test]
    fn test_continue_skips_heuristics_but_not_resources() {
        let task = TaskPayload::new("sub")
            .with_field("human_override", json!("continue"))
            .with_field("granularity_score", json!(0.0));
        assert_eq!(guard().evaluate(&check(1, &task)), RecursionDecision::Proceed);

        let gauge = PressureGauge::new();
        gauge.set(0.95);
        let pressured = guard().with_monitor(Arc::new(gauge));
        assert!(matches!(
            pressured.evaluate(&check(1, &task)),
            RecursionDecision::Terminate(TerminationReason::MemoryPressure { .. })
        ));
    }

    #[test]
    fn test_time_budget() {
        let config = OrchestratorConfig {
            cycle_time_budget_ms: 1_000,
            ..Default::default()
        };
        let guard = RecursionGuard::from_config(&config);
        let task = TaskPayload::new("sub");
        let mut c = check(1, &task);
        c.elapsed = Duration::from_millis(1_500);
        let decision = guard.evaluate(&c);
        assert!(matches!(
            &decision,
            RecursionDecision::Terminate(reason) if reason.is_resource()
        ));
    }

    #[test]
    fn test_explicit_complexity_wins() {
        let task = TaskPayload::new("sub").with_field("complexity_score", json!(0.95));
        assert!(matches!(
            guard().evaluate(&check(1, &task)),
            RecursionDecision::Terminate(TerminationReason::Complexity { .. })
        ));
    }

    #[test]
    fn test_confidence_spread_scorer() {
        let task = TaskPayload::new("sub");
        let agree = vec![
            Proposal::submitted("a", "c", Phase::Expand, "x", 0.6),
            Proposal::submitted("b", "c", Phase::Expand, "y", 0.6),
        ];
        assert_eq!(ConfidenceSpreadScorer.score(&task, &agree), Some(0.0));

        let split = vec![
            Proposal::submitted("a", "c", Phase::Expand, "x", 0.0),
            Proposal::submitted("b", "c", Phase::Expand, "y", 1.0),
        ];
        assert_eq!(ConfidenceSpreadScorer.score(&task, &split), Some(1.0));
        assert_eq!(ConfidenceSpreadScorer.score(&task, &split[..1]), None);

        let mut c = check(1, &task);
        c.proposals = &split;
        assert!(guard().evaluate(&c).should_stop());
    }
}
