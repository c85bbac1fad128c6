//! Orchestrator configuration.
//!
//! Defaults are usable as-is. A TOML file can override any subset of keys,
//! and `EDRR_*` environment variables are applied last.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::consensus::VoteThreshold;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Limits for the dialectical reasoner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Maximum pairwise reduction depth.
    pub max_depth: u32,
    /// Wall-clock budget for one reasoning round (0 = unlimited).
    pub time_budget_ms: u64,
    /// Retries per failed sub-step, subject to the time budget.
    pub max_retries: u32,
    /// Deadline for a single agent call.
    pub call_timeout_ms: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            time_budget_ms: 60_000,
            max_retries: 2,
            call_timeout_ms: 20_000,
        }
    }
}

impl ReasoningConfig {
    pub fn time_budget(&self) -> Option<Duration> {
        (self.time_budget_ms > 0).then(|| Duration::from_millis(self.time_budget_ms))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Thresholds for the delimiting principles checked before recursion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelimitingConfig {
    /// Sub-tasks finer than this are not worth a micro-cycle.
    pub granularity: f64,
    /// Cost/benefit ratios above this terminate.
    pub cost_benefit: f64,
    /// Quality scores above this are already good enough.
    pub quality: f64,
    /// Resource usage above this terminates.
    pub resource: f64,
}

impl Default for DelimitingConfig {
    fn default() -> Self {
        Self {
            granularity: 0.2,
            cost_benefit: 0.5,
            quality: 0.9,
            resource: 0.8,
        }
    }
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Deepest allowed micro-cycle nesting without a human override.
    pub max_recursion_depth: u32,
    /// Vote share required for an outright decision.
    pub consensus_threshold: VoteThreshold,
    /// Per-agent deadline for a delegation round.
    pub agent_timeout_ms: u64,
    /// Reviewers per peer review.
    pub reviewer_count: usize,
    /// Revision rounds allowed before a review is finalized.
    pub max_revisions: u32,
    /// Agents reached by a targeted delegation.
    pub targeted_fanout: usize,
    /// Complexity above this stops further recursion.
    pub complexity_threshold: f64,
    /// Wall-clock budget per cycle (0 = unlimited).
    pub cycle_time_budget_ms: u64,
    /// Host memory-pressure level at which recursion stops.
    pub memory_pressure_limit: f64,
    /// Check phase metrics against the default per-phase thresholds.
    pub quality_gate: bool,
    pub reasoning: ReasoningConfig,
    pub delimiting: DelimitingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: 3,
            consensus_threshold: VoteThreshold::SimpleMajority,
            agent_timeout_ms: 30_000,
            reviewer_count: 2,
            max_revisions: 1,
            targeted_fanout: 2,
            complexity_threshold: 0.8,
            cycle_time_budget_ms: 0,
            memory_pressure_limit: 0.8,
            quality_gate: false,
            reasoning: ReasoningConfig::default(),
            delimiting: DelimitingConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply `EDRR_*` overrides. Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self) {
        env_override("EDRR_MAX_RECURSION_DEPTH", &mut self.max_recursion_depth);
        env_override("EDRR_AGENT_TIMEOUT_MS", &mut self.agent_timeout_ms);
        env_override("EDRR_REVIEWER_COUNT", &mut self.reviewer_count);
        env_override("EDRR_MAX_REVISIONS", &mut self.max_revisions);
        env_override("EDRR_COMPLEXITY_THRESHOLD", &mut self.complexity_threshold);
        env_override("EDRR_CYCLE_TIME_BUDGET_MS", &mut self.cycle_time_budget_ms);
        env_override("EDRR_MEMORY_PRESSURE_LIMIT", &mut self.memory_pressure_limit);
        env_override("EDRR_QUALITY_GATE", &mut self.quality_gate);
        env_override("EDRR_REASONING_MAX_DEPTH", &mut self.reasoning.max_depth);
        env_override(
            "EDRR_REASONING_TIME_BUDGET_MS",
            &mut self.reasoning.time_budget_ms,
        );
        if let Ok(raw) = std::env::var("EDRR_CONSENSUS_THRESHOLD") {
            match raw.parse::<f64>() {
                Ok(share) => self.consensus_threshold = VoteThreshold::AtLeast(share),
                Err(_) if raw.eq_ignore_ascii_case("majority") => {
                    self.consensus_threshold = VoteThreshold::SimpleMajority
                }
                Err(_) => warn!(value = %raw, "Ignoring invalid EDRR_CONSENSUS_THRESHOLD"),
            }
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if let VoteThreshold::AtLeast(share) = self.consensus_threshold {
            if !(share > 0.0 && share <= 1.0) {
                return Err(ConfigError::Invalid {
                    key: "consensus_threshold",
                    reason: format!("share {} must be in (0, 1]", share),
                });
            }
        }
        if self.agent_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "agent_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }

    pub fn cycle_time_budget(&self) -> Option<Duration> {
        (self.cycle_time_budget_ms > 0).then(|| Duration::from_millis(self.cycle_time_budget_ms))
    }
}

fn env_override<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!(key, value = %raw, "Ignoring unparseable config override"),
        }
    }
}
