//! Dialectical reasoner.
//!
//! ```text
//! thesis ──► antithesis (one critique per category) ──► synthesis ──► evaluation
//!                                                          │
//!                          pairwise reduction, one level per depth step
//! ```
//!
//! Two guards bound every round independently: the reduction depth is
//! compared against `max_depth` before each level, and elapsed time is
//! compared against the budget before every agent call and retry.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::critique::{reconcile, summarize, Critique, CritiqueCategory, CritiqueSource, Reconciliation};
use super::record::{DialecticalRecord, Evaluation, Synthesis, Thesis};
use crate::config::ReasoningConfig;
use crate::payload::{PayloadError, TaskPayload};
use crate::wsde::{AgentBehavior, AgentError};

/// Error type for reasoning
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReasoningError {
    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("Thesis has no content")]
    EmptyThesis,
}

/// Result type for reasoning operations
pub type ReasoningResult<T> = Result<T, ReasoningError>;

/// Outcome of a guard check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardOutcome {
    Continue,
    DepthCapped { depth: u32, max_depth: u32 },
    BudgetExhausted { elapsed_ms: u64, budget_ms: u64 },
}

impl GuardOutcome {
    pub fn should_stop(&self) -> bool {
        !matches!(self, Self::Continue)
    }
}

impl std::fmt::Display for GuardOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::DepthCapped { depth, max_depth } => {
                write!(f, "depth_capped ({} / {})", depth, max_depth)
            }
            Self::BudgetExhausted {
                elapsed_ms,
                budget_ms,
            } => write!(f, "budget_exhausted ({}ms / {}ms)", elapsed_ms, budget_ms),
        }
    }
}

/// Depth cap and time budget for one reasoning round.
#[derive(Debug, Clone)]
pub struct ReasoningGuard {
    max_depth: u32,
    budget: Option<Duration>,
    started: Instant,
}

impl ReasoningGuard {
    pub fn new(max_depth: u32, budget: Option<Duration>) -> Self {
        Self {
            max_depth,
            budget,
            started: Instant::now(),
        }
    }

    /// May the reduction descend from `depth` to `depth + 1`?
    pub fn check_depth(&self, depth: u32) -> GuardOutcome {
        if depth >= self.max_depth {
            GuardOutcome::DepthCapped {
                depth,
                max_depth: self.max_depth,
            }
        } else {
            GuardOutcome::Continue
        }
    }

    pub fn check_budget(&self) -> GuardOutcome {
        match self.budget {
            Some(budget) if self.started.elapsed() >= budget => GuardOutcome::BudgetExhausted {
                elapsed_ms: self.elapsed_ms(),
                budget_ms: budget.as_millis() as u64,
            },
            _ => GuardOutcome::Continue,
        }
    }

    /// Time left in the budget, `None` when unlimited.
    pub fn remaining(&self) -> Option<Duration> {
        self.budget
            .map(|b| b.saturating_sub(self.started.elapsed()))
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// A partial synthesis covering a set of categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisPart {
    pub content: String,
    pub categories: BTreeSet<CritiqueCategory>,
}

/// Input to one pairwise merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub thesis: String,
    pub left: SynthesisPart,
    pub right: SynthesisPart,
    /// Conflicts between the two sides that the merge must settle.
    pub reconciliations: Vec<Reconciliation>,
}

impl SynthesisRequest {
    /// Deterministic merge: both sides verbatim plus every resolution.
    pub fn compose(&self) -> String {
        let mut lines = vec![self.left.content.clone(), self.right.content.clone()];
        for rec in &self.reconciliations {
            lines.push(format!(
                "[{} vs {}] {}",
                rec.first, rec.second, rec.resolution
            ));
        }
        lines.join("\n")
    }

    fn merged_categories(&self) -> BTreeSet<CritiqueCategory> {
        self.left
            .categories
            .union(&self.right.categories)
            .copied()
            .collect()
    }
}

/// Runs thesis → antithesis → synthesis → evaluation.
#[derive(Clone)]
pub struct DialecticalReasoner {
    config: ReasoningConfig,
    critic: Option<(String, Arc<dyn AgentBehavior>)>,
}

impl DialecticalReasoner {
    pub fn new(config: ReasoningConfig) -> Self {
        Self {
            config,
            critic: None,
        }
    }

    /// Use an agent for critiques and merges instead of templates.
    pub fn with_critic(mut self, agent_id: &str, critic: Arc<dyn AgentBehavior>) -> Self {
        self.critic = Some((agent_id.to_string(), critic));
        self
    }

    pub fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    /// Reason over an untyped task payload.
    ///
    /// The thesis is the payload's `content` field, falling back to its
    /// description. A non-mapping payload fails before anything runs.
    pub async fn reason(
        &self,
        task: Value,
        critiques: Vec<Critique>,
        max_depth: u32,
        time_budget: Option<Duration>,
    ) -> ReasoningResult<DialecticalRecord> {
        let payload = TaskPayload::from_value(task)?;
        let content = payload
            .fields
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or(payload.description.as_str());
        let mut thesis = Thesis::new(content);
        thesis.proposal_id = payload
            .fields
            .get("proposal_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        thesis.agent_id = payload
            .fields
            .get("agent_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        self.run(thesis, None, critiques, max_depth, time_budget)
            .await
    }

    pub async fn reason_thesis(
        &self,
        thesis: Thesis,
        critiques: Vec<Critique>,
        max_depth: u32,
        time_budget: Option<Duration>,
    ) -> ReasoningResult<DialecticalRecord> {
        self.run(thesis, None, critiques, max_depth, time_budget)
            .await
    }

    /// Resolve two competing proposals. The antithesis seeds the critiques.
    pub async fn reason_pair(
        &self,
        thesis: Thesis,
        antithesis: Thesis,
        max_depth: u32,
        time_budget: Option<Duration>,
    ) -> ReasoningResult<DialecticalRecord> {
        let source = CritiqueSource::Antithesis(
            antithesis
                .proposal_id
                .clone()
                .or_else(|| antithesis.agent_id.clone())
                .unwrap_or_default(),
        );
        let seeds = Critique::from_text(&antithesis.content, source);
        self.run(thesis, Some(antithesis), seeds, max_depth, time_budget)
            .await
    }

    /// Same as [`reason_pair`](Self::reason_pair) with the configured limits.
    pub async fn reason_pair_default(
        &self,
        thesis: Thesis,
        antithesis: Thesis,
    ) -> ReasoningResult<DialecticalRecord> {
        self.reason_pair(
            thesis,
            antithesis,
            self.config.max_depth,
            self.config.time_budget(),
        )
        .await
    }

    async fn run(
        &self,
        thesis: Thesis,
        antithesis: Option<Thesis>,
        seeds: Vec<Critique>,
        max_depth: u32,
        time_budget: Option<Duration>,
    ) -> ReasoningResult<DialecticalRecord> {
        if thesis.content.is_empty() {
            return Err(ReasoningError::EmptyThesis);
        }

        let guard = ReasoningGuard::new(max_depth, time_budget);
        let mut budget_exhausted = false;

        let critiques = self
            .antithesis(&thesis, seeds, &guard, &mut budget_exhausted)
            .await;
        let (synthesis, depth, depth_capped) = self
            .synthesize(&thesis, &critiques, &guard, &mut budget_exhausted)
            .await;
        let evaluation = Evaluation::score(&thesis, &critiques, &synthesis);

        let record = DialecticalRecord {
            id: uuid::Uuid::new_v4().to_string(),
            thesis,
            antithesis,
            critiques,
            synthesis,
            evaluation,
            depth,
            max_depth,
            elapsed_ms: guard.elapsed_ms(),
            budget_exhausted,
            depth_capped,
            created_at: Utc::now(),
        };

        info!(
            record_id = %record.id,
            depth = record.depth,
            max_depth,
            budget_exhausted,
            depth_capped,
            improved = record.evaluation.improved,
            elapsed_ms = record.elapsed_ms,
            "Dialectical round finalized"
        );
        Ok(record)
    }

    /// Keep every seeded critique and fill each missing category.
    async fn antithesis(
        &self,
        thesis: &Thesis,
        seeds: Vec<Critique>,
        guard: &ReasoningGuard,
        budget_exhausted: &mut bool,
    ) -> Vec<Critique> {
        let mut critiques = seeds;
        for category in CritiqueCategory::ALL {
            if critiques.iter().any(|c| c.category == category) {
                continue;
            }
            let critique = match &self.critic {
                None => Critique::template(category, &thesis.content),
                Some((critic_id, critic)) => {
                    let content = thesis.content.clone();
                    let critic = Arc::clone(critic);
                    let outcome = self
                        .call_with_retry(guard, "critique", budget_exhausted, move || {
                            let critic = Arc::clone(&critic);
                            let content = content.clone();
                            async move { critic.critique(&content, category).await }
                        })
                        .await;
                    match outcome {
                        Some(text) => Critique::new(category, text)
                            .with_source(CritiqueSource::Agent(critic_id.clone())),
                        None if *budget_exhausted => {
                            Critique::placeholder(category, "time budget exhausted")
                        }
                        None => Critique::placeholder(category, "critic did not respond"),
                    }
                }
            };
            critiques.push(critique);
        }
        critiques.sort_by_key(|c| c.category);
        critiques
    }

    /// Pairwise reduction of per-category parts into one synthesis.
    async fn synthesize(
        &self,
        thesis: &Thesis,
        critiques: &[Critique],
        guard: &ReasoningGuard,
        budget_exhausted: &mut bool,
    ) -> (Synthesis, u32, bool) {
        let mut parts: Vec<SynthesisPart> = CritiqueCategory::ALL
            .iter()
            .map(|&category| {
                let lines: Vec<String> = critiques
                    .iter()
                    .filter(|c| c.category == category)
                    .map(|c| format!("[{}] {}", category, c.content))
                    .collect();
                SynthesisPart {
                    content: lines.join("\n"),
                    categories: [category].into_iter().collect(),
                }
            })
            .collect();

        let mut reconciliations: Vec<Reconciliation> = Vec::new();
        let mut depth = 0;
        let mut depth_capped = false;

        while parts.len() > 1 {
            let outcome = guard.check_depth(depth);
            if outcome.should_stop() {
                debug!(%outcome, remaining = parts.len(), "Reduction stopped");
                depth_capped = true;
                break;
            }
            depth += 1;

            let mut next = Vec::with_capacity(parts.len().div_ceil(2));
            let mut iter = parts.into_iter();
            while let Some(left) = iter.next() {
                match iter.next() {
                    Some(right) => {
                        let request = merge_request(thesis, left, right, &mut reconciliations);
                        next.push(self.merge(request, guard, budget_exhausted).await);
                    }
                    None => next.push(left),
                }
            }
            parts = next;
        }

        // Whatever is left after a depth cap is folded without agent calls.
        let merged = parts
            .into_iter()
            .reduce(|left, right| {
                let request = merge_request(thesis, left, right, &mut reconciliations);
                SynthesisPart {
                    categories: request.merged_categories(),
                    content: request.compose(),
                }
            })
            .unwrap_or(SynthesisPart {
                content: String::new(),
                categories: BTreeSet::new(),
            });

        let synthesis = Synthesis {
            content: format!(
                "Revised proposal: {}\n{}",
                summarize(&thesis.content, 200),
                merged.content
            ),
            addressed: merged.categories,
            reconciliations,
        };
        (synthesis, depth, depth_capped)
    }

    async fn merge(
        &self,
        request: SynthesisRequest,
        guard: &ReasoningGuard,
        budget_exhausted: &mut bool,
    ) -> SynthesisPart {
        let categories = request.merged_categories();
        let content = match &self.critic {
            None => request.compose(),
            Some((_, critic)) => {
                let critic = Arc::clone(critic);
                let shared = request.clone();
                let outcome = self
                    .call_with_retry(guard, "synthesize", budget_exhausted, move || {
                        let critic = Arc::clone(&critic);
                        let request = shared.clone();
                        async move { critic.synthesize(&request).await }
                    })
                    .await;
                outcome.unwrap_or_else(|| request.compose())
            }
        };
        SynthesisPart {
            content,
            categories,
        }
    }

    /// Call an agent with a deadline, retrying while the budget allows.
    async fn call_with_retry<T, F, Fut>(
        &self,
        guard: &ReasoningGuard,
        step: &'static str,
        budget_exhausted: &mut bool,
        call: F,
    ) -> Option<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let outcome = guard.check_budget();
            if outcome.should_stop() {
                warn!(step, attempt, %outcome, "Skipping reasoning step");
                *budget_exhausted = true;
                return None;
            }

            let deadline = guard
                .remaining()
                .map_or(self.config.call_timeout(), |r| r.min(self.config.call_timeout()));

            match tokio::time::timeout(deadline, call()).await {
                Ok(Ok(value)) => return Some(value),
                Ok(Err(e)) => warn!(step, attempt, error = %e, "Reasoning step failed"),
                Err(_) => warn!(step, attempt, deadline_ms = deadline.as_millis() as u64, "Reasoning step timed out"),
            }

            attempt += 1;
            if attempt > self.config.max_retries {
                return None;
            }
        }
    }
}

fn merge_request(
    thesis: &Thesis,
    left: SynthesisPart,
    right: SynthesisPart,
    reconciliations: &mut Vec<Reconciliation>,
) -> SynthesisRequest {
    let mut local = Vec::new();
    for &a in &left.categories {
        for &b in &right.categories {
            if let Some(rec) = reconcile(a, b) {
                if !reconciliations.contains(&rec) {
                    reconciliations.push(rec.clone());
                }
                local.push(rec);
            }
        }
    }
    SynthesisRequest {
        thesis: thesis.content.clone(),
        left,
        right,
        reconciliations: local,
    }
}
