//! Agents: roster records and the capability interface they implement.
//!
//! An [`Agent`] is plain data owned by the team: identity, kind, expertise,
//! current role, and inbox. Behaviour lives behind [`AgentBehavior`], so an
//! LLM-backed agent and a scripted test double are interchangeable.
//!
//! # Kinds and capabilities
//!
//! | Kind       | Propose | Critique | Review |
//! |------------|---------|----------|--------|
//! | Worker     | yes     |          |        |
//! | Designer   | yes     |          | yes    |
//! | Supervisor | yes     |          | yes    |
//! | Critic     | yes     | yes      | yes    |
//! | Evaluator  | yes     | yes      | yes    |

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::messaging::Message;
use super::review::{CriterionResult, ReviewFeedback, ReviewVerdict};
use crate::consensus::{AgentId, Proposal, ProposalId};
use crate::dialectic::{Critique, CritiqueCategory, SynthesisRequest};
use crate::edrr::Phase;
use crate::payload::TaskPayload;
use crate::ports::LlmError;

/// Relative weight of phase keywords against task tags in relevance scoring.
pub const PHASE_WEIGHT: f64 = 0.5;

/// Temporary role within the team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Lead for the current phase.
    Primus,
    Peer,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primus => write!(f, "primus"),
            Self::Peer => write!(f, "peer"),
        }
    }
}

/// Capability an agent kind offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    GenerateProposal,
    Critique,
    Review,
}

/// Kind of agent. Fixed for the agent's lifetime, unlike its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Worker,
    Critic,
    Supervisor,
    Designer,
    Evaluator,
}

impl AgentKind {
    pub fn capabilities(self) -> &'static [Capability] {
        match self {
            Self::Worker => &[Capability::GenerateProposal],
            Self::Designer | Self::Supervisor => {
                &[Capability::GenerateProposal, Capability::Review]
            }
            Self::Critic | Self::Evaluator => &[
                Capability::GenerateProposal,
                Capability::Critique,
                Capability::Review,
            ],
        }
    }

    pub fn can(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Worker => write!(f, "worker"),
            Self::Critic => write!(f, "critic"),
            Self::Supervisor => write!(f, "supervisor"),
            Self::Designer => write!(f, "designer"),
            Self::Evaluator => write!(f, "evaluator"),
        }
    }
}

/// Named capability scores (0.0–1.0). Names are matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expertise(BTreeMap<String, f64>);

impl Expertise {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, score: f64) -> Self {
        self.0.insert(name.to_lowercase(), score.clamp(0.0, 1.0));
        self
    }

    pub fn score(&self, name: &str) -> f64 {
        self.0.get(&name.to_lowercase()).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Mean score over `tags`; zero for an empty tag list.
    pub fn relevance(&self, tags: &[String]) -> f64 {
        if tags.is_empty() {
            return 0.0;
        }
        tags.iter().map(|t| self.score(t)).sum::<f64>() / tags.len() as f64
    }

    /// Best score among the phase's expertise keywords.
    pub fn phase_relevance(&self, phase: Phase) -> f64 {
        phase
            .expertise_keywords()
            .iter()
            .map(|k| self.score(k))
            .fold(0.0, f64::max)
    }

    /// Task relevance plus a weighted phase term.
    pub fn combined_relevance(&self, phase: Phase, tags: &[String]) -> f64 {
        self.relevance(tags) + PHASE_WEIGHT * self.phase_relevance(phase)
    }

    /// How much this agent covers where `other` is weak.
    pub fn complement(&self, other: &Expertise) -> f64 {
        self.iter()
            .map(|(name, score)| (score - other.score(name)).max(0.0))
            .sum()
    }
}

impl<const N: usize> From<[(&str, f64); N]> for Expertise {
    fn from(entries: [(&str, f64); N]) -> Self {
        entries
            .into_iter()
            .fold(Expertise::new(), |e, (name, score)| e.with(name, score))
    }
}

/// Roster record for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub kind: AgentKind,
    pub expertise: Expertise,
    pub role: AgentRole,
    /// Delivered messages in arrival order.
    pub inbox: Vec<Message>,
}

impl Agent {
    pub fn new(id: impl Into<String>, kind: AgentKind, expertise: Expertise) -> Self {
        Self {
            id: id.into(),
            kind,
            expertise,
            role: AgentRole::Peer,
            inbox: Vec::new(),
        }
    }

    pub fn is_primus(&self) -> bool {
        self.role == AgentRole::Primus
    }
}

/// Error type for agent calls
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("Agent call failed: {0}")]
    Failed(String),

    #[error("Agent does not support {0:?}")]
    Unsupported(Capability),

    #[error("Could not interpret agent output: {0}")]
    Malformed(String),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Everything an agent needs to answer a delegation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalRequest {
    pub cycle_id: String,
    pub phase: Phase,
    pub depth: u32,
    pub task: TaskPayload,
    pub instructions: String,
    pub role: AgentRole,
    /// Outcomes of earlier phases and finished micro-cycles.
    pub context: Vec<String>,
    /// The agent's inbox at delegation time, highest priority first.
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// What an agent hands back before the team stamps it into a [`Proposal`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalDraft {
    pub content: String,
    pub confidence: f64,
}

impl ProposalDraft {
    pub fn new(content: impl Into<String>, confidence: f64) -> Self {
        Self {
            content: content.into(),
            confidence,
        }
    }
}

/// Capability interface implemented by every agent.
///
/// Only `generate_proposal` is required; the rest have deterministic
/// defaults so simple agents stay simple.
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    async fn generate_proposal(&self, request: &ProposalRequest)
        -> Result<ProposalDraft, AgentError>;

    /// Critique a thesis from one discipline's point of view.
    async fn critique(
        &self,
        thesis: &str,
        category: CritiqueCategory,
    ) -> Result<String, AgentError> {
        Ok(Critique::template(category, thesis).content)
    }

    /// Merge two partial syntheses.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<String, AgentError> {
        Ok(request.compose())
    }

    /// Judge a proposal against each criterion.
    async fn review(
        &self,
        proposal: &Proposal,
        criteria: &[String],
    ) -> Result<ReviewVerdict, AgentError> {
        let _ = proposal;
        Ok(ReviewVerdict {
            criteria: criteria
                .iter()
                .map(|c| CriterionResult::new(c, true))
                .collect(),
            critique: String::new(),
        })
    }

    /// Produce a revised draft that answers review feedback.
    async fn revise(
        &self,
        proposal: &Proposal,
        feedback: &[ReviewFeedback],
    ) -> Result<ProposalDraft, AgentError> {
        let notes: Vec<String> = feedback
            .iter()
            .flat_map(|f| {
                f.rejected_criteria()
                    .into_iter()
                    .map(|c| format!("- addressed {}", c))
                    .chain((!f.critique.is_empty()).then(|| format!("- {}", f.critique)))
            })
            .collect();
        let content = if notes.is_empty() {
            proposal.content.clone()
        } else {
            format!("{}\n\nRevisions:\n{}", proposal.content, notes.join("\n"))
        };
        Ok(ProposalDraft::new(content, proposal.confidence))
    }

    /// Pick a proposal to vote for; `None` abstains.
    ///
    /// Defaults to the highest-confidence response, earliest on ties.
    async fn vote(
        &self,
        phase: Phase,
        proposals: &[Proposal],
    ) -> Result<Option<ProposalId>, AgentError> {
        let _ = phase;
        let mut best: Option<&Proposal> = None;
        for proposal in proposals.iter().filter(|p| p.is_response()) {
            if best.map_or(true, |b| proposal.confidence > b.confidence) {
                best = Some(proposal);
            }
        }
        Ok(best.map(|p| p.id.clone()))
    }
}

/// Shared handle to an agent implementation.
pub type SharedBehavior = Arc<dyn AgentBehavior>;

/// An agent ready to join a team: its record plus its behaviour.
#[derive(Clone)]
pub struct TeamMember {
    pub agent: Agent,
    pub behavior: SharedBehavior,
}

impl TeamMember {
    pub fn new(
        id: impl Into<String>,
        kind: AgentKind,
        expertise: Expertise,
        behavior: SharedBehavior,
    ) -> Self {
        Self {
            agent: Agent::new(id, kind, expertise),
            behavior,
        }
    }
}

impl std::fmt::Debug for TeamMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamMember")
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}
