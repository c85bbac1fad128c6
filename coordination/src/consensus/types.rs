//! Proposals, votes, and consensus results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dialectic::DialecticalRecord;
use crate::edrr::Phase;

pub type AgentId = String;
pub type ProposalId = String;

/// Why an agent produced no proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum NoResponseReason {
    /// The per-agent deadline elapsed.
    Timeout,
    /// The agent returned an error.
    Error(String),
}

/// Submission state of a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ProposalStatus {
    Submitted,
    NoResponse { reason: NoResponseReason },
}

/// An agent's answer to a delegated task. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub agent_id: AgentId,
    pub cycle_id: String,
    pub phase: Phase,
    pub content: String,
    /// Self-reported confidence (0.0–1.0).
    pub confidence: f64,
    pub status: ProposalStatus,
    /// Proposal this one revises, if it came out of peer review.
    pub revision_of: Option<ProposalId>,
    pub submitted_at: DateTime<Utc>,
}

impl Proposal {
    pub fn submitted(
        agent_id: &str,
        cycle_id: &str,
        phase: Phase,
        content: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            cycle_id: cycle_id.to_string(),
            phase,
            content: content.into(),
            confidence: confidence.clamp(0.0, 1.0),
            status: ProposalStatus::Submitted,
            revision_of: None,
            submitted_at: Utc::now(),
        }
    }

    /// Marker for an agent that missed its deadline or failed.
    pub fn no_response(
        agent_id: &str,
        cycle_id: &str,
        phase: Phase,
        reason: NoResponseReason,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            cycle_id: cycle_id.to_string(),
            phase,
            content: String::new(),
            confidence: 0.0,
            status: ProposalStatus::NoResponse { reason },
            revision_of: None,
            submitted_at: Utc::now(),
        }
    }

    /// A new proposal that supersedes this one.
    pub fn revise(&self, content: impl Into<String>, confidence: f64) -> Self {
        let mut revised = Self::submitted(
            &self.agent_id,
            &self.cycle_id,
            self.phase,
            content,
            confidence,
        );
        revised.revision_of = Some(self.id.clone());
        revised
    }

    pub fn is_response(&self) -> bool {
        matches!(self.status, ProposalStatus::Submitted)
    }
}

/// A single vote. Immutable once cast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub agent_id: AgentId,
    pub proposal_id: ProposalId,
    /// Derived from the voter's expertise relevance to the phase.
    pub weight: f64,
    pub priority: Option<String>,
    pub cast_at: DateTime<Utc>,
}

impl Vote {
    pub fn new(agent_id: &str, proposal_id: &str, weight: f64) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            proposal_id: proposal_id.to_string(),
            weight,
            priority: None,
            cast_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }
}

/// Required vote share for an outright decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteThreshold {
    /// Strictly more than half of the votes.
    SimpleMajority,
    /// At least the given share (0.0–1.0].
    AtLeast(f64),
}

impl VoteThreshold {
    pub fn is_met(self, share: f64) -> bool {
        match self {
            Self::SimpleMajority => share > 0.5 + f64::EPSILON,
            Self::AtLeast(min) => share + 1e-9 >= min,
        }
    }
}

impl Default for VoteThreshold {
    fn default() -> Self {
        Self::SimpleMajority
    }
}

impl std::fmt::Display for VoteThreshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SimpleMajority => write!(f, "simple_majority"),
            Self::AtLeast(share) => write!(f, "at_least({:.2})", share),
        }
    }
}

/// How a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMethod {
    Majority,
    Weighted,
    DialecticalFallback,
}

impl std::fmt::Display for ConsensusMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Majority => write!(f, "majority"),
            Self::Weighted => write!(f, "weighted"),
            Self::DialecticalFallback => write!(f, "dialectical_fallback"),
        }
    }
}

/// Outcome of a voting round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// One proposal met the threshold.
    Decided,
    /// No proposal met the threshold; see `contenders`.
    Tied,
    /// Resolved by dialectical synthesis.
    Escalated,
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decided => write!(f, "decided"),
            Self::Tied => write!(f, "tied"),
            Self::Escalated => write!(f, "escalated"),
        }
    }
}

/// Votes gathered by one distinct proposal content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallyEntry {
    pub content: String,
    /// Proposals sharing this content, in first-seen order.
    pub proposal_ids: Vec<ProposalId>,
    /// Vote count or summed weight, depending on the method.
    pub score: f64,
    pub share: f64,
}

/// Result of [`ConsensusEngine::build_consensus`](super::ConsensusEngine::build_consensus).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub cycle_id: String,
    pub phase: Phase,
    /// Winning content; `None` while tied.
    pub decision: Option<String>,
    /// First proposal carrying the winning content.
    pub decided_proposal: Option<ProposalId>,
    pub method: ConsensusMethod,
    pub status: RoundStatus,
    pub votes: Vec<Vote>,
    /// Highest score first.
    pub tally: Vec<TallyEntry>,
    /// Leading contents when tied, highest score first.
    pub contenders: Vec<String>,
    /// Present exactly when `method` is `DialecticalFallback`.
    pub dialectical: Option<DialecticalRecord>,
    pub decided_at: DateTime<Utc>,
}

impl ConsensusResult {
    pub fn is_decided(&self) -> bool {
        self.decision.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_majority_is_strict() {
        assert!(!VoteThreshold::SimpleMajority.is_met(0.5));
        assert!(VoteThreshold::SimpleMajority.is_met(2.0 / 3.0));
    }

    #[test]
    fn test_at_least_is_inclusive() {
        assert!(VoteThreshold::AtLeast(0.6).is_met(0.6));
        assert!(!VoteThreshold::AtLeast(0.6).is_met(0.5));
    }

    #[test]
    fn test_revision_links_back() {
        let original = Proposal::submitted("a1", "c1", Phase::Refine, "v1", 0.7);
        let revised = original.revise("v2", 0.8);
        assert_eq!(revised.revision_of.as_deref(), Some(original.id.as_str()));
        assert_eq!(revised.agent_id, "a1");
        assert_ne!(revised.id, original.id);
    }

    #[test]
    fn test_no_response_marker() {
        let p = Proposal::no_response("a2", "c1", Phase::Expand, NoResponseReason::Timeout);
        assert!(!p.is_response());
        assert_eq!(p.confidence, 0.0);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let p = Proposal::submitted("a1", "c1", Phase::Expand, "x", 1.7);
        assert_eq!(p.confidence, 1.0);
    }
}
