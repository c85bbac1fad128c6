//! Vote tallying.
//!
//! ```text
//! votes ──► tally by distinct content ──► unique leader ≥ threshold? ──► Decided
//!                                                   │
//!                                                   └─ otherwise ──► Tied (contenders listed)
//! ```
//!
//! The engine never resolves a tie on its own. The caller decides whether
//! to re-weight, escalate, or give up, and [`ConsensusEngine::escalate`]
//! builds the result for a dialectical resolution.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info};

use super::types::{
    ConsensusMethod, ConsensusResult, Proposal, RoundStatus, TallyEntry, Vote, VoteThreshold,
};
use crate::dialectic::DialecticalRecord;

/// Error type for consensus operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsensusError {
    #[error("No proposals to decide between")]
    NoProposals,

    #[error("No votes cast")]
    NoVotes,

    #[error("Vote by {agent_id} targets unknown proposal {proposal_id}")]
    UnknownProposal {
        agent_id: String,
        proposal_id: String,
    },

    #[error("Vote by {agent_id} targets proposal {proposal_id} which has no content")]
    EmptyTarget {
        agent_id: String,
        proposal_id: String,
    },

    #[error("Proposal {proposal_id} belongs to {found}, expected {expected}")]
    MixedScope {
        proposal_id: String,
        expected: String,
        found: String,
    },
}

/// Result type for consensus operations
pub type ConsensusEngineResult<T> = Result<T, ConsensusError>;

/// Scores within this distance count as equal.
const TIE_EPSILON: f64 = 1e-9;

/// Stateless vote tallier with a default threshold.
#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    threshold: VoteThreshold,
}

impl Default for ConsensusEngine {
    fn default() -> Self {
        Self::new(VoteThreshold::SimpleMajority)
    }
}

impl ConsensusEngine {
    pub fn new(threshold: VoteThreshold) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> VoteThreshold {
        self.threshold
    }

    /// One vote, one count.
    pub fn build_consensus(
        &self,
        proposals: &[Proposal],
        votes: &[Vote],
        threshold: VoteThreshold,
    ) -> ConsensusEngineResult<ConsensusResult> {
        self.tally(proposals, votes, threshold, ConsensusMethod::Majority)
    }

    /// Majority vote at the engine's default threshold.
    pub fn decide(
        &self,
        proposals: &[Proposal],
        votes: &[Vote],
    ) -> ConsensusEngineResult<ConsensusResult> {
        self.build_consensus(proposals, votes, self.threshold)
    }

    /// Votes count by their expertise-derived weight.
    pub fn build_weighted(
        &self,
        proposals: &[Proposal],
        votes: &[Vote],
        threshold: VoteThreshold,
    ) -> ConsensusEngineResult<ConsensusResult> {
        self.tally(proposals, votes, threshold, ConsensusMethod::Weighted)
    }

    /// Turn a tied round into an escalated one carrying the synthesis.
    pub fn escalate(tied: &ConsensusResult, record: DialecticalRecord) -> ConsensusResult {
        info!(
            cycle_id = %tied.cycle_id,
            phase = %tied.phase,
            record_id = %record.id,
            improved = record.evaluation.improved,
            "Tie escalated to dialectical synthesis"
        );
        ConsensusResult {
            cycle_id: tied.cycle_id.clone(),
            phase: tied.phase,
            decision: Some(record.synthesis.content.clone()),
            decided_proposal: None,
            method: ConsensusMethod::DialecticalFallback,
            status: RoundStatus::Escalated,
            votes: tied.votes.clone(),
            tally: tied.tally.clone(),
            contenders: tied.contenders.clone(),
            dialectical: Some(record),
            decided_at: Utc::now(),
        }
    }

    fn tally(
        &self,
        proposals: &[Proposal],
        votes: &[Vote],
        threshold: VoteThreshold,
        method: ConsensusMethod,
    ) -> ConsensusEngineResult<ConsensusResult> {
        let first = proposals.first().ok_or(ConsensusError::NoProposals)?;
        if votes.is_empty() {
            return Err(ConsensusError::NoVotes);
        }

        let scope = format!("{}/{}", first.cycle_id, first.phase);
        for proposal in proposals {
            if proposal.cycle_id != first.cycle_id || proposal.phase != first.phase {
                return Err(ConsensusError::MixedScope {
                    proposal_id: proposal.id.clone(),
                    expected: scope,
                    found: format!("{}/{}", proposal.cycle_id, proposal.phase),
                });
            }
        }

        let by_id: HashMap<&str, &Proposal> =
            proposals.iter().map(|p| (p.id.as_str(), p)).collect();

        let mut entries: Vec<TallyEntry> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for vote in votes {
            let proposal = by_id.get(vote.proposal_id.as_str()).ok_or_else(|| {
                ConsensusError::UnknownProposal {
                    agent_id: vote.agent_id.clone(),
                    proposal_id: vote.proposal_id.clone(),
                }
            })?;
            if !proposal.is_response() {
                return Err(ConsensusError::EmptyTarget {
                    agent_id: vote.agent_id.clone(),
                    proposal_id: vote.proposal_id.clone(),
                });
            }

            let key = proposal.content.trim().to_string();
            let slot = *index.entry(key.clone()).or_insert_with(|| {
                entries.push(TallyEntry {
                    content: key,
                    proposal_ids: Vec::new(),
                    score: 0.0,
                    share: 0.0,
                });
                entries.len() - 1
            });
            let entry = &mut entries[slot];
            if !entry.proposal_ids.contains(&proposal.id) {
                entry.proposal_ids.push(proposal.id.clone());
            }
            entry.score += match method {
                ConsensusMethod::Weighted => vote.weight.max(0.0),
                _ => 1.0,
            };
        }

        let total: f64 = entries.iter().map(|e| e.score).sum();
        for entry in &mut entries {
            entry.share = if total > 0.0 { entry.score / total } else { 0.0 };
        }
        // Stable: equal scores keep first-seen order.
        entries.sort_by(|a, b| b.score.total_cmp(&a.score));

        let top = entries[0].score;
        let leaders: Vec<&TallyEntry> = entries
            .iter()
            .filter(|e| (e.score - top).abs() < TIE_EPSILON)
            .collect();

        let decided = leaders.len() == 1 && total > 0.0 && threshold.is_met(leaders[0].share);

        let (decision, decided_proposal, status, contenders) = if decided {
            (
                Some(leaders[0].content.clone()),
                leaders[0].proposal_ids.first().cloned(),
                RoundStatus::Decided,
                Vec::new(),
            )
        } else {
            let contenders: Vec<String> = if leaders.len() >= 2 {
                leaders.iter().map(|e| e.content.clone()).collect()
            } else {
                entries.iter().take(2).map(|e| e.content.clone()).collect()
            };
            (None, None, RoundStatus::Tied, contenders)
        };

        debug!(
            scope = %scope,
            method = %method,
            threshold = %threshold,
            distinct = entries.len(),
            total,
            status = %status,
            "Votes tallied"
        );

        Ok(ConsensusResult {
            cycle_id: first.cycle_id.clone(),
            phase: first.phase,
            decision,
            decided_proposal,
            method,
            status,
            votes: votes.to_vec(),
            tally: entries,
            contenders,
            dialectical: None,
            decided_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edrr::Phase;

    fn proposals(contents: &[&str]) -> Vec<Proposal> {
        contents
            .iter()
            .enumerate()
            .map(|(i, c)| Proposal::submitted(&format!("agent-{}", i), "c1", Phase::Expand, *c, 0.5))
            .collect()
    }

    fn votes_for(proposals: &[Proposal], picks: &[usize]) -> Vec<Vote> {
        picks
            .iter()
            .enumerate()
            .map(|(i, &p)| Vote::new(&format!("voter-{}", i), &proposals[p].id, 1.0))
            .collect()
    }

    #[test]
    fn test_majority_decides() {
        let props = proposals(&["A", "B"]);
        let votes = votes_for(&props, &[0, 1, 0]);
        let result = ConsensusEngine::default()
            .build_consensus(&props, &votes, VoteThreshold::SimpleMajority)
            .unwrap();

        assert_eq!(result.status, RoundStatus::Decided);
        assert_eq!(result.decision.as_deref(), Some("A"));
        assert_eq!(result.decided_proposal.as_deref(), Some(props[0].id.as_str()));
        assert_eq!(result.method, ConsensusMethod::Majority);
        assert_eq!(result.votes.len(), 3);
    }

    #[test]
    fn test_even_split_is_tied() {
        let props = proposals(&["A", "B"]);
        let votes = votes_for(&props, &[0, 1]);
        let result = ConsensusEngine::default()
            .build_consensus(&props, &votes, VoteThreshold::AtLeast(0.6))
            .unwrap();

        assert_eq!(result.status, RoundStatus::Tied);
        assert!(result.decision.is_none());
        assert_eq!(result.contenders, vec!["A", "B"]);
    }

    #[test]
    fn test_identical_content_is_pooled() {
        let props = proposals(&["A", "B", " A "]);
        let votes = votes_for(&props, &[0, 1, 2]);
        let result = ConsensusEngine::default().decide(&props, &votes).unwrap();

        assert_eq!(result.decision.as_deref(), Some("A"));
        assert_eq!(result.tally[0].proposal_ids.len(), 2);
    }

    #[test]
    fn test_unique_leader_below_threshold_is_tied() {
        let props = proposals(&["A", "B", "C"]);
        let votes = votes_for(&props, &[0, 0, 1, 2]);
        let result = ConsensusEngine::default().decide(&props, &votes).unwrap();

        assert_eq!(result.status, RoundStatus::Tied);
        assert_eq!(result.contenders, vec!["A", "B"]);
    }

    #[test]
    fn test_weighted_breaks_count_tie() {
        let props = proposals(&["A", "B"]);
        let votes = vec![
            Vote::new("expert", &props[0].id, 1.9),
            Vote::new("novice", &props[1].id, 1.1),
        ];
        let engine = ConsensusEngine::default();

        let majority = engine
            .build_consensus(&props, &votes, VoteThreshold::SimpleMajority)
            .unwrap();
        assert_eq!(majority.status, RoundStatus::Tied);

        let weighted = engine
            .build_weighted(&props, &votes, VoteThreshold::SimpleMajority)
            .unwrap();
        assert_eq!(weighted.status, RoundStatus::Decided);
        assert_eq!(weighted.method, ConsensusMethod::Weighted);
        assert_eq!(weighted.decision.as_deref(), Some("A"));
    }

    #[test]
    fn test_unknown_proposal_rejected() {
        let props = proposals(&["A"]);
        let votes = vec![Vote::new("v", "nope", 1.0)];
        let err = ConsensusEngine::default().decide(&props, &votes).unwrap_err();
        assert!(matches!(err, ConsensusError::UnknownProposal { .. }));
    }

    #[test]
    fn test_mixed_scope_rejected() {
        let mut props = proposals(&["A", "B"]);
        props[1].phase = Phase::Refine;
        let votes = votes_for(&props, &[0]);
        let err = ConsensusEngine::default().decide(&props, &votes).unwrap_err();
        assert!(matches!(err, ConsensusError::MixedScope { .. }));
    }

    #[test]
    fn test_empty_inputs_rejected() {
        let engine = ConsensusEngine::default();
        assert_eq!(engine.decide(&[], &[]).unwrap_err(), ConsensusError::NoProposals);
        let props = proposals(&["A"]);
        assert_eq!(engine.decide(&props, &[]).unwrap_err(), ConsensusError::NoVotes);
    }
}
