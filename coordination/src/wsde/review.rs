//! Peer review records.
//!
//! A review routes one proposal to reviewers, aggregates their verdicts per
//! criterion by strict majority, and may request a revision. A revision is
//! a new proposal linked to the old one; the review then runs another round
//! against it.
//!
//! ```text
//! Pending ──► (all criteria pass) ──► Approved
//!    │
//!    └─► RevisionRequested ──► resubmit ──► re-review ──► Approved | Rejected
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consensus::{AgentId, Proposal};

/// Default criteria used when the caller supplies none.
pub const DEFAULT_CRITERIA: [&str; 4] = ["correctness", "completeness", "clarity", "risk"];

/// One reviewer's call on one criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub criterion: String,
    pub accepted: bool,
}

impl CriterionResult {
    pub fn new(criterion: &str, accepted: bool) -> Self {
        Self {
            criterion: criterion.to_string(),
            accepted,
        }
    }
}

/// What a reviewer agent returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub criteria: Vec<CriterionResult>,
    /// Free-form critique.
    pub critique: String,
}

/// A verdict stamped with reviewer and proposal identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewFeedback {
    pub reviewer_id: AgentId,
    pub proposal_id: String,
    pub criteria: Vec<CriterionResult>,
    pub critique: String,
    pub submitted_at: DateTime<Utc>,
}

impl ReviewFeedback {
    pub fn from_verdict(reviewer_id: &str, proposal_id: &str, verdict: ReviewVerdict) -> Self {
        Self {
            reviewer_id: reviewer_id.to_string(),
            proposal_id: proposal_id.to_string(),
            criteria: verdict.criteria,
            critique: verdict.critique,
            submitted_at: Utc::now(),
        }
    }

    pub fn approves(&self) -> bool {
        self.criteria.iter().all(|c| c.accepted)
    }

    pub fn rejected_criteria(&self) -> Vec<&str> {
        self.criteria
            .iter()
            .filter(|c| !c.accepted)
            .map(|c| c.criterion.as_str())
            .collect()
    }
}

/// Status of a peer review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    RevisionRequested,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn is_final(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::RevisionRequested => write!(f, "revision_requested"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// One pass of reviewers over one proposal version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRound {
    pub proposal: Proposal,
    pub feedback: Vec<ReviewFeedback>,
    /// Criterion → accepted by strict majority of responding reviewers.
    pub aggregate: BTreeMap<String, bool>,
}

impl ReviewRound {
    pub fn new(proposal: Proposal, criteria: &[String], feedback: Vec<ReviewFeedback>) -> Self {
        let aggregate = aggregate(criteria, &feedback);
        Self {
            proposal,
            feedback,
            aggregate,
        }
    }

    pub fn passed(&self) -> bool {
        self.aggregate.values().all(|ok| *ok)
    }
}

/// Strict-majority acceptance per criterion. With no feedback at all every
/// criterion fails.
pub fn aggregate(criteria: &[String], feedback: &[ReviewFeedback]) -> BTreeMap<String, bool> {
    criteria
        .iter()
        .map(|criterion| {
            let votes: Vec<bool> = feedback
                .iter()
                .filter_map(|f| {
                    f.criteria
                        .iter()
                        .find(|c| &c.criterion == criterion)
                        .map(|c| c.accepted)
                })
                .collect();
            let accepted = votes.iter().filter(|a| **a).count();
            (criterion.clone(), accepted * 2 > votes.len())
        })
        .collect()
}

/// Full peer-review history for one proposal lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerReview {
    pub id: String,
    pub cycle_id: String,
    pub author_id: AgentId,
    pub reviewers: Vec<AgentId>,
    pub criteria: Vec<String>,
    pub rounds: Vec<ReviewRound>,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
}

impl PeerReview {
    pub fn new(proposal: &Proposal, reviewers: Vec<AgentId>, criteria: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            cycle_id: proposal.cycle_id.clone(),
            author_id: proposal.agent_id.clone(),
            reviewers,
            criteria,
            rounds: Vec::new(),
            status: ReviewStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Number of revisions submitted so far.
    pub fn revisions(&self) -> u32 {
        self.rounds.len().saturating_sub(1) as u32
    }

    /// Proposal version reviewed last.
    pub fn latest_proposal(&self) -> Option<&Proposal> {
        self.rounds.last().map(|r| &r.proposal)
    }

    /// Every piece of feedback across all rounds.
    pub fn feedback(&self) -> Vec<&ReviewFeedback> {
        self.rounds.iter().flat_map(|r| r.feedback.iter()).collect()
    }

    /// Record a round and move the status forward.
    pub fn record_round(&mut self, round: ReviewRound, revisions_left: bool) {
        self.status = if round.passed() {
            ReviewStatus::Approved
        } else if revisions_left {
            ReviewStatus::RevisionRequested
        } else {
            ReviewStatus::Rejected
        };
        self.rounds.push(round);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edrr::Phase;

    fn feedback(reviewer: &str, accepted: &[(&str, bool)]) -> ReviewFeedback {
        ReviewFeedback::from_verdict(
            reviewer,
            "p1",
            ReviewVerdict {
                criteria: accepted
                    .iter()
                    .map(|(c, a)| CriterionResult::new(c, *a))
                    .collect(),
                critique: String::new(),
            },
        )
    }

    fn criteria() -> Vec<String> {
        vec!["correctness".into(), "clarity".into()]
    }

    #[test]
    fn test_aggregate_by_strict_majority() {
        let fb = vec![
            feedback("r1", &[("correctness", true), ("clarity", false)]),
            feedback("r2", &[("correctness", true), ("clarity", true)]),
            feedback("r3", &[("correctness", false), ("clarity", false)]),
        ];
        let agg = aggregate(&criteria(), &fb);
        assert!(agg["correctness"]);
        assert!(!agg["clarity"]);
    }

    #[test]
    fn test_split_vote_fails_criterion() {
        let fb = vec![
            feedback("r1", &[("correctness", true)]),
            feedback("r2", &[("correctness", false)]),
        ];
        let agg = aggregate(&["correctness".to_string()], &fb);
        assert!(!agg["correctness"]);
    }

    #[test]
    fn test_no_feedback_fails() {
        let agg = aggregate(&criteria(), &[]);
        assert!(agg.values().all(|ok| !ok));
    }

    #[test]
    fn test_status_progression() {
        let proposal = Proposal::submitted("author", "c1", Phase::Refine, "v1", 0.6);
        let mut review = PeerReview::new(&proposal, vec!["r1".into()], criteria());

        let failing = ReviewRound::new(
            proposal.clone(),
            &review.criteria,
            vec![feedback("r1", &[("correctness", false), ("clarity", true)])],
        );
        review.record_round(failing, true);
        assert_eq!(review.status, ReviewStatus::RevisionRequested);
        assert_eq!(review.revisions(), 0);

        let revised = proposal.revise("v2", 0.7);
        let passing = ReviewRound::new(
            revised.clone(),
            &review.criteria,
            vec![feedback("r1", &[("correctness", true), ("clarity", true)])],
        );
        review.record_round(passing, false);
        assert_eq!(review.status, ReviewStatus::Approved);
        assert_eq!(review.revisions(), 1);
        assert_eq!(review.latest_proposal().unwrap().id, revised.id);
        assert_eq!(review.feedback().len(), 2);
    }

    #[test]
    fn test_rejected_when_out_of_revisions() {
        let proposal = Proposal::submitted("author", "c1", Phase::Refine, "v1", 0.6);
        let mut review = PeerReview::new(&proposal, vec!["r1".into()], criteria());
        let failing = ReviewRound::new(
            proposal,
            &review.criteria,
            vec![feedback("r1", &[("correctness", false), ("clarity", false)])],
        );
        review.record_round(failing, false);
        assert_eq!(review.status, ReviewStatus::Rejected);
        assert!(review.status.is_final());
    }
}
