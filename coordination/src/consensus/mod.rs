//! Consensus engine: converts agent proposals and votes into a decision.
//!
//! Tallying is deterministic and synchronous. Fallback strategies for
//! tied rounds (expertise re-weighting, dialectical escalation) belong to
//! the caller; see [`crate::wsde::WsdeTeam::reach_consensus`].

pub mod engine;
pub mod types;

pub use engine::{ConsensusEngine, ConsensusEngineResult, ConsensusError};
pub use types::{
    AgentId, ConsensusMethod, ConsensusResult, NoResponseReason, Proposal, ProposalId,
    ProposalStatus, RoundStatus, TallyEntry, Vote, VoteThreshold,
};
