//! WSDE team: a peer collective with a rotating Primus.
//!
//! Agents are peers whose phase lead is re-elected by expertise. The team
//! owns delegation, voting, peer review, messaging, and the audit trail for
//! a cycle tree.

pub mod agent;
pub mod audit;
pub mod messaging;
pub mod review;
pub mod team;

pub use agent::{
    Agent, AgentBehavior, AgentError, AgentKind, AgentRole, Capability, Expertise,
    ProposalDraft, ProposalRequest, SharedBehavior, TeamMember, PHASE_WEIGHT,
};
pub use audit::{AuditEntry, AuditEvent, AuditTrail};
pub use messaging::{
    processing_order, CommunicationHistory, Envelope, Message, MessageFilter, MessagePriority,
    MessageType, Recipient, TEAM_SENDER,
};
pub use review::{
    CriterionResult, PeerReview, ReviewFeedback, ReviewRound, ReviewStatus, ReviewVerdict,
    DEFAULT_CRITERIA,
};
pub use team::{
    DelegationMode, DelegationRequest, SharedTeam, TeamConfig, TeamError, TeamResult, WsdeTeam,
    INBOX_CAPACITY,
};
