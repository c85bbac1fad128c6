//! EDRR coordination library
//!
//! This library provides:
//! - A recursive EDRR phase machine (Expand, Differentiate, Refine,
//!   Retrospect) with depth-bounded micro-cycles
//! - A WSDE agent team: rotating Primus, delegation, messaging, peer review
//! - A consensus engine with majority, weighted and dialectical resolution
//! - A dialectical reasoner producing auditable thesis/synthesis records
//!
//! # Usage
//!
//! ```ignore
//! let config = OrchestratorConfig::from_env();
//! let team = WsdeTeam::new(TeamConfig::from(&config)).shared();
//! team.configure_team(members).await?;
//!
//! let coordinator = EdrrCoordinator::new(config, team, Arc::new(InMemoryStore::new()));
//! let handle = coordinator.start_cycle(task, None).await?;
//! let snapshot = coordinator.run_to_completion(&handle.id).await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod consensus;
pub mod dialectic;
pub mod edrr;
pub mod events;
pub mod manifest;
pub mod payload;
pub mod ports;
pub mod wsde;

// Re-export key coordinator types
pub use edrr::{
    CoordinatorError, CoordinatorResult, CycleContext, CycleHandle, CycleSnapshot, CycleStatus,
    CycleWarning, DepthOverride, EdrrCoordinator, GateVerdict, HumanOverride, Phase,
    PhaseMetrics, PhaseResult, QualityGate, TerminationReason, ThresholdGate,
};

// Re-export configuration and input types
pub use config::{ConfigError, DelimitingConfig, OrchestratorConfig, ReasoningConfig};
pub use manifest::{Manifest, ManifestError, PhaseInstructions};
pub use payload::{PayloadError, TaskPayload};

// Re-export port types
pub use ports::{InMemoryStore, LlmError, LlmPort, MemoryError, MemoryPort};

// Re-export team types
pub use wsde::{
    AgentBehavior, AgentError, AgentKind, Expertise, PeerReview, ProposalDraft,
    ProposalRequest, ReviewStatus, SharedTeam, TeamConfig, TeamError, TeamMember, WsdeTeam,
};

// Re-export consensus and reasoning types
pub use consensus::{ConsensusEngine, ConsensusResult, Proposal, RoundStatus, Vote};
pub use dialectic::{DialecticalReasoner, DialecticalRecord};

// Re-export event types
pub use events::{EdrrEvent, EventBus, SharedEventBus};
