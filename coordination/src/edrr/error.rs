//! Coordinator error taxonomy.

use serde::{Deserialize, Serialize};

use super::phase::{CycleStatus, Phase};
use crate::manifest::ManifestError;
use crate::payload::PayloadError;

/// Where in the cycle tree an error happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleContext {
    pub cycle_id: String,
    pub phase: Phase,
    pub depth: u32,
}

impl std::fmt::Display for CycleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cycle {} (phase {}, depth {})",
            self.cycle_id, self.phase, self.depth
        )
    }
}

/// Error type for coordinator operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Recursion limit exceeded in {context}: depth {requested} > max {max_depth}")]
    RecursionLimit {
        context: CycleContext,
        requested: u32,
        max_depth: u32,
    },

    #[error(transparent)]
    PayloadType(#[from] PayloadError),

    #[error("Cycle not found: {0}")]
    CycleNotFound(String),

    #[error("Cycle is {status}, not running: {context}")]
    CycleNotRunning {
        context: CycleContext,
        status: CycleStatus,
    },

    #[error("Phase {requested} requested but {context} is in a different phase")]
    PhaseMismatch {
        context: CycleContext,
        requested: Phase,
    },

    #[error("A phase is already executing in {context}")]
    PhaseInProgress { context: CycleContext },

    #[error("Phase failed in {context}: {reason}")]
    PhaseFailed {
        context: CycleContext,
        reason: String,
    },
}

impl From<ManifestError> for CoordinatorError {
    fn from(e: ManifestError) -> Self {
        Self::InvalidManifest(e.to_string())
    }
}

impl CoordinatorError {
    pub fn context(&self) -> Option<&CycleContext> {
        match self {
            Self::RecursionLimit { context, .. }
            | Self::CycleNotRunning { context, .. }
            | Self::PhaseMismatch { context, .. }
            | Self::PhaseInProgress { context }
            | Self::PhaseFailed { context, .. } => Some(context),
            Self::InvalidManifest(_) | Self::PayloadType(_) | Self::CycleNotFound(_) => None,
        }
    }
}

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
