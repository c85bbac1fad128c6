//! EDRR phases and cycle status.

use serde::{Deserialize, Serialize};

/// Phase of an EDRR cycle.
///
/// The macro flow is strictly linear:
///
/// ```text
/// Expand ──► Differentiate ──► Refine ──► Retrospect ──► Completed
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Divergent exploration of the problem space.
    Expand,
    /// Comparison and selection among alternatives.
    Differentiate,
    /// Detailed implementation and quality work.
    Refine,
    /// Reflection on outcomes and learning.
    Retrospect,
    /// All four phases finished.
    Completed,
}

impl Phase {
    /// The four working phases, in execution order.
    pub const WORKING: [Phase; 4] = [
        Phase::Expand,
        Phase::Differentiate,
        Phase::Refine,
        Phase::Retrospect,
    ];

    /// The phase that follows this one. `Completed` is absorbing.
    pub fn next(self) -> Phase {
        match self {
            Self::Expand => Self::Differentiate,
            Self::Differentiate => Self::Refine,
            Self::Refine => Self::Retrospect,
            Self::Retrospect | Self::Completed => Self::Completed,
        }
    }

    /// The phase that runs immediately before this one, if any.
    pub fn previous(self) -> Option<Phase> {
        match self {
            Self::Expand => None,
            Self::Differentiate => Some(Self::Expand),
            Self::Refine => Some(Self::Differentiate),
            Self::Retrospect => Some(Self::Refine),
            Self::Completed => Some(Self::Retrospect),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Position in the linear order (Expand = 0).
    pub fn ordinal(self) -> usize {
        match self {
            Self::Expand => 0,
            Self::Differentiate => 1,
            Self::Refine => 2,
            Self::Retrospect => 3,
            Self::Completed => 4,
        }
    }

    /// Expertise keywords that make an agent relevant to this phase.
    pub fn expertise_keywords(self) -> &'static [&'static str] {
        match self {
            Self::Expand => &[
                "exploration",
                "brainstorming",
                "creativity",
                "research",
                "divergent thinking",
            ],
            Self::Differentiate => &[
                "analysis",
                "comparison",
                "evaluation",
                "critical thinking",
                "decision making",
            ],
            Self::Refine => &[
                "optimization",
                "implementation",
                "quality",
                "testing",
                "attention to detail",
            ],
            Self::Retrospect => &[
                "reflection",
                "review",
                "learning",
                "documentation",
                "pattern recognition",
            ],
            Self::Completed => &[],
        }
    }

    /// Default instructions handed to agents when no manifest overrides them.
    pub fn default_instructions(self) -> &'static str {
        match self {
            Self::Expand => {
                "Explore the problem broadly. Propose diverse candidate approaches and note assumptions."
            }
            Self::Differentiate => {
                "Compare the candidate approaches, weigh trade-offs, and recommend the strongest one."
            }
            Self::Refine => {
                "Turn the selected approach into a concrete, high-quality implementation plan."
            }
            Self::Retrospect => {
                "Reflect on the outcome, capture lessons learned and remaining risks."
            }
            Self::Completed => "",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expand => write!(f, "expand"),
            Self::Differentiate => write!(f, "differentiate"),
            Self::Refine => write!(f, "refine"),
            Self::Retrospect => write!(f, "retrospect"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Lifecycle status of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Running,
    Completed,
    /// Stopped by a termination criterion; results are still usable.
    Terminated,
    /// Stopped by an internal error.
    Failed,
}

impl CycleStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Terminated => write!(f, "terminated"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_order() {
        let mut phase = Phase::Expand;
        let mut visited = vec![phase];
        while !phase.is_terminal() {
            phase = phase.next();
            visited.push(phase);
        }
        assert_eq!(
            visited,
            vec![
                Phase::Expand,
                Phase::Differentiate,
                Phase::Refine,
                Phase::Retrospect,
                Phase::Completed
            ]
        );
        assert_eq!(Phase::Completed.next(), Phase::Completed);
    }

    #[test]
    fn test_previous_mirrors_next() {
        for phase in Phase::WORKING {
            assert_eq!(phase.next().previous(), Some(phase));
        }
        assert_eq!(Phase::Expand.previous(), None);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Phase::Differentiate).unwrap();
        assert_eq!(json, "\"differentiate\"");
        let phase: Phase = serde_json::from_str("\"retrospect\"").unwrap();
        assert_eq!(phase, Phase::Retrospect);
        assert_eq!(Phase::Refine.to_string(), "refine");
    }

    #[test]
    fn test_status_terminality() {
        assert!(!CycleStatus::Running.is_terminal());
        assert!(CycleStatus::Terminated.is_terminal());
        assert!(CycleStatus::Failed.is_terminal());
    }
}
