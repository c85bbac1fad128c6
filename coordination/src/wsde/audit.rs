//! Append-only audit trail of team activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consensus::{AgentId, ConsensusMethod, RoundStatus};
use crate::edrr::Phase;

use super::review::ReviewStatus;
use super::team::DelegationMode;

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum AuditEvent {
    PrimusSelected {
        agent_id: AgentId,
        previous: Option<AgentId>,
        score: f64,
    },
    Delegated {
        mode: DelegationMode,
        targets: Vec<AgentId>,
    },
    ProposalReceived {
        agent_id: AgentId,
        proposal_id: String,
    },
    NoResponse {
        agent_id: AgentId,
        reason: String,
    },
    MessageSent {
        message_id: String,
        sender: AgentId,
        recipients: usize,
    },
    ReviewRound {
        review_id: String,
        proposal_id: String,
        reviewers: Vec<AgentId>,
        status: ReviewStatus,
    },
    ConsensusReached {
        method: ConsensusMethod,
        status: RoundStatus,
        decision: Option<String>,
    },
}

/// One audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub cycle_id: Option<String>,
    pub phase: Option<Phase>,
    pub event: AuditEvent,
    pub recorded_at: DateTime<Utc>,
}

/// Audit log shared by every cycle in one cycle tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditTrail {
    entries: Vec<AuditEntry>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, cycle_id: Option<&str>, phase: Option<Phase>, event: AuditEvent) {
        let seq = self.entries.len() as u64;
        self.entries.push(AuditEntry {
            seq,
            cycle_id: cycle_id.map(str::to_string),
            phase,
            event,
            recorded_at: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn for_cycle(&self, cycle_id: &str) -> Vec<AuditEntry> {
        self.entries
            .iter()
            .filter(|e| e.cycle_id.as_deref() == Some(cycle_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_are_sequenced_and_scoped() {
        let mut trail = AuditTrail::new();
        trail.record(
            Some("c1"),
            Some(Phase::Expand),
            AuditEvent::Delegated {
                mode: DelegationMode::Broadcast,
                targets: vec!["a".into(), "b".into()],
            },
        );
        trail.record(
            Some("c2"),
            Some(Phase::Expand),
            AuditEvent::NoResponse {
                agent_id: "b".into(),
                reason: "timeout".into(),
            },
        );
        trail.record(None, None, AuditEvent::MessageSent {
            message_id: "m1".into(),
            sender: "a".into(),
            recipients: 1,
        });

        assert_eq!(trail.len(), 3);
        assert_eq!(trail.entries()[2].seq, 2);
        let c1 = trail.for_cycle("c1");
        assert_eq!(c1.len(), 1);
        assert!(matches!(c1[0].event, AuditEvent::Delegated { .. }));
    }
}
