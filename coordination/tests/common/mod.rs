//! Shared helpers: deterministic scripted agents and team/coordinator builders.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use edrr_coordination::consensus::ProposalId;
use edrr_coordination::wsde::{AgentBehavior, AgentError, ProposalDraft, ProposalRequest};
use edrr_coordination::{
    AgentKind, EdrrCoordinator, Expertise, InMemoryStore, OrchestratorConfig, Phase, Proposal,
    SharedTeam, TeamConfig, TeamMember, WsdeTeam,
};

/// Answers every delegation with a fixed content and confidence.
pub struct Scripted {
    pub id: String,
    pub content: String,
    pub confidence: f64,
    /// Vote for its own proposal instead of the most confident one.
    pub vote_own: bool,
}

impl Scripted {
    pub fn new(id: &str, content: &str, confidence: f64) -> Self {
        Self {
            id: id.to_string(),
            content: content.to_string(),
            confidence,
            vote_own: false,
        }
    }

    pub fn stubborn(mut self) -> Self {
        self.vote_own = true;
        self
    }
}

#[async_trait]
impl AgentBehavior for Scripted {
    async fn generate_proposal(
        &self,
        request: &ProposalRequest,
    ) -> Result<ProposalDraft, AgentError> {
        let content = if self.content.is_empty() {
            format!("{}: {}", request.phase, request.task.description)
        } else {
            self.content.clone()
        };
        Ok(ProposalDraft::new(content, self.confidence))
    }

    async fn vote(
        &self,
        _phase: Phase,
        proposals: &[Proposal],
    ) -> Result<Option<ProposalId>, AgentError> {
        if self.vote_own {
            return Ok(proposals
                .iter()
                .find(|p| p.agent_id == self.id && p.is_response())
                .map(|p| p.id.clone()));
        }
        let mut best: Option<&Proposal> = None;
        for p in proposals.iter().filter(|p| p.is_response()) {
            if best.map_or(true, |b| p.confidence > b.confidence) {
                best = Some(p);
            }
        }
        Ok(best.map(|p| p.id.clone()))
    }
}

/// Always fails.
pub struct Broken;

#[async_trait]
impl AgentBehavior for Broken {
    async fn generate_proposal(
        &self,
        _request: &ProposalRequest,
    ) -> Result<ProposalDraft, AgentError> {
        Err(AgentError::Failed("backend offline".into()))
    }
}

pub fn member(id: &str, kind: AgentKind, expertise: Expertise, content: &str) -> TeamMember {
    TeamMember::new(
        id,
        kind,
        expertise,
        Arc::new(Scripted::new(id, content, 0.7)),
    )
}

/// Two generalists that agree on everything.
pub fn default_members() -> Vec<TeamMember> {
    vec![
        member("designer", AgentKind::Designer, Expertise::new(), ""),
        member("critic", AgentKind::Critic, Expertise::new(), ""),
    ]
}

pub async fn team_with(config: &OrchestratorConfig, members: Vec<TeamMember>) -> SharedTeam {
    let team = WsdeTeam::new(TeamConfig::from(config)).shared();
    team.configure_team(members).await.unwrap();
    team
}

pub async fn coordinator_with(
    config: OrchestratorConfig,
    members: Vec<TeamMember>,
) -> EdrrCoordinator {
    let team = team_with(&config, members).await;
    EdrrCoordinator::new(config, team, Arc::new(InMemoryStore::new()))
}

pub async fn coordinator() -> EdrrCoordinator {
    coordinator_with(OrchestratorConfig::default(), default_members()).await
}
