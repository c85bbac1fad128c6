//! WSDE team: roster, Primus rotation, delegation, voting, peer review.
//!
//! All mutable team state (roster roles, inboxes, communication history,
//! audit trail) sits behind one lock owned by the team. The lock is never
//! held across an agent call: agent handles are cloned out, the calls fan
//! out concurrently with a per-agent deadline, and results are folded back
//! in under the lock.
//!
//! ```text
//! delegate ──► drain inboxes ──► fan-out (join_all + timeout) ──► proposals / NoResponse
//! reach_consensus ──► majority ──► weighted ──► dialectical escalation
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::agent::{
    Agent, AgentError, AgentRole, Capability, ProposalRequest, SharedBehavior, TeamMember,
};
use super::audit::{AuditEntry, AuditEvent, AuditTrail};
use super::messaging::{
    processing_order, CommunicationHistory, Envelope, Message, MessageFilter, MessagePriority,
    MessageType, Recipient, TEAM_SENDER,
};
use super::review::{PeerReview, ReviewFeedback, ReviewRound, ReviewStatus, DEFAULT_CRITERIA};
use crate::config::{OrchestratorConfig, ReasoningConfig};
use crate::consensus::{
    AgentId, ConsensusEngine, ConsensusError, ConsensusResult, NoResponseReason, Proposal,
    RoundStatus, Vote, VoteThreshold,
};
use crate::dialectic::{DialecticalReasoner, ReasoningError, Thesis};
use crate::edrr::Phase;
use crate::payload::TaskPayload;
use crate::ports::{keys, MemoryPort, MemoryResult};

/// Error type for team operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum TeamError {
    #[error("Team has no agents")]
    EmptyRoster,

    #[error("Duplicate agent id: {0}")]
    DuplicateAgent(AgentId),

    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("No eligible reviewers for proposal {0}")]
    NoReviewers(String),

    #[error("No agent responded in {phase} of cycle {cycle_id}")]
    NoResponses { cycle_id: String, phase: Phase },

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Reasoning(#[from] ReasoningError),
}

/// Result type for team operations
pub type TeamResult<T> = Result<T, TeamError>;

/// Undelivered messages kept per agent; the oldest is dropped on overflow.
/// The communication history keeps every message regardless.
pub const INBOX_CAPACITY: usize = 64;

/// Shared reference to a team
pub type SharedTeam = Arc<WsdeTeam>;

/// Who receives a delegated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationMode {
    /// Every agent.
    Broadcast,
    /// The Primus plus the most relevant peers.
    Targeted,
}

impl DelegationMode {
    /// Default mode per phase: refinement goes to specialists.
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Refine => Self::Targeted,
            _ => Self::Broadcast,
        }
    }
}

impl std::fmt::Display for DelegationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Broadcast => write!(f, "broadcast"),
            Self::Targeted => write!(f, "targeted"),
        }
    }
}

/// Team tuning, usually derived from [`OrchestratorConfig`].
#[derive(Debug, Clone)]
pub struct TeamConfig {
    pub agent_timeout: Duration,
    pub reviewer_count: usize,
    pub max_revisions: u32,
    pub targeted_fanout: usize,
    pub threshold: VoteThreshold,
    pub reasoning: ReasoningConfig,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for TeamConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            agent_timeout: config.agent_timeout(),
            reviewer_count: config.reviewer_count.max(1),
            max_revisions: config.max_revisions,
            targeted_fanout: config.targeted_fanout.max(1),
            threshold: config.consensus_threshold,
            reasoning: config.reasoning.clone(),
        }
    }
}

/// A task handed to the team for one phase.
#[derive(Debug, Clone)]
pub struct DelegationRequest {
    pub cycle_id: String,
    pub phase: Phase,
    pub depth: u32,
    pub task: TaskPayload,
    pub instructions: String,
    pub context: Vec<String>,
    pub mode: DelegationMode,
}

#[derive(Default)]
struct TeamState {
    members: Vec<TeamMember>,
    primus: Option<AgentId>,
    history: CommunicationHistory,
    audit: AuditTrail,
}

impl TeamState {
    fn member(&self, id: &str) -> Option<&TeamMember> {
        self.members.iter().find(|m| m.agent.id == id)
    }

    fn record(&mut self, cycle_id: Option<&str>, phase: Option<Phase>, event: AuditEvent) {
        self.audit.record(cycle_id, phase, event);
    }

    /// Empty an agent's inbox, highest priority first.
    fn drain_inbox(&mut self, id: &str) -> Option<Vec<Message>> {
        let member = self.members.iter_mut().find(|m| m.agent.id == id)?;
        let mut messages = std::mem::take(&mut member.agent.inbox);
        processing_order(&mut messages);
        Some(messages)
    }

    /// Resolve recipients, assign a sequence number, deliver, and log.
    fn deliver(&mut self, envelope: Envelope) -> TeamResult<Message> {
        if envelope.sender != TEAM_SENDER && self.member(&envelope.sender).is_none() {
            return Err(TeamError::UnknownAgent(envelope.sender));
        }
        let (recipients, broadcast) = match &envelope.to {
            Recipient::Agent(id) => {
                if self.member(id).is_none() {
                    return Err(TeamError::UnknownAgent(id.clone()));
                }
                (vec![id.clone()], false)
            }
            Recipient::Broadcast => (
                self.members
                    .iter()
                    .map(|m| m.agent.id.clone())
                    .filter(|id| id != &envelope.sender)
                    .collect(),
                true,
            ),
        };

        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            seq: self.history.next_seq(),
            sender: envelope.sender,
            recipients,
            broadcast,
            message_type: envelope.message_type,
            priority: envelope.priority,
            payload: envelope.payload,
            cycle_id: envelope.cycle_id,
            phase: envelope.phase,
            sent_at: chrono::Utc::now(),
        };

        for member in &mut self.members {
            if message.recipients.contains(&member.agent.id) {
                let inbox = &mut member.agent.inbox;
                if inbox.len() >= INBOX_CAPACITY {
                    let dropped = inbox.remove(0);
                    debug!(
                        agent_id = %member.agent.id,
                        message_id = %dropped.id,
                        "Inbox full; oldest message dropped"
                    );
                }
                inbox.push(message.clone());
            }
        }
        self.history.append(message.clone());
        self.audit.record(
            message.cycle_id.as_deref(),
            message.phase,
            AuditEvent::MessageSent {
                message_id: message.id.clone(),
                sender: message.sender.clone(),
                recipients: message.recipients.len(),
            },
        );
        Ok(message)
    }
}

/// The peer collective for one cycle tree.
pub struct WsdeTeam {
    config: TeamConfig,
    engine: ConsensusEngine,
    state: Mutex<TeamState>,
}

impl WsdeTeam {
    pub fn new(config: TeamConfig) -> Self {
        Self {
            engine: ConsensusEngine::new(config.threshold),
            config,
            state: Mutex::new(TeamState::default()),
        }
    }

    pub fn shared(self) -> SharedTeam {
        Arc::new(self)
    }

    pub fn config(&self) -> &TeamConfig {
        &self.config
    }

    /// Register the roster. Replaces any previous roster.
    pub async fn configure_team(&self, members: Vec<TeamMember>) -> TeamResult<()> {
        if members.is_empty() {
            return Err(TeamError::EmptyRoster);
        }
        for (i, member) in members.iter().enumerate() {
            if members[..i].iter().any(|m| m.agent.id == member.agent.id) {
                return Err(TeamError::DuplicateAgent(member.agent.id.clone()));
            }
        }

        let mut state = self.state.lock().await;
        state.members = members
            .into_iter()
            .map(|mut m| {
                m.agent.role = AgentRole::Peer;
                m
            })
            .collect();
        state.primus = None;
        info!(agents = state.members.len(), "Team configured");
        Ok(())
    }

    /// Snapshot of the roster in registration order.
    pub async fn agents(&self) -> Vec<Agent> {
        self.state
            .lock()
            .await
            .members
            .iter()
            .map(|m| m.agent.clone())
            .collect()
    }

    pub async fn primus(&self) -> Option<AgentId> {
        self.state.lock().await.primus.clone()
    }

    /// Elect the most relevant agent as Primus; everyone else becomes a Peer.
    pub async fn select_primus(&self, phase: Phase, task_tags: &[String]) -> TeamResult<AgentId> {
        self.elect(None, phase, task_tags).await
    }

    /// [`select_primus`](Self::select_primus) with the election audited
    /// against a cycle.
    pub async fn select_primus_for(
        &self,
        cycle_id: &str,
        phase: Phase,
        task_tags: &[String],
    ) -> TeamResult<AgentId> {
        self.elect(Some(cycle_id), phase, task_tags).await
    }

    async fn elect(
        &self,
        cycle_id: Option<&str>,
        phase: Phase,
        task_tags: &[String],
    ) -> TeamResult<AgentId> {
        let mut state = self.state.lock().await;
        if state.members.is_empty() {
            return Err(TeamError::EmptyRoster);
        }

        // Strictly greater wins, so ties go to the earliest registration.
        let mut best = 0;
        let mut best_score = f64::MIN;
        for (i, member) in state.members.iter().enumerate() {
            let score = member.agent.expertise.combined_relevance(phase, task_tags);
            if score > best_score {
                best = i;
                best_score = score;
            }
        }

        for (i, member) in state.members.iter_mut().enumerate() {
            member.agent.role = if i == best {
                AgentRole::Primus
            } else {
                AgentRole::Peer
            };
        }
        let elected = state.members[best].agent.id.clone();
        let previous = state.primus.replace(elected.clone());
        state.record(
            cycle_id,
            Some(phase),
            AuditEvent::PrimusSelected {
                agent_id: elected.clone(),
                previous: previous.clone(),
                score: best_score,
            },
        );
        info!(
            phase = %phase,
            primus = %elected,
            previous = ?previous,
            score = best_score,
            "Primus selected"
        );
        Ok(elected)
    }

    /// Send a task to the chosen agents and collect one proposal per agent.
    ///
    /// Each agent receives its pending inbox with the request. Agents that
    /// miss the deadline, fail, or answer with blank content yield a
    /// `NoResponse` proposal; the round never blocks on them.
    pub async fn delegate(&self, request: &DelegationRequest) -> TeamResult<Vec<Proposal>> {
        let (targets, inboxes) = {
            let mut state = self.state.lock().await;
            if state.members.is_empty() {
                return Err(TeamError::EmptyRoster);
            }
            let targets = self.pick_targets(&state, request);
            let ids: Vec<AgentId> = targets.iter().map(|(id, _, _)| id.clone()).collect();
            state.record(
                Some(&request.cycle_id),
                Some(request.phase),
                AuditEvent::Delegated {
                    mode: request.mode,
                    targets: ids.clone(),
                },
            );
            for id in &ids {
                state.deliver(
                    Envelope::new(
                        TEAM_SENDER,
                        Recipient::agent(id.clone()),
                        MessageType::Request,
                        json!({
                            "task_id": request.task.id,
                            "instructions": request.instructions,
                        }),
                    )
                    .in_scope(&request.cycle_id, request.phase),
                )?;
            }
            let inboxes: Vec<Vec<Message>> = ids
                .iter()
                .map(|id| state.drain_inbox(id).unwrap_or_default())
                .collect();
            (targets, inboxes)
        };

        debug!(
            cycle_id = %request.cycle_id,
            phase = %request.phase,
            mode = %request.mode,
            targets = targets.len(),
            "Delegating"
        );

        let deadline = self.config.agent_timeout;
        let calls = targets.iter().zip(inboxes).map(|((id, role, behavior), messages)| {
            let proposal_request = ProposalRequest {
                cycle_id: request.cycle_id.clone(),
                phase: request.phase,
                depth: request.depth,
                task: request.task.clone(),
                instructions: request.instructions.clone(),
                role: *role,
                context: request.context.clone(),
                messages,
            };
            let behavior = Arc::clone(behavior);
            async move {
                let outcome = with_deadline(deadline, async {
                    behavior.generate_proposal(&proposal_request).await
                })
                .await;
                (id.clone(), outcome)
            }
        });
        let outcomes = join_all(calls).await;

        let mut state = self.state.lock().await;
        let mut proposals = Vec::with_capacity(outcomes.len());
        for (agent_id, outcome) in outcomes {
            let outcome = outcome.and_then(|draft| {
                if draft.content.trim().is_empty() {
                    Err(NoResponseReason::Error("empty proposal".to_string()))
                } else {
                    Ok(draft)
                }
            });
            let proposal = match outcome {
                Ok(draft) => {
                    let proposal = Proposal::submitted(
                        &agent_id,
                        &request.cycle_id,
                        request.phase,
                        draft.content,
                        draft.confidence,
                    );
                    state.record(
                        Some(&request.cycle_id),
                        Some(request.phase),
                        AuditEvent::ProposalReceived {
                            agent_id: agent_id.clone(),
                            proposal_id: proposal.id.clone(),
                        },
                    );
                    state.deliver(
                        Envelope::new(
                            &agent_id,
                            Recipient::Broadcast,
                            MessageType::Response,
                            json!({
                                "proposal_id": proposal.id,
                                "confidence": proposal.confidence,
                            }),
                        )
                        .in_scope(&request.cycle_id, request.phase),
                    )?;
                    proposal
                }
                Err(reason) => {
                    warn!(
                        cycle_id = %request.cycle_id,
                        phase = %request.phase,
                        agent_id = %agent_id,
                        reason = ?reason,
                        "Agent did not respond"
                    );
                    state.record(
                        Some(&request.cycle_id),
                        Some(request.phase),
                        AuditEvent::NoResponse {
                            agent_id: agent_id.clone(),
                            reason: format!("{:?}", reason),
                        },
                    );
                    Proposal::no_response(&agent_id, &request.cycle_id, request.phase, reason)
                }
            };
            proposals.push(proposal);
        }
        Ok(proposals)
    }

    fn pick_targets(
        &self,
        state: &TeamState,
        request: &DelegationRequest,
    ) -> Vec<(AgentId, AgentRole, SharedBehavior)> {
        let handle = |m: &TeamMember| (m.agent.id.clone(), m.agent.role, Arc::clone(&m.behavior));
        match request.mode {
            DelegationMode::Broadcast => state.members.iter().map(handle).collect(),
            DelegationMode::Targeted => {
                let keywords = request.task.keywords();
                let mut ranked: Vec<&TeamMember> = state.members.iter().collect();
                // Stable sort keeps registration order among equals.
                ranked.sort_by(|a, b| {
                    let sa = a.agent.expertise.combined_relevance(request.phase, &keywords);
                    let sb = b.agent.expertise.combined_relevance(request.phase, &keywords);
                    sb.total_cmp(&sa)
                });
                let mut chosen: Vec<&TeamMember> = Vec::new();
                if let Some(primus) = ranked.iter().find(|m| m.agent.is_primus()) {
                    chosen.push(primus);
                }
                for member in ranked {
                    if chosen.len() >= self.config.targeted_fanout {
                        break;
                    }
                    if !chosen.iter().any(|c| c.agent.id == member.agent.id) {
                        chosen.push(member);
                    }
                }
                chosen.into_iter().map(handle).collect()
            }
        }
    }

    /// Ask every agent to vote. Weight is `1 + relevance` to the phase and
    /// task. Failed or invalid ballots are abstentions.
    pub async fn collect_votes(
        &self,
        phase: Phase,
        task_tags: &[String],
        proposals: &[Proposal],
    ) -> Vec<Vote> {
        let voters: Vec<(AgentId, f64, SharedBehavior)> = {
            let state = self.state.lock().await;
            state
                .members
                .iter()
                .map(|m| {
                    (
                        m.agent.id.clone(),
                        1.0 + m.agent.expertise.combined_relevance(phase, task_tags),
                        Arc::clone(&m.behavior),
                    )
                })
                .collect()
        };

        let deadline = self.config.agent_timeout;
        let ballots = join_all(voters.into_iter().map(|(id, weight, behavior)| async move {
            let pick = with_deadline(deadline, behavior.vote(phase, proposals)).await;
            (id, weight, pick)
        }))
        .await;

        let mut votes = Vec::new();
        for (agent_id, weight, pick) in ballots {
            match pick {
                Ok(Some(proposal_id))
                    if proposals
                        .iter()
                        .any(|p| p.id == proposal_id && p.is_response()) =>
                {
                    votes.push(Vote::new(&agent_id, &proposal_id, weight));
                }
                Ok(Some(proposal_id)) => {
                    warn!(agent_id = %agent_id, proposal_id = %proposal_id, "Ignoring vote for unknown proposal")
                }
                Ok(None) => debug!(agent_id = %agent_id, "Agent abstained"),
                Err(reason) => warn!(agent_id = %agent_id, reason = ?reason, "Vote not received"),
            }
        }
        votes
    }

    /// Decide among proposals: majority, then expertise-weighted, then
    /// dialectical synthesis of the two leaders.
    pub async fn reach_consensus(
        &self,
        cycle_id: &str,
        phase: Phase,
        task_tags: &[String],
        proposals: &[Proposal],
    ) -> TeamResult<ConsensusResult> {
        let responded: Vec<Proposal> = proposals
            .iter()
            .filter(|p| p.is_response())
            .cloned()
            .collect();
        if responded.is_empty() {
            return Err(TeamError::NoResponses {
                cycle_id: cycle_id.to_string(),
                phase,
            });
        }

        let mut votes = self.collect_votes(phase, task_tags, &responded).await;
        if votes.is_empty() {
            // Nobody voted: each author backs their own proposal.
            let state = self.state.lock().await;
            votes = responded
                .iter()
                .map(|p| {
                    let weight = state.member(&p.agent_id).map_or(1.0, |m| {
                        1.0 + m.agent.expertise.combined_relevance(phase, task_tags)
                    });
                    Vote::new(&p.agent_id, &p.id, weight)
                })
                .collect();
        }

        let threshold = self.engine.threshold();
        let majority = self
            .engine
            .build_consensus(&responded, &votes, threshold)?;
        let result = if majority.status == RoundStatus::Decided {
            majority
        } else {
            let weighted = self.engine.build_weighted(&responded, &votes, threshold)?;
            if weighted.status == RoundStatus::Decided {
                weighted
            } else {
                self.escalate(cycle_id, phase, &responded, weighted).await?
            }
        };

        let mut state = self.state.lock().await;
        state.record(
            Some(cycle_id),
            Some(phase),
            AuditEvent::ConsensusReached {
                method: result.method,
                status: result.status,
                decision: result.decision.clone(),
            },
        );
        state.deliver(
            Envelope::new(
                TEAM_SENDER,
                Recipient::Broadcast,
                MessageType::Decision,
                json!({
                    "method": result.method,
                    "status": result.status,
                    "decided_proposal": result.decided_proposal,
                }),
            )
            .with_priority(MessagePriority::High)
            .in_scope(cycle_id, phase),
        )?;
        info!(
            cycle_id,
            phase = %phase,
            method = %result.method,
            status = %result.status,
            votes = result.votes.len(),
            "Consensus reached"
        );
        Ok(result)
    }

    async fn escalate(
        &self,
        cycle_id: &str,
        phase: Phase,
        proposals: &[Proposal],
        tied: ConsensusResult,
    ) -> TeamResult<ConsensusResult> {
        let leader_of = |content: &str| {
            proposals
                .iter()
                .find(|p| p.content.trim() == content)
                .map(|p| Thesis::from_proposal(&p.id, &p.agent_id, &p.content))
        };
        let thesis = tied
            .contenders
            .first()
            .and_then(|c| leader_of(c.as_str()))
            .ok_or(TeamError::NoResponses {
                cycle_id: cycle_id.to_string(),
                phase,
            })?;
        let antithesis = tied.contenders.get(1).and_then(|c| leader_of(c.as_str()));

        let reasoner = self.reasoner_for(phase).await;
        let record = match antithesis {
            Some(antithesis) => reasoner.reason_pair_default(thesis, antithesis).await?,
            None => {
                reasoner
                    .reason_thesis(
                        thesis,
                        Vec::new(),
                        self.config.reasoning.max_depth,
                        self.config.reasoning.time_budget(),
                    )
                    .await?
            }
        };
        Ok(ConsensusEngine::escalate(&tied, record))
    }

    /// Reasoner backed by the most phase-relevant critic, if the team has one.
    async fn reasoner_for(&self, phase: Phase) -> DialecticalReasoner {
        let reasoner = DialecticalReasoner::new(self.config.reasoning.clone());
        let state = self.state.lock().await;
        let mut critic: Option<&TeamMember> = None;
        for member in state
            .members
            .iter()
            .filter(|m| m.agent.kind.can(Capability::Critique))
        {
            let better = critic.map_or(true, |c| {
                member.agent.expertise.phase_relevance(phase)
                    > c.agent.expertise.phase_relevance(phase)
            });
            if better {
                critic = Some(member);
            }
        }
        match critic {
            Some(m) => reasoner.with_critic(&m.agent.id, Arc::clone(&m.behavior)),
            None => reasoner,
        }
    }

    /// Route a proposal to complementary reviewers, allowing revisions.
    pub async fn request_peer_review(
        &self,
        proposal: &Proposal,
        criteria: &[String],
    ) -> TeamResult<PeerReview> {
        let criteria: Vec<String> = if criteria.is_empty() {
            DEFAULT_CRITERIA.iter().map(|c| c.to_string()).collect()
        } else {
            criteria.to_vec()
        };

        let (author, reviewers) = {
            let state = self.state.lock().await;
            let author = state
                .member(&proposal.agent_id)
                .cloned()
                .ok_or_else(|| TeamError::UnknownAgent(proposal.agent_id.clone()))?;
            let others: Vec<&TeamMember> = state
                .members
                .iter()
                .filter(|m| m.agent.id != author.agent.id)
                .collect();
            let mut pool: Vec<&TeamMember> = others
                .iter()
                .copied()
                .filter(|m| m.agent.kind.can(Capability::Review))
                .collect();
            if pool.is_empty() {
                pool = others;
            }
            if pool.is_empty() {
                return Err(TeamError::NoReviewers(proposal.id.clone()));
            }
            pool.sort_by(|a, b| {
                let ca = a.agent.expertise.complement(&author.agent.expertise);
                let cb = b.agent.expertise.complement(&author.agent.expertise);
                cb.total_cmp(&ca)
            });
            let reviewers: Vec<TeamMember> = pool
                .into_iter()
                .take(self.config.reviewer_count)
                .cloned()
                .collect();
            (author, reviewers)
        };

        let mut review = PeerReview::new(
            proposal,
            reviewers.iter().map(|r| r.agent.id.clone()).collect(),
            criteria.clone(),
        );
        let mut current = proposal.clone();

        loop {
            let feedback = self.gather_feedback(&reviewers, &current, &criteria).await?;
            let revisions_left = (review.rounds.len() as u32) < self.config.max_revisions;
            review.record_round(
                ReviewRound::new(current.clone(), &criteria, feedback.clone()),
                revisions_left,
            );
            {
                let mut state = self.state.lock().await;
                state.record(
                    Some(&current.cycle_id),
                    Some(current.phase),
                    AuditEvent::ReviewRound {
                        review_id: review.id.clone(),
                        proposal_id: current.id.clone(),
                        reviewers: review.reviewers.clone(),
                        status: review.status,
                    },
                );
            }
            debug!(
                review_id = %review.id,
                proposal_id = %current.id,
                status = %review.status,
                "Review round recorded"
            );
            if review.status != ReviewStatus::RevisionRequested {
                break;
            }

            match with_deadline(
                self.config.agent_timeout,
                author.behavior.revise(&current, &feedback),
            )
            .await
            {
                Ok(draft) => {
                    current = current.revise(draft.content, draft.confidence);
                }
                Err(reason) => {
                    warn!(
                        review_id = %review.id,
                        author = %author.agent.id,
                        reason = ?reason,
                        "Revision not received"
                    );
                    review.status = ReviewStatus::Rejected;
                    break;
                }
            }
        }

        info!(
            review_id = %review.id,
            status = %review.status,
            revisions = review.revisions(),
            "Peer review finalized"
        );
        Ok(review)
    }

    async fn gather_feedback(
        &self,
        reviewers: &[TeamMember],
        proposal: &Proposal,
        criteria: &[String],
    ) -> TeamResult<Vec<ReviewFeedback>> {
        {
            let mut state = self.state.lock().await;
            for reviewer in reviewers {
                state.deliver(
                    Envelope::new(
                        &proposal.agent_id,
                        Recipient::agent(reviewer.agent.id.clone()),
                        MessageType::Request,
                        json!({ "review_proposal": proposal.id, "criteria": criteria }),
                    )
                    .in_scope(&proposal.cycle_id, proposal.phase),
                )?;
            }
        }

        let deadline = self.config.agent_timeout;
        let verdicts = join_all(reviewers.iter().map(|r| async move {
            let verdict = with_deadline(deadline, r.behavior.review(proposal, criteria)).await;
            (r.agent.id.clone(), verdict)
        }))
        .await;

        let mut feedback = Vec::new();
        let mut state = self.state.lock().await;
        for (reviewer_id, verdict) in verdicts {
            match verdict {
                Ok(verdict) => {
                    let fb = ReviewFeedback::from_verdict(&reviewer_id, &proposal.id, verdict);
                    state.deliver(
                        Envelope::new(
                            &reviewer_id,
                            Recipient::agent(proposal.agent_id.clone()),
                            MessageType::Review,
                            json!({
                                "proposal_id": proposal.id,
                                "approves": fb.approves(),
                                "critique": fb.critique,
                            }),
                        )
                        .in_scope(&proposal.cycle_id, proposal.phase),
                    )?;
                    feedback.push(fb);
                }
                Err(reason) => {
                    warn!(reviewer = %reviewer_id, reason = ?reason, "Review not received");
                    state.record(
                        Some(&proposal.cycle_id),
                        Some(proposal.phase),
                        AuditEvent::NoResponse {
                            agent_id: reviewer_id,
                            reason: format!("{:?}", reason),
                        },
                    );
                }
            }
        }
        Ok(feedback)
    }

    /// Send one message.
    pub async fn send_message(&self, envelope: Envelope) -> TeamResult<Message> {
        self.state.lock().await.deliver(envelope)
    }

    /// Send a batch; higher priorities are delivered first.
    pub async fn send_round(&self, mut envelopes: Vec<Envelope>) -> TeamResult<Vec<Message>> {
        envelopes.sort_by(|a, b| b.priority.cmp(&a.priority));
        let mut state = self.state.lock().await;
        envelopes
            .into_iter()
            .map(|e| state.deliver(e))
            .collect()
    }

    /// Drain an agent's inbox in processing order.
    pub async fn take_inbox(&self, agent_id: &str) -> TeamResult<Vec<Message>> {
        self.state
            .lock()
            .await
            .drain_inbox(agent_id)
            .ok_or_else(|| TeamError::UnknownAgent(agent_id.to_string()))
    }

    pub async fn history(&self, filter: &MessageFilter) -> Vec<Message> {
        self.state
            .lock()
            .await
            .history
            .query(filter)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn audit_trail(&self, cycle_id: &str) -> Vec<AuditEntry> {
        self.state.lock().await.audit.for_cycle(cycle_id)
    }

    /// Persist one phase's messages under the communication-history key.
    pub async fn persist_history(
        &self,
        memory: &dyn MemoryPort,
        cycle_id: &str,
        phase: Phase,
    ) -> MemoryResult<()> {
        let messages: Vec<Message> = {
            let state = self.state.lock().await;
            state
                .history
                .for_phase(cycle_id, phase)
                .into_iter()
                .cloned()
                .collect()
        };
        let value = serde_json::to_value(&messages)
            .map_err(|e| crate::ports::MemoryError::Decode(e.to_string()))?;
        memory
            .put(cycle_id, phase, keys::COMMUNICATION_HISTORY, value)
            .await
    }
}

/// Await an agent call with a deadline, mapping failures to a reason.
async fn with_deadline<T>(
    deadline: Duration,
    call: impl Future<Output = Result<T, AgentError>>,
) -> Result<T, NoResponseReason> {
    match tokio::time::timeout(deadline, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(NoResponseReason::Error(e.to_string())),
        Err(_) => Err(NoResponseReason::Timeout),
    }
}
