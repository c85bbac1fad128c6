//! Prompt text for each agent kind and each capability.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever prompt content changes,
//! so logged responses can be traced to the prompt that produced them.

use edrr_coordination::consensus::Proposal;
use edrr_coordination::dialectic::{CritiqueCategory, SynthesisRequest};
use edrr_coordination::wsde::{AgentRole, MessageType, ProposalRequest, ReviewFeedback};
use edrr_coordination::AgentKind;

/// Prompt version. Bump on any content change.
pub const PROMPT_VERSION: &str = "1.1.0";

const CONFIDENCE_INSTRUCTION: &str = "\
End your answer with a single line `CONFIDENCE: <0.0-1.0>` stating how confident \
you are that the proposal is correct and complete.";

pub const WORKER_SYSTEM: &str = "\
You are a Worker on a small expert team. Produce concrete, actionable proposals. \
Prefer specific steps over general advice.";

pub const DESIGNER_SYSTEM: &str = "\
You are the Designer on a small expert team. Propose structure: components, \
interfaces, data flow and trade-offs. Name the assumptions you make.";

pub const CRITIC_SYSTEM: &str = "\
You are the Critic on a small expert team. Find weaknesses before they ship. \
Be specific about what fails, under which conditions, and how to fix it.";

pub const SUPERVISOR_SYSTEM: &str = "\
You are the Supervisor on a small expert team. Keep the work aligned with the \
task, spot gaps in coverage, and keep proposals consistent with each other.";

pub const EVALUATOR_SYSTEM: &str = "\
You are the Evaluator on a small expert team. Judge proposals against explicit \
criteria and explain each judgement briefly.";

pub fn system_prompt(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Worker => WORKER_SYSTEM,
        AgentKind::Designer => DESIGNER_SYSTEM,
        AgentKind::Critic => CRITIC_SYSTEM,
        AgentKind::Supervisor => SUPERVISOR_SYSTEM,
        AgentKind::Evaluator => EVALUATOR_SYSTEM,
    }
}

pub fn proposal_prompt(request: &ProposalRequest) -> String {
    let mut prompt = format!(
        "## Phase\n\n{} (depth {})\n\n## Instructions\n\n{}\n\n## Task\n\n{}",
        request.phase, request.depth, request.instructions, request.task.description
    );
    if !request.task.tags.is_empty() {
        prompt.push_str(&format!("\n\nTags: {}", request.task.tags.join(", ")));
    }
    if !request.context.is_empty() {
        prompt.push_str("\n\n## Earlier outcomes\n\n");
        for line in &request.context {
            prompt.push_str(&format!("- {}\n", line));
        }
    }
    let notes: Vec<String> = request
        .messages
        .iter()
        .filter(|m| m.message_type != MessageType::Request)
        .map(|m| {
            format!(
                "- [{}] {} from {}: {}",
                m.priority, m.message_type, m.sender, m.payload
            )
        })
        .collect();
    if !notes.is_empty() {
        prompt.push_str("\n\n## Team messages\n\n");
        prompt.push_str(&notes.join("\n"));
    }
    if request.role == AgentRole::Primus {
        prompt.push_str(
            "\n\nYou lead this phase. Make sure the proposal covers the whole task.",
        );
    }
    prompt.push_str("\n\n");
    prompt.push_str(CONFIDENCE_INSTRUCTION);
    prompt
}

pub fn critique_prompt(thesis: &str, category: CritiqueCategory) -> String {
    format!(
        "Critique the following proposal strictly from the {} point of view. \
         List concrete problems and how to address them. Do not discuss other concerns.\n\n\
         ## Proposal\n\n{}",
        category, thesis
    )
}

pub fn synthesis_prompt(request: &SynthesisRequest) -> String {
    let mut prompt = format!(
        "Merge two partial improvements of a proposal into one coherent text.\n\n\
         ## Original\n\n{}\n\n## First part\n\n{}\n\n## Second part\n\n{}",
        request.thesis, request.left.content, request.right.content
    );
    if !request.reconciliations.is_empty() {
        prompt.push_str("\n\n## Conflicts to settle\n\n");
        for rec in &request.reconciliations {
            prompt.push_str(&format!(
                "- {} vs {}: {}\n",
                rec.first, rec.second, rec.resolution
            ));
        }
    }
    prompt
}

pub fn review_prompt(proposal: &Proposal, criteria: &[String]) -> String {
    format!(
        "Review the proposal below against each criterion.\n\n\
         Respond with JSON only, in the form \
         {{\"criteria\": {{\"<criterion>\": true|false}}, \"critique\": \"<short text>\"}}.\n\n\
         ## Criteria\n\n{}\n\n## Proposal\n\n{}",
        criteria
            .iter()
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n"),
        proposal.content
    )
}

pub fn revise_prompt(proposal: &Proposal, feedback: &[ReviewFeedback]) -> String {
    let notes = feedback
        .iter()
        .map(|f| {
            let rejected = f.rejected_criteria();
            format!(
                "- {}: rejected [{}]; {}",
                f.reviewer_id,
                rejected.join(", "),
                if f.critique.is_empty() {
                    "no comment"
                } else {
                    f.critique.as_str()
                }
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Revise your proposal to address the review feedback. Keep what was accepted.\n\n\
         ## Proposal\n\n{}\n\n## Feedback\n\n{}\n\n{}",
        proposal.content, notes, CONFIDENCE_INSTRUCTION
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use edrr_coordination::wsde::{Message, MessagePriority};
    use edrr_coordination::{Phase, TaskPayload};
    use serde_json::json;

    fn request(role: AgentRole) -> ProposalRequest {
        ProposalRequest {
            cycle_id: "c1".into(),
            phase: Phase::Refine,
            depth: 1,
            task: TaskPayload::new("Add retries").with_tag("network"),
            instructions: "Be concrete".into(),
            role,
            context: vec!["expand: use backoff".into()],
            messages: Vec::new(),
        }
    }

    fn message(message_type: MessageType, priority: MessagePriority) -> Message {
        serde_json::from_value(json!({
            "id": "m1",
            "seq": 1,
            "sender": "critic",
            "recipients": ["designer"],
            "broadcast": false,
            "message_type": message_type,
            "priority": priority,
            "payload": {"note": "watch the retry budget"},
            "cycle_id": "c1",
            "phase": "refine",
            "sent_at": "2026-01-01T00:00:00Z",
        }))
        .unwrap()
    }

    #[test]
    fn test_proposal_prompt_sections() {
        let prompt = proposal_prompt(&request(AgentRole::Peer));
        assert!(prompt.contains("refine (depth 1)"));
        assert!(prompt.contains("Be concrete"));
        assert!(prompt.contains("Tags: network"));
        assert!(prompt.contains("- expand: use backoff"));
        assert!(prompt.contains("CONFIDENCE:"));
        assert!(!prompt.contains("You lead this phase"));

        let lead = proposal_prompt(&request(AgentRole::Primus));
        assert!(lead.contains("You lead this phase"));
    }

    #[test]
    fn test_proposal_prompt_lists_team_messages() {
        let mut req = request(AgentRole::Peer);
        req.messages = vec![
            message(MessageType::Critique, MessagePriority::High),
            message(MessageType::Request, MessagePriority::Normal),
        ];
        let prompt = proposal_prompt(&req);
        assert!(prompt.contains("## Team messages"));
        assert!(prompt.contains("- [high] critique from critic:"));
        assert!(prompt.contains("watch the retry budget"));
        assert!(!prompt.contains("request from"));

        let quiet = proposal_prompt(&request(AgentRole::Peer));
        assert!(!quiet.contains("## Team messages"));
    }

    #[test]
    fn test_review_prompt_lists_criteria() {
        let proposal = Proposal::submitted("a", "c1", Phase::Refine, "Do it", 0.5);
        let prompt = review_prompt(&proposal, &["clarity".into(), "correctness".into()]);
        assert!(prompt.contains("- clarity\n- correctness"));
        assert!(prompt.contains("Do it"));
    }
}
