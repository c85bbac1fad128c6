//! Team roster: which agents exist, their kind and expertise.
//!
//! ```toml
//! [[agents]]
//! id = "designer"
//! kind = "designer"
//! expertise = { architecture = 0.9, exploration = 0.7 }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use edrr_coordination::{AgentKind, Expertise, LlmPort, TeamMember};
use serde::Deserialize;
use thiserror::Error;

use crate::agent::LlmAgent;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("Failed to read roster: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse roster: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Roster has no agents")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    pub kind: AgentKind,
    #[serde(default)]
    pub expertise: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Roster {
    pub agents: Vec<AgentSpec>,
}

impl Roster {
    pub fn parse_str(raw: &str) -> Result<Self, RosterError> {
        let roster: Roster = toml::from_str(raw)?;
        if roster.agents.is_empty() {
            return Err(RosterError::Empty);
        }
        Ok(roster)
    }

    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse_str(&raw)
    }

    /// One agent per kind, each leaning towards a different phase.
    pub fn builtin() -> Self {
        let spec = |id: &str, kind: AgentKind, expertise: &[(&str, f64)]| AgentSpec {
            id: id.to_string(),
            kind,
            expertise: expertise
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        };
        Self {
            agents: vec![
                spec(
                    "designer",
                    AgentKind::Designer,
                    &[("exploration", 0.8), ("creativity", 0.8), ("architecture", 0.9)],
                ),
                spec(
                    "worker",
                    AgentKind::Worker,
                    &[("implementation", 0.9), ("optimization", 0.7)],
                ),
                spec(
                    "critic",
                    AgentKind::Critic,
                    &[("analysis", 0.8), ("security", 0.8), ("critical thinking", 0.9)],
                ),
                spec(
                    "evaluator",
                    AgentKind::Evaluator,
                    &[("evaluation", 0.9), ("testing", 0.8), ("quality", 0.7)],
                ),
                spec(
                    "supervisor",
                    AgentKind::Supervisor,
                    &[("reflection", 0.8), ("documentation", 0.7), ("review", 0.8)],
                ),
            ],
        }
    }

    /// Build team members that all talk through `llm`.
    pub fn into_members(self, llm: Arc<dyn LlmPort>) -> Vec<TeamMember> {
        self.agents
            .into_iter()
            .map(|spec| {
                let expertise = spec
                    .expertise
                    .iter()
                    .fold(Expertise::new(), |e, (name, score)| e.with(name, *score));
                TeamMember::new(
                    spec.id,
                    spec.kind,
                    expertise,
                    Arc::new(LlmAgent::new(spec.kind, Arc::clone(&llm))),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roster() {
        let roster = Roster::parse_str(
            r#"
[[agents]]
id = "sec"
kind = "critic"
expertise = { security = 0.9 }

[[agents]]
id = "dev"
kind = "worker"
"#,
        )
        .unwrap();
        assert_eq!(roster.agents.len(), 2);
        assert_eq!(roster.agents[0].kind, AgentKind::Critic);
        assert_eq!(roster.agents[0].expertise.get("security"), Some(&0.9));
        assert!(roster.agents[1].expertise.is_empty());
    }

    #[test]
    fn test_empty_roster_rejected() {
        assert!(matches!(
            Roster::parse_str("agents = []"),
            Err(RosterError::Empty)
        ));
        assert!(matches!(
            Roster::parse_str("agents = [{ id = \"x\", kind = \"wizard\" }]"),
            Err(RosterError::Parse(_))
        ));
    }

    #[test]
    fn test_builtin_covers_every_kind() {
        let kinds: Vec<AgentKind> = Roster::builtin().agents.iter().map(|a| a.kind).collect();
        for kind in [
            AgentKind::Worker,
            AgentKind::Critic,
            AgentKind::Supervisor,
            AgentKind::Designer,
            AgentKind::Evaluator,
        ] {
            assert!(kinds.contains(&kind));
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.toml");
        std::fs::write(&path, "[[agents]]\nid = \"solo\"\nkind = \"designer\"\n").unwrap();
        let roster = Roster::load(&path).unwrap();
        assert_eq!(roster.agents[0].id, "solo");
    }
}
