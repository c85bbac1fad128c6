//! Dialectical records: thesis, synthesis, evaluation.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::critique::{Critique, CritiqueCategory, Reconciliation};

/// Normalized input proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thesis {
    /// Proposal this thesis was taken from, if any.
    pub proposal_id: Option<String>,
    /// Author of the proposal, if known.
    pub agent_id: Option<String>,
    /// Whitespace-normalized content.
    pub content: String,
}

impl Thesis {
    pub fn new(content: &str) -> Self {
        Self {
            proposal_id: None,
            agent_id: None,
            content: normalize(content),
        }
    }

    pub fn from_proposal(proposal_id: &str, agent_id: &str, content: &str) -> Self {
        Self {
            proposal_id: Some(proposal_id.to_string()),
            agent_id: Some(agent_id.to_string()),
            content: normalize(content),
        }
    }
}

/// Collapse runs of whitespace and trim.
pub fn normalize(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Result of the synthesis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub content: String,
    /// Categories the synthesis explicitly answers.
    pub addressed: BTreeSet<CritiqueCategory>,
    /// Explicit resolutions for conflicting categories.
    pub reconciliations: Vec<Reconciliation>,
}

/// Per-category comparison of thesis and synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub thesis: f64,
    pub synthesis: f64,
}

/// Result of the evaluation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// One entry per critique category, always all of them.
    pub categories: BTreeMap<CritiqueCategory, CategoryScore>,
    pub thesis_score: f64,
    pub synthesis_score: f64,
    /// Synthesis is strictly better than the thesis.
    pub improved: bool,
}

impl Evaluation {
    /// Score the synthesis against the thesis across every category.
    ///
    /// The thesis earns a category when it already mentions it. The
    /// synthesis earns full credit for a category it addresses with a real
    /// critique, half credit when only a placeholder critique was available.
    pub fn score(thesis: &Thesis, critiques: &[Critique], synthesis: &Synthesis) -> Self {
        let mut categories = BTreeMap::new();
        for category in CritiqueCategory::ALL {
            let thesis_score = if category.matches(&thesis.content) {
                1.0
            } else {
                0.0
            };
            let substantive = critiques
                .iter()
                .any(|c| c.category == category && !c.is_placeholder());
            let synthesis_score = match (synthesis.addressed.contains(&category), substantive) {
                (true, true) => 1.0,
                (true, false) => 0.5,
                (false, _) => 0.0,
            };
            categories.insert(
                category,
                CategoryScore {
                    thesis: thesis_score,
                    synthesis: synthesis_score,
                },
            );
        }

        let n = categories.len() as f64;
        let thesis_score = categories.values().map(|s| s.thesis).sum::<f64>() / n;
        let synthesis_score = categories.values().map(|s| s.synthesis).sum::<f64>() / n;

        Self {
            categories,
            thesis_score,
            synthesis_score,
            improved: synthesis_score > thesis_score,
        }
    }
}

/// Immutable outcome of one dialectical reasoning round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialecticalRecord {
    pub id: String,
    pub thesis: Thesis,
    /// Competing proposal when reasoning resolves a tie.
    pub antithesis: Option<Thesis>,
    pub critiques: Vec<Critique>,
    pub synthesis: Synthesis,
    pub evaluation: Evaluation,
    /// Deepest pairwise reduction level reached.
    pub depth: u32,
    pub max_depth: u32,
    pub elapsed_ms: u64,
    /// The time budget ran out and at least one step was skipped.
    pub budget_exhausted: bool,
    /// Reduction stopped at `max_depth` with work remaining.
    pub depth_capped: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialectic::critique::CritiqueSource;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("  use   a\n cache "), "use a cache");
        assert_eq!(Thesis::new("\tx  y").content, "x y");
    }

    #[test]
    fn test_evaluation_covers_every_category() {
        let thesis = Thesis::new("Add a cache for speed");
        let critiques = vec![
            Critique::new(CritiqueCategory::Security, "cache poisoning"),
            Critique::placeholder(CritiqueCategory::Usability, "timed out"),
        ];
        let synthesis = Synthesis {
            content: "Signed cache entries".into(),
            addressed: [CritiqueCategory::Security, CritiqueCategory::Usability]
                .into_iter()
                .collect(),
            reconciliations: vec![],
        };

        let eval = Evaluation::score(&thesis, &critiques, &synthesis);
        assert_eq!(eval.categories.len(), 5);
        assert_eq!(eval.categories[&CritiqueCategory::Security].synthesis, 1.0);
        assert_eq!(eval.categories[&CritiqueCategory::Usability].synthesis, 0.5);
        assert_eq!(eval.categories[&CritiqueCategory::Performance].thesis, 1.0);
        assert_eq!(eval.categories[&CritiqueCategory::Testability].synthesis, 0.0);
        assert!((eval.thesis_score - 0.2).abs() < 1e-9);
        assert!((eval.synthesis_score - 0.3).abs() < 1e-9);
        assert!(eval.improved);
    }

    #[test]
    fn test_no_improvement_when_synthesis_adds_nothing() {
        let thesis = Thesis::new("secure fast readable usable testable");
        let synthesis = Synthesis {
            content: String::new(),
            addressed: BTreeSet::new(),
            reconciliations: vec![],
        };
        let critiques = vec![
            Critique::new(CritiqueCategory::Security, "x").with_source(CritiqueSource::Generated)
        ];
        let eval = Evaluation::score(&thesis, &critiques, &synthesis);
        assert!(!eval.improved);
    }
}
