//! Critique categories, keyword classification, and conflict reconciliation.

use serde::{Deserialize, Serialize};

/// Discipline a critique speaks for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CritiqueCategory {
    Security,
    Performance,
    Maintainability,
    Usability,
    Testability,
}

impl CritiqueCategory {
    /// Every category, in reporting order.
    pub const ALL: [CritiqueCategory; 5] = [
        CritiqueCategory::Security,
        CritiqueCategory::Performance,
        CritiqueCategory::Maintainability,
        CritiqueCategory::Usability,
        CritiqueCategory::Testability,
    ];

    /// Keywords that mark text as belonging to this category.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Security => &[
                "security",
                "vulnerability",
                "authentication",
                "authorization",
                "encryption",
                "injection",
                "secret",
            ],
            Self::Performance => &[
                "performance",
                "efficiency",
                "speed",
                "latency",
                "throughput",
                "optimization",
                "resource",
            ],
            Self::Maintainability => &[
                "maintainability",
                "readability",
                "modularity",
                "extensibility",
                "coupling",
                "complexity",
            ],
            Self::Usability => &[
                "usability",
                "user",
                "interface",
                "experience",
                "accessibility",
                "ergonomic",
            ],
            Self::Testability => &[
                "testability",
                "test",
                "coverage",
                "mock",
                "deterministic",
                "observability",
            ],
        }
    }

    /// Whether `text` mentions any of this category's keywords.
    pub fn matches(self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.keywords().iter().any(|k| lower.contains(k))
    }

    /// Every category whose keywords appear in `text`.
    pub fn classify(text: &str) -> Vec<CritiqueCategory> {
        Self::ALL.into_iter().filter(|c| c.matches(text)).collect()
    }
}

impl std::fmt::Display for CritiqueCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Security => write!(f, "security"),
            Self::Performance => write!(f, "performance"),
            Self::Maintainability => write!(f, "maintainability"),
            Self::Usability => write!(f, "usability"),
            Self::Testability => write!(f, "testability"),
        }
    }
}

/// Where a critique came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum CritiqueSource {
    /// Supplied by the caller.
    External,
    /// Produced by a critic agent.
    Agent(String),
    /// Derived from the competing proposal in a tie.
    Antithesis(String),
    /// Deterministic template when no critic is configured.
    Generated,
    /// Stand-in after the critic failed or the budget ran out.
    Placeholder,
}

/// A single critique of a thesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub category: CritiqueCategory,
    pub content: String,
    pub source: CritiqueSource,
}

impl Critique {
    pub fn new(category: CritiqueCategory, content: impl Into<String>) -> Self {
        Self {
            category,
            content: content.into(),
            source: CritiqueSource::External,
        }
    }

    pub fn with_source(mut self, source: CritiqueSource) -> Self {
        self.source = source;
        self
    }

    /// Split free text into one critique per matching category.
    ///
    /// Text matching no category is filed under maintainability.
    pub fn from_text(text: &str, source: CritiqueSource) -> Vec<Critique> {
        let categories = CritiqueCategory::classify(text);
        if categories.is_empty() {
            return vec![Critique {
                category: CritiqueCategory::Maintainability,
                content: text.to_string(),
                source,
            }];
        }
        categories
            .into_iter()
            .map(|category| Critique {
                category,
                content: text.to_string(),
                source: source.clone(),
            })
            .collect()
    }

    /// Deterministic critique used when no critic agent is available.
    pub fn template(category: CritiqueCategory, thesis: &str) -> Self {
        let focus = match category {
            CritiqueCategory::Security => {
                "validate inputs, enforce authorization, and keep secrets out of logs"
            }
            CritiqueCategory::Performance => {
                "bound the work per request and avoid redundant resource usage"
            }
            CritiqueCategory::Maintainability => {
                "keep modules small with clear ownership and low coupling"
            }
            CritiqueCategory::Usability => {
                "keep the user-facing interface consistent and errors actionable"
            }
            CritiqueCategory::Testability => {
                "make behaviour deterministic and reachable from unit tests"
            }
        };
        Self {
            category,
            content: format!(
                "{} review of '{}': {}",
                category,
                summarize(thesis, 60),
                focus
            ),
            source: CritiqueSource::Generated,
        }
    }

    pub fn placeholder(category: CritiqueCategory, reason: &str) -> Self {
        Self {
            category,
            content: format!("No {} critique available: {}", category, reason),
            source: CritiqueSource::Placeholder,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.source, CritiqueSource::Placeholder)
    }
}

/// Explicit resolution between two categories that pull in opposite
/// directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub first: CritiqueCategory,
    pub second: CritiqueCategory,
    /// Category that wins where the two cannot both be satisfied.
    pub prevailing: CritiqueCategory,
    pub resolution: String,
}

/// Category pairs known to conflict.
pub const CONFLICTING_PAIRS: [(CritiqueCategory, CritiqueCategory); 4] = [
    (CritiqueCategory::Security, CritiqueCategory::Performance),
    (CritiqueCategory::Security, CritiqueCategory::Usability),
    (CritiqueCategory::Performance, CritiqueCategory::Maintainability),
    (CritiqueCategory::Usability, CritiqueCategory::Testability),
];

/// Whether two categories are a known conflicting pair (in either order).
pub fn conflicts(a: CritiqueCategory, b: CritiqueCategory) -> bool {
    CONFLICTING_PAIRS
        .iter()
        .any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
}

/// Resolution statement for a conflicting pair, or `None` if they agree.
pub fn reconcile(a: CritiqueCategory, b: CritiqueCategory) -> Option<Reconciliation> {
    use CritiqueCategory::*;

    if !conflicts(a, b) {
        return None;
    }
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let (prevailing, resolution) = match (first, second) {
        (Security, Performance) => (
            Security,
            "Keep security checks on every critical path; optimize the non-critical paths and cache only data that is safe to cache.",
        ),
        (Security, Usability) => (
            Security,
            "Keep authentication and authorization strict, and reduce friction through clear guidance and sensible defaults rather than weaker controls.",
        ),
        (Performance, Maintainability) => (
            Maintainability,
            "Keep the readable structure as the baseline and confine optimizations to measured hot spots behind well-named abstractions.",
        ),
        (Usability, Testability) => (
            Testability,
            "Expose the same behaviour through a scriptable seam so convenience features stay covered by deterministic tests.",
        ),
        _ => return None,
    };
    Some(Reconciliation {
        first,
        second,
        prevailing,
        resolution: resolution.to_string(),
    })
}

/// First `max_chars` characters of `text`, with an ellipsis when cut.
pub(crate) fn summarize(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_keywords() {
        let categories =
            CritiqueCategory::classify("Encryption adds latency and hurts test coverage");
        assert_eq!(
            categories,
            vec![
                CritiqueCategory::Security,
                CritiqueCategory::Performance,
                CritiqueCategory::Testability
            ]
        );
    }

    #[test]
    fn test_from_text_defaults_to_maintainability() {
        let critiques = Critique::from_text("Rename this", CritiqueSource::External);
        assert_eq!(critiques.len(), 1);
        assert_eq!(critiques[0].category, CritiqueCategory::Maintainability);
    }

    #[test]
    fn test_conflicts_are_symmetric() {
        assert!(conflicts(
            CritiqueCategory::Usability,
            CritiqueCategory::Security
        ));
        assert!(conflicts(
            CritiqueCategory::Security,
            CritiqueCategory::Usability
        ));
        assert!(!conflicts(
            CritiqueCategory::Security,
            CritiqueCategory::Testability
        ));
    }

    #[test]
    fn test_security_prevails_over_performance() {
        let rec = reconcile(CritiqueCategory::Performance, CritiqueCategory::Security).unwrap();
        assert_eq!(rec.first, CritiqueCategory::Security);
        assert_eq!(rec.second, CritiqueCategory::Performance);
        assert_eq!(rec.prevailing, CritiqueCategory::Security);
        assert!(!rec.resolution.is_empty());
    }

    #[test]
    fn test_every_conflicting_pair_reconciles() {
        for (a, b) in CONFLICTING_PAIRS {
            assert!(reconcile(a, b).is_some(), "{} vs {}", a, b);
        }
        assert!(reconcile(CritiqueCategory::Security, CritiqueCategory::Maintainability).is_none());
    }

    #[test]
    fn test_template_mentions_category() {
        let critique = Critique::template(CritiqueCategory::Usability, "Add a CLI flag");
        assert!(critique.content.starts_with("usability"));
        assert_eq!(critique.source, CritiqueSource::Generated);
    }

    #[test]
    fn test_summarize_truncates() {
        assert_eq!(summarize("short", 10), "short");
        assert_eq!(summarize("abcdefghijkl", 5), "abcde...");
    }
}
