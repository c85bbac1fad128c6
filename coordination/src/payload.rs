//! Task payloads.
//!
//! Every task entering the orchestrator (a macro cycle, a micro-cycle
//! sub-task, or a thesis handed to the dialectical reasoner) arrives as a
//! JSON-like mapping. Anything else is rejected before state is created.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::edrr::HumanOverride;

/// Error raised when a payload is not a mapping.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("Task payload must be a mapping, got {found}")]
    NotAMapping { found: &'static str },

    #[error("Field '{field}' must be {expected}, got {found}")]
    FieldType {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Result type for payload operations
pub type PayloadResult<T> = Result<T, PayloadError>;

/// A validated task payload.
///
/// Well-known keys are lifted into typed fields; everything else is kept
/// in `fields` untouched so callers can round-trip arbitrary metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Caller-supplied identifier, or a generated one.
    pub id: String,
    /// Human-readable task description.
    pub description: String,
    /// Tags used for expertise matching.
    pub tags: Vec<String>,
    /// Remaining keys of the original mapping.
    pub fields: Map<String, Value>,
}

impl TaskPayload {
    /// Build a payload from a description alone.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            tags: Vec::new(),
            fields: Map::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Validate an untyped value as a task payload.
    ///
    /// `description` falls back to `task` and then `content`; `tags` may be
    /// a list of strings or a single comma-separated string.
    pub fn from_value(value: Value) -> PayloadResult<Self> {
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(PayloadError::NotAMapping {
                    found: value_kind(&other),
                })
            }
        };

        let id = match map.remove("id") {
            None | Some(Value::Null) => uuid::Uuid::new_v4().to_string(),
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(PayloadError::FieldType {
                    field: "id".into(),
                    expected: "a string",
                    found: value_kind(&other),
                })
            }
        };

        let description = ["description", "task", "content"]
            .iter()
            .find_map(|key| match map.get(*key) {
                Some(Value::String(s)) => Some(s.clone()),
                _ => None,
            })
            .unwrap_or_default();
        map.remove("description");

        let tags = match map.remove("tags") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) => split_tags(&s),
            Some(Value::Array(items)) => {
                let mut tags = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => tags.push(s.trim().to_lowercase()),
                        other => {
                            return Err(PayloadError::FieldType {
                                field: "tags".into(),
                                expected: "a list of strings",
                                found: value_kind(&other),
                            })
                        }
                    }
                }
                tags
            }
            Some(other) => {
                return Err(PayloadError::FieldType {
                    field: "tags".into(),
                    expected: "a list of strings",
                    found: value_kind(&other),
                })
            }
        };

        Ok(Self {
            id,
            description,
            tags,
            fields: map,
        })
    }

    /// Serialize back into a flat mapping.
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("id".into(), Value::String(self.id.clone()));
        map.insert(
            "description".into(),
            Value::String(self.description.clone()),
        );
        map.insert(
            "tags".into(),
            Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
        );
        Value::Object(map)
    }

    /// Numeric field lookup, accepting integers and floats.
    pub fn score(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    /// Human override flag (`"terminate"` or `"continue"`), if present.
    pub fn human_override(&self) -> Option<HumanOverride> {
        match self.fields.get("human_override") {
            Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "terminate" => Some(HumanOverride::Terminate),
                "continue" => Some(HumanOverride::Continue),
                _ => None,
            },
            _ => None,
        }
    }

    /// Tags plus lowercase description words, used for relevance matching.
    pub fn keywords(&self) -> Vec<String> {
        let mut words: Vec<String> = self.tags.clone();
        words.extend(
            self.description
                .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
                .filter(|w| w.len() > 3)
                .map(str::to_lowercase),
        );
        words.sort();
        words.dedup();
        words
    }
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Short name of a JSON value's type, for error messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rejects_non_mapping() {
        let err = TaskPayload::from_value(json!(["a", "b"])).unwrap_err();
        assert_eq!(err, PayloadError::NotAMapping { found: "a list" });

        let err = TaskPayload::from_value(json!("just a string")).unwrap_err();
        assert_eq!(err, PayloadError::NotAMapping { found: "a string" });
    }

    #[test]
    fn test_lifts_known_fields() {
        let payload = TaskPayload::from_value(json!({
            "id": "task-1",
            "description": "Harden the login flow",
            "tags": ["Security", "auth"],
            "granularity_score": 0.4
        }))
        .unwrap();

        assert_eq!(payload.id, "task-1");
        assert_eq!(payload.description, "Harden the login flow");
        assert_eq!(payload.tags, vec!["security", "auth"]);
        assert_eq!(payload.score("granularity_score"), Some(0.4));
        assert!(!payload.fields.contains_key("tags"));
    }

    #[test]
    fn test_comma_separated_tags_and_generated_id() {
        let payload = TaskPayload::from_value(json!({
            "task": "Profile the cache",
            "tags": "performance, caching"
        }))
        .unwrap();
        assert!(!payload.id.is_empty());
        assert_eq!(payload.description, "Profile the cache");
        assert_eq!(payload.tags, vec!["performance", "caching"]);
    }

    #[test]
    fn test_bad_tag_type_is_rejected() {
        let err = TaskPayload::from_value(json!({"tags": [1, 2]})).unwrap_err();
        assert!(matches!(err, PayloadError::FieldType { ref field, .. } if field == "tags"));
    }

    #[test]
    fn test_human_override_parsing() {
        let payload = TaskPayload::new("x").with_field("human_override", json!("Terminate"));
        assert_eq!(payload.human_override(), Some(HumanOverride::Terminate));

        let payload = TaskPayload::new("x").with_field("human_override", json!("maybe"));
        assert_eq!(payload.human_override(), None);
    }

    #[test]
    fn test_keywords_include_tags_and_description_words() {
        let payload = TaskPayload::new("Review the API design").with_tag("security");
        let words = payload.keywords();
        assert!(words.contains(&"security".to_string()));
        assert!(words.contains(&"review".to_string()));
        assert!(words.contains(&"design".to_string()));
        assert!(!words.contains(&"the".to_string()));
    }
}
