//! Parsing of model output into thought candidates.
//!
//! The tree engine never inspects completion text itself; it goes through a
//! [`ThoughtParser`]. Malformed output yields zero candidates, never an error,
//! and one malformed item does not discard its well-formed siblings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{extract_json_from_completion, preview, unit_interval};

/// A candidate next thought extracted from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtCandidate {
    /// Thought text.
    pub content: String,
    /// Justification for the thought.
    pub reasoning: String,
    /// Self-reported confidence (0.0-1.0).
    pub confidence: f64,
    /// Optional per-criterion scores (0.0-1.0), keyed by criterion name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub evaluations: BTreeMap<String, f64>,
}

impl ThoughtCandidate {
    /// Create a candidate with no criterion evaluations.
    pub fn new(content: impl Into<String>, reasoning: impl Into<String>, confidence: f64) -> Self {
        Self {
            content: content.into(),
            reasoning: reasoning.into(),
            confidence: unit_interval(confidence).unwrap_or(0.0),
            evaluations: BTreeMap::new(),
        }
    }

    /// Attach a criterion score.
    pub fn with_evaluation(mut self, criterion: impl Into<String>, score: f64) -> Self {
        if let Some(score) = unit_interval(score) {
            self.evaluations.insert(criterion.into(), score);
        }
        self
    }
}

/// Parses free-text model output into zero or more thought candidates.
pub trait ThoughtParser: Send + Sync {
    /// Parse a completion. Never fails; unparseable input yields an empty list.
    fn parse(&self, completion: &str) -> Vec<ThoughtCandidate>;
}

/// Parser for the JSON format requested by the expansion prompt.
///
/// Accepts `{"thoughts": [...]}`, the `branches`/`continuations` spellings,
/// or a bare array. Items may use `content` or `thought` for the text and
/// `reasoning` or `rationale` for the justification.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonThoughtParser;

const LIST_KEYS: [&str; 3] = ["thoughts", "branches", "continuations"];

/// Confidence assumed when an item omits it.
const DEFAULT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Deserialize)]
struct RawThought {
    #[serde(alias = "thought")]
    content: String,
    #[serde(default, alias = "rationale")]
    reasoning: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    evaluations: BTreeMap<String, f64>,
}

impl ThoughtParser for JsonThoughtParser {
    fn parse(&self, completion: &str) -> Vec<ThoughtCandidate> {
        let json_str = match extract_json_from_completion(completion) {
            Ok(s) => s,
            Err(e) => {
                warn!(
                    error = %e,
                    completion_preview = %preview(completion),
                    "Failed to extract JSON from expansion response"
                );
                return Vec::new();
            }
        };

        let value: serde_json::Value = match serde_json::from_str(json_str) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Failed to parse expansion response");
                return Vec::new();
            }
        };

        let items = match value {
            serde_json::Value::Array(items) => items,
            serde_json::Value::Object(mut map) => LIST_KEYS
                .iter()
                .find_map(|key| match map.remove(*key) {
                    Some(serde_json::Value::Array(items)) => Some(items),
                    _ => None,
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        let total = items.len();
        let candidates: Vec<ThoughtCandidate> = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<RawThought>(item) {
                Ok(raw) => raw.into_candidate(),
                Err(e) => {
                    debug!(error = %e, "Skipping malformed thought item");
                    None
                }
            })
            .collect();

        if candidates.len() < total {
            warn!(
                parsed = candidates.len(),
                total = total,
                "Some thought items could not be parsed"
            );
        }

        candidates
    }
}

impl RawThought {
    fn into_candidate(self) -> Option<ThoughtCandidate> {
        let content = self.content.trim();
        if content.is_empty() {
            return None;
        }

        let confidence = self
            .confidence
            .and_then(unit_interval)
            .unwrap_or(DEFAULT_CONFIDENCE);

        let evaluations = self
            .evaluations
            .into_iter()
            .filter_map(|(k, v)| unit_interval(v).map(|v| (k, v)))
            .collect();

        Some(ThoughtCandidate {
            content: content.to_string(),
            reasoning: self.reasoning.trim().to_string(),
            confidence,
            evaluations,
        })
    }
}
