//! Reasoning and compliance patterns.
//!
//! This module provides the pattern engines:
//! - [`TotEngine`]: Tree-of-Thoughts search over branching reasoning paths
//! - [`ConstitutionalEngine`]: principle-based review and bounded revision
//! - [`run_pipeline`]: the ToT best path fed into constitutional review
//!
//! Engines share invoker and audit plumbing via [`PatternCore`] composition.

mod cancel;
mod constitutional;
mod coordinator;
mod core;
mod parser;
mod tree;

pub use cancel::*;
pub use constitutional::*;
pub use coordinator::*;
pub use self::core::*;
pub use parser::*;
pub use tree::*;

use serde::{Deserialize, Serialize};
use tracing::warn;

// ============================================================================
// Shared Utilities
// ============================================================================

/// Serialize a value to JSON for audit attributes, with warning on failure.
pub(crate) fn serialize_for_log<T: serde::Serialize>(
    value: &T,
    context: &str,
) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!(
            error = %e,
            context = %context,
            "Failed to serialize value for audit event"
        );
        serde_json::json!({
            "serialization_error": e.to_string(),
            "context": context
        })
    })
}

/// Extract JSON from a completion string, handling markdown code blocks.
///
/// Attempts extraction in this order:
/// 1. Raw JSON (fast path)
/// 2. ```json ... ``` code blocks
/// 3. ``` ... ``` code blocks
pub(crate) fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}

/// Preview of model output for log fields.
pub(crate) fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

/// Clamp into [0, 1], mapping non-finite values to `None`.
pub(crate) fn unit_interval(value: f64) -> Option<f64> {
    value.is_finite().then(|| value.clamp(0.0, 1.0))
}

/// Pattern types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Tree-of-Thoughts search.
    Tot,
    /// Constitutional review and revision.
    Constitutional,
    /// ToT followed by constitutional review.
    Pipeline,
}

impl PatternKind {
    /// Get the pattern name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Tot => "tot",
            PatternKind::Constitutional => "constitutional",
            PatternKind::Pipeline => "pipeline",
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PatternKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tot" | "tree_of_thoughts" => Ok(PatternKind::Tot),
            "constitutional" => Ok(PatternKind::Constitutional),
            "pipeline" => Ok(PatternKind::Pipeline),
            _ => Err(format!("Unknown pattern: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_kind_as_str() {
        assert_eq!(PatternKind::Tot.as_str(), "tot");
        assert_eq!(PatternKind::Constitutional.as_str(), "constitutional");
        assert_eq!(PatternKind::Pipeline.as_str(), "pipeline");
    }

    #[test]
    fn test_pattern_kind_from_str() {
        assert_eq!("TOT".parse::<PatternKind>().unwrap(), PatternKind::Tot);
        assert_eq!(
            "tree_of_thoughts".parse::<PatternKind>().unwrap(),
            PatternKind::Tot
        );
        assert_eq!(
            "Constitutional".parse::<PatternKind>().unwrap(),
            PatternKind::Constitutional
        );
        let err = "react".parse::<PatternKind>().unwrap_err();
        assert_eq!(err, "Unknown pattern: react");
    }

    #[test]
    fn test_pattern_kind_serde() {
        assert_eq!(
            serde_json::to_string(&PatternKind::Constitutional).unwrap(),
            "\"constitutional\""
        );
    }

    #[test]
    fn test_extract_json_raw_object() {
        let result = extract_json_from_completion(r#"  {"key": "value"} "#);
        assert_eq!(result.unwrap(), r#"{"key": "value"}"#);
    }

    #[test]
    fn test_extract_json_from_json_code_block() {
        let input = "Here you go:\n```json\n{\"thoughts\": []}\n```\nDone.";
        assert_eq!(
            extract_json_from_completion(input).unwrap(),
            r#"{"thoughts": []}"#
        );
    }

    #[test]
    fn test_extract_json_from_plain_code_block() {
        let input = "```\n[1, 2]\n```";
        assert_eq!(extract_json_from_completion(input).unwrap(), "[1, 2]");
    }

    #[test]
    fn test_extract_json_empty_block() {
        let err = extract_json_from_completion("```json\n\n```").unwrap_err();
        assert!(err.contains("empty or malformed"));
    }

    #[test]
    fn test_extract_json_no_json_found() {
        let err = extract_json_from_completion(&"x".repeat(300)).unwrap_err();
        assert!(err.contains("No JSON found"));
        assert!(err.len() < 200);
    }

    #[test]
    fn test_serialize_for_log() {
        let value = serde_json::json!({"depth": 2});
        assert_eq!(serialize_for_log(&value, "ctx")["depth"], 2);
    }

    #[test]
    fn test_unit_interval() {
        assert_eq!(unit_interval(0.4), Some(0.4));
        assert_eq!(unit_interval(1.7), Some(1.0));
        assert_eq!(unit_interval(-0.2), Some(0.0));
        assert_eq!(unit_interval(f64::NAN), None);
        assert_eq!(unit_interval(f64::INFINITY), None);
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview(&"a".repeat(500)).len(), 200);
        assert_eq!(preview("short"), "short");
    }
}
