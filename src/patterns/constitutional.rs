//! Constitutional review - principle-based critique with bounded revision.
//!
//! A candidate response is reviewed against a weighted principle set. When
//! its compliance score falls under the configured minimum, the engine asks
//! for a revision and reviews again, up to `max_revisions` times.
//!
//! The engine never fails a run: invocation errors are logged and the best
//! response computed so far is returned, with the reason recorded in
//! [`RevisionOutcome::terminal_state`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    extract_json_from_completion, preview, serialize_for_log, unit_interval, CancellationToken,
    PatternCore, PatternKind,
};
use crate::audit::AuditSink;
use crate::config::Config;
use crate::error::{AppError, AppResult, InvokeError, InvokeResult};
use crate::invoker::{InvokeOptions, InvokeRequest, Message, ModelInvoker};
use crate::prompts::{CONSTITUTIONAL_REVIEW_PROMPT, CONSTITUTIONAL_REVISE_PROMPT};

#[cfg(test)]
#[path = "constitutional_tests.rs"]
mod constitutional_tests;

// ============================================================================
// Principles
// ============================================================================

/// Principle category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipleCategory {
    /// Avoiding harm.
    Safety,
    /// Factual correctness and calibrated uncertainty.
    Accuracy,
    /// Staying within scope of practice.
    Boundaries,
    /// Respect for the patient's own decisions.
    Autonomy,
}

impl PrincipleCategory {
    /// Get the category name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipleCategory::Safety => "safety",
            PrincipleCategory::Accuracy => "accuracy",
            PrincipleCategory::Boundaries => "boundaries",
            PrincipleCategory::Autonomy => "autonomy",
        }
    }
}

impl std::fmt::Display for PrincipleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A compliance rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principle {
    /// Stable identifier referenced by violations.
    pub id: String,
    /// What the principle demands.
    pub description: String,
    /// Category.
    pub category: PrincipleCategory,
    /// Relative importance (> 0).
    pub weight: f64,
}

impl Principle {
    /// Create a principle
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        category: PrincipleCategory,
        weight: f64,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            category,
            weight,
        }
    }
}

/// Built-in healthcare consultation principles.
pub fn default_principles() -> Vec<Principle> {
    vec![
        Principle::new(
            "no-harmful-advice",
            "Never recommend actions, doses or delays that could cause physical harm.",
            PrincipleCategory::Safety,
            1.0,
        ),
        Principle::new(
            "escalate-emergencies",
            "Direct the user to emergency services when symptoms suggest an urgent condition.",
            PrincipleCategory::Safety,
            1.0,
        ),
        Principle::new(
            "evidence-based",
            "Make only claims supported by established clinical evidence.",
            PrincipleCategory::Accuracy,
            0.8,
        ),
        Principle::new(
            "acknowledge-uncertainty",
            "State uncertainty and the limits of remote assessment plainly.",
            PrincipleCategory::Accuracy,
            0.6,
        ),
        Principle::new(
            "scope-of-practice",
            "Do not diagnose or prescribe; recommend consulting a licensed clinician.",
            PrincipleCategory::Boundaries,
            0.8,
        ),
        Principle::new(
            "patient-autonomy",
            "Present options neutrally and respect the patient's right to decide.",
            PrincipleCategory::Autonomy,
            0.5,
        ),
    ]
}

// ============================================================================
// Review Types
// ============================================================================

/// Violation severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Minor issue.
    Low,
    /// Material gap.
    Medium,
    /// Could cause harm or seriously mislead.
    High,
}

impl Severity {
    /// Fixed weight used by the derived compliance score.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Low => 0.2,
            Severity::Medium => 0.5,
            Severity::High => 0.9,
        }
    }

    /// Get the severity name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" | "minor" => Ok(Severity::Low),
            "medium" | "moderate" => Ok(Severity::Medium),
            "high" | "critical" | "severe" => Ok(Severity::High),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// A detected breach of a principle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Id of the violated principle.
    pub principle_id: String,
    /// Severity.
    pub severity: Severity,
    /// What in the response breaches the principle.
    pub explanation: String,
}

impl Violation {
    /// Create a violation
    pub fn new(
        principle_id: impl Into<String>,
        severity: Severity,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            principle_id: principle_id.into(),
            severity,
            explanation: explanation.into(),
        }
    }
}

/// Where a compliance score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    /// Reported by the reviewing model.
    ModelReported,
    /// Computed from violation severities and principle weights.
    Derived,
    /// The review could not be performed.
    Unavailable,
}

/// Output of one compliance review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    /// Violations, in the order reported.
    pub violations: Vec<Violation>,
    /// Compliance score (0.0-1.0).
    pub compliance_score: f64,
    /// `compliance_score < min_compliance_score`.
    pub requires_revision: bool,
    /// Origin of `compliance_score`.
    pub score_source: ScoreSource,
}

impl ReviewResult {
    /// Placeholder for a review that never completed. Compliance is not
    /// proven, so it requires revision.
    pub fn unavailable() -> Self {
        Self {
            violations: Vec::new(),
            compliance_score: 0.0,
            requires_revision: true,
            score_source: ScoreSource::Unavailable,
        }
    }
}

/// One reviewed version of the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    /// 0 for the original, n for the n-th revision.
    pub revision: usize,
    /// The reviewed text.
    pub response: String,
    /// Its review.
    pub review: ReviewResult,
}

/// How a constitutional run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// The final response meets the minimum score.
    Compliant,
    /// Revision was disabled or not allowed; the response is below the minimum.
    NonCompliant,
    /// Every allowed revision was used and the last one is still below the minimum.
    Exhausted,
    /// An invocation failed; the best response so far was kept.
    Failed,
    /// The caller cancelled; the best response so far was kept.
    Cancelled,
}

impl TerminalState {
    /// Get the state name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::Compliant => "compliant",
            TerminalState::NonCompliant => "non_compliant",
            TerminalState::Exhausted => "exhausted",
            TerminalState::Failed => "failed",
            TerminalState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output of a full constitutional run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionOutcome {
    /// Run identifier.
    pub run_id: String,
    /// The response as submitted.
    pub original_response: String,
    /// Latest successful revision, if any.
    pub revised_response: Option<String>,
    /// The response to hand back to the caller.
    pub final_response: String,
    /// Review of `final_response` (or unavailable).
    pub review: ReviewResult,
    /// Revisions performed (0..=max_revisions).
    pub revision_count: usize,
    /// How the run ended.
    pub terminal_state: TerminalState,
    /// Every reviewed version, in order.
    pub history: Vec<ReviewRecord>,
}

impl RevisionOutcome {
    /// Whether the final response was reviewed as compliant.
    pub fn is_compliant(&self) -> bool {
        self.terminal_state == TerminalState::Compliant
    }
}

/// Derive a compliance score from violations.
///
/// `1 - Σ(severity weight × principle weight) / Σ(principle weights)`,
/// clamped to [0, 1]. Violations of unknown principles contribute nothing.
pub fn derived_compliance_score(violations: &[Violation], principles: &[Principle]) -> f64 {
    let total_weight: f64 = principles.iter().map(|p| p.weight).sum();
    if total_weight <= 0.0 {
        return if violations.is_empty() { 1.0 } else { 0.0 };
    }

    let penalty: f64 = violations
        .iter()
        .filter_map(|v| {
            principles
                .iter()
                .find(|p| p.id == v.principle_id)
                .map(|p| v.severity.weight() * p.weight)
        })
        .sum();

    (1.0 - penalty / total_weight).clamp(0.0, 1.0)
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for constitutional review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstitutionalConfig {
    /// Principle set reviewed against
    #[serde(default = "default_principles")]
    pub principles: Vec<Principle>,
    /// Scores below this require revision
    #[serde(default = "default_min_compliance_score")]
    pub min_compliance_score: f64,
    /// Whether to revise at all
    #[serde(default = "default_enable_revision")]
    pub enable_revision: bool,
    /// Cap on revise/re-review cycles
    #[serde(default = "default_max_revisions")]
    pub max_revisions: usize,
    /// Sampling temperature for review and revision calls
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_min_compliance_score() -> f64 {
    0.8
}

fn default_enable_revision() -> bool {
    true
}

fn default_max_revisions() -> usize {
    3
}

fn default_temperature() -> f64 {
    0.2
}

impl Default for ConstitutionalConfig {
    fn default() -> Self {
        Self {
            principles: default_principles(),
            min_compliance_score: default_min_compliance_score(),
            enable_revision: default_enable_revision(),
            max_revisions: default_max_revisions(),
            temperature: default_temperature(),
        }
    }
}

impl ConstitutionalConfig {
    /// Check the principle set and bounds. Called at engine construction.
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |message: String| AppError::Config {
            message: format!("Invalid constitutional configuration: {}", message),
        };

        if self.principles.is_empty() {
            return Err(invalid("principle set is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for principle in &self.principles {
            if principle.id.trim().is_empty() {
                return Err(invalid("principle id must not be blank".to_string()));
            }
            if !seen.insert(principle.id.as_str()) {
                return Err(invalid(format!("duplicate principle id '{}'", principle.id)));
            }
            if !(principle.weight.is_finite() && principle.weight > 0.0) {
                return Err(invalid(format!(
                    "principle '{}' weight must be positive (got {})",
                    principle.id, principle.weight
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.min_compliance_score) {
            return Err(invalid(format!(
                "min_compliance_score must be within [0, 1] (got {})",
                self.min_compliance_score
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid(format!(
                "temperature must be within [0, 2] (got {})",
                self.temperature
            )));
        }

        Ok(())
    }

    /// Replace the principle set
    pub fn with_principles(mut self, principles: Vec<Principle>) -> Self {
        self.principles = principles;
        self
    }

    /// Set the minimum compliance score
    pub fn with_min_compliance_score(mut self, score: f64) -> Self {
        self.min_compliance_score = score;
        self
    }

    /// Enable or disable revision
    pub fn with_revision(mut self, enabled: bool) -> Self {
        self.enable_revision = enabled;
        self
    }

    /// Set the revision cap
    pub fn with_max_revisions(mut self, max_revisions: usize) -> Self {
        self.max_revisions = max_revisions;
        self
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Constitutional review and revision engine.
pub struct ConstitutionalEngine {
    /// Core infrastructure (invoker and audit sink).
    core: PatternCore,
    review_pipe: String,
    revise_pipe: String,
    config: ConstitutionalConfig,
    /// Read-only principle set, shared across runs.
    principles: Arc<[Principle]>,
}

impl ConstitutionalEngine {
    /// Create an engine. Fails on invalid configuration.
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        review_pipe: impl Into<String>,
        revise_pipe: impl Into<String>,
        config: ConstitutionalConfig,
    ) -> AppResult<Self> {
        config.validate()?;
        let principles: Arc<[Principle]> = config.principles.clone().into();
        Ok(Self {
            core: PatternCore::new(invoker, PatternKind::Constitutional),
            review_pipe: review_pipe.into(),
            revise_pipe: revise_pipe.into(),
            config,
            principles,
        })
    }

    /// Create an engine from application configuration.
    pub fn from_config(invoker: Arc<dyn ModelInvoker>, config: &Config) -> AppResult<Self> {
        Self::new(
            invoker,
            config.pipes.review.clone(),
            config.pipes.revise.clone(),
            config.constitutional.clone(),
        )
    }

    /// Attach an audit sink.
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.core = self.core.with_sink(sink);
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &ConstitutionalConfig {
        &self.config
    }

    /// The principle set.
    pub fn principles(&self) -> &[Principle] {
        &self.principles
    }

    /// Review a response once.
    pub async fn review(
        &self,
        response: &str,
        original_query: Option<&str>,
    ) -> InvokeResult<ReviewResult> {
        let run_id = Uuid::new_v4().to_string();
        self.review_step(&run_id, 0, response, original_query).await
    }

    /// Ask for one revision addressing `violations`.
    pub async fn revise(
        &self,
        response: &str,
        violations: &[Violation],
        original_query: Option<&str>,
    ) -> InvokeResult<String> {
        let run_id = Uuid::new_v4().to_string();
        self.revise_step(&run_id, 1, response, violations, original_query)
            .await
    }

    /// Review, then revise while required and allowed.
    pub async fn execute(&self, response: &str, original_query: Option<&str>) -> RevisionOutcome {
        self.execute_with_cancel(response, original_query, &CancellationToken::new())
            .await
    }

    /// Same as [`execute`](Self::execute), stopping before the next model
    /// call once `cancel` fires.
    pub async fn execute_with_cancel(
        &self,
        response: &str,
        original_query: Option<&str>,
        cancel: &CancellationToken,
    ) -> RevisionOutcome {
        let start = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let mut history = Vec::new();
        let mut revised: Option<String> = None;
        let mut revision_count = 0;

        let mut review = ReviewResult::unavailable();
        let terminal_state = 'run: {
            if cancel.is_cancelled() {
                break 'run TerminalState::Cancelled;
            }
            review = match self
                .review_step(&run_id, 0, response, original_query)
                .await
            {
                Ok(review) => review,
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "Review failed, keeping original response");
                    break 'run TerminalState::Failed;
                }
            };
            history.push(ReviewRecord {
                revision: 0,
                response: response.to_string(),
                review: review.clone(),
            });

            loop {
                if !review.requires_revision {
                    break 'run TerminalState::Compliant;
                }
                if !self.config.enable_revision || self.config.max_revisions == 0 {
                    break 'run TerminalState::NonCompliant;
                }
                if revision_count >= self.config.max_revisions {
                    break 'run TerminalState::Exhausted;
                }
                if cancel.is_cancelled() {
                    break 'run TerminalState::Cancelled;
                }

                let current = revised.as_deref().unwrap_or(response);
                let candidate = match self
                    .revise_step(
                        &run_id,
                        revision_count + 1,
                        current,
                        &review.violations,
                        original_query,
                    )
                    .await
                {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(
                            run_id = %run_id,
                            revision = revision_count + 1,
                            error = %e,
                            "Revision failed, keeping last reviewed response"
                        );
                        break 'run TerminalState::Failed;
                    }
                };
                revision_count += 1;
                revised = Some(candidate);

                // The new draft has no review until the next call succeeds.
                review = ReviewResult::unavailable();
                if cancel.is_cancelled() {
                    break 'run TerminalState::Cancelled;
                }

                let draft = revised.as_deref().unwrap_or(response);
                review = match self
                    .review_step(&run_id, revision_count, draft, original_query)
                    .await
                {
                    Ok(review) => review,
                    Err(e) => {
                        warn!(
                            run_id = %run_id,
                            revision = revision_count,
                            error = %e,
                            "Re-review failed, keeping unreviewed revision"
                        );
                        break 'run TerminalState::Failed;
                    }
                };
                history.push(ReviewRecord {
                    revision: revision_count,
                    response: draft.to_string(),
                    review: review.clone(),
                });
            }
        };

        let final_response = revised.clone().unwrap_or_else(|| response.to_string());
        let latency = start.elapsed().as_millis() as i64;

        self.core.emit(
            self.core
                .event(
                    &run_id,
                    "complete",
                    serde_json::json!({
                        "terminal_state": terminal_state,
                        "revision_count": revision_count,
                        "compliance_score": review.compliance_score,
                        "score_source": review.score_source,
                        "revised": revised.is_some(),
                    }),
                )
                .success(latency),
        );

        info!(
            run_id = %run_id,
            terminal_state = %terminal_state,
            revision_count = revision_count,
            compliance_score = review.compliance_score,
            latency_ms = latency,
            "Constitutional review completed"
        );

        RevisionOutcome {
            run_id,
            original_response: response.to_string(),
            revised_response: revised,
            final_response,
            review,
            revision_count,
            terminal_state,
            history,
        }
    }

    async fn review_step(
        &self,
        run_id: &str,
        revision: usize,
        response: &str,
        original_query: Option<&str>,
    ) -> InvokeResult<ReviewResult> {
        let start = Instant::now();
        let mut messages = vec![
            Message::system(CONSTITUTIONAL_REVIEW_PROMPT),
            Message::user(format!("Principles:\n{}", self.render_principles())),
        ];
        if let Some(query) = original_query {
            messages.push(Message::user(format!("Original question:\n{}", query)));
        }
        messages.push(Message::user(format!("Response to review:\n{}", response)));

        let request = InvokeRequest::new(
            messages,
            InvokeOptions::new(&self.review_pipe).with_temperature(self.config.temperature),
        );
        let event = self.core.event(
            run_id,
            "review",
            serde_json::json!({ "revision": revision }),
        );

        let completion = match self.core.invoker().invoke(request).await {
            Ok(text) => text,
            Err(e) => {
                self.core
                    .emit(event.failure(e.to_string(), start.elapsed().as_millis() as i64));
                return Err(e);
            }
        };

        let review = self.parse_review(&completion);
        debug!(
            run_id = %run_id,
            revision = revision,
            violations = review.violations.len(),
            compliance_score = review.compliance_score,
            "Reviewed response"
        );

        let mut event = event.success(start.elapsed().as_millis() as i64);
        if let Some(map) = event.attributes.as_object_mut() {
            map.insert(
                "review".to_string(),
                serialize_for_log(&review, "constitutional.review result"),
            );
        }
        self.core.emit(event);

        Ok(review)
    }

    async fn revise_step(
        &self,
        run_id: &str,
        revision: usize,
        response: &str,
        violations: &[Violation],
        original_query: Option<&str>,
    ) -> InvokeResult<String> {
        let start = Instant::now();
        let mut messages = vec![Message::system(CONSTITUTIONAL_REVISE_PROMPT)];
        if let Some(query) = original_query {
            messages.push(Message::user(format!("Original question:\n{}", query)));
        }
        messages.push(Message::user(format!(
            "Violations to resolve:\n{}",
            self.render_violations(violations)
        )));
        messages.push(Message::user(format!("Response to revise:\n{}", response)));

        let request = InvokeRequest::new(
            messages,
            InvokeOptions::new(&self.revise_pipe).with_temperature(self.config.temperature),
        );
        let event = self.core.event(
            run_id,
            "revise",
            serde_json::json!({ "revision": revision, "violations": violations.len() }),
        );

        let result = self
            .core
            .invoker()
            .invoke(request)
            .await
            .and_then(|completion| parse_revision(&completion));
        let latency = start.elapsed().as_millis() as i64;

        match result {
            Ok(text) => {
                debug!(
                    run_id = %run_id,
                    revision = revision,
                    revised_preview = %preview(&text),
                    "Revised response"
                );
                self.core.emit(event.success(latency));
                Ok(text)
            }
            Err(e) => {
                self.core.emit(event.failure(e.to_string(), latency));
                Err(e)
            }
        }
    }

    fn render_principles(&self) -> String {
        self.principles
            .iter()
            .map(|p| {
                format!(
                    "- [{}] ({}, weight {}): {}",
                    p.id, p.category, p.weight, p.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_violations(&self, violations: &[Violation]) -> String {
        if violations.is_empty() {
            return "- (none listed; raise overall compliance)".to_string();
        }
        violations
            .iter()
            .map(|v| format!("- [{}] {}: {}", v.principle_id, v.severity, v.explanation))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse a review completion. Unparseable output counts as no
    /// violations with a derived score.
    fn parse_review(&self, completion: &str) -> ReviewResult {
        let (violations, reported) = match extract_json_from_completion(completion).and_then(|s| {
            serde_json::from_str::<serde_json::Value>(s).map_err(|e| e.to_string())
        }) {
            Ok(value) => (
                self.parse_violations(&value),
                value
                    .get("compliance_score")
                    .or_else(|| value.get("score"))
                    .and_then(numeric),
            ),
            Err(e) => {
                warn!(
                    error = %e,
                    completion_preview = %preview(completion),
                    "Failed to parse review response, assuming no violations"
                );
                (Vec::new(), None)
            }
        };

        let (compliance_score, score_source) = match reported.and_then(unit_interval) {
            Some(score) => (score, ScoreSource::ModelReported),
            None => (
                derived_compliance_score(&violations, &self.principles),
                ScoreSource::Derived,
            ),
        };

        ReviewResult {
            requires_revision: compliance_score < self.config.min_compliance_score,
            violations,
            compliance_score,
            score_source,
        }
    }

    fn parse_violations(&self, value: &serde_json::Value) -> Vec<Violation> {
        let Some(items) = value.get("violations").and_then(|v| v.as_array()) else {
            return Vec::new();
        };

        items
            .iter()
            .filter_map(|item| {
                let principle_id = item
                    .get("principle_id")
                    .or_else(|| item.get("principle"))
                    .and_then(|v| v.as_str())?
                    .trim();
                if !self.principles.iter().any(|p| p.id == principle_id) {
                    warn!(
                        principle_id = %principle_id,
                        "Dropping violation of unknown principle"
                    );
                    return None;
                }
                let severity = match item
                    .get("severity")
                    .and_then(|v| v.as_str())
                    .map(str::parse::<Severity>)
                {
                    Some(Ok(severity)) => severity,
                    other => {
                        debug!(severity = ?other, "Skipping violation with unusable severity");
                        return None;
                    }
                };
                let explanation = item
                    .get("explanation")
                    .or_else(|| item.get("description"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .trim()
                    .to_string();
                Some(Violation {
                    principle_id: principle_id.to_string(),
                    severity,
                    explanation,
                })
            })
            .collect()
    }
}

/// A score given as a JSON number or a numeric string.
fn numeric(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Extract revised text. JSON output must carry a non-empty
/// `revised_response`; plain text is taken as the revision itself.
fn parse_revision(completion: &str) -> InvokeResult<String> {
    let empty = || InvokeError::InvalidResponse {
        message: "revision was empty".to_string(),
    };

    match extract_json_from_completion(completion) {
        Ok(json_str) => {
            let value: serde_json::Value =
                serde_json::from_str(json_str).map_err(|e| InvokeError::InvalidResponse {
                    message: format!("Failed to parse revision: {}", e),
                })?;
            let text = value
                .get("revised_response")
                .or_else(|| value.get("revision"))
                .and_then(|v| v.as_str())
                .map(str::trim)
                .unwrap_or("");
            if text.is_empty() {
                Err(empty())
            } else {
                Ok(text.to_string())
            }
        }
        Err(_) => {
            let text = completion.trim();
            if text.is_empty() {
                Err(empty())
            } else {
                Ok(text.to_string())
            }
        }
    }
}
