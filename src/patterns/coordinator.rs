//! Pattern composition: Tree-of-Thoughts search feeding constitutional review.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

use super::{
    CancellationToken, ConstitutionalEngine, RevisionOutcome, SearchResult, ThoughtPath,
    TotEngine,
};
use crate::audit::{AuditEvent, AuditSink};
use crate::error::AppResult;

/// Output of [`run_pipeline`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    /// The search that produced the candidate.
    pub search: SearchResult,
    /// Answer composed from the best path.
    pub candidate: String,
    /// Review (and revision) of the candidate.
    pub outcome: RevisionOutcome,
}

/// Join the best path's thoughts into one candidate answer.
///
/// The root holds the query, so it is skipped unless it is the only node.
pub fn compose_answer(path: &ThoughtPath) -> String {
    let steps: Vec<&str> = path
        .nodes
        .iter()
        .filter(|n| n.depth > 0)
        .map(|n| n.content.trim())
        .filter(|c| !c.is_empty())
        .collect();

    if steps.is_empty() {
        return path
            .nodes
            .first()
            .map(|n| n.content.clone())
            .unwrap_or_default();
    }
    steps.join("\n\n")
}

/// Search for an answer, then review it.
///
/// Fails only when the search fails. Once `cancel` fires, the review stops
/// before its next model call and keeps the latest candidate.
pub async fn run_pipeline(
    tot: &TotEngine,
    constitutional: &ConstitutionalEngine,
    query: &str,
    context_id: &str,
    cancel: &CancellationToken,
    sink: Option<&dyn AuditSink>,
) -> AppResult<PipelineOutcome> {
    let start = Instant::now();

    tot.initialize(query, context_id);
    let search = tot.execute_with_cancel(query, context_id, cancel).await?;
    let candidate = compose_answer(&search.best_path);
    let outcome = constitutional
        .execute_with_cancel(&candidate, Some(query), cancel)
        .await;

    let latency = start.elapsed().as_millis() as i64;
    if let Some(sink) = sink {
        sink.record(
            &AuditEvent::new(
                search.run_id.clone(),
                "pipeline.complete",
                serde_json::json!({
                    "context_id": context_id,
                    "review_run_id": outcome.run_id,
                    "best_score": search.best_path.total_score,
                    "terminal_state": outcome.terminal_state,
                    "revision_count": outcome.revision_count,
                }),
            )
            .success(latency),
        );
    }

    info!(
        run_id = %search.run_id,
        context_id = %context_id,
        terminal_state = %outcome.terminal_state,
        revision_count = outcome.revision_count,
        latency_ms = latency,
        "Pipeline completed"
    );

    Ok(PipelineOutcome {
        search,
        candidate,
        outcome,
    })
}
