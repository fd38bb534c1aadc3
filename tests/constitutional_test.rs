//! Integration tests for constitutional review and revision.
//!
//! A scripted invoker replays review and revision replies per pipe, in
//! order, and counts the calls made to each.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use consult_patterns::error::{InvokeError, InvokeResult};
use consult_patterns::invoker::{InvokeRequest, ModelInvoker};
use consult_patterns::patterns::{
    default_principles, ConstitutionalConfig, ConstitutionalEngine, Principle,
    PrincipleCategory, ScoreSource, TerminalState,
};
use serde_json::json;

const REVIEW: &str = "review";
const REVISE: &str = "revise";

// ── Scripted Invoker ─────────────────────────────────────────────────────

enum Reply {
    Text(String),
    Outage,
}

/// Replays replies per pipe; an exhausted script repeats its last reply.
struct ScriptedInvoker {
    reviews: Mutex<VecDeque<Reply>>,
    revisions: Mutex<VecDeque<Reply>>,
    review_calls: Mutex<usize>,
    revise_calls: Mutex<usize>,
}

impl ScriptedInvoker {
    fn new(reviews: Vec<Reply>, revisions: Vec<Reply>) -> Self {
        Self {
            reviews: Mutex::new(reviews.into()),
            revisions: Mutex::new(revisions.into()),
            review_calls: Mutex::new(0),
            revise_calls: Mutex::new(0),
        }
    }

    fn review_calls(&self) -> usize {
        *self.review_calls.lock().unwrap()
    }

    fn revise_calls(&self) -> usize {
        *self.revise_calls.lock().unwrap()
    }
}

fn next_reply(queue: &Mutex<VecDeque<Reply>>) -> InvokeResult<String> {
    let mut queue = queue.lock().unwrap();
    let reply = if queue.len() > 1 {
        queue.pop_front()
    } else {
        None
    };
    let reply = reply.as_ref().or_else(|| queue.front());
    match reply {
        Some(Reply::Text(text)) => Ok(text.clone()),
        Some(Reply::Outage) | None => Err(InvokeError::Timeout { timeout_ms: 1 }),
    }
}

#[async_trait::async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(&self, request: InvokeRequest) -> InvokeResult<String> {
        if request.options.model == REVIEW {
            *self.review_calls.lock().unwrap() += 1;
            next_reply(&self.reviews)
        } else {
            *self.revise_calls.lock().unwrap() += 1;
            next_reply(&self.revisions)
        }
    }
}

fn review(violations: &[(&str, &str)], score: Option<f64>) -> Reply {
    let items: Vec<serde_json::Value> = violations
        .iter()
        .map(|(id, severity)| json!({"principle_id": id, "severity": severity, "explanation": "x"}))
        .collect();
    let body = match score {
        Some(score) => json!({"violations": items, "compliance_score": score}),
        None => json!({ "violations": items }),
    };
    Reply::Text(body.to_string())
}

fn revision(text: &str) -> Reply {
    Reply::Text(json!({ "revised_response": text }).to_string())
}

fn two_principles() -> Vec<Principle> {
    vec![
        Principle::new("harm", "Do no harm", PrincipleCategory::Safety, 1.0),
        Principle::new("scope", "Stay in scope", PrincipleCategory::Boundaries, 1.0),
    ]
}

fn engine(
    invoker: Arc<ScriptedInvoker>,
    config: ConstitutionalConfig,
) -> ConstitutionalEngine {
    ConstitutionalEngine::new(invoker, REVIEW, REVISE, config).unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_derived_score_scenario() {
    let invoker = Arc::new(ScriptedInvoker::new(
        vec![review(&[("harm", "high")], None)],
        vec![],
    ));
    let config = ConstitutionalConfig::default()
        .with_principles(two_principles())
        .with_revision(false);
    let outcome = engine(invoker, config)
        .execute("Take double the dose.", Some("Headache?"))
        .await;

    assert!((outcome.review.compliance_score - 0.55).abs() < 1e-9);
    assert_eq!(outcome.review.score_source, ScoreSource::Derived);
    assert!(outcome.review.requires_revision);
    assert_eq!(outcome.terminal_state, TerminalState::NonCompliant);
}

#[tokio::test]
async fn test_revision_count_never_exceeds_cap() {
    for max_revisions in 0..4 {
        let invoker = Arc::new(ScriptedInvoker::new(
            vec![review(&[("harm", "high")], Some(0.2))],
            vec![revision("still risky")],
        ));
        let config = ConstitutionalConfig::default()
            .with_principles(two_principles())
            .with_max_revisions(max_revisions);
        let outcome = engine(invoker.clone(), config).execute("risky", None).await;

        assert_eq!(outcome.revision_count, max_revisions);
        assert_eq!(invoker.revise_calls(), max_revisions);
        assert_eq!(invoker.review_calls(), max_revisions + 1);
        assert!(outcome.review.requires_revision);
        if max_revisions > 0 {
            assert_eq!(outcome.terminal_state, TerminalState::Exhausted);
            assert_eq!(outcome.final_response, "still risky");
        } else {
            assert_eq!(outcome.terminal_state, TerminalState::NonCompliant);
            assert_eq!(outcome.final_response, "risky");
        }
    }
}

#[tokio::test]
async fn test_review_only_mode() {
    let invoker = Arc::new(ScriptedInvoker::new(
        vec![review(&[("harm", "high"), ("scope", "medium")], None)],
        vec![revision("unused")],
    ));
    let config = ConstitutionalConfig::default()
        .with_principles(two_principles())
        .with_revision(false);
    let outcome = engine(invoker.clone(), config).execute("risky", None).await;

    assert_eq!(outcome.revision_count, 0);
    assert_eq!(outcome.revised_response, None);
    assert_eq!(outcome.final_response, "risky");
    assert_eq!(invoker.revise_calls(), 0);
}

#[tokio::test]
async fn test_fallback_never_loses_the_answer() {
    let cases: Vec<(Vec<Reply>, Vec<Reply>, &str)> = vec![
        (vec![Reply::Outage], vec![], "original"),
        (
            vec![review(&[("harm", "high")], None)],
            vec![Reply::Outage],
            "original",
        ),
        (
            vec![review(&[("harm", "high")], None), Reply::Outage],
            vec![revision("first fix")],
            "first fix",
        ),
        (
            vec![
                review(&[("harm", "high")], None),
                review(&[("scope", "high")], None),
            ],
            vec![revision("first fix"), Reply::Outage],
            "first fix",
        ),
    ];

    for (reviews, revisions, expected) in cases {
        let invoker = Arc::new(ScriptedInvoker::new(reviews, revisions));
        let config = ConstitutionalConfig::default().with_principles(two_principles());
        let outcome = engine(invoker, config).execute("original", None).await;

        assert_eq!(outcome.terminal_state, TerminalState::Failed);
        assert_eq!(outcome.final_response, expected);
        assert!(!outcome.final_response.is_empty());
    }
}

#[tokio::test]
async fn test_history_records_each_reviewed_version() {
    let invoker = Arc::new(ScriptedInvoker::new(
        vec![
            review(&[("harm", "high")], Some(0.3)),
            review(&[("scope", "low")], Some(0.7)),
            review(&[], Some(0.95)),
        ],
        vec![revision("v1"), revision("v2")],
    ));
    let config = ConstitutionalConfig::default().with_principles(two_principles());
    let outcome = engine(invoker, config).execute("v0", None).await;

    assert_eq!(outcome.terminal_state, TerminalState::Compliant);
    assert_eq!(outcome.revision_count, 2);
    let versions: Vec<(usize, &str)> = outcome
        .history
        .iter()
        .map(|r| (r.revision, r.response.as_str()))
        .collect();
    assert_eq!(versions, vec![(0, "v0"), (1, "v1"), (2, "v2")]);
    assert_eq!(outcome.final_response, "v2");
}

#[tokio::test]
async fn test_engine_is_shared_across_concurrent_runs() {
    let invoker = Arc::new(ScriptedInvoker::new(
        vec![review(&[], Some(0.9))],
        vec![],
    ));
    let engine = Arc::new(engine(invoker, ConstitutionalConfig::default()));

    let (a, b) = tokio::join!(
        engine.execute("answer a", None),
        engine.execute("answer b", None)
    );

    assert_ne!(a.run_id, b.run_id);
    assert_eq!(a.final_response, "answer a");
    assert_eq!(b.final_response, "answer b");
    assert_eq!(engine.principles(), default_principles().as_slice());
}
