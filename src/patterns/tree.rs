//! Tree-of-Thoughts search - branching exploration with scoring and pruning.
//!
//! The engine grows a bounded tree of reasoning steps level by level:
//! - Every non-pruned node above `max_depth` is expanded into up to
//!   `max_branches` candidate thoughts by one model call
//! - Each candidate is scored; nodes under `prune_threshold` stay in the tree
//!   for audit but are not expanded
//! - All root-to-leaf paths are ranked and the best one is returned
//!
//! Nodes live in an arena ([`ThoughtTree`]) and refer to each other by
//! [`NodeId`], so the tree is the sole owner of every node.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    preview, serialize_for_log, unit_interval, CancellationToken, JsonThoughtParser, PatternCore,
    PatternKind, ThoughtCandidate, ThoughtParser,
};
use crate::audit::AuditSink;
use crate::config::Config;
use crate::error::{AppError, AppResult, EngineError, InvokeResult};
use crate::invoker::{InvokeOptions, InvokeRequest, Message, ModelInvoker};
use crate::prompts::TOT_EXPAND_PROMPT;

#[cfg(test)]
#[path = "tree_tests.rs"]
mod tree_tests;

/// Bonus added to a thought's confidence when it fully matches every
/// evaluation criterion.
pub const CRITERIA_MATCH_BONUS: f64 = 0.1;

/// Default number of trees `initialize` keeps waiting for `execute`.
pub const DEFAULT_SEED_CAPACITY: usize = 64;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for Tree-of-Thoughts search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotConfig {
    /// Maximum ply below the root
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Maximum children requested per expansion
    #[serde(default = "default_max_branches")]
    pub max_branches: usize,
    /// Nodes scoring strictly below this are pruned
    #[serde(default = "default_prune_threshold")]
    pub prune_threshold: f64,
    /// Named criteria that bias scoring (e.g. "Accuracy")
    #[serde(default)]
    pub evaluation_criteria: Vec<String>,
    /// Sibling expansions allowed in flight at once
    #[serde(default = "default_max_concurrent_expansions")]
    pub max_concurrent_expansions: usize,
    /// Sampling temperature for expansion calls
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_max_depth() -> usize {
    3
}

fn default_max_branches() -> usize {
    3
}

fn default_prune_threshold() -> f64 {
    0.3
}

fn default_max_concurrent_expansions() -> usize {
    4
}

fn default_temperature() -> f64 {
    0.7
}

impl Default for TotConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_branches: default_max_branches(),
            prune_threshold: default_prune_threshold(),
            evaluation_criteria: Vec::new(),
            max_concurrent_expansions: default_max_concurrent_expansions(),
            temperature: default_temperature(),
        }
    }
}

impl TotConfig {
    /// Check bounds. Called at engine construction.
    pub fn validate(&self) -> AppResult<()> {
        let problem = if self.max_depth == 0 {
            Some("max_depth must be at least 1".to_string())
        } else if self.max_branches == 0 {
            Some("max_branches must be at least 1".to_string())
        } else if !(0.0..=1.0).contains(&self.prune_threshold) {
            Some(format!(
                "prune_threshold must be within [0, 1] (got {})",
                self.prune_threshold
            ))
        } else if self.max_concurrent_expansions == 0 {
            Some("max_concurrent_expansions must be at least 1".to_string())
        } else if !(0.0..=2.0).contains(&self.temperature) {
            Some(format!(
                "temperature must be within [0, 2] (got {})",
                self.temperature
            ))
        } else if self
            .evaluation_criteria
            .iter()
            .any(|c| c.trim().is_empty())
        {
            Some("evaluation_criteria must not contain blank names".to_string())
        } else {
            None
        };

        match problem {
            Some(message) => Err(AppError::Config {
                message: format!("Invalid ToT configuration: {}", message),
            }),
            None => Ok(()),
        }
    }

    /// Set the maximum depth
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the maximum branches per expansion
    pub fn with_max_branches(mut self, max_branches: usize) -> Self {
        self.max_branches = max_branches;
        self
    }

    /// Set the prune threshold
    pub fn with_prune_threshold(mut self, threshold: f64) -> Self {
        self.prune_threshold = threshold;
        self
    }

    /// Set the evaluation criteria
    pub fn with_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.evaluation_criteria = criteria.into_iter().map(Into::into).collect();
        self
    }

    /// Set the sibling expansion concurrency
    pub fn with_max_concurrent_expansions(mut self, limit: usize) -> Self {
        self.max_concurrent_expansions = limit;
        self
    }
}

// ============================================================================
// Tree Data Structure
// ============================================================================

/// Index of a node in its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// One reasoning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtNode {
    /// Arena index; also the creation order.
    pub id: NodeId,
    /// Thought text (the query, for the root).
    pub content: String,
    /// Justification attached to the thought.
    pub reasoning: String,
    /// Model-reported confidence (0.0-1.0).
    pub confidence: f64,
    /// Ply below the root.
    pub depth: usize,
    /// Parent node, `None` for the root.
    pub parent_id: Option<NodeId>,
    /// Evaluator-assigned composite score (0.0-1.0).
    pub score: f64,
    /// Whether the node fell under the prune threshold.
    pub pruned: bool,
    /// Children in creation order.
    pub children: Vec<NodeId>,
}

impl ThoughtNode {
    /// Whether the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Arena owning every node of one search run.
///
/// Deserialization checks the arena links, so a decoded tree always has a
/// root and every id resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawThoughtTree")]
pub struct ThoughtTree {
    run_id: String,
    context_id: String,
    query: String,
    nodes: Vec<ThoughtNode>,
}

#[derive(Deserialize)]
struct RawThoughtTree {
    run_id: String,
    context_id: String,
    query: String,
    nodes: Vec<ThoughtNode>,
}

impl TryFrom<RawThoughtTree> for ThoughtTree {
    type Error = String;

    fn try_from(raw: RawThoughtTree) -> Result<Self, Self::Error> {
        let root = raw.nodes.first().ok_or("thought tree has no root")?;
        if root.depth != 0 || root.parent_id.is_some() {
            return Err("thought tree root must have depth 0 and no parent".to_string());
        }

        let len = raw.nodes.len();
        for (index, node) in raw.nodes.iter().enumerate() {
            if node.id.0 != index {
                return Err(format!("node {} stored at index {}", node.id, index));
            }
            if let Some(parent) = node.parent_id {
                if parent.0 >= index {
                    return Err(format!("node {} has invalid parent {}", node.id, parent));
                }
            } else if index != 0 {
                return Err(format!("node {} has no parent", node.id));
            }
            for child in &node.children {
                let linked = child.0 < len && raw.nodes[child.0].parent_id == Some(node.id);
                if !linked {
                    return Err(format!("node {} lists unlinked child {}", node.id, child));
                }
            }
        }

        Ok(Self {
            run_id: raw.run_id,
            context_id: raw.context_id,
            query: raw.query,
            nodes: raw.nodes,
        })
    }
}

impl ThoughtTree {
    /// Seed a tree whose root holds the query.
    pub fn new(query: impl Into<String>, context_id: impl Into<String>) -> Self {
        let query = query.into();
        let root = ThoughtNode {
            id: NodeId(0),
            content: query.clone(),
            reasoning: String::new(),
            confidence: 1.0,
            depth: 0,
            parent_id: None,
            score: 1.0,
            pruned: false,
            children: Vec::new(),
        };

        Self {
            run_id: Uuid::new_v4().to_string(),
            context_id: context_id.into(),
            query,
            nodes: vec![root],
        }
    }

    /// Run identifier.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Caller-supplied context identifier.
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// The query the tree was seeded with.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The root node.
    pub fn root(&self) -> &ThoughtNode {
        &self.nodes[0]
    }

    /// Look up a node.
    pub fn get(&self, id: NodeId) -> Option<&ThoughtNode> {
        self.nodes.get(id.0)
    }

    /// All nodes in creation order.
    pub fn nodes(&self) -> &[ThoughtNode] {
        &self.nodes
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a tree has at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Children of a node, in creation order.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &ThoughtNode> + '_ {
        self.get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
            .iter()
            .filter_map(move |c| self.get(*c))
    }

    /// Nodes from the root down to `id`, root first.
    pub fn lineage(&self, id: NodeId) -> Vec<&ThoughtNode> {
        let mut chain = Vec::new();
        let mut current = self.get(id);
        while let Some(node) = current {
            chain.push(node);
            current = node.parent_id.and_then(|p| self.get(p));
        }
        chain.reverse();
        chain
    }

    /// Count of pruned nodes.
    pub fn pruned_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.pruned).count()
    }

    /// Deepest ply reached.
    pub fn max_depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Append a scored child under `parent`.
    pub(crate) fn add_child(
        &mut self,
        parent: NodeId,
        candidate: ThoughtCandidate,
        score: f64,
        prune_threshold: f64,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        let depth = self.nodes[parent.0].depth + 1;
        self.nodes.push(ThoughtNode {
            id,
            content: candidate.content,
            reasoning: candidate.reasoning,
            confidence: candidate.confidence,
            depth,
            parent_id: Some(parent),
            score,
            pruned: score < prune_threshold,
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Every root-to-leaf path, depth first in creation order.
    pub fn paths(&self) -> Vec<ThoughtPath> {
        let mut paths = Vec::new();
        let mut stack = vec![self.root().id];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];
            if node.is_leaf() {
                paths.push(ThoughtPath::from_nodes(
                    self.lineage(id).into_iter().cloned().collect(),
                ));
            } else {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        paths
    }
}

/// An ordered root-to-leaf sequence of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtPath {
    /// Nodes, root first.
    pub nodes: Vec<ThoughtNode>,
    /// Depth-weighted mean of node scores.
    pub total_score: f64,
    /// Depth-weighted mean of node confidences.
    pub confidence: f64,
}

impl ThoughtPath {
    /// Build a path and compute its aggregates.
    ///
    /// Each non-root node is weighted by its depth, so deeper thoughts
    /// dominate. The root holds the query and is shared by every path, so it
    /// only counts when the path has nothing else.
    pub fn from_nodes(nodes: Vec<ThoughtNode>) -> Self {
        let total_score = weighted_mean(&nodes, |n| n.score);
        let confidence = weighted_mean(&nodes, |n| n.confidence);
        Self {
            nodes,
            total_score,
            confidence,
        }
    }

    /// The last node.
    pub fn leaf(&self) -> Option<&ThoughtNode> {
        self.nodes.last()
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the path has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids along the path.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id).collect()
    }
}

fn weighted_mean(nodes: &[ThoughtNode], value: impl Fn(&ThoughtNode) -> f64) -> f64 {
    let (sum, weight) = nodes
        .iter()
        .filter(|n| n.depth > 0)
        .fold((0.0, 0.0), |(sum, weight), n| {
            let w = n.depth as f64;
            (sum + w * value(n), weight + w)
        });

    if weight > 0.0 {
        sum / weight
    } else {
        nodes.first().map(&value).unwrap_or(0.0)
    }
}

/// Pick the best path: highest score, then highest confidence, then the
/// earliest-created leaf.
pub fn select_best_path(paths: &[ThoughtPath]) -> Option<&ThoughtPath> {
    paths.iter().max_by(|a, b| {
        a.total_score
            .total_cmp(&b.total_score)
            .then(a.confidence.total_cmp(&b.confidence))
            .then_with(|| {
                let a_leaf = a.leaf().map(|n| n.id);
                let b_leaf = b.leaf().map(|n| n.id);
                b_leaf.cmp(&a_leaf)
            })
    })
}

/// Score a candidate.
///
/// Without criteria the score is the confidence. With criteria, each
/// criterion contributes its model-reported evaluation, or 1.0 when the
/// thought names it and 0.0 otherwise; the mean match earns up to
/// [`CRITERIA_MATCH_BONUS`] on top of the confidence.
pub fn score_candidate(candidate: &ThoughtCandidate, criteria: &[String]) -> f64 {
    let confidence = unit_interval(candidate.confidence).unwrap_or(0.0);
    if criteria.is_empty() {
        return confidence;
    }

    let text = format!("{} {}", candidate.content, candidate.reasoning).to_lowercase();
    let matched: f64 = criteria
        .iter()
        .map(|criterion| {
            let key = criterion.to_lowercase();
            candidate
                .evaluations
                .iter()
                .find(|(name, _)| name.to_lowercase() == key)
                .and_then(|(_, score)| unit_interval(*score))
                .unwrap_or_else(|| if text.contains(&key) { 1.0 } else { 0.0 })
        })
        .sum();
    let ratio = matched / criteria.len() as f64;

    (confidence + CRITERIA_MATCH_BONUS * ratio).clamp(0.0, 1.0)
}

// ============================================================================
// Search Result
// ============================================================================

/// Output of one search run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Run identifier.
    pub run_id: String,
    /// The root node.
    pub root: ThoughtNode,
    /// The chosen answer path.
    pub best_path: ThoughtPath,
    /// Every complete root-to-leaf path.
    pub all_paths: Vec<ThoughtPath>,
    /// Number of pruned nodes.
    pub pruned_count: usize,
    /// The full tree, for audit.
    pub tree: ThoughtTree,
    /// Whether the run stopped early on cancellation.
    pub cancelled: bool,
}

// ============================================================================
// Engine
// ============================================================================

/// Tree-of-Thoughts search engine.
pub struct TotEngine {
    /// Core infrastructure (invoker and audit sink).
    core: PatternCore,
    /// Pipe (model) that expands thoughts.
    pipe_name: String,
    config: TotConfig,
    parser: Arc<dyn ThoughtParser>,
    /// Trees seeded by `initialize`, oldest first, one per context id.
    seeded: Mutex<VecDeque<ThoughtTree>>,
    seed_capacity: usize,
}

impl TotEngine {
    /// Create an engine. Fails on invalid configuration.
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        pipe_name: impl Into<String>,
        config: TotConfig,
    ) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            core: PatternCore::new(invoker, PatternKind::Tot),
            pipe_name: pipe_name.into(),
            config,
            parser: Arc::new(JsonThoughtParser),
            seeded: Mutex::new(VecDeque::new()),
            seed_capacity: DEFAULT_SEED_CAPACITY,
        })
    }

    /// Create an engine from application configuration.
    pub fn from_config(invoker: Arc<dyn ModelInvoker>, config: &Config) -> AppResult<Self> {
        Self::new(invoker, config.pipes.tot.clone(), config.tot.clone())
    }

    /// Attach an audit sink.
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.core = self.core.with_sink(sink);
        self
    }

    /// Replace the thought parser.
    pub fn with_parser(mut self, parser: Arc<dyn ThoughtParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Bound the number of seeded trees awaiting `execute`. The oldest is
    /// evicted first. Clamped to at least 1.
    pub fn with_seed_capacity(mut self, capacity: usize) -> Self {
        self.seed_capacity = capacity.max(1);
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &TotConfig {
        &self.config
    }

    /// Number of seeded trees not yet consumed by `execute`.
    pub fn seeded_count(&self) -> usize {
        self.seeded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop the tree seeded for `context_id`, if any.
    pub fn discard(&self, context_id: &str) -> bool {
        let discarded = self.remove_seeded(context_id).is_some();
        if discarded {
            debug!(context_id = %context_id, "Discarded seeded thought tree");
        }
        discarded
    }

    /// Seed a new tree for `context_id` whose root is the query.
    pub fn initialize(&self, query: &str, context_id: &str) {
        let tree = ThoughtTree::new(query, context_id);
        debug!(
            run_id = %tree.run_id(),
            context_id = %context_id,
            "Seeded thought tree"
        );
        self.core.emit(self.core.event(
            tree.run_id(),
            "initialize",
            serde_json::json!({ "context_id": context_id, "query": query }),
        ));

        if self.remove_seeded(context_id).is_some() {
            debug!(context_id = %context_id, "Replaced previously seeded tree");
        }

        let mut seeded = self.seeded.lock().unwrap_or_else(PoisonError::into_inner);
        seeded.push_back(tree);
        while seeded.len() > self.seed_capacity {
            if let Some(evicted) = seeded.pop_front() {
                warn!(
                    run_id = %evicted.run_id(),
                    context_id = %evicted.context_id(),
                    capacity = self.seed_capacity,
                    "Evicted seeded tree that was never executed"
                );
            }
        }
    }

    /// Run the search.
    pub async fn execute(&self, query: &str, context_id: &str) -> AppResult<SearchResult> {
        self.execute_with_cancel(query, context_id, &CancellationToken::new())
            .await
    }

    /// Run the search, stopping between model calls once `cancel` fires.
    ///
    /// A cancelled run returns the best path among the nodes created so far.
    pub async fn execute_with_cancel(
        &self,
        query: &str,
        context_id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<SearchResult> {
        let start = Instant::now();
        let mut tree = self.take_seeded(query, context_id);
        let mut cancelled = cancel.is_cancelled();

        if !cancelled {
            let root_id = tree.root().id;
            let candidates = self.expand(&tree, root_id).await.map_err(|e| {
                EngineError::RootExpansionFailed {
                    reason: e.to_string(),
                }
            })?;
            if candidates.is_empty() {
                return Err(EngineError::RootExpansionFailed {
                    reason: "no parseable candidates".to_string(),
                }
                .into());
            }

            let mut frontier = self.attach(&mut tree, root_id, candidates);

            while !frontier.is_empty() {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }

                let tree_ref = &tree;
                let outcomes: Vec<(NodeId, Option<Vec<ThoughtCandidate>>)> =
                    stream::iter(frontier)
                        .map(move |id| async move {
                            if cancel.is_cancelled() {
                                return (id, None);
                            }
                            match self.expand(tree_ref, id).await {
                                Ok(candidates) => (id, Some(candidates)),
                                Err(e) => {
                                    warn!(
                                        run_id = %tree_ref.run_id(),
                                        node = %id,
                                        error = %e,
                                        "Expansion failed, treating node as leaf"
                                    );
                                    (id, Some(Vec::new()))
                                }
                            }
                        })
                        .buffered(self.config.max_concurrent_expansions)
                        .collect()
                        .await;

                // Merge on this task only, in frontier order.
                let mut next = Vec::new();
                for (id, result) in outcomes {
                    match result {
                        Some(candidates) => next.extend(self.attach(&mut tree, id, candidates)),
                        None => cancelled = true,
                    }
                }
                frontier = next;
            }
        }

        let all_paths = tree.paths();
        let best_path = select_best_path(&all_paths)
            .cloned()
            .unwrap_or_else(|| ThoughtPath::from_nodes(vec![tree.root().clone()]));
        let pruned_count = tree.pruned_count();
        let latency = start.elapsed().as_millis() as i64;

        self.core.emit(
            self.core
                .event(
                    tree.run_id(),
                    "complete",
                    serde_json::json!({
                        "context_id": tree.context_id(),
                        "nodes": tree.len(),
                        "paths": all_paths.len(),
                        "pruned_count": pruned_count,
                        "best_path": best_path.node_ids(),
                        "best_score": best_path.total_score,
                        "cancelled": cancelled,
                    }),
                )
                .success(latency),
        );

        info!(
            run_id = %tree.run_id(),
            context_id = %tree.context_id(),
            nodes = tree.len(),
            paths = all_paths.len(),
            pruned = pruned_count,
            best_score = best_path.total_score,
            cancelled = cancelled,
            latency_ms = latency,
            "Tree-of-Thoughts search completed"
        );

        Ok(SearchResult {
            run_id: tree.run_id().to_string(),
            root: tree.root().clone(),
            best_path,
            all_paths,
            pruned_count,
            tree,
            cancelled,
        })
    }

    fn remove_seeded(&self, context_id: &str) -> Option<ThoughtTree> {
        let mut seeded = self.seeded.lock().unwrap_or_else(PoisonError::into_inner);
        let index = seeded.iter().position(|t| t.context_id() == context_id)?;
        seeded.remove(index)
    }

    fn take_seeded(&self, query: &str, context_id: &str) -> ThoughtTree {
        match self.remove_seeded(context_id) {
            Some(tree) if tree.query() == query => tree,
            Some(_) => {
                warn!(
                    context_id = %context_id,
                    "Seeded tree was for a different query, reseeding"
                );
                ThoughtTree::new(query, context_id)
            }
            None => {
                debug!(
                    context_id = %context_id,
                    "execute called without initialize, seeding tree"
                );
                ThoughtTree::new(query, context_id)
            }
        }
    }

    /// Score and attach candidates under `parent`; returns the children
    /// that are eligible for expansion.
    fn attach(
        &self,
        tree: &mut ThoughtTree,
        parent: NodeId,
        candidates: Vec<ThoughtCandidate>,
    ) -> Vec<NodeId> {
        let added: Vec<NodeId> = candidates
            .into_iter()
            .take(self.config.max_branches)
            .map(|mut candidate| {
                // Parsers are pluggable; keep stored numbers inside [0, 1].
                candidate.confidence = unit_interval(candidate.confidence).unwrap_or(0.0);
                candidate.evaluations.retain(|_, score| score.is_finite());
                let score = score_candidate(&candidate, &self.config.evaluation_criteria);
                tree.add_child(parent, candidate, score, self.config.prune_threshold)
            })
            .collect();

        added
            .into_iter()
            .filter(|id| {
                tree.get(*id)
                    .map(|n| !n.pruned && n.depth < self.config.max_depth)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// One model call proposing children for `node_id`.
    async fn expand(
        &self,
        tree: &ThoughtTree,
        node_id: NodeId,
    ) -> InvokeResult<Vec<ThoughtCandidate>> {
        let start = Instant::now();
        let depth = tree.get(node_id).map(|n| n.depth).unwrap_or(0);
        let request = InvokeRequest::new(
            self.build_messages(tree, node_id),
            InvokeOptions::new(&self.pipe_name).with_temperature(self.config.temperature),
        );
        let event = self.core.event(
            tree.run_id(),
            "expand",
            serde_json::json!({ "node": node_id, "depth": depth }),
        );

        let completion = match self.core.invoker().invoke(request).await {
            Ok(text) => text,
            Err(e) => {
                self.core
                    .emit(event.failure(e.to_string(), start.elapsed().as_millis() as i64));
                return Err(e);
            }
        };

        let candidates = self.parser.parse(&completion);
        debug!(
            run_id = %tree.run_id(),
            node = %node_id,
            depth = depth,
            candidates = candidates.len(),
            completion_preview = %preview(&completion),
            "Expanded thought"
        );

        let mut event = event.success(start.elapsed().as_millis() as i64);
        if let Some(map) = event.attributes.as_object_mut() {
            map.insert(
                "candidates".to_string(),
                serialize_for_log(&candidates, "tot.expand candidates"),
            );
        }
        self.core.emit(event);

        Ok(candidates)
    }

    fn build_messages(&self, tree: &ThoughtTree, node_id: NodeId) -> Vec<Message> {
        let mut messages = Vec::new();

        let mut system_prompt =
            TOT_EXPAND_PROMPT.replace("{max_branches}", &self.config.max_branches.to_string());
        if !self.config.evaluation_criteria.is_empty() {
            system_prompt.push_str(&format!(
                "\n\nEvaluation criteria: {}. Score each criterion under \"evaluations\".",
                self.config.evaluation_criteria.join(", ")
            ));
        }
        messages.push(Message::system(system_prompt));

        messages.push(Message::user(format!(
            "Consultation question:\n{}",
            tree.query()
        )));

        // Lineage without the root (the query) and without the node itself.
        let lineage = tree.lineage(node_id);
        if lineage.len() > 2 {
            let steps: Vec<String> = lineage[1..lineage.len() - 1]
                .iter()
                .enumerate()
                .map(|(i, n)| format!("{}. {}", i + 1, n.content))
                .collect();
            messages.push(Message::user(format!(
                "Reasoning so far:\n{}",
                steps.join("\n")
            )));
        }

        let current = tree.get(node_id).map(|n| n.content.as_str()).unwrap_or("");
        messages.push(Message::user(format!(
            "Current thought to expand:\n{}",
            current
        )));

        messages
    }
}
