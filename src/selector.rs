//! Model selection - ranks catalog candidates for one task.
//!
//! # Overview
//!
//! The selector filters the catalog snapshot down to models whose complexity
//! tier covers the task and whose capability set is a superset of the task's
//! required capabilities, then orders the survivors by the requested
//! criterion:
//!
//! - `cost`: ascending cost per token
//! - `quality`: ascending priority (lower priority value = better model)
//! - `speed`: descending requests per minute, then descending tokens per
//!   minute
//!
//! Ties after the primary key break by ascending priority; full ties keep
//! catalog document order (the sort is stable).
//!
//! One deliberate override: a `complex` task asked to optimize for `cost` is
//! ranked by `quality` instead. Saving fractions of a cent on a task that
//! was explicitly marked hard is the wrong trade.
//!
//! # Example
//!
//! ```rust
//! use llm_conductor::catalog::{CatalogDocument, CatalogSnapshot, ComplexityTier};
//! use llm_conductor::selector::{ModelSelector, SelectionCriterion, TaskRequest};
//! use llm_conductor::transport::ChatMessage;
//!
//! let snapshot =
//!     CatalogSnapshot::from_document(&CatalogDocument::builtin_defaults()).unwrap();
//! let task = TaskRequest::new("chat", vec![ChatMessage::user("Hello")])
//!     .with_criterion(SelectionCriterion::Cost);
//!
//! let ranked = ModelSelector::new().select(&task, &snapshot);
//! assert!(!ranked.is_empty());
//! // Cheapest first.
//! assert!(ranked[0].cost_per_token <= ranked[1].cost_per_token);
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{CatalogSnapshot, ComplexityTier, ModelDescriptor};
use crate::transport::ChatMessage;

// ============================================================================
// Selection Criterion
// ============================================================================

/// What the caller wants the ranking to optimize for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SelectionCriterion {
    /// Cheapest capable model first.
    #[default]
    Cost,
    /// Best model first, by catalog priority.
    Quality,
    /// Highest-throughput provider first.
    Speed,
}

impl SelectionCriterion {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionCriterion::Cost => "cost",
            SelectionCriterion::Quality => "quality",
            SelectionCriterion::Speed => "speed",
        }
    }
}

impl std::fmt::Display for SelectionCriterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Task Request
// ============================================================================

/// One caller task: what to do, the conversation so far, and how to pick a
/// model for it. Built once per call and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Task type, matched against model capabilities (e.g. "chat", "code").
    pub task_type: String,

    /// Conversation messages, oldest first.
    pub messages: Vec<ChatMessage>,

    /// How demanding the task is; gates model eligibility and caps
    /// optimization aggressiveness.
    pub complexity_tier: ComplexityTier,

    /// Ranking objective.
    pub criterion: SelectionCriterion,

    /// Capabilities required beyond the task type itself.
    pub required_capabilities: Vec<String>,
}

impl TaskRequest {
    /// Create a task with defaults: simple tier, cost criterion, no extra
    /// capability requirements.
    pub fn new(task_type: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            task_type: task_type.into(),
            messages,
            complexity_tier: ComplexityTier::Simple,
            criterion: SelectionCriterion::default(),
            required_capabilities: Vec::new(),
        }
    }

    pub fn with_complexity(mut self, tier: ComplexityTier) -> Self {
        self.complexity_tier = tier;
        self
    }

    pub fn with_criterion(mut self, criterion: SelectionCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.push(capability.into());
        self
    }
}

// ============================================================================
// Model Selector
// ============================================================================

/// Stateless ranking policy over a catalog snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelSelector;

impl ModelSelector {
    pub fn new() -> Self {
        Self
    }

    /// The criterion actually applied after the complexity override.
    pub fn effective_criterion(&self, task: &TaskRequest) -> SelectionCriterion {
        if task.complexity_tier == ComplexityTier::Complex
            && task.criterion == SelectionCriterion::Cost
        {
            SelectionCriterion::Quality
        } else {
            task.criterion
        }
    }

    /// Rank eligible models for the task, best first.
    ///
    /// Deterministic: the same snapshot and task always produce the same
    /// ordering. An empty result means no configured model can serve the
    /// task.
    pub fn select(&self, task: &TaskRequest, snapshot: &CatalogSnapshot) -> Vec<ModelDescriptor> {
        let mut candidates = snapshot.candidates_for(&task.task_type, task.complexity_tier);
        candidates.retain(|d| {
            task.required_capabilities
                .iter()
                .all(|cap| d.supports(cap))
        });

        let criterion = self.effective_criterion(task);
        if criterion != task.criterion {
            debug!(
                task_type = %task.task_type,
                requested = %task.criterion,
                applied = %criterion,
                "complex task re-ranked by quality instead of cost"
            );
        }

        // Stable sorts, so equal keys keep catalog document order.
        match criterion {
            SelectionCriterion::Cost => candidates.sort_by(|a, b| {
                a.cost_per_token
                    .total_cmp(&b.cost_per_token)
                    .then(a.priority.cmp(&b.priority))
            }),
            SelectionCriterion::Quality => {
                candidates.sort_by(|a, b| a.priority.cmp(&b.priority))
            }
            SelectionCriterion::Speed => candidates.sort_by(|a, b| {
                b.requests_per_minute
                    .cmp(&a.requests_per_minute)
                    .then(b.tokens_per_minute.cmp(&a.tokens_per_minute))
                    .then(a.priority.cmp(&b.priority))
            }),
        }

        debug!(
            task_type = %task.task_type,
            tier = %task.complexity_tier,
            criterion = %criterion,
            candidates = candidates.len(),
            "model selection complete"
        );
        candidates
    }
}
