//! The public entry point: completion with selection, budgeting and failover.
//!
//! # Overview
//!
//! `CompletionOrchestrator` is the only type callers talk to. One call moves
//! top-down through the subsystems:
//!
//! ```text
//!   complete(task, budget)
//!       │
//!       ▼
//!   ModelSelector ──────── rank eligible models for the task
//!       │
//!       ▼
//!   chain expansion ────── append each backup provider's best model
//!       │
//!       ▼
//!   TokenBudgetOptimizer ─ shrink the prompt to the top model's window
//!       │
//!       ▼
//!   FallbackCoordinator ── dispatch with breaker/governor/retry handling
//!       │
//!       ▼
//!   CompletionResult ───── content + usage + cost + optimization report
//! ```
//!
//! The optimizer runs once, against the *top* candidate's window. A dispatch
//! that fails over sends the same optimized messages to the backup rather
//! than re-optimizing per candidate; candidate windows rarely differ enough
//! to matter and re-tokenizing on every hop would double the latency of the
//! unhappy path.
//!
//! Every call gets a request id, carried in the tracing span so one
//! request's selection, optimization and failover lines correlate.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use llm_conductor::catalog::{CatalogDocument, ModelCatalog};
//! use llm_conductor::optimizer::TokenBudget;
//! use llm_conductor::orchestrator::CompletionOrchestrator;
//! use llm_conductor::selector::TaskRequest;
//! use llm_conductor::transport::{ChatMessage, MockTransport, TransportRegistry};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let catalog = Arc::new(
//!     ModelCatalog::from_document(CatalogDocument::builtin_defaults()).unwrap(),
//! );
//! let mut transports = TransportRegistry::new();
//! transports.register("ollama", Arc::new(MockTransport::new("ollama")));
//!
//! let orchestrator = CompletionOrchestrator::new(catalog, Arc::new(transports));
//! let task = TaskRequest::new("chat", vec![ChatMessage::user("What is a monad?")]);
//! let result = orchestrator.complete(task, TokenBudget::new(4096)).await.unwrap();
//!
//! // Cost criterion ranks the free local model first.
//! assert_eq!(result.provider_id, "ollama");
//! assert!(!result.degraded);
//! # });
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::breaker::CircuitStatus;
use crate::catalog::{CatalogSnapshot, ModelCatalog, ModelDescriptor};
use crate::coordinator::{CoordinatorConfig, DispatchOutcome, FallbackCoordinator};
use crate::error::{OrchestratorError, Result};
use crate::optimizer::{OptimizationResult, OptimizerConfig, TokenBudget, TokenBudgetOptimizer};
use crate::selector::{ModelSelector, TaskRequest};
use crate::tokenizer::Tokenizer;
use crate::transport::{TokenUsage, TransportRegistry};

// ============================================================================
// Configuration
// ============================================================================

/// Tuning for the orchestrator's subsystems.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Coordinator tuning: timeouts, retry table, breaker, governor.
    pub coordinator: CoordinatorConfig,

    /// Optimizer thresholds and quality costs.
    pub optimizer: OptimizerConfig,
}

impl OrchestratorConfig {
    pub fn with_coordinator(mut self, coordinator: CoordinatorConfig) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }
}

// ============================================================================
// Completion Result
// ============================================================================

/// Everything a caller gets back from one completion.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionResult {
    /// Generated content.
    pub content: String,

    /// Provider that served the request.
    pub provider_id: String,

    /// Model that served the request.
    pub model_name: String,

    /// Token accounting as reported by the provider.
    pub usage: TokenUsage,

    /// Wall-clock duration of the successful transport attempt.
    pub latency: Duration,

    /// `usage.total_tokens` priced at the serving model's per-token cost.
    pub estimated_cost: f64,

    /// True when the prompt had to be hard-truncated to fit the budget.
    pub degraded: bool,

    /// Present when the request was not served by the first viable
    /// candidate; describes what failed before the serving provider.
    pub failover: Option<String>,

    /// What the optimizer did to the prompt and the fidelity it expects.
    pub optimization: OptimizationResult,

    /// Provider-specific extras, passed through untouched.
    pub metadata: HashMap<String, serde_json::Value>,
}

// ============================================================================
// Completion Orchestrator
// ============================================================================

/// Composes selection, token-budget optimization and fallback dispatch.
///
/// Cheap to share: wrap it in an `Arc` and call [`complete`] from as many
/// tasks as needed. The breakers and rate windows inside the coordinator are
/// the only cross-request state.
///
/// [`complete`]: CompletionOrchestrator::complete
pub struct CompletionOrchestrator {
    catalog: Arc<ModelCatalog>,
    selector: ModelSelector,
    optimizer: TokenBudgetOptimizer,
    coordinator: FallbackCoordinator,
}

impl CompletionOrchestrator {
    /// Create an orchestrator with default tuning.
    pub fn new(catalog: Arc<ModelCatalog>, transports: Arc<TransportRegistry>) -> Self {
        Self::with_config(catalog, transports, OrchestratorConfig::default())
    }

    /// Create an orchestrator with explicit tuning.
    pub fn with_config(
        catalog: Arc<ModelCatalog>,
        transports: Arc<TransportRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            catalog,
            selector: ModelSelector::new(),
            optimizer: TokenBudgetOptimizer::with_config(config.optimizer),
            coordinator: FallbackCoordinator::with_config(transports, config.coordinator),
        }
    }

    /// Run one completion end to end.
    ///
    /// `budget` caps total tokens for the request; the effective budget is
    /// the smaller of it and the top candidate's model window.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::AllProvidersExhausted`] when no candidate serves
    /// the request (an empty attempt list means no model was eligible at
    /// all), [`OrchestratorError::InvalidRequest`] when a provider rejected
    /// the request as malformed.
    pub async fn complete(
        &self,
        task: TaskRequest,
        budget: TokenBudget,
    ) -> Result<CompletionResult> {
        let request_id = Uuid::new_v4();
        let span = info_span!("completion", %request_id, task_type = %task.task_type);
        self.run(task, budget).instrument(span).await
    }

    async fn run(&self, task: TaskRequest, budget: TokenBudget) -> Result<CompletionResult> {
        let snapshot = self.catalog.snapshot();
        let mut candidates = self.selector.select(&task, &snapshot);
        if candidates.is_empty() {
            warn!(
                task_type = %task.task_type,
                tier = %task.complexity_tier,
                "no configured model is eligible for this task"
            );
            return Err(OrchestratorError::AllProvidersExhausted {
                attempts: Vec::new(),
            });
        }
        append_chained_backups(&mut candidates, &task, &snapshot);

        // The top candidate's window is the reference budget for the whole
        // dispatch; backups receive the same optimized messages.
        let top = &candidates[0];
        let effective_budget = TokenBudget::new(budget.max_total_tokens.min(top.max_tokens));
        let tokenizer = Tokenizer::for_model(&top.model_name);
        let (optimized, optimization) = self.optimizer.optimize(
            &task.messages,
            &effective_budget,
            task.complexity_tier,
            &tokenizer,
        );

        let outcome = self
            .coordinator
            .dispatch(&candidates, &optimized, optimization.optimized_token_count)
            .await?;

        let failover = failover_note(&outcome);
        let DispatchOutcome {
            reply,
            descriptor,
            latency,
            ..
        } = outcome;
        let estimated_cost = reply.usage.total_tokens as f64 * descriptor.cost_per_token;

        info!(
            provider = %descriptor.provider_id,
            model = %descriptor.model_name,
            total_tokens = reply.usage.total_tokens,
            cost_usd = estimated_cost,
            latency_ms = latency.as_millis() as u64,
            degraded = optimization.degraded,
            failed_over = failover.is_some(),
            "completion finished"
        );

        Ok(CompletionResult {
            content: reply.content,
            provider_id: descriptor.provider_id,
            model_name: descriptor.model_name,
            usage: reply.usage,
            latency,
            estimated_cost,
            degraded: optimization.degraded,
            failover,
            optimization,
            metadata: reply.metadata,
        })
    }

    /// Re-read the catalog from its original source and swap the snapshot.
    ///
    /// In-flight completions keep the snapshot they started with. On error
    /// the previous snapshot stays in place.
    pub fn reload_catalog(&self) -> Result<()> {
        self.catalog.reload()?;
        info!("catalog reloaded");
        Ok(())
    }

    /// Breaker status for one provider, `None` if it has never been
    /// dispatched to.
    pub fn circuit_status(&self, provider_id: &str) -> Option<CircuitStatus> {
        self.coordinator.breakers().status(provider_id)
    }

    /// Breaker status for every provider seen so far.
    pub fn provider_statuses(&self) -> HashMap<String, CircuitStatus> {
        self.coordinator.breakers().statuses()
    }

    /// The catalog this orchestrator selects from.
    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// The dispatch layer, exposed for governor/breaker introspection.
    pub fn coordinator(&self) -> &FallbackCoordinator {
        &self.coordinator
    }
}

/// Append, for each provider in the top candidate's fallback chain not
/// already represented, that provider's best model for the task.
///
/// The backup filter is catalog eligibility (task type and tier); extra
/// required capabilities narrow the primary selection but not the backups,
/// so a capability-narrowed task still has somewhere to fail over to.
fn append_chained_backups(
    candidates: &mut Vec<ModelDescriptor>,
    task: &TaskRequest,
    snapshot: &CatalogSnapshot,
) {
    let top_provider = candidates[0].provider_id.clone();
    let mut present: HashSet<String> = candidates.iter().map(|c| c.provider_id.clone()).collect();

    for provider_id in snapshot.fallback_chain(&top_provider) {
        if !present.insert(provider_id.clone()) {
            continue;
        }
        if let Some(backup) = snapshot.best_for(provider_id, &task.task_type, task.complexity_tier)
        {
            debug!(
                provider = %provider_id,
                model = %backup.model_name,
                "appending chained backup candidate"
            );
            candidates.push(backup.clone());
        }
    }
}

/// Human-readable failover annotation for the result.
fn failover_note(outcome: &DispatchOutcome) -> Option<String> {
    if outcome.failures.is_empty() {
        return None;
    }
    let trail = outcome
        .failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    Some(format!(
        "served by {} after {} earlier candidate(s) failed or were skipped: {}",
        outcome.descriptor,
        outcome.failures.len(),
        trail
    ))
}
