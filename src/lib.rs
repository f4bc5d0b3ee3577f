//! LLM Conductor - provider orchestration and token-budget optimization.
//!
//! This crate routes chat completions across multiple LLM providers and
//! keeps prompts inside their token budgets:
//!
//! - Model selection by cost, quality, or throughput
//! - Prompt compression with an explicit quality estimate
//! - Per-provider circuit breakers and rate governing
//! - Fallback chains with per-error-category retry policies
//!
//! # Components
//!
//! | Component | Module | Role |
//! |-----------|--------|------|
//! | [`CompletionOrchestrator`] | [`orchestrator`] | public entry point, composes everything below |
//! | [`ModelCatalog`] | [`catalog`] | provider/model descriptors from a TOML document |
//! | [`ModelSelector`] | [`selector`] | ranks eligible models for a task |
//! | [`TokenBudgetOptimizer`] | [`optimizer`] | compresses prompts to fit a budget |
//! | [`FallbackCoordinator`] | [`coordinator`] | dispatch, retry, failover |
//! | [`CircuitBreaker`] | [`breaker`] | per-provider failure isolation |
//! | [`RateGovernor`] | [`governor`] | per-provider request/token throughput limits |
//! | [`Transport`] | [`transport`] | the only place network I/O happens |
//!
//! The core never embeds a provider SDK. Callers register one [`Transport`]
//! implementation per provider family and the rest of the crate stays
//! provider-agnostic.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use llm_conductor::transport::MockTransport;
//! use llm_conductor::{
//!     CatalogDocument, ChatMessage, CompletionOrchestrator, ModelCatalog, TaskRequest,
//!     TokenBudget, TransportRegistry,
//! };
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let catalog = Arc::new(
//!     ModelCatalog::from_document(CatalogDocument::builtin_defaults()).unwrap(),
//! );
//! let mut transports = TransportRegistry::new();
//! transports.register("ollama", Arc::new(MockTransport::new("ollama")));
//!
//! let orchestrator = CompletionOrchestrator::new(catalog, Arc::new(transports));
//! let task = TaskRequest::new("chat", vec![ChatMessage::user("Hello!")]);
//! let result = orchestrator
//!     .complete(task, TokenBudget::new(4096))
//!     .await
//!     .unwrap();
//! println!("{} answered: {}", result.provider_id, result.content);
//! # });
//! ```
//!
//! # See Also
//!
//! - [`crate::orchestrator`] for the request lifecycle
//! - [`crate::catalog`] for the catalog document format
//! - [`crate::transport`] for implementing a provider transport

pub mod breaker;
pub mod catalog;
pub mod coordinator;
pub mod error;
pub mod governor;
pub mod optimizer;
pub mod orchestrator;
pub mod selector;
pub mod tokenizer;
pub mod transport;

pub use breaker::{BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitState, CircuitStatus};
pub use catalog::{
    CatalogDocument, CatalogError, CatalogSnapshot, ComplexityTier, ModelCatalog, ModelDescriptor,
};
pub use coordinator::{CoordinatorConfig, DispatchOutcome, FallbackCoordinator};
pub use error::{
    AttemptFailure, ClassifierConfig, ErrorCategory, OrchestratorError, ProviderError, Result,
    RetryPolicy, Severity,
};
pub use governor::{GovernorConfig, RateGovernor};
pub use optimizer::{
    CompressionTechnique, OptimizationResult, OptimizationStrategy, OptimizerConfig, TokenBudget,
    TokenBudgetOptimizer,
};
pub use orchestrator::{CompletionOrchestrator, CompletionResult, OrchestratorConfig};
pub use selector::{ModelSelector, SelectionCriterion, TaskRequest};
pub use tokenizer::Tokenizer;
pub use transport::{
    ChatMessage, ChatRole, TokenUsage, Transport, TransportRegistry, TransportReply,
    TransportRequest,
};
