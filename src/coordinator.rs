//! Fallback dispatch across a candidate chain.
//!
//! The coordinator owns the runtime half of failover. Given an ordered
//! candidate list from the selector, it walks the chain and returns the
//! first completion it can get:
//!
//! ```text
//!   for each candidate:
//!       transport registered? ──no──▶ skip (recorded, attempts = 0)
//!       circuit breaker allows? ─no─▶ skip
//!       rate governor admits? ───no─▶ skip
//!       send ──ok──▶ done
//!            └─fail─▶ classify ──▶ retry in place with backoff, or
//!                                  abandon and advance to the next
//! ```
//!
//! Retrying happens *in place*: transient categories (rate limits, network
//! blips, server errors) get their category's backoff schedule against the
//! same candidate before the walk advances. A provider rejecting the request
//! as malformed is different; that fails the whole dispatch immediately,
//! because every other provider would reject the same request.
//!
//! Skips are cheap and observable. A candidate skipped for an open breaker
//! or an empty rate budget never touches the network, but still appears in
//! the exhaustion report with `attempts == 0`.
//!
//! The breaker counts abandoned candidates, not individual retries. A
//! five-attempt rate-limit storm against one provider is a single failure
//! from the chain's point of view.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use llm_conductor::catalog::{CatalogDocument, CatalogSnapshot, ComplexityTier};
//! use llm_conductor::coordinator::FallbackCoordinator;
//! use llm_conductor::transport::{ChatMessage, MockTransport, TransportRegistry};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let document = CatalogDocument::builtin_defaults();
//! let snapshot = CatalogSnapshot::from_document(&document).unwrap();
//! let candidates = snapshot.candidates_for("chat", ComplexityTier::Simple);
//!
//! let mut transports = TransportRegistry::new();
//! transports.register("openai", Arc::new(MockTransport::new("openai")));
//! let coordinator = FallbackCoordinator::new(Arc::new(transports));
//!
//! let messages = vec![ChatMessage::user("ping")];
//! let outcome = coordinator.dispatch(&candidates, &messages, 16).await.unwrap();
//! assert_eq!(outcome.descriptor.provider_id, "openai");
//! assert!(!outcome.failover());
//! # });
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::breaker::{BreakerConfig, BreakerRegistry};
use crate::catalog::ModelDescriptor;
use crate::error::{
    AttemptFailure, ClassifierConfig, ErrorCategory, OrchestratorError, ProviderError, Result,
};
use crate::governor::{GovernorConfig, RateGovernor};
use crate::transport::{ChatMessage, Transport, TransportRegistry, TransportReply, TransportRequest};

// ============================================================================
// Configuration
// ============================================================================

/// Tuning for the coordinator and the gates it owns.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Per-attempt wall-clock budget, used when the catalog entry carries no
    /// timeout of its own.
    ///
    /// Default: 120 seconds
    pub default_timeout: Duration,

    /// Retry policy table, consulted per error category.
    pub classifier: ClassifierConfig,

    /// Circuit breaker tuning, shared by every per-provider breaker.
    pub breaker: BreakerConfig,

    /// Rate governor tuning.
    pub governor: GovernorConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(120),
            classifier: ClassifierConfig::default(),
            breaker: BreakerConfig::default(),
            governor: GovernorConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Set the fallback per-attempt timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Replace the retry policy table.
    pub fn with_classifier(mut self, classifier: ClassifierConfig) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replace the breaker tuning.
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Replace the governor tuning.
    pub fn with_governor(mut self, governor: GovernorConfig) -> Self {
        self.governor = governor;
        self
    }
}

// ============================================================================
// Dispatch Outcome
// ============================================================================

/// A successful dispatch, with enough context to bill and log it.
#[derive(Debug)]
pub struct DispatchOutcome {
    /// The winning provider's reply.
    pub reply: TransportReply,

    /// Descriptor of the candidate that produced the reply.
    pub descriptor: ModelDescriptor,

    /// Wall-clock duration of the successful attempt.
    pub latency: Duration,

    /// Transport attempts made against the winning candidate.
    pub attempts: u32,

    /// Candidates tried or skipped before the winner, in chain order.
    pub failures: Vec<AttemptFailure>,
}

impl DispatchOutcome {
    /// True when the reply did not come from the first viable candidate.
    pub fn failover(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Terminal state of one candidate's attempt loop.
enum CandidateOutcome {
    /// The candidate produced a reply.
    Completed {
        reply: TransportReply,
        attempts: u32,
        latency: Duration,
    },
    /// Retries ran out (or the category never retries); move on.
    Abandoned {
        category: ErrorCategory,
        message: String,
        attempts: u32,
    },
    /// The provider called the request itself malformed. No other candidate
    /// gets to see it.
    Rejected { message: String },
}

// ============================================================================
// Token Reservation Guard
// ============================================================================

/// Governor reservation that refunds itself unless settled.
///
/// Dropping the guard without settling credits the full token estimate back,
/// so cancelled and failed dispatches do not leak budget. The request slot
/// stays consumed either way.
struct TokenReservation<'a> {
    governor: &'a RateGovernor,
    provider_id: &'a str,
    estimated_tokens: usize,
    armed: bool,
}

impl<'a> TokenReservation<'a> {
    fn new(governor: &'a RateGovernor, provider_id: &'a str, estimated_tokens: usize) -> Self {
        Self {
            governor,
            provider_id,
            estimated_tokens,
            armed: true,
        }
    }

    /// Reconcile the reservation against provider-reported usage.
    fn settle(mut self, actual_tokens: usize) {
        self.governor
            .record_completion(self.provider_id, self.estimated_tokens, actual_tokens);
        self.armed = false;
    }
}

impl Drop for TokenReservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.governor.release(self.provider_id, self.estimated_tokens);
        }
    }
}

// ============================================================================
// Fallback Coordinator
// ============================================================================

/// Walks a candidate chain until one provider completes the request.
///
/// The coordinator holds the per-provider circuit breakers and the shared
/// rate governor, so their state survives across dispatches. Clone-free by
/// design; share it behind an `Arc` if multiple tasks dispatch concurrently.
pub struct FallbackCoordinator {
    transports: Arc<TransportRegistry>,
    breakers: BreakerRegistry,
    governor: RateGovernor,
    config: CoordinatorConfig,
}

impl FallbackCoordinator {
    /// Create a coordinator with default tuning.
    pub fn new(transports: Arc<TransportRegistry>) -> Self {
        Self::with_config(transports, CoordinatorConfig::default())
    }

    /// Create a coordinator with explicit tuning.
    pub fn with_config(transports: Arc<TransportRegistry>, config: CoordinatorConfig) -> Self {
        Self {
            breakers: BreakerRegistry::new(config.breaker.clone()),
            governor: RateGovernor::new(config.governor.clone()),
            transports,
            config,
        }
    }

    /// The per-provider breaker registry.
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// The shared rate governor.
    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    /// The transport registry this coordinator dispatches through.
    pub fn transports(&self) -> &TransportRegistry {
        &self.transports
    }

    /// Walk `candidates` in order and return the first completion.
    ///
    /// `estimated_tokens` is the prompt-side token count for the final
    /// message set; the governor reserves it (plus a response allowance)
    /// once per candidate, covering every retry against that candidate.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::InvalidRequest`] if any provider rejects the
    /// request as malformed, [`OrchestratorError::AllProvidersExhausted`]
    /// with the per-candidate failure list otherwise.
    pub async fn dispatch(
        &self,
        candidates: &[ModelDescriptor],
        messages: &[ChatMessage],
        estimated_tokens: usize,
    ) -> Result<DispatchOutcome> {
        debug!(
            candidates = candidates.len(),
            estimated_tokens, "dispatching across candidate chain"
        );

        let mut failures: Vec<AttemptFailure> = Vec::new();

        for descriptor in candidates {
            let Some(transport) = self.transports.get(&descriptor.provider_id) else {
                debug!(provider = %descriptor.provider_id, "no transport registered, skipping");
                failures.push(skipped(
                    descriptor,
                    ErrorCategory::Unknown,
                    "no transport registered",
                ));
                continue;
            };

            let breaker = self.breakers.breaker(&descriptor.provider_id);
            if !breaker.is_allowed() {
                debug!(provider = %descriptor.provider_id, "circuit open, skipping");
                failures.push(skipped(
                    descriptor,
                    ErrorCategory::CircuitOpen,
                    "circuit breaker open",
                ));
                continue;
            }

            if !self.governor.can_proceed(descriptor, estimated_tokens) {
                failures.push(skipped(
                    descriptor,
                    ErrorCategory::RateLimit,
                    "local rate budget exhausted",
                ));
                continue;
            }
            // One reservation covers every retry against this candidate.
            let reservation =
                TokenReservation::new(&self.governor, &descriptor.provider_id, estimated_tokens);

            match self
                .try_candidate(descriptor, transport.as_ref(), messages, estimated_tokens)
                .await
            {
                CandidateOutcome::Completed {
                    reply,
                    attempts,
                    latency,
                } => {
                    breaker.record_success();
                    reservation.settle(reply.usage.total_tokens);
                    info!(
                        provider = %descriptor.provider_id,
                        model = %descriptor.model_name,
                        attempts,
                        latency_ms = latency.as_millis() as u64,
                        failed_over = !failures.is_empty(),
                        "completion succeeded"
                    );
                    return Ok(DispatchOutcome {
                        reply,
                        descriptor: descriptor.clone(),
                        latency,
                        attempts,
                        failures,
                    });
                }
                CandidateOutcome::Abandoned {
                    category,
                    message,
                    attempts,
                } => {
                    // One breaker hit per abandoned candidate, not per attempt.
                    if category.counts_against_breaker() {
                        breaker.record_failure();
                    }
                    warn!(
                        provider = %descriptor.provider_id,
                        model = %descriptor.model_name,
                        category = %category,
                        attempts,
                        "abandoning candidate"
                    );
                    failures.push(AttemptFailure {
                        provider_id: descriptor.provider_id.clone(),
                        model_name: descriptor.model_name.clone(),
                        category,
                        message,
                        attempts,
                    });
                }
                CandidateOutcome::Rejected { message } => {
                    warn!(
                        provider = %descriptor.provider_id,
                        model = %descriptor.model_name,
                        "request rejected as malformed, not failing over"
                    );
                    return Err(OrchestratorError::InvalidRequest {
                        provider_id: descriptor.provider_id.clone(),
                        message,
                    });
                }
            }
        }

        Err(OrchestratorError::AllProvidersExhausted { attempts: failures })
    }

    /// Run the attempt loop for one candidate.
    async fn try_candidate(
        &self,
        descriptor: &ModelDescriptor,
        transport: &dyn Transport,
        messages: &[ChatMessage],
        estimated_tokens: usize,
    ) -> CandidateOutcome {
        // Leave the model's remaining window to the completion.
        let completion_allowance = descriptor.max_tokens.saturating_sub(estimated_tokens).max(1);
        let request = TransportRequest::new(
            &descriptor.provider_id,
            &descriptor.model_name,
            messages.to_vec(),
        )
        .with_temperature(descriptor.temperature)
        .with_max_tokens(completion_allowance);
        let attempt_budget = descriptor
            .request_timeout
            .unwrap_or(self.config.default_timeout);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let started = Instant::now();

            let result = match timeout(attempt_budget, transport.send(&request)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout),
            };

            let error = match result {
                Ok(reply) => {
                    return CandidateOutcome::Completed {
                        reply,
                        attempts: attempt,
                        latency: started.elapsed(),
                    };
                }
                Err(error) => error,
            };

            let category = error.category();
            if !category.advances_fallback() {
                return CandidateOutcome::Rejected {
                    message: error.to_string(),
                };
            }

            let policy = self.config.classifier.policy_for(category);
            if policy.should_retry() && attempt < policy.max_attempts() {
                // A provider-supplied retry-after hint wins over the
                // computed backoff, capped at the policy's ceiling.
                let delay = error
                    .retry_after()
                    .map(|hint| hint.min(policy.max_delay()))
                    .unwrap_or_else(|| policy.delay_for(attempt));
                warn!(
                    provider = %descriptor.provider_id,
                    model = %descriptor.model_name,
                    category = %category,
                    attempt,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "attempt failed, retrying in place"
                );
                sleep(delay).await;
                continue;
            }

            return CandidateOutcome::Abandoned {
                category,
                message: error.to_string(),
                attempts: attempt,
            };
        }
    }
}

/// Failure entry for a candidate that never reached the network.
fn skipped(descriptor: &ModelDescriptor, category: ErrorCategory, message: &str) -> AttemptFailure {
    AttemptFailure {
        provider_id: descriptor.provider_id.clone(),
        model_name: descriptor.model_name.clone(),
        category,
        message: message.to_string(),
        attempts: 0,
    }
}
