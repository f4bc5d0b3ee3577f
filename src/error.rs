//! Error taxonomy and retry policies for provider orchestration.
//!
//! # Error Handling Philosophy
//!
//! Failures should be:
//! 1. **Classified**: every raw provider failure maps to exactly one category
//! 2. **Actionable**: each category carries a retry policy the coordinator
//!    applies uniformly, instead of ad-hoc retry loops at call sites
//! 3. **Diagnosable**: when every provider has been tried, the caller gets
//!    the full per-provider failure list, not just the last error
//!
//! # Categories and Default Policies
//!
//! | Category | Severity | Default policy |
//! |----------|----------|----------------|
//! | `RateLimit` | medium | exponential backoff, 5 attempts, base 2s |
//! | `Authentication` | high | never retried, advance to next provider |
//! | `Validation` | medium | never retried, surfaced to the caller |
//! | `Network` | medium | exponential backoff, 3 attempts |
//! | `Server` | high | exponential backoff, 3 attempts, then advance |
//! | `CircuitOpen` | medium | skip, does not count as a provider failure |
//! | `Unknown` | high | single retry, then advance |
//!
//! Policies are plain values. Deployments that need different limits override
//! them per category through [`ClassifierConfig`] without touching the
//! coordinator.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::catalog::CatalogError;

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

// ============================================================================
// Retry Policy
// ============================================================================

/// How the coordinator should retry a failed attempt before advancing the
/// fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry in place with exponential backoff.
    Backoff {
        /// Delay before the first retry.
        base_delay: Duration,
        /// Upper bound on the delay between retries.
        max_delay: Duration,
        /// Total attempts against the same candidate, including the first.
        max_attempts: u32,
    },

    /// Do not retry this candidate at all.
    NoRetry,
}

impl RetryPolicy {
    /// Standard backoff for rate-limited responses.
    pub fn rate_limit_backoff() -> Self {
        Self::Backoff {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
        }
    }

    /// Standard backoff for transient network failures and timeouts.
    pub fn network_backoff() -> Self {
        Self::Backoff {
            base_delay: Duration::from_millis(125),
            max_delay: Duration::from_secs(30),
            max_attempts: 3,
        }
    }

    /// Standard backoff for provider-side server errors.
    pub fn server_backoff() -> Self {
        Self::Backoff {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 3,
        }
    }

    /// One retry, then give up on the candidate.
    pub fn single_retry() -> Self {
        Self::Backoff {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 2,
        }
    }

    /// Whether this policy allows any retry at all.
    pub fn should_retry(&self) -> bool {
        !matches!(self, Self::NoRetry)
    }

    /// Total attempts permitted against one candidate (at least 1).
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::Backoff { max_attempts, .. } => (*max_attempts).max(1),
            Self::NoRetry => 1,
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self {
            Self::Backoff {
                base_delay,
                max_delay,
                ..
            } => {
                let exponent = retry.saturating_sub(1).min(16);
                base_delay.saturating_mul(1 << exponent).min(*max_delay)
            }
            Self::NoRetry => Duration::ZERO,
        }
    }

    /// Upper bound on any delay this policy can produce. Provider-supplied
    /// retry-after hints are capped to this as well.
    pub fn max_delay(&self) -> Duration {
        match self {
            Self::Backoff { max_delay, .. } => *max_delay,
            Self::NoRetry => Duration::ZERO,
        }
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Coarse severity attached to each category, for logging and triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

/// Error category a raw provider failure classifies into.
///
/// Classification is a pure function of the failure (see
/// [`ProviderError::category`]); the category then determines severity and
/// the default retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RateLimit,
    Authentication,
    Validation,
    Network,
    Server,
    CircuitOpen,
    Unknown,
}

impl ErrorCategory {
    /// Stable lowercase name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Authentication => "authentication",
            Self::Validation => "validation",
            Self::Network => "network",
            Self::Server => "server",
            Self::CircuitOpen => "circuit_open",
            Self::Unknown => "unknown",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::RateLimit | Self::Validation | Self::Network | Self::CircuitOpen => {
                Severity::Medium
            }
            Self::Authentication | Self::Server | Self::Unknown => Severity::High,
        }
    }

    /// Default retry policy for this category. Deployment overrides go
    /// through [`ClassifierConfig`].
    pub fn default_retry_policy(&self) -> RetryPolicy {
        match self {
            Self::RateLimit => RetryPolicy::rate_limit_backoff(),
            Self::Network => RetryPolicy::network_backoff(),
            Self::Server => RetryPolicy::server_backoff(),
            Self::Unknown => RetryPolicy::single_retry(),
            Self::Authentication | Self::Validation | Self::CircuitOpen => RetryPolicy::NoRetry,
        }
    }

    /// Whether the coordinator moves on to the next candidate after this
    /// category exhausts its policy. Validation failures terminate the whole
    /// call instead: a malformed request will be malformed for every
    /// provider.
    pub fn advances_fallback(&self) -> bool {
        !matches!(self, Self::Validation)
    }

    /// Whether this category increments the circuit breaker failure count.
    /// Short-circuited attempts never reached the provider, so they say
    /// nothing about its health.
    pub fn counts_against_breaker(&self) -> bool {
        !matches!(self, Self::CircuitOpen)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-deployment overrides of the category → retry-policy table.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use llm_conductor::{ClassifierConfig, ErrorCategory, RetryPolicy};
///
/// let config = ClassifierConfig::new().with_policy(
///     ErrorCategory::RateLimit,
///     RetryPolicy::Backoff {
///         base_delay: Duration::from_millis(500),
///         max_delay: Duration::from_secs(10),
///         max_attempts: 3,
///     },
/// );
/// assert_eq!(config.policy_for(ErrorCategory::RateLimit).max_attempts(), 3);
/// // Untouched categories keep their defaults.
/// assert!(!config.policy_for(ErrorCategory::Authentication).should_retry());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClassifierConfig {
    overrides: HashMap<ErrorCategory, RetryPolicy>,
}

impl ClassifierConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the policy for one category.
    pub fn with_policy(mut self, category: ErrorCategory, policy: RetryPolicy) -> Self {
        self.overrides.insert(category, policy);
        self
    }

    /// Effective policy for a category: the override if present, otherwise
    /// the default table.
    pub fn policy_for(&self, category: ErrorCategory) -> RetryPolicy {
        self.overrides
            .get(&category)
            .cloned()
            .unwrap_or_else(|| category.default_retry_policy())
    }
}

// ============================================================================
// Provider-Level Errors
// ============================================================================

/// Failure returned by a [`Transport`](crate::transport::Transport)
/// implementation for a single attempt.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider throttled the request (429-style).
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Provider-supplied hint on when to try again, if any.
        retry_after: Option<Duration>,
    },

    /// Credentials rejected (401/403-style).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Provider rejected the request as malformed (400-style).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The attempt did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// Provider-side internal error (5xx-style).
    #[error("provider server error: {0}")]
    Server(String),

    /// Anything that did not match a known pattern.
    #[error("unknown provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// Rate-limited without a retry-after hint.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Classify this failure. Pure: same error, same category.
    ///
    /// # Example
    ///
    /// ```
    /// use llm_conductor::{ErrorCategory, ProviderError};
    ///
    /// assert_eq!(ProviderError::Timeout.category(), ErrorCategory::Network);
    /// assert_eq!(
    ///     ProviderError::Auth("bad key".into()).category(),
    ///     ErrorCategory::Authentication,
    /// );
    /// ```
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Auth(_) => ErrorCategory::Authentication,
            Self::InvalidRequest(_) => ErrorCategory::Validation,
            Self::Network(_) | Self::Timeout => ErrorCategory::Network,
            Self::Server(_) => ErrorCategory::Server,
            Self::Unknown(_) => ErrorCategory::Unknown,
        }
    }

    /// Retry-after hint, when the provider supplied one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Map an HTTP status code to a provider error, for transports built on
    /// plain HTTP clients.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => Self::Auth(body),
            429 => Self::rate_limited(body),
            400 | 404 | 413 | 422 => Self::InvalidRequest(body),
            408 => Self::Timeout,
            500..=599 => Self::Server(body),
            _ => Self::Unknown(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_connect() {
            ProviderError::Network(format!("connection failed: {}", err))
        } else if let Some(status) = err.status() {
            ProviderError::from_status(status.as_u16(), err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Unknown(format!("response parse error: {}", err))
    }
}

// ============================================================================
// Orchestration-Level Errors
// ============================================================================

/// One candidate's outcome inside an exhausted fallback walk.
///
/// Skipped candidates (open breaker, rate-governor denial, missing
/// transport) appear here too, with `attempts == 0`, so an operator can tell
/// a skip from a real failure.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptFailure {
    pub provider_id: String,
    pub model_name: String,
    pub category: ErrorCategory,
    pub message: String,
    /// Transport attempts actually made against this candidate.
    pub attempts: u32,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}: {} after {} attempt(s): {}",
            self.provider_id, self.model_name, self.category, self.attempts, self.message
        )
    }
}

/// Errors surfaced to callers of the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Catalog could not be loaded or failed validation.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// A provider rejected the request as malformed. Not retried and not
    /// failed over: the request itself is the defect.
    #[error("provider '{provider_id}' rejected the request: {message}")]
    InvalidRequest {
        provider_id: String,
        message: String,
    },

    /// Every candidate was tried or skipped without producing a completion.
    /// The only condition that terminates a whole call.
    #[error("all providers exhausted ({} candidate(s) tried)", .attempts.len())]
    AllProvidersExhausted { attempts: Vec<AttemptFailure> },
}

impl OrchestratorError {
    /// The per-provider failure list, when this is an exhaustion error.
    pub fn attempts(&self) -> Option<&[AttemptFailure]> {
        match self {
            Self::AllProvidersExhausted { attempts } => Some(attempts),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        let error = ProviderError::rate_limited("too many requests");
        assert_eq!(error.to_string(), "rate limited: too many requests");

        let error = ProviderError::Auth("invalid key".to_string());
        assert_eq!(error.to_string(), "authentication failed: invalid key");

        let error = ProviderError::InvalidRequest("bad params".to_string());
        assert_eq!(error.to_string(), "invalid request: bad params");

        let error = ProviderError::Timeout;
        assert_eq!(error.to_string(), "request timed out");
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            ProviderError::rate_limited("x").category(),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            ProviderError::Auth("x".into()).category(),
            ErrorCategory::Authentication
        );
        assert_eq!(
            ProviderError::InvalidRequest("x".into()).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            ProviderError::Network("x".into()).category(),
            ErrorCategory::Network
        );
        assert_eq!(ProviderError::Timeout.category(), ErrorCategory::Network);
        assert_eq!(
            ProviderError::Server("x".into()).category(),
            ErrorCategory::Server
        );
        assert_eq!(
            ProviderError::Unknown("x".into()).category(),
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn test_severity_table() {
        assert_eq!(ErrorCategory::RateLimit.severity(), Severity::Medium);
        assert_eq!(ErrorCategory::Authentication.severity(), Severity::High);
        assert_eq!(ErrorCategory::Validation.severity(), Severity::Medium);
        assert_eq!(ErrorCategory::Network.severity(), Severity::Medium);
        assert_eq!(ErrorCategory::Server.severity(), Severity::High);
        assert_eq!(ErrorCategory::CircuitOpen.severity(), Severity::Medium);
        assert_eq!(ErrorCategory::Unknown.severity(), Severity::High);
    }

    #[test]
    fn test_rate_limit_policy_values() {
        match ErrorCategory::RateLimit.default_retry_policy() {
            RetryPolicy::Backoff {
                base_delay,
                max_attempts,
                ..
            } => {
                assert_eq!(base_delay, Duration::from_secs(2));
                assert_eq!(max_attempts, 5);
            }
            RetryPolicy::NoRetry => panic!("rate limit must be retryable"),
        }
    }

    #[test]
    fn test_network_policy_values() {
        match ErrorCategory::Network.default_retry_policy() {
            RetryPolicy::Backoff { max_attempts, .. } => assert_eq!(max_attempts, 3),
            RetryPolicy::NoRetry => panic!("network must be retryable"),
        }
    }

    #[test]
    fn test_server_policy_values() {
        match ErrorCategory::Server.default_retry_policy() {
            RetryPolicy::Backoff {
                base_delay,
                max_delay,
                max_attempts,
            } => {
                assert_eq!(base_delay, Duration::from_secs(1));
                assert_eq!(max_delay, Duration::from_secs(60));
                assert_eq!(max_attempts, 3);
            }
            RetryPolicy::NoRetry => panic!("server must be retryable"),
        }
    }

    #[test]
    fn test_unknown_gets_single_retry() {
        let policy = ErrorCategory::Unknown.default_retry_policy();
        assert_eq!(policy.max_attempts(), 2);
        assert!(policy.should_retry());
    }

    #[test]
    fn test_auth_and_validation_never_retry() {
        assert!(!ErrorCategory::Authentication
            .default_retry_policy()
            .should_retry());
        assert!(!ErrorCategory::Validation
            .default_retry_policy()
            .should_retry());
        assert_eq!(ErrorCategory::Authentication.default_retry_policy().max_attempts(), 1);
    }

    #[test]
    fn test_validation_does_not_advance() {
        assert!(!ErrorCategory::Validation.advances_fallback());
        assert!(ErrorCategory::Authentication.advances_fallback());
        assert!(ErrorCategory::Server.advances_fallback());
    }

    #[test]
    fn test_circuit_open_not_a_breaker_failure() {
        assert!(!ErrorCategory::CircuitOpen.counts_against_breaker());
        assert!(ErrorCategory::Server.counts_against_breaker());
        assert!(ErrorCategory::RateLimit.counts_against_breaker());
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::Backoff {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for(30), Duration::from_secs(10));
    }

    #[test]
    fn test_no_retry_delay_is_zero() {
        assert_eq!(RetryPolicy::NoRetry.delay_for(1), Duration::ZERO);
        assert_eq!(RetryPolicy::NoRetry.max_attempts(), 1);
    }

    #[test]
    fn test_classifier_config_override() {
        let config = ClassifierConfig::new()
            .with_policy(ErrorCategory::Server, RetryPolicy::NoRetry);
        assert!(!config.policy_for(ErrorCategory::Server).should_retry());
        // Other categories untouched.
        assert!(config.policy_for(ErrorCategory::Network).should_retry());
    }

    #[test]
    fn test_from_status_mapping() {
        assert!(matches!(
            ProviderError::from_status(401, "no"),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            ProviderError::from_status(403, "no"),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            ProviderError::from_status(429, "slow down"),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            ProviderError::from_status(400, "bad"),
            ProviderError::InvalidRequest(_)
        ));
        assert!(matches!(
            ProviderError::from_status(408, "slow"),
            ProviderError::Timeout
        ));
        assert!(matches!(
            ProviderError::from_status(500, "boom"),
            ProviderError::Server(_)
        ));
        assert!(matches!(
            ProviderError::from_status(503, "overloaded"),
            ProviderError::Server(_)
        ));
        assert!(matches!(
            ProviderError::from_status(302, "?"),
            ProviderError::Unknown(_)
        ));
    }

    #[test]
    fn test_from_serde_json_classifies_unknown() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let error: ProviderError = json_err.into();
        assert!(matches!(error, ProviderError::Unknown(_)));
        assert_eq!(error.category(), ErrorCategory::Unknown);
    }

    #[test]
    fn test_retry_after_hint() {
        let error = ProviderError::RateLimited {
            message: "slow down".to_string(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(error.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(ProviderError::Timeout.retry_after(), None);
    }

    #[test]
    fn test_category_as_str_matches_display() {
        for category in [
            ErrorCategory::RateLimit,
            ErrorCategory::Authentication,
            ErrorCategory::Validation,
            ErrorCategory::Network,
            ErrorCategory::Server,
            ErrorCategory::CircuitOpen,
            ErrorCategory::Unknown,
        ] {
            assert_eq!(category.to_string(), category.as_str());
        }
        assert_eq!(ErrorCategory::RateLimit.as_str(), "rate_limit");
        assert_eq!(ErrorCategory::CircuitOpen.as_str(), "circuit_open");
    }

    #[test]
    fn test_attempt_failure_display() {
        let failure = AttemptFailure {
            provider_id: "openai".to_string(),
            model_name: "gpt-4o".to_string(),
            category: ErrorCategory::Server,
            message: "internal error".to_string(),
            attempts: 3,
        };
        let text = failure.to_string();
        assert!(text.contains("openai/gpt-4o"));
        assert!(text.contains("server"));
        assert!(text.contains("3 attempt(s)"));
    }

    #[test]
    fn test_exhausted_display_and_accessor() {
        let error = OrchestratorError::AllProvidersExhausted {
            attempts: vec![
                AttemptFailure {
                    provider_id: "a".to_string(),
                    model_name: "m1".to_string(),
                    category: ErrorCategory::Authentication,
                    message: "key revoked".to_string(),
                    attempts: 1,
                },
                AttemptFailure {
                    provider_id: "b".to_string(),
                    model_name: "m2".to_string(),
                    category: ErrorCategory::CircuitOpen,
                    message: "circuit open".to_string(),
                    attempts: 0,
                },
            ],
        };
        assert!(error.to_string().contains("2 candidate(s)"));
        let attempts = error.attempts().unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1].attempts, 0);
    }

    #[test]
    fn test_invalid_request_display() {
        let error = OrchestratorError::InvalidRequest {
            provider_id: "openai".to_string(),
            message: "messages must not be empty".to_string(),
        };
        assert!(error.to_string().contains("openai"));
        assert!(error.to_string().contains("messages must not be empty"));
        assert!(error.attempts().is_none());
    }
}
