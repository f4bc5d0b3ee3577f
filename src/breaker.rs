//! Circuit breaker - per-provider failure isolation.
//!
//! Stops dispatching to a provider that keeps failing, so one bad upstream
//! degrades to fast skips instead of a queue of doomed network calls.
//!
//! # State machine
//!
//! ```text
//! Closed ──(threshold consecutive failures)──► Open
//!   ▲                                           │
//!   └──(probe succeeds)──── HalfOpen ◄──(cooldown elapsed)
//!                              │
//!                              └──(probe fails)──► Open (cooldown restarts)
//! ```
//!
//! - **Closed**: calls pass through; failures count up, a success pays one
//!   failure back down.
//! - **Open**: calls are rejected without touching the network until the
//!   cooldown elapses, then the next check moves to HalfOpen.
//! - **HalfOpen**: probe calls are let through; one success closes the
//!   breaker, one failure reopens it and restarts the cooldown.
//!
//! All checks and updates are short lock-and-mutate sections on a sync
//! mutex; nothing here suspends, so the coordinator can consult the breaker
//! between awaits without ordering hazards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Tuning for one breaker. One config is shared by every provider.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    ///
    /// Default: 5
    pub failure_threshold: u32,

    /// How long the circuit stays open before admitting a probe.
    ///
    /// Default: 30 seconds
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls allowed.
    Closed,
    /// Failing, calls rejected without a network attempt.
    Open,
    /// Cooldown elapsed, probe calls allowed.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one breaker, for observability surfaces.
#[derive(Debug, Clone)]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Thread-safe breaker for one provider.
///
/// Cheaply cloneable; all clones share the same state via `Arc`.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<BreakerInner>>,
    config: BreakerConfig,
    name: Arc<str>,
}

impl CircuitBreaker {
    /// Create a breaker in the `Closed` state.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BreakerInner::new())),
            config,
            name: Arc::from(name.into().as_str()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a call should be attempted right now.
    ///
    /// `Open` with an elapsed cooldown transitions to `HalfOpen` here and
    /// admits the caller as the probe. `HalfOpen` admits every caller; if
    /// several requests race the probe window, each outcome is recorded and
    /// the first success closes the circuit.
    pub fn is_allowed(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if elapsed {
                    info!(breaker = %self.name, "circuit half-open, admitting probe");
                    inner.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    ///
    /// A `HalfOpen` probe success closes the circuit and clears the failure
    /// count. In `Closed`, a success pays down one failure.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "circuit closed, provider recovered");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
            }
            CircuitState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_sub(1);
            }
            CircuitState::Open => {
                // A call finishing after the circuit opened; the cooldown
                // decides recovery, not this late result.
            }
        }
    }

    /// Record a failed call.
    ///
    /// Reaching the threshold in `Closed` opens the circuit; a `HalfOpen`
    /// probe failure reopens it and restarts the cooldown.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "probe failed, circuit reopened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {
                // Late failure from a call that raced the open transition.
            }
        }
    }

    /// Current state, without side effects.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Point-in-time status for observability.
    pub fn status(&self) -> CircuitStatus {
        let inner = self.lock();
        CircuitStatus {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at,
        }
    }

    /// Force the circuit closed, e.g. after an out-of-band health check.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(breaker = %self.name, "circuit force-closed");
        }
        *inner = BreakerInner::new();
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// One breaker per provider id, created lazily on first use.
///
/// Lazy creation keeps the registry in step with catalog reloads: a provider
/// added by reload gets a fresh breaker on its first dispatch, and breakers
/// for removed providers simply stop being consulted.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// The breaker for a provider, creating it closed if absent.
    pub fn breaker(&self, provider_id: &str) -> CircuitBreaker {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        breakers
            .entry(provider_id.to_string())
            .or_insert_with(|| CircuitBreaker::new(provider_id, self.config.clone()))
            .clone()
    }

    /// Status of one provider's breaker, `None` if it has never been used.
    pub fn status(&self, provider_id: &str) -> Option<CircuitStatus> {
        let breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        breakers.get(provider_id).map(|b| b.status())
    }

    /// Statuses of every breaker created so far.
    pub fn statuses(&self) -> HashMap<String, CircuitStatus> {
        let breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        breakers
            .iter()
            .map(|(id, b)| (id.clone(), b.status()))
            .collect()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
