//! Rate governor - per-provider request and token throughput limits.
//!
//! Each provider gets a [`RateWindow`] holding two token buckets sized to
//! the catalog's `requests_per_minute` and `tokens_per_minute`, refilled
//! continuously. Before dispatch the coordinator asks [`RateGovernor::can_proceed`];
//! a denial means the provider is skipped for this request without touching
//! the network and without consuming any capacity.
//!
//! The check is all-or-nothing: one request slot plus the token reservation
//! are taken under a single lock, or nothing is. A reservation covers the
//! estimated prompt plus a response allowance, settled against the real
//! usage in [`RateGovernor::record_completion`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tracing::debug;

use crate::catalog::ModelDescriptor;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Tokens reserved on top of the prompt estimate for the response.
    ///
    /// Default: 1000
    pub response_reserve: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            response_reserve: 1000,
        }
    }
}

// ============================================================================
// Token Bucket
// ============================================================================

/// Continuously refilling bucket; capacity equals the per-minute limit, so a
/// full bucket represents one idle minute of headroom.
#[derive(Debug)]
struct TokenBucket {
    level: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(per_minute: u32) -> Self {
        let capacity = per_minute as f64;
        Self {
            level: capacity,
            capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.level = (self.level + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    fn credit(&mut self, amount: f64) {
        self.level = (self.level + amount).min(self.capacity);
    }

    fn debit(&mut self, amount: f64) {
        self.level = (self.level - amount).max(0.0);
    }
}

// ============================================================================
// Rate Window
// ============================================================================

/// Request and token buckets for one provider, updated together.
#[derive(Debug)]
struct RateWindow {
    requests: TokenBucket,
    tokens: TokenBucket,
}

impl RateWindow {
    fn new(requests_per_minute: u32, tokens_per_minute: u32) -> Self {
        Self {
            requests: TokenBucket::new(requests_per_minute),
            tokens: TokenBucket::new(tokens_per_minute),
        }
    }

    /// Reserve one request and `token_cost` tokens, or nothing at all.
    fn try_reserve(&mut self, token_cost: f64) -> bool {
        self.requests.refill();
        self.tokens.refill();
        if self.requests.level >= 1.0 && self.tokens.level >= token_cost {
            self.requests.level -= 1.0;
            self.tokens.level -= token_cost;
            true
        } else {
            false
        }
    }

    fn matches(&self, requests_per_minute: u32, tokens_per_minute: u32) -> bool {
        self.requests.capacity == requests_per_minute as f64
            && self.tokens.capacity == tokens_per_minute as f64
    }
}

// ============================================================================
// Rate Governor
// ============================================================================

/// All provider windows behind one lock.
///
/// The key space is one entry per configured provider and every operation is
/// a short check-and-update, so a single mutex is enough; nothing here is
/// held across an await.
pub struct RateGovernor {
    config: GovernorConfig,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl RateGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Total tokens reserved for a given prompt estimate.
    fn reservation(&self, estimated_tokens: usize) -> f64 {
        (estimated_tokens + self.config.response_reserve) as f64
    }

    /// Whether a dispatch to this provider may proceed right now.
    ///
    /// On `true` the capacity is already reserved. On `false` nothing was
    /// consumed; the caller should skip the provider. A reservation larger
    /// than the provider's whole per-minute token limit can never succeed.
    pub fn can_proceed(&self, descriptor: &ModelDescriptor, estimated_tokens: usize) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows
            .entry(descriptor.provider_id.clone())
            .or_insert_with(|| {
                RateWindow::new(descriptor.requests_per_minute, descriptor.tokens_per_minute)
            });

        // Catalog reloads can change the limits; rebuild the window when
        // they no longer match.
        if !window.matches(descriptor.requests_per_minute, descriptor.tokens_per_minute) {
            debug!(provider = %descriptor.provider_id, "rate limits changed, window rebuilt");
            *window = RateWindow::new(descriptor.requests_per_minute, descriptor.tokens_per_minute);
        }

        let allowed = window.try_reserve(self.reservation(estimated_tokens));
        if !allowed {
            debug!(
                provider = %descriptor.provider_id,
                estimated_tokens,
                "rate governor denied dispatch"
            );
        }
        allowed
    }

    /// Settle a finished call against its reservation.
    ///
    /// `estimated_tokens` must be the value passed to `can_proceed`;
    /// `actual_tokens` is the provider-reported total. Unused reservation is
    /// refunded, overrun is debited.
    pub fn record_completion(
        &self,
        provider_id: &str,
        estimated_tokens: usize,
        actual_tokens: usize,
    ) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let Some(window) = windows.get_mut(provider_id) else {
            return;
        };
        let reserved = self.reservation(estimated_tokens);
        let actual = actual_tokens as f64;
        if actual > reserved {
            window.tokens.debit(actual - reserved);
        } else {
            window.tokens.credit(reserved - actual);
        }
    }

    /// Refund a reservation whose call never produced a completion, e.g. a
    /// cancelled attempt. The request slot stays consumed.
    pub fn release(&self, provider_id: &str, estimated_tokens: usize) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(window) = windows.get_mut(provider_id) {
            window.tokens.credit(self.reservation(estimated_tokens));
        }
    }

    /// Remaining (requests, tokens) for a provider, `None` if never used.
    pub fn available(&self, provider_id: &str) -> Option<(f64, f64)> {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.get_mut(provider_id).map(|w| {
            w.requests.refill();
            w.tokens.refill();
            (w.requests.level, w.tokens.level)
        })
    }
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new(GovernorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ComplexityTier;
    use std::collections::BTreeSet;
    use std::thread::sleep;
    use std::time::Duration;

    fn descriptor(provider: &str, rpm: u32, tpm: u32) -> ModelDescriptor {
        ModelDescriptor {
            provider_id: provider.to_string(),
            model_name: "test-model".to_string(),
            cost_per_token: 0.0,
            max_tokens: 8192,
            temperature: 0.7,
            capabilities: BTreeSet::new(),
            priority: 100,
            complexity_tier: ComplexityTier::Simple,
            tokens_per_minute: tpm,
            requests_per_minute: rpm,
            request_timeout: None,
        }
    }

    /// Governor with no response reserve, so token math in tests is exact.
    fn bare_governor() -> RateGovernor {
        RateGovernor::new(GovernorConfig {
            response_reserve: 0,
        })
    }

    #[test]
    fn test_allows_within_limits() {
        let governor = RateGovernor::default();
        let d = descriptor("openai", 100, 100_000);
        assert!(governor.can_proceed(&d, 500));
    }

    #[test]
    fn test_denies_when_tokens_exhausted() {
        let governor = bare_governor();
        let d = descriptor("openai", 100, 1000);
        assert!(governor.can_proceed(&d, 900));
        assert!(!governor.can_proceed(&d, 900));
    }

    #[test]
    fn test_denial_consumes_nothing() {
        let governor = bare_governor();
        let d = descriptor("openai", 100, 1000);
        assert!(governor.can_proceed(&d, 600));
        let before = governor.available("openai").unwrap();

        // Denied: needs 600, only 400 left.
        assert!(!governor.can_proceed(&d, 600));
        let after = governor.available("openai").unwrap();

        // No request slot and no tokens were taken by the denial.
        assert_eq!(before.0.round(), after.0.round());
        assert_eq!(before.1.round(), after.1.round());

        // A request that fits still goes through.
        assert!(governor.can_proceed(&d, 300));
    }

    #[test]
    fn test_request_slots_run_out_independently() {
        let governor = bare_governor();
        let d = descriptor("openai", 2, 1_000_000);
        assert!(governor.can_proceed(&d, 10));
        assert!(governor.can_proceed(&d, 10));
        // Tokens abound, but both request slots are gone.
        assert!(!governor.can_proceed(&d, 10));
    }

    #[test]
    fn test_refills_over_time() {
        let governor = bare_governor();
        // 600 rpm = 10 request slots per second.
        let d = descriptor("openai", 600, 1_000_000);
        for _ in 0..600 {
            assert!(governor.can_proceed(&d, 0));
        }
        assert!(!governor.can_proceed(&d, 0));

        sleep(Duration::from_millis(300));
        assert!(governor.can_proceed(&d, 0));
    }

    #[test]
    fn test_completion_refunds_unused_reservation() {
        let governor = bare_governor();
        let d = descriptor("openai", 100, 10_000);
        assert!(governor.can_proceed(&d, 4000));
        let (_, after_reserve) = governor.available("openai").unwrap();

        // Only 500 tokens were actually spent; 3500 come back.
        governor.record_completion("openai", 4000, 500);
        let (_, after_settle) = governor.available("openai").unwrap();
        assert!(after_settle > after_reserve + 3000.0);
    }

    #[test]
    fn test_completion_debits_overrun() {
        let governor = bare_governor();
        let d = descriptor("openai", 100, 10_000);
        assert!(governor.can_proceed(&d, 1000));
        let (_, after_reserve) = governor.available("openai").unwrap();

        governor.record_completion("openai", 1000, 3000);
        let (_, after_settle) = governor.available("openai").unwrap();
        assert!(after_settle < after_reserve - 1500.0);
    }

    #[test]
    fn test_release_refunds_tokens_only() {
        let governor = bare_governor();
        let d = descriptor("openai", 2, 10_000);
        assert!(governor.can_proceed(&d, 5000));
        governor.release("openai", 5000);

        let (requests, tokens) = governor.available("openai").unwrap();
        assert_eq!(tokens.round(), 10_000.0);
        // The request slot is not refunded.
        assert_eq!(requests.round(), 1.0);
    }

    #[test]
    fn test_providers_are_isolated() {
        let governor = bare_governor();
        let a = descriptor("provider-a", 1, 1_000_000);
        let b = descriptor("provider-b", 1, 1_000_000);

        assert!(governor.can_proceed(&a, 10));
        assert!(!governor.can_proceed(&a, 10));
        assert!(governor.can_proceed(&b, 10));
    }

    #[test]
    fn test_window_rebuilt_when_limits_change() {
        let governor = bare_governor();
        let d = descriptor("openai", 1, 1000);
        assert!(governor.can_proceed(&d, 100));
        assert!(!governor.can_proceed(&d, 100));

        // Reload raised the limits; the next check sees fresh capacity.
        let raised = descriptor("openai", 100, 100_000);
        assert!(governor.can_proceed(&raised, 100));
    }

    #[test]
    fn test_oversized_reservation_never_passes() {
        let governor = bare_governor();
        let d = descriptor("openai", 100, 1000);
        assert!(!governor.can_proceed(&d, 2000));
    }

    #[test]
    fn test_available_none_for_unknown_provider() {
        let governor = RateGovernor::default();
        assert!(governor.available("never-seen").is_none());
    }

    #[test]
    fn test_response_reserve_is_added() {
        let governor = RateGovernor::new(GovernorConfig {
            response_reserve: 1000,
        });
        let d = descriptor("openai", 100, 1100);
        // 200 estimated + 1000 reserve = 1200 > 1100 capacity.
        assert!(!governor.can_proceed(&d, 200));
        // 50 estimated + 1000 reserve fits.
        assert!(governor.can_proceed(&d, 50));
    }
}
