//! # Model/Provider Health Tracking Module
//!
//! This module maintains real-time health state for every
//! (canonical model, provider) pair the gateway has routed to. It feeds the
//! selector with availability decisions and the registry with latency and
//! success-rate data for the `latency` and `balanced` strategies.
//!
//! ## Overview
//!
//! The health tracking system provides:
//! - **Failure Detection**: Automatically detecting when a provider is
//!   failing for a specific model
//! - **Failure Isolation**: A circuit per (model, provider) pair, so one
//!   bad pairing never blocks the provider's other models
//! - **Automatic Recovery**: Timed probing that lets providers come back
//!   without operator intervention
//! - **Slow-Response Detection**: Degraded-but-not-failing providers are
//!   taken out of rotation before they hurt tail latency
//! - **Latency Tracking**: A bounded rolling sample ring feeding the
//!   latency-based selection strategies
//! - **Optimistic Defaults**: Never-seen pairs are available, so new
//!   providers are not pre-blocked
//!
//! ## Circuit Breaker States
//!
//! Each pair's circuit operates in three states:
//!
//! ### Closed State (Normal Operation)
//! - All requests are allowed through
//! - Consecutive failures count up; hitting the failure threshold opens
//!   the circuit
//! - A success counts the failure streak back down
//! - Consecutive slow responses are tracked; reaching the slow-response
//!   limit opens the circuit with the slow event standing in as the failure
//!
//! ### Open State (Failure Detected)
//! - All requests are blocked; the pair never appears in a provider plan
//! - After the recovery timeout, the next availability check transitions
//!   to half-open and admits the caller as the first probe
//!
//! ### Half-Open State (Testing Recovery)
//! - Requests are allowed while recovery is evaluated
//! - Reaching the success threshold closes the circuit, clears the failure
//!   streak, and empties the latency ring
//! - Any failure sends the pair straight back to open
//! - Slow successes still count toward recovery: a provider that is slow
//!   but reliable is allowed to come back, only real failures keep it out
//!
//! ## Configuration
//!
//! Circuit behavior is tuned through [`HealthConfig`]:
//! - **Failure Threshold**: consecutive failures before opening (default 5)
//! - **Recovery Timeout**: wait before probing an open circuit (default 300s)
//! - **Success Threshold**: half-open successes needed to close (default 3)
//! - **Slow-Response Threshold**: latency that counts as slow (default 30s)
//! - **Slow-Response Limit**: consecutive slow responses that open a
//!   closed circuit (default 3)
//! - **Latency Window**: samples kept in the rolling ring (default 100)
//!
//! ## Usage Examples
//!
//! ### Basic Health Tracking
//!
//! ```rust
//! use fleetroute_core::health::{HealthTracker, HealthConfig};
//!
//! let tracker = HealthTracker::new(HealthConfig::default());
//!
//! // Record outcomes as requests complete
//! tracker.record_success("llama-3.3-70b", "fireworks", 420);
//! tracker.record_failure("llama-3.3-70b", "openrouter");
//!
//! // The selector asks before dispatching
//! assert!(tracker.is_available("llama-3.3-70b", "fireworks"));
//! ```
//!
//! ### Inspecting a Pair's Health
//!
//! ```rust
//! use fleetroute_core::health::{CircuitState, HealthTracker};
//!
//! let tracker = HealthTracker::default();
//! tracker.record_success("llama-3.3-70b", "fireworks", 420);
//!
//! let view = tracker.snapshot("llama-3.3-70b", "fireworks").unwrap();
//! println!("state: {:?}", view.state);
//! println!("success rate: {:.2}%", view.success_rate * 100.0);
//! println!("avg latency: {:?}ms", view.average_latency_ms);
//!
//! assert_eq!(tracker.state("llama-3.3-70b", "fireworks"), CircuitState::Closed);
//! ```
//!
//! ### Custom Thresholds
//!
//! ```rust
//! use std::time::Duration;
//! use fleetroute_core::health::{HealthTracker, HealthConfig};
//!
//! // A twitchier breaker for a latency-sensitive deployment
//! let tracker = HealthTracker::new(HealthConfig {
//!     failure_threshold: 3,
//!     recovery_timeout: Duration::from_secs(60),
//!     slow_response_threshold: Duration::from_secs(10),
//!     ..Default::default()
//! });
//! ```
//!
//! ### Resetting State
//!
//! ```rust
//! use fleetroute_core::health::HealthTracker;
//!
//! let tracker = HealthTracker::default();
//! tracker.record_failure("llama-3.3-70b", "openrouter");
//!
//! // Operator tooling can return a pair (or everything) to the
//! // optimistic default
//! tracker.reset("llama-3.3-70b", "openrouter");
//! tracker.reset_all();
//! ```
//!
//! ## Best Practices
//!
//! - **Record Every Outcome**: the breaker is only as good as its inputs;
//!   the selector records both successes and failures on every attempt
//! - **Do Not Record Cancellations**: a caller walking away says nothing
//!   about provider health
//! - **Tune Per Deployment**: the defaults suit interactive chat traffic;
//!   batch workloads tolerate much higher slow-response thresholds
//! - **Watch State Transitions**: open/close transitions are logged at
//!   warn/info and worth alerting on
//! - **Prefer Reset Over Restart**: [`HealthTracker::reset`] clears one
//!   pair without losing the rest of the fleet's history
//!
//! ## Performance Considerations
//!
//! - **Sharded State**: entries live in a sharded map; the hot path
//!   (`is_available`, `record_success`, `record_failure`) touches only the
//!   shard owning the pair being updated
//! - **Bounded Memory**: each entry keeps a fixed-size latency ring; the
//!   tracker grows with the number of distinct pairs, not with traffic
//! - **No Locks Across I/O**: the tracker is consulted before and after a
//!   provider call, never during one

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests allowed
    Closed,
    /// Failing, requests blocked until the recovery timeout
    Open,
    /// Testing recovery, requests allowed
    HalfOpen,
}

/// Tunables for the per-pair circuit breaker.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Time an open circuit waits before allowing a probe
    pub recovery_timeout: Duration,
    /// Successes required in half-open to close the circuit
    pub success_threshold: u32,
    /// Latency above which a response counts as slow
    pub slow_response_threshold: Duration,
    /// Consecutive slow responses that open a closed circuit
    pub slow_response_limit: u32,
    /// Number of latency samples kept in the rolling ring
    pub latency_window: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(300),
            success_threshold: 3,
            slow_response_threshold: Duration::from_secs(30),
            slow_response_limit: 3,
            latency_window: 100,
        }
    }
}

/// Mutable health state for one (model, provider) pair.
#[derive(Debug)]
struct HealthEntry {
    state: CircuitState,
    /// Lifetime totals
    successes: u64,
    failures: u64,
    /// Consecutive failures counting toward the open transition
    failure_streak: u32,
    /// Successes observed in half-open
    recovery_successes: u32,
    /// Consecutive slow responses in closed
    slow_streak: u32,
    latencies: VecDeque<u64>,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    /// Monotonic stamp driving the open -> half-open transition
    opened_at: Option<Instant>,
}

impl Default for HealthEntry {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            successes: 0,
            failures: 0,
            failure_streak: 0,
            recovery_successes: 0,
            slow_streak: 0,
            latencies: VecDeque::new(),
            last_success: None,
            last_failure: None,
            opened_at: None,
        }
    }
}

impl HealthEntry {
    fn push_latency(&mut self, latency_ms: u64, window: usize) {
        if self.latencies.len() >= window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency_ms);
    }

    fn average_latency_ms(&self) -> Option<f64> {
        if self.latencies.is_empty() {
            return None;
        }
        let sum: u64 = self.latencies.iter().sum();
        Some(sum as f64 / self.latencies.len() as f64)
    }

    fn success_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            1.0
        } else {
            self.successes as f64 / total as f64
        }
    }
}

/// Read-only view of one pair's health, for observability and selection.
#[derive(Debug, Clone, Serialize)]
pub struct HealthView {
    pub model: String,
    pub provider: String,
    pub state: CircuitState,
    pub successes: u64,
    pub failures: u64,
    pub failure_streak: u32,
    pub slow_streak: u32,
    pub success_rate: f64,
    pub average_latency_ms: Option<f64>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

/// Process-wide health tracker.
///
/// Entries are created lazily on the first recorded event and kept for the
/// process lifetime (or until [`HealthTracker::reset`]). The map is sharded;
/// the hot path only touches the shard owning the pair being updated.
pub struct HealthTracker {
    config: HealthConfig,
    entries: DashMap<(String, String), HealthEntry>,
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Record a successful call and its wall-clock latency.
    pub fn record_success(&self, model: &str, provider: &str, latency_ms: u64) {
        let key = (model.to_string(), provider.to_string());
        let mut entry = self.entries.entry(key).or_default();

        entry.successes += 1;
        entry.last_success = Some(Utc::now());
        entry.push_latency(latency_ms, self.config.latency_window);

        let slow = latency_ms as u128 > self.config.slow_response_threshold.as_millis();

        match entry.state {
            CircuitState::HalfOpen => {
                // Recovery is gated on real failures only; slow successes
                // still count.
                entry.recovery_successes += 1;
                if slow {
                    tracing::info!(
                        model,
                        provider,
                        latency_ms,
                        "slow response in half-open counted toward recovery ({}/{})",
                        entry.recovery_successes,
                        self.config.success_threshold
                    );
                }
                if entry.recovery_successes >= self.config.success_threshold {
                    entry.state = CircuitState::Closed;
                    entry.failure_streak = 0;
                    entry.slow_streak = 0;
                    entry.latencies.clear();
                    tracing::info!(model, provider, "circuit recovered: half-open -> closed");
                }
            }
            CircuitState::Closed => {
                if slow {
                    entry.slow_streak += 1;
                    tracing::warn!(
                        model,
                        provider,
                        latency_ms,
                        "slow response ({}/{})",
                        entry.slow_streak,
                        self.config.slow_response_limit
                    );
                    if entry.slow_streak >= self.config.slow_response_limit {
                        entry.state = CircuitState::Open;
                        entry.opened_at = Some(Instant::now());
                        tracing::warn!(
                            model,
                            provider,
                            "circuit opened after {} consecutive slow responses",
                            entry.slow_streak
                        );
                        return;
                    }
                } else {
                    entry.slow_streak = 0;
                }
                entry.failure_streak = entry.failure_streak.saturating_sub(1);
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened may still land
                // here; count it but leave the state machine alone.
                tracing::debug!(model, provider, "success recorded while circuit open");
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, model: &str, provider: &str) {
        let key = (model.to_string(), provider.to_string());
        let mut entry = self.entries.entry(key).or_default();

        entry.failures += 1;
        entry.failure_streak += 1;
        entry.slow_streak = 0;
        entry.last_failure = Some(Utc::now());

        match entry.state {
            CircuitState::Closed => {
                if entry.failure_streak >= self.config.failure_threshold {
                    entry.state = CircuitState::Open;
                    entry.opened_at = Some(Instant::now());
                    tracing::warn!(
                        model,
                        provider,
                        "circuit opened after {} consecutive failures",
                        entry.failure_streak
                    );
                }
            }
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.opened_at = Some(Instant::now());
                tracing::warn!(model, provider, "probe failed: half-open -> open");
            }
            CircuitState::Open => {
                entry.opened_at = Some(Instant::now());
            }
        }
    }

    /// Whether the pair may receive traffic right now.
    ///
    /// Unknown pairs are available. An open circuit whose recovery timeout
    /// has elapsed transitions to half-open here and admits the caller as
    /// the first probe.
    pub fn is_available(&self, model: &str, provider: &str) -> bool {
        let key = (model.to_string(), provider.to_string());
        let Some(mut entry) = self.entries.get_mut(&key) else {
            return true;
        };

        match entry.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = entry
                    .opened_at
                    .is_some_and(|at| at.elapsed() > self.config.recovery_timeout);
                if recovered {
                    entry.state = CircuitState::HalfOpen;
                    entry.recovery_successes = 0;
                    tracing::info!(model, provider, "recovery timeout elapsed: open -> half-open");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Current circuit state without side effects. Unknown pairs are closed.
    pub fn state(&self, model: &str, provider: &str) -> CircuitState {
        self.entries
            .get(&(model.to_string(), provider.to_string()))
            .map(|e| e.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Rolling average latency over the sample ring.
    pub fn average_latency_ms(&self, model: &str, provider: &str) -> Option<f64> {
        self.entries
            .get(&(model.to_string(), provider.to_string()))
            .and_then(|e| e.average_latency_ms())
    }

    /// Lifetime success rate; pairs with no data report 1.0.
    pub fn success_rate(&self, model: &str, provider: &str) -> f64 {
        self.entries
            .get(&(model.to_string(), provider.to_string()))
            .map(|e| e.success_rate())
            .unwrap_or(1.0)
    }

    /// Snapshot one pair's health, if it has ever been observed.
    pub fn snapshot(&self, model: &str, provider: &str) -> Option<HealthView> {
        self.entries
            .get(&(model.to_string(), provider.to_string()))
            .map(|entry| HealthView {
                model: model.to_string(),
                provider: provider.to_string(),
                state: entry.state,
                successes: entry.successes,
                failures: entry.failures,
                failure_streak: entry.failure_streak,
                slow_streak: entry.slow_streak,
                success_rate: entry.success_rate(),
                average_latency_ms: entry.average_latency_ms(),
                last_success: entry.last_success,
                last_failure: entry.last_failure,
            })
    }

    /// Snapshot every tracked pair, for the observability sink.
    pub fn snapshot_all(&self) -> Vec<HealthView> {
        self.entries
            .iter()
            .map(|item| {
                let (model, provider) = item.key();
                let entry = item.value();
                HealthView {
                    model: model.clone(),
                    provider: provider.clone(),
                    state: entry.state,
                    successes: entry.successes,
                    failures: entry.failures,
                    failure_streak: entry.failure_streak,
                    slow_streak: entry.slow_streak,
                    success_rate: entry.success_rate(),
                    average_latency_ms: entry.average_latency_ms(),
                    last_success: entry.last_success,
                    last_failure: entry.last_failure,
                }
            })
            .collect()
    }

    /// Number of pairs with recorded history.
    pub fn tracked_pairs(&self) -> usize {
        self.entries.len()
    }

    /// Drop one pair's history, returning it to the optimistic default.
    pub fn reset(&self, model: &str, provider: &str) {
        self.entries
            .remove(&(model.to_string(), provider.to_string()));
    }

    /// Drop all history.
    pub fn reset_all(&self) {
        self.entries.clear();
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_recovery_config() -> HealthConfig {
        HealthConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(50),
            success_threshold: 2,
            slow_response_threshold: Duration::from_millis(500),
            slow_response_limit: 3,
            latency_window: 5,
        }
    }

    #[test]
    fn unknown_pairs_are_available() {
        let tracker = HealthTracker::default();
        assert!(tracker.is_available("never-seen", "nobody"));
        assert_eq!(tracker.state("never-seen", "nobody"), CircuitState::Closed);
        assert_eq!(tracker.success_rate("never-seen", "nobody"), 1.0);
    }

    #[test]
    fn circuit_opens_after_consecutive_failures() {
        let tracker = HealthTracker::new(fast_recovery_config());
        tracker.record_failure("m", "p");
        tracker.record_failure("m", "p");
        assert!(tracker.is_available("m", "p"));
        tracker.record_failure("m", "p");
        assert_eq!(tracker.state("m", "p"), CircuitState::Open);
        assert!(!tracker.is_available("m", "p"));
    }

    #[test]
    fn success_counts_the_failure_streak_down() {
        let tracker = HealthTracker::new(fast_recovery_config());
        tracker.record_failure("m", "p");
        tracker.record_failure("m", "p");
        tracker.record_success("m", "p", 10);
        // Streak back at 1; two more failures needed to open.
        tracker.record_failure("m", "p");
        tracker.record_failure("m", "p");
        assert_eq!(tracker.state("m", "p"), CircuitState::Open);
    }

    #[test]
    fn open_circuit_probes_after_recovery_timeout() {
        let tracker = HealthTracker::new(fast_recovery_config());
        for _ in 0..3 {
            tracker.record_failure("m", "p");
        }
        assert!(!tracker.is_available("m", "p"));

        std::thread::sleep(Duration::from_millis(80));
        assert!(tracker.is_available("m", "p"));
        assert_eq!(tracker.state("m", "p"), CircuitState::HalfOpen);

        tracker.record_success("m", "p", 10);
        assert_eq!(tracker.state("m", "p"), CircuitState::HalfOpen);
        tracker.record_success("m", "p", 10);
        assert_eq!(tracker.state("m", "p"), CircuitState::Closed);
        // Latency ring is emptied by the recovery.
        assert_eq!(tracker.average_latency_ms("m", "p"), None);
    }

    #[test]
    fn half_open_failure_reopens() {
        let tracker = HealthTracker::new(fast_recovery_config());
        for _ in 0..3 {
            tracker.record_failure("m", "p");
        }
        std::thread::sleep(Duration::from_millis(80));
        assert!(tracker.is_available("m", "p"));
        tracker.record_failure("m", "p");
        assert_eq!(tracker.state("m", "p"), CircuitState::Open);
        assert!(!tracker.is_available("m", "p"));
    }

    #[test]
    fn consecutive_slow_responses_open_the_circuit() {
        let tracker = HealthTracker::new(fast_recovery_config());
        tracker.record_success("m", "p", 600);
        tracker.record_success("m", "p", 700);
        assert_eq!(tracker.state("m", "p"), CircuitState::Closed);
        tracker.record_success("m", "p", 800);
        assert_eq!(tracker.state("m", "p"), CircuitState::Open);
    }

    #[test]
    fn fast_response_resets_the_slow_streak() {
        let tracker = HealthTracker::new(fast_recovery_config());
        tracker.record_success("m", "p", 600);
        tracker.record_success("m", "p", 700);
        tracker.record_success("m", "p", 10);
        tracker.record_success("m", "p", 600);
        tracker.record_success("m", "p", 700);
        assert_eq!(tracker.state("m", "p"), CircuitState::Closed);
    }

    #[test]
    fn slow_successes_still_recover_a_half_open_circuit() {
        let tracker = HealthTracker::new(fast_recovery_config());
        for _ in 0..3 {
            tracker.record_failure("m", "p");
        }
        std::thread::sleep(Duration::from_millis(80));
        assert!(tracker.is_available("m", "p"));

        // Both probes exceed the slow threshold, recovery proceeds anyway.
        tracker.record_success("m", "p", 900);
        tracker.record_success("m", "p", 900);
        assert_eq!(tracker.state("m", "p"), CircuitState::Closed);
    }

    #[test]
    fn latency_ring_is_bounded() {
        let tracker = HealthTracker::new(fast_recovery_config());
        for latency in [10, 20, 30, 40, 50, 60, 70] {
            tracker.record_success("m", "p", latency);
        }
        // Window of 5 keeps the most recent samples: 30..=70.
        assert_eq!(tracker.average_latency_ms("m", "p"), Some(50.0));
    }

    #[test]
    fn pairs_are_independent() {
        let tracker = HealthTracker::new(fast_recovery_config());
        for _ in 0..3 {
            tracker.record_failure("m", "a");
        }
        tracker.record_success("m", "b", 10);
        assert!(!tracker.is_available("m", "a"));
        assert!(tracker.is_available("m", "b"));
        assert!(tracker.is_available("other-model", "a"));
    }

    #[test]
    fn reset_returns_pair_to_default() {
        let tracker = HealthTracker::new(fast_recovery_config());
        for _ in 0..3 {
            tracker.record_failure("m", "p");
        }
        assert!(!tracker.is_available("m", "p"));
        tracker.reset("m", "p");
        assert!(tracker.is_available("m", "p"));
        assert!(tracker.snapshot("m", "p").is_none());
    }
}
