//! # Provider Selector Module
//!
//! This module executes one logical request across an ordered chain of
//! provider bindings with automatic failover. The actual provider call is
//! a first-class closure supplied by the caller. The selector owns *which*
//! providers are tried, *in what order*, and *when to give up*, nothing
//! else.
//!
//! ## Overview
//!
//! The selector provides:
//! - **Health-Aware Planning**: circuit-open bindings never enter the
//!   chain; a caller-preferred provider is moved to the head
//! - **Strict Failover Ordering**: attempts run sequentially in plan
//!   order, and the attempts list preserves that order
//! - **Per-Category Retry Policy**: which errors move to the next binding
//!   is decided by error category, not per provider
//! - **Deadline Handling**: a caller-supplied wall-clock budget that
//!   distinguishes client cancellation from a blown deadline
//! - **Health Bookkeeping**: every attempt records its success or failure
//!   and its measured latency into the tracker
//!
//! ## Algorithm
//!
//! 1. Resolve the caller's model identifier through the registry; unknown
//!    identifiers fail immediately with no health side effects.
//! 2. Ask the registry for the ordered, filtered plan (circuit-open
//!    bindings are already dropped, a preferred provider is already at the
//!    head).
//! 3. Cap the plan at `max_retries`.
//! 4. Try each binding strictly in order, measuring wall-clock latency and
//!    recording success/failure into the health tracker per attempt.
//! 5. Stop at the first success, at a non-failover-eligible error, at the
//!    caller's deadline, or when the plan is exhausted.
//!
//! Failover eligibility is per error category: transport errors, 5xx,
//! 408/425/429, and provider-scoped 401/403/404 move to the next binding;
//! 400/422 are the caller's problem and stop the chain.
//!
//! ## Deadlines
//!
//! Each attempt runs under `min(provider_timeout, remaining deadline)`.
//! An expiry inside the provider's own budget is a provider failure and the
//! chain continues; an expiry caused by the caller's deadline terminates
//! the chain, classified as a cancellation (no health failure) when the
//! caller's total budget was smaller than the provider timeout to begin
//! with, and as a deadline-exceeded failure otherwise.
//!
//! ## Usage Examples
//!
//! ### Basic Failover Execution
//!
//! ```rust
//! use fleetroute_core::selector::{ExecuteOptions, FailoverSelector, SelectorConfig};
//!
//! let selector = FailoverSelector::new(registry, SelectorConfig::default());
//!
//! let outcome = selector
//!     .execute("llama-3.3-70b", &ExecuteOptions::default(), |provider, native_id| async move {
//!         // Dispatch to the provider adapter for `provider`, addressing
//!         // the model by its provider-native id.
//!         adapters.get(&provider).unwrap().complete(&native_id, request.clone()).await
//!     })
//!     .await;
//!
//! if outcome.success {
//!     println!("served by {}", outcome.provider.unwrap());
//! }
//! ```
//!
//! ### Routing Hints and Deadlines
//!
//! ```rust
//! use std::time::Duration;
//! use fleetroute_core::registry::SelectionStrategy;
//! use fleetroute_core::selector::ExecuteOptions;
//!
//! let options = ExecuteOptions {
//!     strategy: Some(SelectionStrategy::Cost),
//!     preferred_provider: Some("fireworks".to_string()),
//!     required_features: vec!["streaming".to_string()],
//!     deadline: Some(Duration::from_secs(30)),
//!     ..Default::default()
//! };
//! let outcome = selector.execute("llama-3.3-70b", &options, run).await;
//! ```
//!
//! ### Inspecting the Attempt Trail
//!
//! ```rust
//! use fleetroute_core::error::ErrorKind;
//!
//! let outcome = selector.execute("llama-3.3-70b", &options, run).await;
//!
//! for attempt in &outcome.attempts {
//!     println!(
//!         "{} ({}ms) -> {}",
//!         attempt.provider,
//!         attempt.duration_ms,
//!         if attempt.success { "ok" } else { "failed" },
//!     );
//! }
//!
//! match outcome.error_kind {
//!     Some(ErrorKind::UnknownModel) => println!("bad model id"),
//!     Some(ErrorKind::NoAvailableProvider) => println!("every circuit is open"),
//!     Some(kind) => println!("failed as {kind}"),
//!     None => println!("served"),
//! }
//! ```
//!
//! ## Best Practices
//!
//! - **Keep `run` Cheap to Rebuild**: it is called once per binding; clone
//!   the request inside the closure, not around it
//! - **Cap Retries Deliberately**: every extra attempt is user-visible
//!   latency; three is plenty when the registry orders the plan well
//! - **Pass Deadlines Through**: without one, a hung provider consumes the
//!   full per-attempt timeout before failover starts
//! - **Surface the Attempt Trail**: the attempts list is the debugging
//!   record; persist it with the outcome rather than discarding it
//! - **Never Hold Locks in `run`**: the selector itself holds no registry
//!   or tracker lock across the provider call, and the closure should not
//!   either

use crate::error::{truncate_message, ErrorKind, ProviderError};
use crate::health::HealthTracker;
use crate::registry::{ModelRegistry, SelectionOptions, SelectionStrategy};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Selector tunables.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Maximum number of bindings tried per request
    pub max_retries: usize,
    /// Default ranking strategy when the caller does not pick one
    pub strategy: SelectionStrategy,
    /// Per-attempt time budget
    pub provider_timeout: Duration,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            strategy: SelectionStrategy::Priority,
            provider_timeout: Duration::from_secs(120),
        }
    }
}

/// Per-request execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Override the configured ranking strategy
    pub strategy: Option<SelectionStrategy>,
    /// Provider to try first when it survives filtering
    pub preferred_provider: Option<String>,
    /// Features every candidate binding must support
    pub required_features: Vec<String>,
    /// Ceiling on input price, per 1K input tokens
    pub max_cost_per_1k_input: Option<f64>,
    /// Providers never to try
    pub excluded: Vec<String>,
    /// Total wall-clock budget for the whole chain
    pub deadline: Option<Duration>,
}

/// One invocation of the run closure against one binding.
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    pub provider: String,
    pub native_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one `execute` call.
///
/// `attempts` preserves try order; on success the last attempt is the one
/// that produced `response`.
#[derive(Debug)]
pub struct ExecutionOutcome<R> {
    pub success: bool,
    pub canonical_id: Option<String>,
    pub provider: Option<String>,
    pub native_id: Option<String>,
    pub response: Option<R>,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    pub attempts: Vec<Attempt>,
}

impl<R> ExecutionOutcome<R> {
    fn failed(
        canonical_id: Option<String>,
        kind: ErrorKind,
        message: impl Into<String>,
        attempts: Vec<Attempt>,
    ) -> Self {
        Self {
            success: false,
            canonical_id,
            provider: None,
            native_id: None,
            response: None,
            error_kind: Some(kind),
            error: Some(message.into()),
            attempts,
        }
    }
}

/// Health-aware failover executor.
pub struct FailoverSelector {
    registry: Arc<ModelRegistry>,
    health: Arc<HealthTracker>,
    config: SelectorConfig,
}

impl FailoverSelector {
    pub fn new(registry: Arc<ModelRegistry>, config: SelectorConfig) -> Self {
        let health = registry.health().clone();
        Self {
            registry,
            health,
            config,
        }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Execute `run` against the ordered provider plan for `model_id`.
    ///
    /// `run` receives `(provider_slug, native_model_id)` and performs the
    /// actual provider call; the selector measures it, records health, and
    /// decides whether a failure moves on to the next binding.
    pub async fn execute<R, F, Fut>(
        &self,
        model_id: &str,
        options: &ExecuteOptions,
        run: F,
    ) -> ExecutionOutcome<R>
    where
        F: Fn(String, String) -> Fut,
        Fut: Future<Output = Result<R, ProviderError>>,
    {
        let Some(canonical_id) = self.registry.resolve(model_id).await else {
            tracing::debug!(model = %model_id, "model not found in registry");
            return ExecutionOutcome::failed(
                None,
                ErrorKind::UnknownModel,
                format!("model {model_id} not found"),
                Vec::new(),
            );
        };

        let strategy = options.strategy.unwrap_or(self.config.strategy);
        let selection = SelectionOptions {
            preferred: options.preferred_provider.clone(),
            required_features: options.required_features.clone(),
            max_cost_per_1k_input: options.max_cost_per_1k_input,
            excluded: options.excluded.clone(),
        };

        let mut plan = self
            .registry
            .select_providers(&canonical_id, strategy, &selection)
            .await;
        if plan.is_empty() {
            tracing::warn!(model = %canonical_id, "no available provider after filtering");
            return ExecutionOutcome::failed(
                Some(canonical_id.clone()),
                ErrorKind::NoAvailableProvider,
                format!("no available provider for {canonical_id}"),
                Vec::new(),
            );
        }
        plan.truncate(self.config.max_retries);

        let chain_start = Instant::now();
        let deadline_at = options.deadline.map(|d| chain_start + d);
        let plan_len = plan.len();

        let mut attempts: Vec<Attempt> = Vec::with_capacity(plan_len);
        let mut last_error: Option<(ErrorKind, String)> = None;

        for (index, binding) in plan.into_iter().enumerate() {
            let remaining = match deadline_at {
                Some(at) => {
                    let remaining = at.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        tracing::warn!(model = %canonical_id, "deadline exhausted before attempt");
                        return ExecutionOutcome::failed(
                            Some(canonical_id),
                            ErrorKind::DeadlineExceeded,
                            "deadline exceeded",
                            attempts,
                        );
                    }
                    Some(remaining)
                }
                None => None,
            };
            let budget = remaining
                .map(|r| r.min(self.config.provider_timeout))
                .unwrap_or(self.config.provider_timeout);
            let deadline_capped = budget < self.config.provider_timeout;

            tracing::info!(
                model = %canonical_id,
                provider = %binding.provider,
                native = %binding.native_id,
                attempt = index + 1,
                of = plan_len,
                "dispatching attempt"
            );

            let started_at = Utc::now();
            let start = Instant::now();
            let result = tokio::time::timeout(
                budget,
                run(binding.provider.clone(), binding.native_id.clone()),
            )
            .await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(Ok(response)) => {
                    self.health
                        .record_success(&canonical_id, &binding.provider, duration_ms);
                    attempts.push(Attempt {
                        provider: binding.provider.clone(),
                        native_id: binding.native_id.clone(),
                        started_at,
                        duration_ms,
                        success: true,
                        error_kind: None,
                        error: None,
                    });
                    tracing::info!(
                        model = %canonical_id,
                        provider = %binding.provider,
                        duration_ms,
                        "attempt succeeded"
                    );
                    return ExecutionOutcome {
                        success: true,
                        canonical_id: Some(canonical_id),
                        provider: Some(binding.provider),
                        native_id: Some(binding.native_id),
                        response: Some(response),
                        error_kind: None,
                        error: None,
                        attempts,
                    };
                }
                Ok(Err(error)) => {
                    let kind = error.kind();
                    let message = truncate_message(&error.to_string());
                    self.health.record_failure(&canonical_id, &binding.provider);
                    tracing::warn!(
                        model = %canonical_id,
                        provider = %binding.provider,
                        duration_ms,
                        %kind,
                        "attempt failed: {message}"
                    );
                    attempts.push(Attempt {
                        provider: binding.provider.clone(),
                        native_id: binding.native_id.clone(),
                        started_at,
                        duration_ms,
                        success: false,
                        error_kind: Some(kind),
                        error: Some(message.clone()),
                    });
                    last_error = Some((kind, message));
                    if !error.failover_eligible() {
                        break;
                    }
                }
                Err(_elapsed) => {
                    if deadline_capped {
                        // Expiry driven by the caller's deadline, not the
                        // provider's budget.
                        let client_cancel = options
                            .deadline
                            .is_some_and(|d| d < self.config.provider_timeout);
                        let kind = if client_cancel {
                            ErrorKind::Cancelled
                        } else {
                            self.health.record_failure(&canonical_id, &binding.provider);
                            ErrorKind::DeadlineExceeded
                        };
                        tracing::warn!(
                            model = %canonical_id,
                            provider = %binding.provider,
                            duration_ms,
                            %kind,
                            "attempt cut off by caller deadline"
                        );
                        attempts.push(Attempt {
                            provider: binding.provider.clone(),
                            native_id: binding.native_id.clone(),
                            started_at,
                            duration_ms,
                            success: false,
                            error_kind: Some(kind),
                            error: Some("deadline expired".to_string()),
                        });
                        return ExecutionOutcome::failed(
                            Some(canonical_id),
                            kind,
                            "deadline expired",
                            attempts,
                        );
                    }

                    // The provider's own budget ran out: a transient
                    // failure, eligible for failover.
                    self.health.record_failure(&canonical_id, &binding.provider);
                    let message = format!("provider timeout after {duration_ms}ms");
                    tracing::warn!(
                        model = %canonical_id,
                        provider = %binding.provider,
                        duration_ms,
                        "attempt timed out"
                    );
                    attempts.push(Attempt {
                        provider: binding.provider.clone(),
                        native_id: binding.native_id.clone(),
                        started_at,
                        duration_ms,
                        success: false,
                        error_kind: Some(ErrorKind::ProviderTransient),
                        error: Some(message.clone()),
                    });
                    last_error = Some((ErrorKind::ProviderTransient, message));
                }
            }
        }

        let (kind, message) = last_error.unwrap_or((
            ErrorKind::ProviderTransient,
            "all providers failed".to_string(),
        ));
        tracing::error!(
            model = %canonical_id,
            attempts = attempts.len(),
            %kind,
            "all attempts exhausted: {message}"
        );
        ExecutionOutcome::failed(
            Some(canonical_id),
            kind,
            format!("all providers failed, last error: {message}"),
            attempts,
        )
    }
}
