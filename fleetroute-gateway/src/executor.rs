//! # Request Executor
//!
//! End-to-end orchestration of one chat completion: resolve the
//! caller-supplied model identifier, run the failover selector with a
//! dispatch closure bound to the adapter registry, capture the provider's
//! token usage (or estimate it), resolve pricing, compute cost, and
//! persist the finalized outcome record.
//!
//! ## Streaming
//!
//! When the caller asks for a stream, the provider's chunk stream is
//! proxied back without transforming content. Usage accounting happens on
//! the trailing usage chunk when the provider sends one, otherwise by
//! estimating from the emitted deltas. If the caller drops the stream
//! mid-flight, a guard persists the outcome as cancelled; a caller
//! cancellation is not a circuit-breaker failure.
//!
//! ## Adapterless bindings
//!
//! Bindings whose provider has no registered adapter are excluded from the
//! plan up front instead of burning failover attempts and poisoning
//! health state for providers that were never reachable.

use crate::metrics::{MetricsSink, NoopMetrics};
use crate::pricing::{PricingResolver, PricingSource};
use crate::storage::{OutcomeStatus, OutcomeStore, RequestOutcomeRecord};
use async_stream::stream;
use fleetroute_core::error::{ErrorKind, ProviderError};
use fleetroute_core::models::{ChatRequest, ChatResponse, Message, Usage};
use fleetroute_core::providers::{AdapterRegistry, ChunkStream};
use fleetroute_core::registry::{ModelRegistry, SelectionStrategy};
use fleetroute_core::selector::{ExecuteOptions, FailoverSelector, SelectorConfig};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Estimates token counts when a provider omits its usage report.
pub trait TokenEstimator: Send + Sync {
    fn estimate_prompt(&self, messages: &[Message]) -> u32;
    fn estimate_completion(&self, text: &str) -> u32;
}

/// Length-based estimator: roughly one token per four characters, plus a
/// small buffer for message framing.
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate_prompt(&self, messages: &[Message]) -> u32 {
        let chars: usize = messages.iter().map(|m| m.content.len()).sum();
        (chars / 4) as u32 + 50
    }

    fn estimate_completion(&self, text: &str) -> u32 {
        (text.len() / 4) as u32
    }
}

/// One inbound completion request with its routing hints.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// OpenAI-shaped payload; `chat.model` carries the caller's identifier
    pub chat: ChatRequest,
    pub preferred_provider: Option<String>,
    pub required_features: Vec<String>,
    pub max_cost_per_1k_input: Option<f64>,
    pub strategy: Option<SelectionStrategy>,
    /// Total wall-clock budget across all failover attempts
    pub deadline: Option<Duration>,
}

impl CompletionRequest {
    pub fn new(chat: ChatRequest) -> Self {
        Self {
            chat,
            preferred_provider: None,
            required_features: Vec::new(),
            max_cost_per_1k_input: None,
            strategy: None,
            deadline: None,
        }
    }

    pub fn with_preferred_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Finalized result of one executed completion.
#[derive(Debug)]
pub struct CompletionOutcome {
    pub response: Option<ChatResponse>,
    /// The persisted durable record, attempts list included
    pub record: RequestOutcomeRecord,
}

impl CompletionOutcome {
    pub fn is_success(&self) -> bool {
        self.record.status == OutcomeStatus::Completed
    }

    pub fn request_id(&self) -> Uuid {
        self.record.request_id
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.record.error_kind
    }
}

fn status_label(status: OutcomeStatus) -> &'static str {
    match status {
        OutcomeStatus::Completed => "completed",
        OutcomeStatus::Failed => "failed",
        OutcomeStatus::Cancelled => "cancelled",
    }
}

/// Orchestrates completions across the registry, selector, adapters,
/// pricing, persistence, and metrics.
pub struct RequestExecutor {
    registry: Arc<ModelRegistry>,
    selector: FailoverSelector,
    adapters: Arc<AdapterRegistry>,
    pricing: Arc<PricingResolver>,
    outcomes: Arc<dyn OutcomeStore>,
    metrics: Arc<dyn MetricsSink>,
    estimator: Arc<dyn TokenEstimator>,
}

impl RequestExecutor {
    pub fn new(
        registry: Arc<ModelRegistry>,
        adapters: Arc<AdapterRegistry>,
        outcomes: Arc<dyn OutcomeStore>,
    ) -> Self {
        let selector = FailoverSelector::new(registry.clone(), SelectorConfig::default());
        Self {
            registry,
            selector,
            adapters,
            pricing: Arc::new(PricingResolver::new()),
            outcomes,
            metrics: Arc::new(NoopMetrics),
            estimator: Arc::new(HeuristicEstimator),
        }
    }

    pub fn with_selector_config(mut self, config: SelectorConfig) -> Self {
        self.selector = FailoverSelector::new(self.registry.clone(), config);
        self
    }

    pub fn with_pricing(mut self, pricing: Arc<PricingResolver>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Execute a non-streaming completion end to end.
    pub async fn execute(&self, request: CompletionRequest) -> CompletionOutcome {
        let start = Instant::now();
        let mut record = RequestOutcomeRecord::pending(&request.chat.model);
        let options = self.execute_options(&request).await;

        let adapters = self.adapters.clone();
        let chat = request.chat.clone();
        let outcome = self
            .selector
            .execute(&request.chat.model, &options, move |provider, native_id| {
                let adapters = adapters.clone();
                let chat = chat.clone();
                async move {
                    let adapter =
                        adapters
                            .get(&provider)
                            .ok_or_else(|| ProviderError::Configuration {
                                message: format!("no adapter registered for {provider}"),
                            })?;
                    adapter.complete(&native_id, chat).await
                }
            })
            .await;

        record.canonical_id = outcome.canonical_id.clone();
        record.attempts = outcome.attempts.clone();
        record.provider = outcome.provider.clone();
        record.native_id = outcome.native_id.clone();

        let response = if outcome.success {
            let canonical = outcome.canonical_id.as_deref().unwrap_or_default();
            let provider = outcome.provider.as_deref().unwrap_or_default();
            let native = outcome.native_id.as_deref().unwrap_or_default();
            let response = outcome.response.expect("successful outcome carries a response");

            let usage = response.usage.unwrap_or_else(|| {
                let completion_text: String = response
                    .choices
                    .iter()
                    .map(|c| c.message.content.as_str())
                    .collect();
                Usage::new(
                    self.estimator.estimate_prompt(&request.chat.messages),
                    self.estimator.estimate_completion(&completion_text),
                )
            });

            self.attach_usage_and_cost(&mut record, canonical, provider, native, usage)
                .await;
            record.status = OutcomeStatus::Completed;
            Some(response)
        } else {
            record.status = if outcome.error_kind == Some(ErrorKind::Cancelled) {
                OutcomeStatus::Cancelled
            } else {
                OutcomeStatus::Failed
            };
            record.error_kind = outcome.error_kind;
            record.error = outcome.error.clone();
            None
        };

        record.processing_time_ms = start.elapsed().as_millis() as u64;
        self.emit_metrics(&record);
        self.persist(record.clone()).await;

        CompletionOutcome { response, record }
    }

    /// Execute a streaming completion.
    ///
    /// On success the returned stream proxies the provider's chunks; the
    /// outcome record is persisted when the stream completes, or as
    /// cancelled if the caller drops it early. Pre-stream failures
    /// (unknown model, no provider, every attempt failed) are persisted
    /// immediately and returned as the error value.
    pub async fn execute_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<ChunkStream, CompletionOutcome> {
        let start = Instant::now();
        let mut record = RequestOutcomeRecord::pending(&request.chat.model);
        let options = self.execute_options(&request).await;

        let adapters = self.adapters.clone();
        let chat = request.chat.clone();
        let outcome = self
            .selector
            .execute(&request.chat.model, &options, move |provider, native_id| {
                let adapters = adapters.clone();
                let chat = chat.clone();
                async move {
                    let adapter =
                        adapters
                            .get(&provider)
                            .ok_or_else(|| ProviderError::Configuration {
                                message: format!("no adapter registered for {provider}"),
                            })?;
                    adapter.stream(&native_id, chat).await
                }
            })
            .await;

        record.canonical_id = outcome.canonical_id.clone();
        record.attempts = outcome.attempts.clone();
        record.provider = outcome.provider.clone();
        record.native_id = outcome.native_id.clone();

        if !outcome.success {
            record.status = if outcome.error_kind == Some(ErrorKind::Cancelled) {
                OutcomeStatus::Cancelled
            } else {
                OutcomeStatus::Failed
            };
            record.error_kind = outcome.error_kind;
            record.error = outcome.error.clone();
            record.processing_time_ms = start.elapsed().as_millis() as u64;
            self.emit_metrics(&record);
            self.persist(record.clone()).await;
            return Err(CompletionOutcome {
                response: None,
                record,
            });
        }

        let canonical = outcome.canonical_id.clone().unwrap_or_default();
        let provider = outcome.provider.clone().unwrap_or_default();
        let native = outcome.native_id.clone().unwrap_or_default();
        let inner = outcome.response.expect("successful outcome carries a stream");

        let mut guard = StreamGuard {
            record: Some(record),
            outcomes: self.outcomes.clone(),
            metrics: self.metrics.clone(),
        };
        let registry = self.registry.clone();
        let pricing = self.pricing.clone();
        let outcomes = self.outcomes.clone();
        let metrics = self.metrics.clone();
        let estimator = self.estimator.clone();
        let prompt_messages = request.chat.messages.clone();

        let wrapped = stream! {
            let mut inner = inner;
            let mut emitted = String::new();
            let mut trailing_usage: Option<Usage> = None;

            while let Some(chunk) = inner.next().await {
                if let Ok(chunk) = &chunk {
                    if chunk.usage.is_some() {
                        trailing_usage = chunk.usage;
                    }
                    for choice in &chunk.choices {
                        if let Some(content) = &choice.delta.content {
                            emitted.push_str(content);
                        }
                    }
                }
                yield chunk;
            }

            // Normal completion: disarm the cancellation guard and persist
            // the finalized record.
            if let Some(mut record) = guard.disarm() {
                let usage = trailing_usage.unwrap_or_else(|| {
                    Usage::new(
                        estimator.estimate_prompt(&prompt_messages),
                        estimator.estimate_completion(&emitted),
                    )
                });
                attach_usage_and_cost(
                    &registry,
                    &pricing,
                    &mut record,
                    &canonical,
                    &provider,
                    &native,
                    usage,
                )
                .await;
                record.status = OutcomeStatus::Completed;
                record.processing_time_ms = start.elapsed().as_millis() as u64;
                emit_metrics(metrics.as_ref(), &registry, &record);
                if let Err(e) = outcomes.insert_outcome(record).await {
                    tracing::error!("failed to persist streaming outcome: {e}");
                }
            }
        };

        Ok(Box::pin(wrapped))
    }

    /// Build selector options, excluding bindings whose provider has no
    /// registered adapter.
    async fn execute_options(&self, request: &CompletionRequest) -> ExecuteOptions {
        let mut excluded = Vec::new();
        if let Some(canonical) = self.registry.resolve(&request.chat.model).await {
            if let Some(model) = self.registry.get(&canonical).await {
                for binding in &model.bindings {
                    if !self.adapters.contains(&binding.provider) {
                        tracing::debug!(
                            model = %canonical,
                            provider = %binding.provider,
                            "binding excluded, no adapter registered"
                        );
                        excluded.push(binding.provider.clone());
                    }
                }
            }
        }
        ExecuteOptions {
            strategy: request.strategy,
            preferred_provider: request.preferred_provider.clone(),
            required_features: request.required_features.clone(),
            max_cost_per_1k_input: request.max_cost_per_1k_input,
            excluded,
            deadline: request.deadline,
        }
    }

    async fn attach_usage_and_cost(
        &self,
        record: &mut RequestOutcomeRecord,
        canonical: &str,
        provider: &str,
        native: &str,
        usage: Usage,
    ) {
        attach_usage_and_cost(
            &self.registry,
            &self.pricing,
            record,
            canonical,
            provider,
            native,
            usage,
        )
        .await
    }

    fn emit_metrics(&self, record: &RequestOutcomeRecord) {
        emit_metrics(self.metrics.as_ref(), &self.registry, record)
    }

    async fn persist(&self, record: RequestOutcomeRecord) {
        if let Err(e) = self.outcomes.insert_outcome(record).await {
            tracing::error!("failed to persist request outcome: {e}");
        }
    }
}

async fn attach_usage_and_cost(
    registry: &ModelRegistry,
    pricing: &PricingResolver,
    record: &mut RequestOutcomeRecord,
    canonical: &str,
    provider: &str,
    native: &str,
    usage: Usage,
) {
    record.input_tokens = Some(usage.prompt_tokens);
    record.output_tokens = Some(usage.completion_tokens);

    let binding_pricing = registry.get(canonical).await.and_then(|model| {
        model
            .binding(provider)
            .and_then(|b| match (b.input_cost, b.output_cost) {
                (Some(input), Some(output)) => Some((input, output)),
                _ => None,
            })
    });

    let resolved = pricing
        .resolve(canonical, provider, native, binding_pricing)
        .await;
    record.pricing_source = Some(resolved.source);

    if resolved.source == PricingSource::Unknown {
        // Unknown pricing never fails the request; costs stay null.
        tracing::warn!(
            model = %canonical,
            provider = %provider,
            "pricing missing, persisting outcome without costs"
        );
        return;
    }

    let cost = resolved.cost(usage.prompt_tokens, usage.completion_tokens);
    record.input_cost = Some(cost.input_cost);
    record.output_cost = Some(cost.output_cost);
    record.total_cost = Some(cost.total_cost);
}

fn emit_metrics(metrics: &dyn MetricsSink, registry: &ModelRegistry, record: &RequestOutcomeRecord) {
    let model = record.canonical_id.as_deref().unwrap_or("unknown");
    let provider = record.provider.as_deref().unwrap_or("none");
    metrics.record_request(provider, model, status_label(record.status));
    metrics.record_latency(provider, model, record.processing_time_ms);
    if record.provider.is_some() {
        let score = registry.health().success_rate(model, provider);
        metrics.record_health_score(provider, model, score);
    }
}

/// Persists a cancelled outcome when a streaming caller walks away before
/// the stream finishes.
struct StreamGuard {
    record: Option<RequestOutcomeRecord>,
    outcomes: Arc<dyn OutcomeStore>,
    metrics: Arc<dyn MetricsSink>,
}

impl StreamGuard {
    fn disarm(&mut self) -> Option<RequestOutcomeRecord> {
        self.record.take()
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Some(mut record) = self.record.take() {
            record.status = OutcomeStatus::Cancelled;
            record.error_kind = Some(ErrorKind::Cancelled);
            record.error = Some("stream dropped by caller".to_string());
            let model = record.canonical_id.clone().unwrap_or_else(|| "unknown".to_string());
            let provider = record.provider.clone().unwrap_or_else(|| "none".to_string());
            self.metrics
                .record_request(&provider, &model, status_label(record.status));
            let outcomes = self.outcomes.clone();
            tokio::spawn(async move {
                if let Err(e) = outcomes.insert_outcome(record).await {
                    tracing::error!("failed to persist cancelled outcome: {e}");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::InMemoryMetrics;
    use crate::storage::MemoryStore;
    use fleetroute_core::health::HealthTracker;
    use fleetroute_core::models::{Choice, StreamChoice, StreamChunk};
    use fleetroute_core::providers::ProviderAdapter;
    use fleetroute_core::registry::{CanonicalModel, ProviderBinding};

    enum Mode {
        Ok { with_usage: bool },
        Fail(u16),
        Stream { with_usage: bool },
    }

    struct MockAdapter {
        slug: &'static str,
        mode: Mode,
    }

    fn chunk(content: &str, usage: Option<Usage>) -> StreamChunk {
        StreamChunk {
            id: "chunk".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "m".to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta: fleetroute_core::models::Delta {
                    role: None,
                    content: Some(content.to_string()),
                    tool_calls: None,
                },
                finish_reason: None,
            }],
            usage,
        }
    }

    #[async_trait::async_trait]
    impl ProviderAdapter for MockAdapter {
        fn slug(&self) -> &str {
            self.slug
        }

        async fn complete(
            &self,
            native_id: &str,
            request: ChatRequest,
        ) -> Result<ChatResponse, ProviderError> {
            match &self.mode {
                Mode::Ok { with_usage } => Ok(ChatResponse {
                    id: "resp-1".to_string(),
                    object: "chat.completion".to_string(),
                    created: 0,
                    model: native_id.to_string(),
                    choices: vec![Choice {
                        index: 0,
                        message: Message::assistant("four token answer"),
                        finish_reason: Some("stop".to_string()),
                        logprobs: None,
                    }],
                    usage: with_usage.then(|| Usage::new(400, 120)),
                    system_fingerprint: None,
                }),
                Mode::Fail(code) => Err(ProviderError::Api {
                    code: *code,
                    message: format!("mock failure from {}", request.model),
                }),
                Mode::Stream { .. } => unreachable!("complete called on streaming mock"),
            }
        }

        async fn stream(
            &self,
            _native_id: &str,
            _request: ChatRequest,
        ) -> Result<ChunkStream, ProviderError> {
            match &self.mode {
                Mode::Stream { with_usage } => {
                    let chunks = vec![
                        Ok(chunk("hel", None)),
                        Ok(chunk("lo", with_usage.then(|| Usage::new(10, 2)))),
                    ];
                    Ok(Box::pin(futures::stream::iter(chunks)))
                }
                _ => Err(ProviderError::Configuration {
                    message: "not a streaming mock".to_string(),
                }),
            }
        }
    }

    struct Fixture {
        executor: RequestExecutor,
        store: Arc<MemoryStore>,
        metrics: Arc<InMemoryMetrics>,
        registry: Arc<ModelRegistry>,
    }

    async fn fixture(adapters: Vec<MockAdapter>) -> Fixture {
        let registry = Arc::new(ModelRegistry::new(Arc::new(HealthTracker::default())));
        registry
            .register(
                CanonicalModel::new("llama-3.3-70b", "Llama 3.3 70B")
                    .with_binding(
                        ProviderBinding::new("alpha", "alpha/llama")
                            .with_priority(1)
                            .with_pricing(2.5e-6, 1.0e-5),
                    )
                    .with_binding(ProviderBinding::new("beta", "beta/llama").with_priority(2)),
            )
            .await
            .unwrap();

        let adapter_registry = Arc::new(AdapterRegistry::new());
        for adapter in adapters {
            adapter_registry.register(adapter);
        }

        let store = MemoryStore::shared();
        let metrics = Arc::new(InMemoryMetrics::new());
        let executor = RequestExecutor::new(registry.clone(), adapter_registry, store.clone())
            .with_metrics(metrics.clone());

        Fixture {
            executor,
            store,
            metrics,
            registry,
        }
    }

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest::new(ChatRequest {
            model: model.to_string(),
            messages: vec![Message::user("hello there")],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn success_persists_usage_and_catalog_cost() {
        let fixture = fixture(vec![MockAdapter {
            slug: "alpha",
            mode: Mode::Ok { with_usage: true },
        }])
        .await;

        let outcome = fixture.executor.execute(request("llama-3.3-70b")).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.record.provider.as_deref(), Some("alpha"));

        let stored = fixture.store.outcomes().await;
        assert_eq!(stored.len(), 1);
        let record = &stored[0];
        assert_eq!(record.input_tokens, Some(400));
        assert_eq!(record.output_tokens, Some(120));
        assert_eq!(record.pricing_source, Some(PricingSource::Catalog));
        assert!((record.input_cost.unwrap() - 0.001).abs() < 1e-12);
        assert!((record.output_cost.unwrap() - 0.0012).abs() < 1e-12);
        assert!((record.total_cost.unwrap() - 0.0022).abs() < 1e-12);

        assert_eq!(
            fixture.metrics.counter_value(
                "requests_total",
                &[
                    ("provider", "alpha"),
                    ("model", "llama-3.3-70b"),
                    ("status", "completed"),
                ],
            ),
            1
        );
    }

    #[tokio::test]
    async fn failover_reaches_the_secondary_adapter() {
        let fixture = fixture(vec![
            MockAdapter {
                slug: "alpha",
                mode: Mode::Fail(503),
            },
            MockAdapter {
                slug: "beta",
                mode: Mode::Ok { with_usage: true },
            },
        ])
        .await;

        let outcome = fixture.executor.execute(request("llama-3.3-70b")).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.record.provider.as_deref(), Some("beta"));
        assert_eq!(outcome.record.attempts.len(), 2);
        // beta has no binding pricing and no other source.
        assert_eq!(outcome.record.pricing_source, Some(PricingSource::Unknown));
        assert_eq!(outcome.record.total_cost, None);
    }

    #[tokio::test]
    async fn adapterless_bindings_are_skipped_without_health_damage() {
        // Only beta has an adapter; alpha is excluded up front.
        let fixture = fixture(vec![MockAdapter {
            slug: "beta",
            mode: Mode::Ok { with_usage: true },
        }])
        .await;

        let outcome = fixture.executor.execute(request("llama-3.3-70b")).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.record.provider.as_deref(), Some("beta"));
        assert_eq!(outcome.record.attempts.len(), 1);
        assert!(fixture
            .registry
            .health()
            .snapshot("llama-3.3-70b", "alpha")
            .is_none());
    }

    #[tokio::test]
    async fn exhausted_plan_persists_a_failed_outcome() {
        let fixture = fixture(vec![
            MockAdapter {
                slug: "alpha",
                mode: Mode::Fail(502),
            },
            MockAdapter {
                slug: "beta",
                mode: Mode::Fail(500),
            },
        ])
        .await;

        let outcome = fixture.executor.execute(request("llama-3.3-70b")).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.error_kind(), Some(ErrorKind::ProviderTransient));

        let stored = fixture.store.outcomes().await;
        assert_eq!(stored[0].status, OutcomeStatus::Failed);
        assert_eq!(stored[0].attempts.len(), 2);
        assert!(stored[0].error.as_ref().unwrap().contains("mock failure"));
    }

    #[tokio::test]
    async fn unknown_model_is_persisted_without_health_entries() {
        let fixture = fixture(vec![]).await;

        let outcome = fixture.executor.execute(request("no-such-model")).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.error_kind(), Some(ErrorKind::UnknownModel));

        let stored = fixture.store.outcomes().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].canonical_id, None);
        assert!(stored[0].attempts.is_empty());
        assert_eq!(fixture.registry.health().tracked_pairs(), 0);
    }

    #[tokio::test]
    async fn missing_usage_falls_back_to_the_estimator() {
        let fixture = fixture(vec![MockAdapter {
            slug: "alpha",
            mode: Mode::Ok { with_usage: false },
        }])
        .await;

        let outcome = fixture.executor.execute(request("llama-3.3-70b")).await;
        assert!(outcome.is_success());
        let record = &outcome.record;
        // "hello there" is 11 chars -> 2 + 50 buffer.
        assert_eq!(record.input_tokens, Some(52));
        // "four token answer" is 17 chars -> 4.
        assert_eq!(record.output_tokens, Some(4));
        assert!(record.total_cost.is_some());
    }

    #[tokio::test]
    async fn streaming_proxies_chunks_and_persists_trailing_usage() {
        let fixture = fixture(vec![MockAdapter {
            slug: "alpha",
            mode: Mode::Stream { with_usage: true },
        }])
        .await;

        let stream = fixture
            .executor
            .execute_stream(request("llama-3.3-70b"))
            .await
            .unwrap();
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 2);

        let stored = fixture.store.outcomes().await;
        assert_eq!(stored.len(), 1);
        let record = &stored[0];
        assert_eq!(record.status, OutcomeStatus::Completed);
        assert_eq!(record.input_tokens, Some(10));
        assert_eq!(record.output_tokens, Some(2));
        assert_eq!(record.pricing_source, Some(PricingSource::Catalog));
    }

    #[tokio::test]
    async fn streaming_without_usage_counts_emitted_tokens() {
        let fixture = fixture(vec![MockAdapter {
            slug: "alpha",
            mode: Mode::Stream { with_usage: false },
        }])
        .await;

        let stream = fixture
            .executor
            .execute_stream(request("llama-3.3-70b"))
            .await
            .unwrap();
        let _chunks: Vec<_> = stream.collect().await;

        let stored = fixture.store.outcomes().await;
        let record = &stored[0];
        assert_eq!(record.status, OutcomeStatus::Completed);
        // "hello" emitted -> 5 chars -> 1 token.
        assert_eq!(record.output_tokens, Some(1));
    }

    #[tokio::test]
    async fn dropped_stream_persists_a_cancelled_outcome() {
        let fixture = fixture(vec![MockAdapter {
            slug: "alpha",
            mode: Mode::Stream { with_usage: true },
        }])
        .await;

        let mut stream = fixture
            .executor
            .execute_stream(request("llama-3.3-70b"))
            .await
            .unwrap();
        let first = stream.next().await;
        assert!(first.is_some());
        drop(stream);

        // The guard persists from a spawned task.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stored = fixture.store.outcomes().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, OutcomeStatus::Cancelled);
        assert_eq!(stored[0].error_kind, Some(ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn stream_failure_before_first_chunk_is_returned_and_persisted() {
        let fixture = fixture(vec![]).await;

        let result = fixture
            .executor
            .execute_stream(request("no-such-model"))
            .await;
        let outcome = result.err().unwrap();
        assert_eq!(outcome.error_kind(), Some(ErrorKind::UnknownModel));
        assert_eq!(fixture.store.outcome_count().await, 1);
    }
}
